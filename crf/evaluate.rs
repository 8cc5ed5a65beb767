//! # Leave-One-Out Evaluation
//!
//! Every unit is held out once. For the held-out unit the model is refitted on an
//! independent copy of the data with that unit removed, then the unit is predicted
//! from its own features and the observed values of all other units in the full
//! dataset. Absolute errors are recorded per estimator and summarised at the end.
//!
//! Folds only read the shared, immutable full dataset and write their own record,
//! so they run in parallel on the rayon pool by default. Records are collected in
//! unit order regardless of completion order, and a fold that fails (most often an
//! ADMM solve that ran out of iterations) is recorded as such without affecting the
//! others.

use crate::admm::{AdmmConfig, EstimationError};
use crate::dataset::{DatasetError, MINIMUM_UNITS, UnitDataset};
use crate::model::{CrfModel, Estimator, ModelError};
use crate::pairwise::{PairwiseDesign, build_pairwise_design};
use crate::progress::{EvaluationStage, FoldProgressObserver};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Failed to read or write evaluation file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize report to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error(transparent)]
    Estimation(#[from] EstimationError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("All {folds} folds failed; there are no errors to summarise.")]
    AllFoldsFailed { folds: usize },
}

/// Settings for a leave-one-out run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub admm: AdmmConfig,
    /// Run folds on the rayon pool instead of one after another.
    pub parallel: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            admm: AdmmConfig::default(),
            parallel: true,
        }
    }
}

impl EvaluationConfig {
    /// Loads and validates a configuration from a TOML file. Missing keys take
    /// their defaults.
    pub fn load(path: &Path) -> Result<Self, EvaluationError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.admm.validate()?;
        Ok(config)
    }
}

/// Predictions for a held-out unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FoldEstimates {
    pub median: f64,
    pub mean: f64,
    pub unit_iterations: usize,
    pub pairwise_iterations: usize,
}

impl FoldEstimates {
    pub fn estimate(&self, estimator: Estimator) -> f64 {
        match estimator {
            Estimator::Median => self.median,
            Estimator::Mean => self.mean,
        }
    }
}

/// Why a fold produced no prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FoldFailure {
    NonConvergence { iterations: usize, residual: f64 },
    Estimation { message: String },
    Dataset { message: String },
    Inference { message: String },
}

impl From<EstimationError> for FoldFailure {
    fn from(err: EstimationError) -> Self {
        match err {
            EstimationError::NonConvergence {
                iterations,
                residual,
            } => Self::NonConvergence {
                iterations,
                residual,
            },
            other => Self::Estimation {
                message: other.to_string(),
            },
        }
    }
}

impl From<DatasetError> for FoldFailure {
    fn from(err: DatasetError) -> Self {
        Self::Dataset {
            message: err.to_string(),
        }
    }
}

impl From<ModelError> for FoldFailure {
    fn from(err: ModelError) -> Self {
        Self::Inference {
            message: err.to_string(),
        }
    }
}

/// The result of holding out one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldRecord {
    /// 1-based unit id.
    pub unit: usize,
    /// Observed target value of the unit.
    pub actual: f64,
    pub outcome: Result<FoldEstimates, FoldFailure>,
}

impl FoldRecord {
    pub fn absolute_error(&self, estimator: Estimator) -> Option<f64> {
        self.outcome
            .as_ref()
            .ok()
            .map(|estimates| (estimates.estimate(estimator) - self.actual).abs())
    }
}

/// Error statistics of one estimator over the successful folds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub estimator: Estimator,
    pub folds: usize,
    pub mean_absolute_error: f64,
    /// Population standard deviation of the absolute errors.
    pub std_absolute_error: f64,
    /// Mean absolute error divided by the mean of the full target vector.
    pub mean_relative_error: f64,
}

impl ErrorSummary {
    pub fn from_errors(estimator: Estimator, errors: &[f64], target_mean: f64) -> Self {
        let folds = errors.len();
        let count = folds as f64;
        let mean_absolute_error = errors.iter().sum::<f64>() / count;
        let variance = errors
            .iter()
            .map(|e| (e - mean_absolute_error).powi(2))
            .sum::<f64>()
            / count;
        Self {
            estimator,
            folds,
            mean_absolute_error,
            std_absolute_error: variance.sqrt(),
            mean_relative_error: mean_absolute_error / target_mean,
        }
    }
}

/// Per-fold records and per-estimator summaries of a leave-one-out run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveOneOutReport {
    pub units: usize,
    pub target_mean: f64,
    pub folds: Vec<FoldRecord>,
    pub summaries: Vec<ErrorSummary>,
}

impl LeaveOneOutReport {
    /// Summarises `folds` for every estimator. Failed folds are excluded from the
    /// statistics but kept in the record list.
    pub fn from_folds(
        target_mean: f64,
        folds: Vec<FoldRecord>,
    ) -> Result<Self, EvaluationError> {
        let units = folds.len();
        let mut summaries = Vec::with_capacity(Estimator::ALL.len());
        for estimator in Estimator::ALL {
            let errors: Vec<f64> = folds
                .iter()
                .filter_map(|fold| fold.absolute_error(estimator))
                .collect();
            if errors.is_empty() {
                return Err(EvaluationError::AllFoldsFailed { folds: units });
            }
            summaries.push(ErrorSummary::from_errors(estimator, &errors, target_mean));
        }
        Ok(Self {
            units,
            target_mean,
            folds,
            summaries,
        })
    }

    pub fn summary(&self, estimator: Estimator) -> Option<&ErrorSummary> {
        self.summaries.iter().find(|s| s.estimator == estimator)
    }

    /// Absolute errors of `estimator`, one per successful fold, in unit order.
    pub fn absolute_errors(&self, estimator: Estimator) -> Vec<f64> {
        self.folds
            .iter()
            .filter_map(|fold| fold.absolute_error(estimator))
            .collect()
    }

    pub fn failed_units(&self) -> Vec<usize> {
        self.folds
            .iter()
            .filter(|fold| fold.outcome.is_err())
            .map(|fold| fold.unit)
            .collect()
    }

    /// Saves the report to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), EvaluationError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/// Holds out `unit` (1-based): refits on the reduced copy of `dataset`, then
/// predicts the unit against the full data and its pairwise design `full_pairwise`.
pub fn evaluate_fold(
    dataset: &UnitDataset,
    full_pairwise: &PairwiseDesign,
    unit: usize,
    admm: &AdmmConfig,
) -> FoldRecord {
    let actual = dataset
        .unit_index(unit)
        .map(|index| dataset.target()[index])
        .unwrap_or(f64::NAN);
    let outcome = fit_and_predict(dataset, full_pairwise, unit, admm);
    if let Err(failure) = &outcome {
        log::warn!("Fold for unit {} failed: {:?}", unit, failure);
    }
    FoldRecord {
        unit,
        actual,
        outcome,
    }
}

fn fit_and_predict(
    dataset: &UnitDataset,
    full_pairwise: &PairwiseDesign,
    unit: usize,
    admm: &AdmmConfig,
) -> Result<FoldEstimates, FoldFailure> {
    let reduced = dataset.without_unit(unit)?;
    let model = CrfModel::fit(&reduced, admm)?;
    let estimate = model.infer_unit(dataset, full_pairwise, unit)?;
    Ok(FoldEstimates {
        median: estimate.value(Estimator::Median),
        mean: estimate.value(Estimator::Mean),
        unit_iterations: model.diagnostics.unit_iterations,
        pairwise_iterations: model.diagnostics.pairwise_iterations,
    })
}

/// Runs the full leave-one-out evaluation over every unit of `dataset`.
pub fn evaluate_leave_one_out(
    dataset: &UnitDataset,
    config: &EvaluationConfig,
    progress: &dyn FoldProgressObserver,
) -> Result<LeaveOneOutReport, EvaluationError> {
    config.admm.validate()?;
    let units = dataset.num_units();
    if units <= MINIMUM_UNITS {
        return Err(DatasetError::TooFewUnits {
            found: units,
            required: MINIMUM_UNITS + 1,
        }
        .into());
    }

    log::info!(
        "Starting leave-one-out evaluation over {} units ({} features, {})",
        units,
        dataset.num_features(),
        if config.parallel { "parallel" } else { "sequential" }
    );

    progress.on_stage_start(EvaluationStage::FullDesign, 1);
    let full_pairwise = build_pairwise_design(dataset);
    progress.on_stage_finish(EvaluationStage::FullDesign);

    progress.on_stage_start(EvaluationStage::Folds, units);
    let run = |unit: usize| {
        let record = evaluate_fold(dataset, &full_pairwise, unit, &config.admm);
        progress.on_fold_finished(unit, record.outcome.is_ok());
        record
    };
    let folds: Vec<FoldRecord> = if config.parallel {
        (1..=units).into_par_iter().map(&run).collect()
    } else {
        (1..=units).map(&run).collect()
    };
    progress.on_stage_finish(EvaluationStage::Folds);

    progress.on_stage_start(EvaluationStage::Summary, Estimator::ALL.len());
    let report = LeaveOneOutReport::from_folds(dataset.target_mean(), folds)?;
    progress.on_stage_finish(EvaluationStage::Summary);

    let failed = report.failed_units();
    if !failed.is_empty() {
        log::warn!("{} of {} folds failed: units {:?}", failed.len(), units, failed);
    }
    for summary in &report.summaries {
        log::info!(
            "{}: mae {:.6}, std {:.6}, mre {:.6} over {} folds",
            summary.estimator.describe(),
            summary.mean_absolute_error,
            summary.std_absolute_error,
            summary.mean_relative_error,
            summary.folds
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopFoldProgress;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2};

    fn evaluated(unit: usize, actual: f64, median: f64, mean: f64) -> FoldRecord {
        FoldRecord {
            unit,
            actual,
            outcome: Ok(FoldEstimates {
                median,
                mean,
                unit_iterations: 1,
                pairwise_iterations: 1,
            }),
        }
    }

    #[test]
    fn summary_uses_population_standard_deviation() {
        let summary = ErrorSummary::from_errors(Estimator::Median, &[1.0, 2.0, 3.0, 4.0], 5.0);
        assert_eq!(summary.folds, 4);
        assert_abs_diff_eq!(summary.mean_absolute_error, 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(summary.std_absolute_error, 1.25_f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(summary.mean_relative_error, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn failed_folds_are_kept_but_not_summarised() {
        let folds = vec![
            evaluated(1, 10.0, 11.0, 14.0),
            evaluated(2, 20.0, 19.0, 20.0),
            FoldRecord {
                unit: 3,
                actual: 30.0,
                outcome: Err(FoldFailure::NonConvergence {
                    iterations: 10,
                    residual: 3.5,
                }),
            },
        ];
        let report = LeaveOneOutReport::from_folds(20.0, folds).unwrap();

        assert_eq!(report.units, 3);
        assert_eq!(report.failed_units(), vec![3]);
        assert_eq!(report.absolute_errors(Estimator::Median), vec![1.0, 1.0]);
        assert_eq!(report.absolute_errors(Estimator::Mean), vec![4.0, 0.0]);

        let median = report.summary(Estimator::Median).unwrap();
        assert_eq!(median.folds, 2);
        assert_abs_diff_eq!(median.mean_absolute_error, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(median.std_absolute_error, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(median.mean_relative_error, 0.05, epsilon = 1e-12);

        let mean = report.summary(Estimator::Mean).unwrap();
        assert_abs_diff_eq!(mean.mean_absolute_error, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(mean.std_absolute_error, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn exhausted_iteration_budget_fails_every_fold_without_panicking() {
        let units = 5;
        let features = Array2::from_shape_fn((units, 2), |(i, k)| if k == 0 { 1.0 } else { i as f64 });
        let target = Array1::from_shape_fn(units, |i| (i * i) as f64 - 3.0 * i as f64 + 0.5);
        let relation = Array2::from_shape_fn((units, units), |(i, j)| (i + 2 * j) as f64);
        let data = UnitDataset::new(features, target, relation.clone(), relation.t().to_owned())
            .unwrap();
        let config = EvaluationConfig {
            admm: AdmmConfig {
                max_iterations: 1,
                tolerance: 0.0,
                ..AdmmConfig::default()
            },
            parallel: false,
        };

        let full_pairwise = build_pairwise_design(&data);
        let record = evaluate_fold(&data, &full_pairwise, 2, &config.admm);
        assert_eq!(record.actual, -1.5);
        assert!(matches!(
            record.outcome,
            Err(FoldFailure::NonConvergence { iterations: 1, .. })
        ));

        match evaluate_leave_one_out(&data, &config, &NoopFoldProgress) {
            Err(EvaluationError::AllFoldsFailed { folds }) => assert_eq!(folds, units),
            other => panic!("Expected AllFoldsFailed, got {:?}", other),
        }
    }

    #[test]
    fn two_units_are_too_few_to_evaluate() {
        let data = UnitDataset::new(
            Array2::ones((2, 1)),
            Array1::ones(2),
            Array2::zeros((2, 2)),
            Array2::zeros((2, 2)),
        )
        .unwrap();
        assert!(matches!(
            evaluate_leave_one_out(&data, &EvaluationConfig::default(), &NoopFoldProgress),
            Err(EvaluationError::Dataset(DatasetError::TooFewUnits { found: 2, required: 3 }))
        ));
    }

    #[test]
    fn config_loads_with_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evaluation.toml");
        fs::write(&path, "parallel = false\n\n[admm]\nmax_iterations = 250\n").unwrap();
        let config = EvaluationConfig::load(&path).unwrap();
        assert!(!config.parallel);
        assert_eq!(config.admm.max_iterations, 250);
        assert_eq!(config.admm.rho, 1.0);
        assert_eq!(config.admm.tolerance, 0.1);
    }

    #[test]
    fn invalid_config_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evaluation.toml");
        fs::write(&path, "[admm]\nrho = -1.0\n").unwrap();
        assert!(matches!(
            EvaluationConfig::load(&path),
            Err(EvaluationError::Estimation(EstimationError::InvalidConfig(_)))
        ));
    }
}
