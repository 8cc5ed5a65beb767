use crate::admm::{AdmmConfig, EstimationError, solve_l1_regression};
use crate::dataset::{DatasetError, UnitDataset};
use crate::median::{BreakpointMinimum, MedianError, candidate_mean, solve_abs_deviation};
use crate::pairwise::{PAIR_FEATURES, PairwiseDesign, build_pairwise_design};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

// --- Public Data Structures ---
// The fitted model is a plain pair of coefficient vectors plus the solver settings
// that produced them, serialized to TOML as a self-describing artifact.

/// Fitted parameters of the two-clique model
/// `min_{α, w} ‖Xα − Y‖₁ + ‖Fw − Yp‖₁`.
///
/// The two terms share no parameters, so `α` and `w` come from two independent
/// L1 fits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrfModel {
    /// Unit-level coefficients, one per column of `X`.
    pub alpha: Array1<f64>,
    /// Pairwise coefficients for `[F_dist, F_flow]`.
    pub w: Array1<f64>,
    /// Solver settings used for both fits.
    pub admm: AdmmConfig,
    pub diagnostics: FitDiagnostics,
}

/// ADMM iteration counts of the two sub-fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    pub unit_iterations: usize,
    pub pairwise_iterations: usize,
}

/// Point estimators for a held-out unit. Neither is preferred by the model, so
/// callers name the one they want.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Estimator {
    /// Minimiser of the summed absolute deviation to all candidates.
    Median,
    /// Arithmetic mean of the candidates.
    Mean,
}

impl Estimator {
    pub const ALL: [Estimator; 2] = [Estimator::Median, Estimator::Mean];

    pub fn describe(self) -> &'static str {
        match self {
            Self::Median => "1-norm (median) inference",
            Self::Mean => "2-norm (mean) inference",
        }
    }
}

/// The candidate predictions for one unit and both estimates drawn from them.
#[derive(Debug, Clone, PartialEq)]
pub struct HeldOutEstimate {
    /// `α·x_i` first, then `Y_j + w·f_ij` for every other unit `j` in ascending order.
    pub candidates: Vec<f64>,
    pub median: BreakpointMinimum,
    pub mean: f64,
}

impl HeldOutEstimate {
    pub fn value(&self, estimator: Estimator) -> f64 {
        match estimator {
            Estimator::Median => self.median.value,
            Estimator::Mean => self.mean,
        }
    }
}

/// Custom error type for inference, loading and saving.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Median(#[from] MedianError),
    #[error("Model {what} has {found} coefficients, but the data provides {expected} columns.")]
    MismatchedCoefficients {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error(
        "Pairwise design covers {pairwise_units} units, but the dataset has {dataset_units}."
    )]
    MismatchedPairwiseDesign {
        pairwise_units: usize,
        dataset_units: usize,
    },
}

/// Fits both clique potentials on `dataset`, whose pairwise expansion is `pairwise`.
///
/// A sub-fit that exhausts its iteration budget is an
/// [`EstimationError::NonConvergence`]; the caller decides whether to carry on.
pub fn fit_crf(
    dataset: &UnitDataset,
    pairwise: &PairwiseDesign,
    config: &AdmmConfig,
) -> Result<CrfModel, EstimationError> {
    if pairwise.num_units() != dataset.num_units() {
        return Err(EstimationError::PairwiseUnitMismatch {
            pairwise_units: pairwise.num_units(),
            dataset_units: dataset.num_units(),
        });
    }

    let (alpha, unit_iterations) =
        solve_l1_regression(dataset.features(), dataset.target(), config)?
            .into_converged()
            .inspect_err(|e| log::warn!("Unit-level fit failed: {e}"))?;

    let (w, pairwise_iterations) =
        solve_l1_regression(pairwise.features(), pairwise.target(), config)?
            .into_converged()
            .inspect_err(|e| log::warn!("Pairwise fit failed: {e}"))?;

    log::debug!(
        "CRF fit on {} units: alpha {:?} ({} iterations), w {:?} ({} iterations)",
        dataset.num_units(),
        alpha.as_slice(),
        unit_iterations,
        w.as_slice(),
        pairwise_iterations
    );

    Ok(CrfModel {
        alpha,
        w,
        admm: *config,
        diagnostics: FitDiagnostics {
            unit_iterations,
            pairwise_iterations,
        },
    })
}

impl CrfModel {
    /// Builds the pairwise design of `dataset` and fits both potentials.
    pub fn fit(dataset: &UnitDataset, config: &AdmmConfig) -> Result<Self, EstimationError> {
        let pairwise = build_pairwise_design(dataset);
        fit_crf(dataset, &pairwise, config)
    }

    /// The unit-level prediction `α·x`.
    pub fn unit_prediction(&self, features: ArrayView1<f64>) -> f64 {
        self.alpha.dot(&features)
    }

    /// The prediction propagated from a neighbour: `Y_j + w·f_ij`.
    pub fn pairwise_prediction(&self, neighbour_value: f64, pair_features: ArrayView1<f64>) -> f64 {
        neighbour_value + self.w.dot(&pair_features)
    }

    /// Predicts unit `unit` (1-based) from its own features and the observed values
    /// of every other unit in `dataset`.
    ///
    /// `pairwise` must be the expansion of `dataset`; the rows for source `i` are read
    /// as one contiguous block, destinations ascending with `i` skipped.
    pub fn infer_unit(
        &self,
        dataset: &UnitDataset,
        pairwise: &PairwiseDesign,
        unit: usize,
    ) -> Result<HeldOutEstimate, ModelError> {
        let source = dataset.unit_index(unit)?;
        if self.alpha.len() != dataset.num_features() {
            return Err(ModelError::MismatchedCoefficients {
                what: "alpha",
                expected: dataset.num_features(),
                found: self.alpha.len(),
            });
        }
        if self.w.len() != PAIR_FEATURES {
            return Err(ModelError::MismatchedCoefficients {
                what: "w",
                expected: PAIR_FEATURES,
                found: self.w.len(),
            });
        }
        if pairwise.num_units() != dataset.num_units() {
            return Err(ModelError::MismatchedPairwiseDesign {
                pairwise_units: pairwise.num_units(),
                dataset_units: dataset.num_units(),
            });
        }

        let target = dataset.target();
        let block = pairwise.source_features(source);
        let neighbours = (0..dataset.num_units()).filter(|&j| j != source);

        let mut candidates = Vec::with_capacity(dataset.num_units());
        candidates.push(self.unit_prediction(dataset.features().row(source)));
        candidates.extend(
            neighbours
                .zip(block.rows())
                .map(|(j, pair)| self.pairwise_prediction(target[j], pair)),
        );

        let median = solve_abs_deviation(&candidates)?;
        let mean = candidate_mean(&candidates)?;
        Ok(HeldOutEstimate {
            candidates,
            median,
            mean,
        })
    }

    /// Saves the model to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads a model from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model = toml::from_str(&toml_string)?;
        Ok(model)
    }
}
