//! # Unit-Level Dataset
//!
//! The immutable input snapshot the model is fitted against: one row per spatial
//! unit (ascending unit id `1..=n`), a feature matrix `X`, a target vector `Y`, and
//! two `n × n` relation matrices (`F_dist`, `F_flow`). Shapes are checked once, at
//! construction, so every downstream consumer can index without re-validating.
//!
//! Leave-one-out folds are produced with [`UnitDataset::without_unit`], which
//! returns an independent owned copy with the unit's row (and relation row and
//! column) removed.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use thiserror::Error;

/// Fewest units for which pairwise observations exist.
pub const MINIMUM_UNITS: usize = 2;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatasetError {
    #[error("Dimension mismatch in {context}: expected {expected}, found {found}.")]
    DimensionMismatch {
        context: &'static str,
        expected: String,
        found: String,
    },

    #[error("Non-finite value in {matrix} at row {row}, column {col}.")]
    NonFiniteValue {
        matrix: &'static str,
        row: usize,
        col: usize,
    },

    #[error("Unit id {unit} is outside the valid range 1..={units}.")]
    UnitOutOfRange { unit: usize, units: usize },

    #[error("Dataset has {found} units, but at least {required} are required.")]
    TooFewUnits { found: usize, required: usize },
}

/// Feature matrix, target vector and relation matrices for `n` units.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitDataset {
    features: Array2<f64>,
    target: Array1<f64>,
    distance: Array2<f64>,
    flow: Array2<f64>,
}

impl UnitDataset {
    /// Validates shapes and finiteness and takes ownership of the arrays.
    ///
    /// * `features`: `n × m`, row `k` belongs to unit id `k + 1`.
    /// * `target`: length `n`, aligned with `features`.
    /// * `distance`, `flow`: `n × n`. Diagonals are ignored by every consumer.
    pub fn new(
        features: Array2<f64>,
        target: Array1<f64>,
        distance: Array2<f64>,
        flow: Array2<f64>,
    ) -> Result<Self, DatasetError> {
        let units = features.nrows();
        if units < MINIMUM_UNITS {
            return Err(DatasetError::TooFewUnits {
                found: units,
                required: MINIMUM_UNITS,
            });
        }
        if features.ncols() == 0 {
            return Err(DatasetError::DimensionMismatch {
                context: "feature matrix",
                expected: "at least one feature column".to_string(),
                found: format!("{:?}", features.shape()),
            });
        }
        if target.len() != units {
            return Err(DatasetError::DimensionMismatch {
                context: "target vector",
                expected: format!("{units} entries (one per feature row)"),
                found: format!("{} entries", target.len()),
            });
        }
        for (name, relation) in [("distance matrix", &distance), ("flow matrix", &flow)] {
            if relation.dim() != (units, units) {
                return Err(DatasetError::DimensionMismatch {
                    context: name,
                    expected: format!("[{units}, {units}]"),
                    found: format!("{:?}", relation.shape()),
                });
            }
        }

        check_finite("feature matrix", features.view())?;
        check_finite("target vector", target.view().insert_axis(Axis(1)))?;
        check_finite("distance matrix", distance.view())?;
        check_finite("flow matrix", flow.view())?;

        Ok(Self {
            features,
            target,
            distance,
            flow,
        })
    }

    pub fn num_units(&self) -> usize {
        self.target.len()
    }

    pub fn num_features(&self) -> usize {
        self.features.ncols()
    }

    pub fn features(&self) -> ArrayView2<'_, f64> {
        self.features.view()
    }

    pub fn target(&self) -> ArrayView1<'_, f64> {
        self.target.view()
    }

    pub fn distance(&self) -> ArrayView2<'_, f64> {
        self.distance.view()
    }

    pub fn flow(&self) -> ArrayView2<'_, f64> {
        self.flow.view()
    }

    /// Maps a 1-based unit id to its row index.
    pub fn unit_index(&self, unit: usize) -> Result<usize, DatasetError> {
        if unit == 0 || unit > self.num_units() {
            return Err(DatasetError::UnitOutOfRange {
                unit,
                units: self.num_units(),
            });
        }
        Ok(unit - 1)
    }

    /// Returns a copy of the dataset with unit `unit` (1-based) removed from the
    /// features, the target, and both rows and columns of the relation matrices.
    pub fn without_unit(&self, unit: usize) -> Result<Self, DatasetError> {
        let removed = self.unit_index(unit)?;
        if self.num_units() - 1 < MINIMUM_UNITS {
            return Err(DatasetError::TooFewUnits {
                found: self.num_units() - 1,
                required: MINIMUM_UNITS,
            });
        }

        let kept: Vec<usize> = (0..self.num_units()).filter(|&k| k != removed).collect();
        let square = |relation: &Array2<f64>| {
            relation
                .select(Axis(0), &kept)
                .select(Axis(1), &kept)
        };

        Ok(Self {
            features: self.features.select(Axis(0), &kept),
            target: self.target.select(Axis(0), &kept),
            distance: square(&self.distance),
            flow: square(&self.flow),
        })
    }

    /// Mean of the target vector, the denominator of the relative error.
    pub fn target_mean(&self) -> f64 {
        self.target.sum() / self.num_units() as f64
    }
}

fn check_finite(matrix: &'static str, values: ArrayView2<f64>) -> Result<(), DatasetError> {
    for ((row, col), value) in values.indexed_iter() {
        if !value.is_finite() {
            return Err(DatasetError::NonFiniteValue { matrix, row, col });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn three_units() -> UnitDataset {
        UnitDataset::new(
            array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0]],
            array![5.0, 6.0, 7.0],
            array![[0.0, 1.0, 2.0], [1.0, 0.0, 3.0], [2.0, 3.0, 0.0]],
            array![[9.0, 0.1, 0.2], [0.3, 9.0, 0.4], [0.5, 0.6, 9.0]],
        )
        .unwrap()
    }

    #[test]
    fn removing_a_unit_drops_row_and_column() {
        let reduced = three_units().without_unit(2).unwrap();
        assert_eq!(reduced.num_units(), 2);
        assert_eq!(reduced.features(), array![[1.0, 10.0], [3.0, 30.0]]);
        assert_eq!(reduced.target(), array![5.0, 7.0]);
        assert_eq!(reduced.distance(), array![[0.0, 2.0], [2.0, 0.0]]);
        assert_eq!(reduced.flow(), array![[9.0, 0.2], [0.5, 9.0]]);
    }

    #[test]
    fn removal_leaves_the_original_untouched() {
        let full = three_units();
        let snapshot = full.clone();
        let reduced = full.without_unit(1).unwrap();
        assert_eq!(full, snapshot);
        assert_ne!(reduced, snapshot);
    }

    #[test]
    fn unit_ids_are_one_based() {
        let data = three_units();
        assert_eq!(data.unit_index(1).unwrap(), 0);
        assert_eq!(data.unit_index(3).unwrap(), 2);
        assert_eq!(
            data.unit_index(0),
            Err(DatasetError::UnitOutOfRange { unit: 0, units: 3 })
        );
        assert_eq!(
            data.without_unit(4),
            Err(DatasetError::UnitOutOfRange { unit: 4, units: 3 })
        );
    }

    #[test]
    fn misaligned_target_is_rejected() {
        let err = UnitDataset::new(
            array![[1.0], [2.0], [3.0]],
            array![1.0, 2.0],
            Array2::zeros((3, 3)),
            Array2::zeros((3, 3)),
        )
        .unwrap_err();
        match err {
            DatasetError::DimensionMismatch { context, .. } => assert_eq!(context, "target vector"),
            other => panic!("Expected DimensionMismatch, got {:?}", other),
        }
    }

    #[test]
    fn non_square_relation_is_rejected() {
        let err = UnitDataset::new(
            array![[1.0], [2.0], [3.0]],
            array![1.0, 2.0, 3.0],
            Array2::zeros((3, 2)),
            Array2::zeros((3, 3)),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DatasetError::DimensionMismatch {
                context: "distance matrix",
                ..
            }
        ));
    }

    #[test]
    fn non_finite_values_are_located() {
        let err = UnitDataset::new(
            array![[1.0], [2.0], [3.0]],
            array![1.0, 2.0, 3.0],
            Array2::zeros((3, 3)),
            array![[0.0, 1.0, 1.0], [1.0, 0.0, f64::INFINITY], [1.0, 1.0, 0.0]],
        )
        .unwrap_err();
        assert_eq!(
            err,
            DatasetError::NonFiniteValue {
                matrix: "flow matrix",
                row: 1,
                col: 2
            }
        );
    }

    #[test]
    fn two_units_cannot_lose_one() {
        let data = UnitDataset::new(
            array![[1.0], [2.0]],
            array![1.0, 2.0],
            Array2::zeros((2, 2)),
            Array2::zeros((2, 2)),
        )
        .unwrap();
        assert_eq!(
            data.without_unit(1),
            Err(DatasetError::TooFewUnits {
                found: 1,
                required: 2
            })
        );
    }
}
