//! # Pairwise Observations
//!
//! Expands unit-level data into one observation per ordered pair of distinct
//! units `(i, j)`. Row order is part of the contract: source `i` is the outer loop,
//! destination `j` the inner loop, and the diagonal is skipped. The row of a pair
//! is therefore given in closed form by [`pair_row_index`], and all pairs with
//! source `i` occupy the contiguous block [`source_rows`]. Inference relies on
//! both, so the builders below are written against these functions rather than
//! against an incidental loop order.

use crate::dataset::UnitDataset;
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};
use std::ops::Range;

/// Columns of the two-feature pairwise design: `[F_dist[i,j], F_flow[i,j]]`.
pub const PAIR_FEATURES: usize = 2;

/// Row of pair `(source, destination)` among the `n·(n−1)` ordered pairs of `n`
/// units. Indices are 0-based and `source != destination`.
///
/// `idx(i, j, n) = i·(n−1) + j` if `j < i`, else `i·(n−1) + j − 1`.
pub fn pair_row_index(source: usize, destination: usize, units: usize) -> usize {
    debug_assert!(source < units && destination < units && source != destination);
    let offset = if destination < source {
        destination
    } else {
        destination - 1
    };
    source * (units - 1) + offset
}

/// The block of rows whose source unit is `source` (0-based).
pub fn source_rows(source: usize, units: usize) -> Range<usize> {
    let width = units - 1;
    source * width..(source + 1) * width
}

/// Number of ordered pairs of distinct units.
pub fn pair_count(units: usize) -> usize {
    units * units.saturating_sub(1)
}

/// Ordered pairs `(i, j)`, `i != j`, in row order.
pub fn ordered_pairs(units: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..units)
        .cartesian_product(0..units)
        .filter(|(source, destination)| source != destination)
}

/// Pairwise target differences and relation features.
#[derive(Debug, Clone, PartialEq)]
pub struct PairwiseDesign {
    units: usize,
    /// `n·(n−1) × 2`, row `idx(i, j, n)` is `[F_dist[i,j], F_flow[i,j]]`.
    features: Array2<f64>,
    /// `Yp`, row `idx(i, j, n)` is `Y_i − Y_j`.
    target: Array1<f64>,
}

impl PairwiseDesign {
    pub fn num_units(&self) -> usize {
        self.units
    }

    pub fn num_rows(&self) -> usize {
        self.target.len()
    }

    pub fn features(&self) -> ArrayView2<'_, f64> {
        self.features.view()
    }

    pub fn target(&self) -> ArrayView1<'_, f64> {
        self.target.view()
    }

    /// Feature row of the pair `(source, destination)`.
    pub fn pair_features(&self, source: usize, destination: usize) -> ArrayView1<'_, f64> {
        self.features
            .row(pair_row_index(source, destination, self.units))
    }

    /// All feature rows with source `source`, destinations in ascending order with
    /// `source` itself skipped.
    pub fn source_features(&self, source: usize) -> ArrayView2<'_, f64> {
        let rows = source_rows(source, self.units);
        self.features.slice(s![rows, ..])
    }
}

/// Builds `(F, Yp)` from the dataset's target and relation matrices.
pub fn build_pairwise_design(dataset: &UnitDataset) -> PairwiseDesign {
    let units = dataset.num_units();
    let target = dataset.target();
    let distance = dataset.distance();
    let flow = dataset.flow();

    let mut features = Array2::zeros((pair_count(units), PAIR_FEATURES));
    let mut differences = Array1::zeros(pair_count(units));
    for (source, destination) in ordered_pairs(units) {
        let row = pair_row_index(source, destination, units);
        differences[row] = target[source] - target[destination];
        features[[row, 0]] = distance[[source, destination]];
        features[[row, 1]] = flow[[source, destination]];
    }

    log::debug!(
        "Built pairwise design: {} units -> {} rows",
        units,
        differences.len()
    );

    PairwiseDesign {
        units,
        features,
        target: differences,
    }
}

/// Builds the joint pairwise design used by the single-objective variant of the
/// model, `min Σ_i Σ_j |y_i − α·x_i − β·y_j − γ·f_ij|`.
///
/// Row `idx(i, j, n)` is `[x_i..., Y_i, F_dist[i,j], F_flow[i,j]]`, so the matrix has
/// `m + 3` columns. It is produced for external optimisers only.
pub fn build_joint_design(dataset: &UnitDataset) -> Array2<f64> {
    let units = dataset.num_units();
    let width = dataset.num_features();
    let features = dataset.features();
    let target = dataset.target();
    let distance = dataset.distance();
    let flow = dataset.flow();

    let mut joint = Array2::zeros((pair_count(units), width + 3));
    for (source, destination) in ordered_pairs(units) {
        let mut row = joint.row_mut(pair_row_index(source, destination, units));
        row.slice_mut(s![..width]).assign(&features.row(source));
        row[width] = target[source];
        row[width + 1] = distance[[source, destination]];
        row[width + 2] = flow[[source, destination]];
    }
    joint
}
