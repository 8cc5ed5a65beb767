//! # L1 Regression via ADMM
//!
//! Fits `α` minimising `‖Xα − Y‖₁`. The absolute loss has no closed form, so the
//! problem is split with an auxiliary residual `z = Xα − Y` and solved by the
//! Alternating Direction Method of Multipliers:
//!
//! 1. **α-step:** a least-squares projection, `α ← S·(z + Y + θ)`, where
//!    `S = (XᵗX)⁺Xᵗ` is computed once per solve.
//! 2. **z-step:** entry-wise soft-thresholding of `Xα − Y − θ` at `λ = 1/ρ`, the
//!    exact proximal operator of the L1 norm.
//! 3. **θ-step:** scaled dual ascent on the consensus constraint,
//!    `θ ← θ + z − Xα + Y`.
//!
//! The loop stops once both residuals fall under the configured tolerance: the
//! primal residual `Σ|z − Xα + Y|` and the dual residual `ρ·Σ|Xᵗ(z − z_prev)|`.
//! With the multiplier started at `θ = 1`, a first iterate whose fitted residuals
//! are all non-positive already has a zero primal residual while `α` is still far
//! from the optimum; the dual residual is what rejects it.
//!
//! The loop never runs past `max_iterations`: a solve that exhausts its budget
//! comes back as [`AdmmOutcome::MaxIterationsExceeded`] carrying the best iterate
//! seen, so callers decide whether that is fatal.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_linalg::LeastSquaresSvd;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A comprehensive error type for the L1 estimation process.
#[derive(Error, Debug)]
pub enum EstimationError {
    #[error(
        "Design matrix has {rows} rows but the target vector has {targets} entries. They must be row-aligned."
    )]
    DimensionMismatch { rows: usize, targets: usize },

    #[error("Design matrix is empty ({rows} x {cols}). At least one row and one column are required.")]
    EmptyDesign { rows: usize, cols: usize },

    #[error("The least-squares factor (X'X)^+ X' could not be computed. Error: {0}")]
    LeastSquaresFailed(#[from] ndarray_linalg::error::LinalgError),

    #[error(
        "ADMM did not reach the residual tolerance within {iterations} iterations. Best primal residual was {residual:.6e}."
    )]
    NonConvergence { iterations: usize, residual: f64 },

    #[error(
        "Pairwise design covers {pairwise_units} units, but the unit-level data has {dataset_units}."
    )]
    PairwiseUnitMismatch {
        pairwise_units: usize,
        dataset_units: usize,
    },

    #[error("Invalid ADMM configuration: {0}")]
    InvalidConfig(String),
}

/// Hyperparameters of the ADMM loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmmConfig {
    /// Augmented-Lagrangian penalty `ρ`. The shrinkage threshold is `1/ρ`.
    pub rho: f64,
    /// Absolute tolerance applied to both the summed primal residual
    /// `Σ|z − Xα + Y|` and the dual residual `ρ·Σ|Xᵗ(z − z_prev)|`.
    pub tolerance: f64,
    /// Hard ceiling on ADMM iterations.
    pub max_iterations: usize,
}

impl Default for AdmmConfig {
    fn default() -> Self {
        Self {
            rho: 1.0,
            tolerance: 0.1,
            max_iterations: 10_000,
        }
    }
}

impl AdmmConfig {
    pub fn validate(&self) -> Result<(), EstimationError> {
        if !(self.rho.is_finite() && self.rho > 0.0) {
            return Err(EstimationError::InvalidConfig(format!(
                "rho must be finite and positive, got {}",
                self.rho
            )));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(EstimationError::InvalidConfig(format!(
                "tolerance must be finite and non-negative, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(EstimationError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// How an ADMM solve ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmmOutcome {
    /// The primal and dual residuals both met the tolerance. `residual` is the
    /// primal one.
    Converged {
        alpha: Array1<f64>,
        iterations: usize,
        residual: f64,
    },
    /// The iteration budget ran out. `alpha` is the iterate whose larger residual
    /// (primal or dual) was smallest, and `residual` is its primal residual.
    MaxIterationsExceeded {
        alpha: Array1<f64>,
        iterations: usize,
        residual: f64,
    },
}

impl AdmmOutcome {
    pub fn alpha(&self) -> &Array1<f64> {
        match self {
            Self::Converged { alpha, .. } | Self::MaxIterationsExceeded { alpha, .. } => alpha,
        }
    }

    pub fn iterations(&self) -> usize {
        match self {
            Self::Converged { iterations, .. } | Self::MaxIterationsExceeded { iterations, .. } => {
                *iterations
            }
        }
    }

    pub fn residual(&self) -> f64 {
        match self {
            Self::Converged { residual, .. } | Self::MaxIterationsExceeded { residual, .. } => {
                *residual
            }
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }

    /// Returns the coefficients and iteration count of a converged solve, or
    /// [`EstimationError::NonConvergence`].
    pub fn into_converged(self) -> Result<(Array1<f64>, usize), EstimationError> {
        match self {
            Self::Converged {
                alpha, iterations, ..
            } => Ok((alpha, iterations)),
            Self::MaxIterationsExceeded {
                iterations,
                residual,
                ..
            } => Err(EstimationError::NonConvergence {
                iterations,
                residual,
            }),
        }
    }
}

/// The soft-thresholding (shrinkage) operator, applied entry-wise:
/// `u − λ` for `u ≥ λ`, `u + λ` for `u ≤ −λ`, and `0` in between.
pub fn soft_threshold(values: ArrayView1<f64>, threshold: f64) -> Array1<f64> {
    values.mapv(|u| {
        if u >= threshold {
            u - threshold
        } else if u <= -threshold {
            u + threshold
        } else {
            0.0
        }
    })
}

/// Computes `S = (XᵗX)⁺Xᵗ` with an SVD-based least-squares solve of
/// `(XᵗX)·S = Xᵗ`. A singular Gram matrix yields the minimum-norm solution
/// instead of an error.
pub fn least_squares_factor(x: ArrayView2<f64>) -> Result<Array2<f64>, EstimationError> {
    let xt = x.t();
    let gram = xt.dot(&x);
    let solved = gram.least_squares(&xt.to_owned())?;

    let rank = usize::try_from(solved.rank).unwrap_or(0);
    if rank < x.ncols() {
        log::debug!(
            "Gram matrix is rank deficient (rank {} of {}); using the minimum-norm least-squares factor",
            rank,
            x.ncols()
        );
    }
    Ok(solved.solution)
}

/// Solves `min_α ‖Xα − Y‖₁` with ADMM.
///
/// Initial state follows the classic scaled form: `α = 1`, `z = Xα − Y`, `θ = 1`.
/// Structural problems (empty design, misaligned target, bad configuration) are
/// errors; running out of iterations is reported through [`AdmmOutcome`].
pub fn solve_l1_regression(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    config: &AdmmConfig,
) -> Result<AdmmOutcome, EstimationError> {
    config.validate()?;

    let (rows, cols) = x.dim();
    if rows == 0 || cols == 0 {
        return Err(EstimationError::EmptyDesign { rows, cols });
    }
    if y.len() != rows {
        return Err(EstimationError::DimensionMismatch {
            rows,
            targets: y.len(),
        });
    }

    let projector = least_squares_factor(x)?;
    let lambda = 1.0 / config.rho;

    let mut alpha = Array1::<f64>::ones(cols);
    let mut z = x.dot(&alpha) - &y;
    let mut theta = Array1::<f64>::ones(rows);

    let mut best_score = f64::INFINITY;
    let mut best_residual = f64::INFINITY;
    let mut best_alpha = alpha.clone();
    let mut performed = 0usize;

    for iteration in 1..=config.max_iterations {
        performed = iteration;

        alpha = projector.dot(&(&z + &y + &theta));

        let fitted_residual = x.dot(&alpha) - &y;
        let shrunk = soft_threshold((&fitted_residual - &theta).view(), lambda);
        let dual = config.rho * x.t().dot(&(&shrunk - &z)).mapv(f64::abs).sum();
        z = shrunk;

        let primal = &z - &fitted_residual;
        theta += &primal;

        let residual = primal.mapv(f64::abs).sum();
        if !(residual.is_finite() && dual.is_finite()) {
            log::warn!(
                "ADMM residuals became non-finite at iteration {}; stopping early",
                iteration
            );
            break;
        }

        if residual <= config.tolerance && dual <= config.tolerance {
            log::debug!(
                "ADMM converged in {} iterations ({} x {} design, primal {:.3e}, dual {:.3e})",
                iteration,
                rows,
                cols,
                residual,
                dual
            );
            return Ok(AdmmOutcome::Converged {
                alpha,
                iterations: iteration,
                residual,
            });
        }

        let score = residual.max(dual);
        if score < best_score {
            best_score = score;
            best_residual = residual;
            best_alpha.assign(&alpha);
        }
    }

    log::warn!(
        "ADMM stopped after {} iterations without meeting tolerance {:.3e} (best primal residual {:.3e})",
        performed,
        config.tolerance,
        best_residual
    );
    Ok(AdmmOutcome::MaxIterationsExceeded {
        alpha: best_alpha,
        iterations: performed,
        residual: best_residual,
    })
}
