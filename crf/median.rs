//! # Exact Absolute-Deviation Minimiser
//!
//! Solves `min_y Σ|y − a_i|` over a finite multiset of candidates. The objective is
//! convex and piecewise linear, and it only changes slope at the candidates
//! themselves, so the minimum is always attained at one of them. The solver sorts
//! once and then scores every breakpoint from the slope/intercept form of the
//! segment it bounds, giving an exact answer in `O(n log n)` with no iteration.
//!
//! The returned [`BreakpointMinimum`] carries the minimising candidate, its position
//! in the caller's original (unsorted) order, and the attained objective.

use thiserror::Error;

/// Failures of the breakpoint solver. Both are caller errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MedianError {
    #[error("Cannot minimise a sum of absolute deviations over zero candidates.")]
    EmptyInput,

    #[error("Candidate at position {index} is not finite ({value}).")]
    NonFiniteCandidate { index: usize, value: f64 },
}

/// The candidate that minimises `Σ|y − a_i|`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakpointMinimum {
    /// The minimising value `y*`. Always one of the inputs.
    pub value: f64,
    /// Position of `value` in the input slice as the caller passed it.
    pub index: usize,
    /// `Σ|y* − a_i|`, summed directly over the inputs.
    pub objective: f64,
}

/// Finds the candidate minimising the sum of absolute deviations to all candidates.
///
/// Breakpoints are scored in a fixed order: the left ray ending at the smallest
/// candidate, the right ray starting at the largest, then every interior segment
/// `[s_i, s_{i+1}]` in ascending order. On a segment with `i` candidates at or
/// below it the objective is `k·y + b` with `k = i − (n − i)` and
/// `b = Σ_{above} a − Σ_{at or below} a`; its minimum sits at `s_i` when `k > 0`
/// and at `s_{i+1}` otherwise. Ties keep the first breakpoint scored.
pub fn solve_abs_deviation(candidates: &[f64]) -> Result<BreakpointMinimum, MedianError> {
    validate_candidates(candidates)?;

    let n = candidates.len();
    if n == 1 {
        return Ok(BreakpointMinimum {
            value: candidates[0],
            index: 0,
            objective: 0.0,
        });
    }

    // Stable sort, so equal candidates keep their original relative order.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| candidates[a].total_cmp(&candidates[b]));
    let sorted: Vec<f64> = order.iter().map(|&i| candidates[i]).collect();

    let lowest = sorted[0];
    let highest = sorted[n - 1];
    let total: f64 = sorted.iter().sum();

    let mut best_position = 0usize;
    let mut best_value: f64 = sorted.iter().map(|a| a - lowest).sum();

    let right_ray: f64 = sorted.iter().map(|a| highest - a).sum();
    if right_ray < best_value {
        best_position = n - 1;
        best_value = right_ray;
    }

    let mut at_or_below = 0.0;
    for i in 1..n {
        at_or_below += sorted[i - 1];
        let slope = i as f64 - (n - i) as f64;
        let intercept = (total - at_or_below) - at_or_below;
        let position = if slope > 0.0 { i - 1 } else { i };
        let value = slope * sorted[position] + intercept;
        if value < best_value {
            best_position = position;
            best_value = value;
        }
    }

    let value = sorted[best_position];
    log::trace!(
        "Breakpoint scan over {} candidates settled on {} (segment value {:.6e})",
        n,
        value,
        best_value
    );

    Ok(BreakpointMinimum {
        value,
        index: order[best_position],
        objective: abs_deviation(candidates, value),
    })
}

/// Arithmetic mean of the candidates, the squared-loss counterpart of
/// [`solve_abs_deviation`].
pub fn candidate_mean(candidates: &[f64]) -> Result<f64, MedianError> {
    validate_candidates(candidates)?;
    Ok(candidates.iter().sum::<f64>() / candidates.len() as f64)
}

/// `Σ|y − a_i|`.
pub fn abs_deviation(candidates: &[f64], y: f64) -> f64 {
    candidates.iter().map(|a| (y - a).abs()).sum()
}

fn validate_candidates(candidates: &[f64]) -> Result<(), MedianError> {
    if candidates.is_empty() {
        return Err(MedianError::EmptyInput);
    }
    if let Some((index, &value)) = candidates.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(MedianError::NonFiniteCandidate { index, value });
    }
    Ok(())
}
