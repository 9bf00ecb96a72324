//! Trait algebra
//!
//! An allocation `A ∈ {0,1}^{M×N}` is scored against a desired-traits
//! matrix `Y ∈ R^{M×T}` through the team-traits matrix `Q ∈ R^{N×T}`:
//!
//! - allocated traits: `reduce(A, Q) ∈ R^{M×T}` (default `A·Q`)
//! - mismatch: `E(A) = Y - reduce(A, Q)`
//! - traits-mismatch error: `tme(A) = Σ max(E(A), 0)`
//!
//! `tme` is non-increasing as cells of `A` flip to one (adding robots never
//! worsens coverage), and `tme(all-ones) == 0` is a necessary feasibility
//! precondition checked by the input validator.

use crate::matrix::Matrix;
use serde::{Deserialize, Serialize};

/// How robot-trait rows aggregate into a coalition's allocated traits
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraitReduction {
    /// Plain matrix product `A·Q`: traits add linearly across a coalition
    #[default]
    MatrixProduct,
    /// Per-trait gated sum: a robot only contributes trait `t` when its
    /// value reaches `thresholds[t]`. Models capabilities that do not
    /// accumulate below a useful minimum (e.g. payload latches).
    ThresholdCumulative { thresholds: Vec<f32> },
}

impl TraitReduction {
    /// Reduce an allocation through the team traits, yielding `M×T`
    pub fn reduce(&self, allocation: &Matrix, team_traits: &Matrix) -> Matrix {
        match self {
            Self::MatrixProduct => allocation
                .matmul(team_traits)
                .expect("allocation columns must match team-trait rows"),
            Self::ThresholdCumulative { thresholds } => {
                let tasks = allocation.rows();
                let traits = team_traits.cols();
                let mut out = Matrix::zeros(tasks, traits);
                for m in 0..tasks {
                    for n in 0..allocation.cols() {
                        if allocation.get(m, n) == 0.0 {
                            continue;
                        }
                        for t in 0..traits {
                            let value = team_traits.get(n, t);
                            let threshold = thresholds.get(t).copied().unwrap_or(0.0);
                            if value >= threshold {
                                out.set(m, t, out.get(m, t) + value);
                            }
                        }
                    }
                }
                out
            }
        }
    }
}

/// Allocated-traits matrix `reduce(A, Q) ∈ R^{M×T}`
pub fn allocated_traits(
    reduction: &TraitReduction,
    allocation: &Matrix,
    team_traits: &Matrix,
) -> Matrix {
    reduction.reduce(allocation, team_traits)
}

/// Mismatch matrix `E(A) = Y - reduce(A, Q)`
pub fn traits_mismatch_matrix(
    reduction: &TraitReduction,
    allocation: &Matrix,
    desired_traits: &Matrix,
    team_traits: &Matrix,
) -> Matrix {
    let allocated = allocated_traits(reduction, allocation, team_traits);
    desired_traits
        .sub(&allocated)
        .expect("desired and allocated traits must share dimensions")
}

/// Element-wise `max(E(A), 0)`: only under-covered traits survive
pub fn positive_traits_mismatch_matrix(
    reduction: &TraitReduction,
    allocation: &Matrix,
    desired_traits: &Matrix,
    team_traits: &Matrix,
) -> Matrix {
    traits_mismatch_matrix(reduction, allocation, desired_traits, team_traits).positive_part()
}

/// Scalar traits-mismatch error `Σ max(E(A), 0)`
pub fn traits_mismatch_error(
    reduction: &TraitReduction,
    allocation: &Matrix,
    desired_traits: &Matrix,
    team_traits: &Matrix,
) -> f32 {
    positive_traits_mismatch_matrix(reduction, allocation, desired_traits, team_traits).sum()
}
