//! Error types for kernel realization.
//!
//! Every failure is local and deterministic for a given sample set. None of
//! them is retried inside the crate: drawing a fresh sample set is a decision
//! for the caller.

use thiserror::Error;

pub type RealizationResult<T> = Result<T, RealizationError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RealizationError {
    /// The derivative tower kept gaining rank up to the order ceiling.
    #[error("recurrence order did not stabilize within max_rank = {max_rank}")]
    NonConvergence { max_rank: usize },

    /// A basis column vanished or stopped being finite.
    #[error("derivative basis is ill-conditioned at order {order}: {reason}")]
    IllConditioned { order: usize, reason: String },

    /// Continuous-branch closed-form inverse needs X0[n-1] != 0.
    #[error("continuous-branch pivot X0[{index}] = {value} is numerically zero")]
    SingularPivot { index: usize, value: f64 },

    /// Discontinuous-branch basis transform could not be inverted.
    #[error("basis transform Q of order {order} is singular")]
    SingularMatrix { order: usize },

    /// The kernel evaluated to NaN or infinity.
    #[error("kernel returned non-finite value {value} at t = {time}")]
    DegenerateKernel { time: f64, value: f64 },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}
