use serde::Serialize;
use thiserror::Error;

/// Unified error type for `qnopt` operations.
#[derive(Clone, Debug, Error, PartialEq, Serialize)]
pub enum OptimError {
    /// Raised when vectors or matrices have incompatible dimensions.
    #[error("dimension mismatch in {context}: expected {expected} but found {found}")]
    InvalidDimension {
        /// Human-readable context describing the operation.
        context: &'static str,
        /// The required dimension, usually implied by the problem size.
        expected: usize,
        /// The dimension that was actually supplied.
        found: usize,
    },

    /// Raised when a configuration value lies outside its admissible range.
    #[error("option `{name}` has invalid value {value}")]
    InvalidOption { name: &'static str, value: f64 },

    /// Raised when backtracking shrinks the step below the minimum without
    /// achieving sufficient decrease.
    #[error("line search failed: step length {step} fell below minimum {min_step} (slope {slope})")]
    LineSearchFailed {
        /// Last trial step length.
        step: f64,
        /// Configured lower bound on the step length.
        min_step: f64,
        /// Directional derivative along the search direction.
        slope: f64,
    },

    /// Raised by a subproblem solver when the linearized constraints admit no solution.
    #[error("quadratic subproblem is infeasible: {context}")]
    Infeasible { context: &'static str },

    /// Raised by a subproblem solver when the quadratic model is unbounded below.
    #[error("quadratic subproblem is unbounded: {context}")]
    Unbounded { context: &'static str },

    /// Raised when the subproblem solver cannot settle on a working set.
    #[error("quadratic subproblem did not converge after {iterations} working-set changes")]
    SubproblemDidNotConverge { iterations: usize },

    /// Raised when linear algebra operations encounter a singular system.
    #[error("matrix in {context} is singular")]
    SingularMatrix { context: &'static str },

    /// Raised when numerical routines produce NaN or infinite values.
    #[error("encountered non-finite value during {context}")]
    NumericalError { context: &'static str },
}

impl OptimError {
    /// Helper to format an [`InvalidDimension`](OptimError::InvalidDimension) error.
    pub fn dimension_mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        Self::InvalidDimension {
            context,
            expected,
            found,
        }
    }

    /// Helper to raise when a matrix factorization fails due to singularity.
    pub fn singular(context: &'static str) -> Self {
        Self::SingularMatrix { context }
    }

    /// Helper for options rejected by validation.
    pub fn invalid_option(name: &'static str, value: f64) -> Self {
        Self::InvalidOption { name, value }
    }

    /// Whether the error is a caller bug that must abort immediately.
    ///
    /// Every other error ends the current run in the `Failed` state while the
    /// last good iterate is kept.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidDimension { .. } | Self::InvalidOption { .. }
        )
    }
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, OptimError>;
