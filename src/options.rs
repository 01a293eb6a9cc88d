//! Solver configuration shared by the BFGS and SQP loops.

use serde::{Deserialize, Serialize};

use crate::error::{OptimError, Result};
use crate::linalg::LinearBackend;

/// Tolerances, line-search constants, and backend choice for an optimizer run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerOptions {
    /// Convergence tolerance on the gradient norm (BFGS) or every KKT residual (SQP).
    pub tol_grad: f64,
    /// Maximum number of iterations before reporting `MaxIterExceeded`.
    pub max_iter: usize,
    /// Armijo sufficient-decrease constant.
    pub c1: f64,
    /// Factor applied to the step length after each rejected trial.
    pub backtrack_factor: f64,
    /// Smallest step length tried before the line search gives up.
    pub min_step: f64,
    /// Curvature updates are skipped unless `yᵀs` exceeds this threshold.
    pub sy_threshold: f64,
    /// Margin added to the largest multiplier when raising the SQP merit penalty.
    pub penalty_offset: f64,
    /// Factorization used for the Newton-like direction solve.
    pub backend: LinearBackend,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            tol_grad: 1e-6,
            max_iter: 100,
            c1: 1e-4,
            backtrack_factor: 0.5,
            min_step: 1e-10,
            sy_threshold: 1e-6,
            penalty_offset: 1.0,
            backend: LinearBackend::Cholesky,
        }
    }
}

impl OptimizerOptions {
    /// Override the convergence tolerance.
    pub fn with_tolerance(mut self, tol_grad: f64) -> Self {
        self.tol_grad = tol_grad;
        self
    }

    /// Set the maximum number of iterations that should be attempted.
    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter.max(1);
        self
    }

    /// Override the Armijo constant.
    pub fn with_armijo(mut self, c1: f64) -> Self {
        self.c1 = c1;
        self
    }

    /// Override the backtracking factor and the minimum step length.
    pub fn with_backtracking(mut self, factor: f64, min_step: f64) -> Self {
        self.backtrack_factor = factor;
        self.min_step = min_step;
        self
    }

    /// Override the curvature-skip threshold.
    pub fn with_sy_threshold(mut self, sy_threshold: f64) -> Self {
        self.sy_threshold = sy_threshold;
        self
    }

    /// Override the SQP merit penalty margin.
    pub fn with_penalty_offset(mut self, offset: f64) -> Self {
        self.penalty_offset = offset;
        self
    }

    /// Select the linear-algebra backend used for direction solves.
    pub fn with_backend(mut self, backend: LinearBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Checks that every option lies in its admissible range.
    pub fn validate(&self) -> Result<()> {
        if !(self.tol_grad > 0.0) {
            return Err(OptimError::invalid_option("tol_grad", self.tol_grad));
        }
        if self.max_iter == 0 {
            return Err(OptimError::invalid_option("max_iter", 0.0));
        }
        if !(self.c1 > 0.0 && self.c1 < 1.0) {
            return Err(OptimError::invalid_option("c1", self.c1));
        }
        if !(self.backtrack_factor > 0.0 && self.backtrack_factor < 1.0) {
            return Err(OptimError::invalid_option(
                "backtrack_factor",
                self.backtrack_factor,
            ));
        }
        if !(self.min_step > 0.0 && self.min_step <= 1.0) {
            return Err(OptimError::invalid_option("min_step", self.min_step));
        }
        if !(self.sy_threshold >= 0.0) {
            return Err(OptimError::invalid_option("sy_threshold", self.sy_threshold));
        }
        if !(self.penalty_offset > 0.0) {
            return Err(OptimError::invalid_option(
                "penalty_offset",
                self.penalty_offset,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = OptimizerOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.max_iter, 100);
        assert_eq!(options.sy_threshold, 1e-6);
    }

    #[test]
    fn rejects_out_of_range_constants() {
        let options = OptimizerOptions::default().with_armijo(1.5);
        assert_eq!(
            options.validate(),
            Err(OptimError::invalid_option("c1", 1.5))
        );

        let options = OptimizerOptions::default().with_backtracking(1.0, 1e-10);
        assert!(matches!(
            options.validate(),
            Err(OptimError::InvalidOption {
                name: "backtrack_factor",
                ..
            })
        ));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let options: OptimizerOptions =
            serde_json::from_str(r#"{ "max_iter": 7, "backend": "Lu" }"#).unwrap();
        assert_eq!(options.max_iter, 7);
        assert_eq!(options.backend, LinearBackend::Lu);
        assert_eq!(options.c1, 1e-4);
    }
}
