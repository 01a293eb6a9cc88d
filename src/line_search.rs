//! Backtracking line search enforcing the Armijo sufficient-decrease condition.

use nalgebra::DVector;

use crate::error::{OptimError, Result};
use crate::options::OptimizerOptions;

/// Accepted trial of a line search.
#[derive(Clone, Debug)]
pub struct LineSearchStep {
    /// Step length `alpha ∈ (0, 1]`.
    pub alpha: f64,
    /// Merit value at `x + alpha·s`.
    pub value: f64,
    /// Number of merit evaluations spent.
    pub evaluations: usize,
}

/// Backtracking from `alpha = 1` by a constant factor.
#[derive(Clone, Copy, Debug)]
pub struct BacktrackingLineSearch {
    c1: f64,
    factor: f64,
    min_step: f64,
}

impl BacktrackingLineSearch {
    pub fn new(c1: f64, factor: f64, min_step: f64) -> Self {
        Self {
            c1,
            factor,
            min_step,
        }
    }

    pub fn from_options(options: &OptimizerOptions) -> Self {
        Self::new(options.c1, options.backtrack_factor, options.min_step)
    }

    /// Finds `alpha` such that `f(x + alpha·s) <= f(x) + c1·alpha·∇f(x)ᵀs`.
    pub fn find_step_length<F>(
        &self,
        x: &DVector<f64>,
        s: &DVector<f64>,
        mut f: F,
        grad_f: &DVector<f64>,
    ) -> Result<LineSearchStep>
    where
        F: FnMut(&DVector<f64>) -> f64,
    {
        if s.len() != x.len() {
            return Err(OptimError::dimension_mismatch(
                "search direction",
                x.len(),
                s.len(),
            ));
        }
        if grad_f.len() != x.len() {
            return Err(OptimError::dimension_mismatch(
                "line search gradient",
                x.len(),
                grad_f.len(),
            ));
        }
        let value = f(x);
        let mut outcome = self.search(x, s, value, grad_f.dot(s), f)?;
        outcome.evaluations += 1;
        Ok(outcome)
    }

    /// Backtracks along `s` for a merit function with known value and
    /// directional derivative at `x`.
    ///
    /// Trial points where the merit function is not finite count as rejected.
    pub fn search<F>(
        &self,
        x: &DVector<f64>,
        s: &DVector<f64>,
        value: f64,
        slope: f64,
        mut merit: F,
    ) -> Result<LineSearchStep>
    where
        F: FnMut(&DVector<f64>) -> f64,
    {
        let mut alpha = 1.0_f64;
        let mut evaluations = 0usize;

        while alpha >= self.min_step {
            let trial = x + s * alpha;
            let trial_value = merit(&trial);
            evaluations += 1;
            if trial_value.is_finite() && trial_value <= value + self.c1 * alpha * slope {
                return Ok(LineSearchStep {
                    alpha,
                    value: trial_value,
                    evaluations,
                });
            }
            alpha *= self.factor;
        }

        Err(OptimError::LineSearchFailed {
            step: alpha,
            min_step: self.min_step,
            slope,
        })
    }
}

impl Default for BacktrackingLineSearch {
    fn default() -> Self {
        Self::from_options(&OptimizerOptions::default())
    }
}
