//! Result value reported by every optimizer run.

use nalgebra::DVector;
use serde::Serialize;

use crate::convergence::{KktResiduals, Multipliers, TerminationStatus};

/// Describes the outcome of a BFGS or SQP run.
#[derive(Clone, Debug, Serialize)]
pub struct OptimizationResult {
    /// Last accepted iterate.
    pub x: DVector<f64>,
    /// Objective value at `x`.
    pub objective: f64,
    /// Completed iterations.
    pub iterations: usize,
    /// Why the run stopped.
    pub status: TerminationStatus,
    /// Final convergence measure (gradient norm or largest KKT violation).
    pub residual: f64,
    /// Final multiplier estimates (constrained runs only).
    pub multipliers: Option<Multipliers>,
    /// Final KKT residuals (constrained runs only).
    pub kkt: Option<KktResiduals>,
    /// Number of objective evaluations, line-search trials included.
    pub evaluations: usize,
    /// Curvature updates skipped by the `yᵀs` guard.
    pub skipped_updates: usize,
}

impl OptimizationResult {
    pub fn converged(&self) -> bool {
        self.status.is_converged()
    }
}
