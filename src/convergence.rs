//! Convergence bookkeeping shared by the optimizer loops.

use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::error::OptimError;

/// Why a run stopped.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum TerminationStatus {
    /// The convergence test passed.
    Converged,
    /// The iteration cap was reached first. This is a normal outcome, not an error.
    MaxIterExceeded,
    /// A collaborator could not produce an acceptable step.
    Failed(OptimError),
    /// The caller stopped the run between iterations.
    Cancelled,
}

impl TerminationStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }
}

/// Position of a run in its lifecycle.
#[derive(Clone, Debug, PartialEq)]
pub enum Phase {
    Initializing,
    Iterating,
    Terminated(TerminationStatus),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }
}

/// Iteration counters and the most recent convergence measure.
#[derive(Clone, Debug)]
pub struct ConvergenceState {
    /// Completed iterations.
    pub iterations: usize,
    /// Latest residual: gradient norm for BFGS, largest KKT residual for SQP.
    pub residual: f64,
    /// Whether the convergence test has passed.
    pub converged: bool,
    /// Iteration cap.
    pub max_iterations: usize,
    /// Current lifecycle phase.
    pub phase: Phase,
}

impl ConvergenceState {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            iterations: 0,
            residual: f64::INFINITY,
            converged: false,
            max_iterations,
            phase: Phase::Initializing,
        }
    }

    /// Terminal status, if the run has finished.
    pub fn status(&self) -> Option<&TerminationStatus> {
        match &self.phase {
            Phase::Terminated(status) => Some(status),
            _ => None,
        }
    }

    pub(crate) fn terminate(&mut self, status: TerminationStatus) {
        self.converged = status.is_converged();
        self.phase = Phase::Terminated(status);
    }
}

/// Lagrange multiplier estimates of a constrained run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Multipliers {
    /// Equality multipliers `λ`.
    pub lambda: DVector<f64>,
    /// Inequality multipliers `μ`.
    pub mu: DVector<f64>,
}

impl Multipliers {
    pub fn zeros(equalities: usize, inequalities: usize) -> Self {
        Self {
            lambda: DVector::zeros(equalities),
            mu: DVector::zeros(inequalities),
        }
    }

    /// Largest multiplier magnitude, zero when there are no constraints.
    pub fn max_abs(&self) -> f64 {
        self.lambda
            .iter()
            .chain(self.mu.iter())
            .fold(0.0_f64, |acc, value| acc.max(value.abs()))
    }
}

/// Residuals of the first-order optimality (KKT) conditions
/// for `min f(x)` subject to `h(x) = 0` and `g(x) ≤ 0`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct KktResiduals {
    /// `‖∇f + J_hᵀλ + J_gᵀμ‖₂`.
    pub stationarity: f64,
    /// `‖h(x)‖₂`.
    pub equality_violation: f64,
    /// `max_i g_i(x)`, or `-∞` without inequalities.
    pub max_inequality: f64,
    /// `min_i μ_i`, or `+∞` without inequalities.
    pub min_multiplier: f64,
    /// `‖μ ⊙ g(x)‖₂`.
    pub complementarity: f64,
}

impl KktResiduals {
    pub fn evaluate(
        gradient: &DVector<f64>,
        equalities: &DVector<f64>,
        equality_jacobian: &DMatrix<f64>,
        inequalities: &DVector<f64>,
        inequality_jacobian: &DMatrix<f64>,
        multipliers: &Multipliers,
    ) -> Self {
        let lagrangian_gradient = lagrangian_gradient(
            gradient,
            equality_jacobian,
            inequality_jacobian,
            multipliers,
        );
        Self {
            stationarity: lagrangian_gradient.norm(),
            equality_violation: equalities.norm(),
            max_inequality: inequalities.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            min_multiplier: multipliers.mu.iter().copied().fold(f64::INFINITY, f64::min),
            complementarity: multipliers.mu.component_mul(inequalities).norm(),
        }
    }

    /// All five conditions hold within `tol`.
    pub fn satisfied(&self, tol: f64) -> bool {
        self.stationarity < tol
            && self.equality_violation < tol
            && self.max_inequality <= tol
            && self.min_multiplier >= -tol
            && self.complementarity < tol
    }

    /// Single summary number: the largest individual violation.
    pub fn norm(&self) -> f64 {
        self.stationarity
            .max(self.equality_violation)
            .max(self.max_inequality.max(0.0))
            .max((-self.min_multiplier).max(0.0))
            .max(self.complementarity)
    }
}

/// `∇ₓL = ∇f + J_hᵀλ + J_gᵀμ`.
pub(crate) fn lagrangian_gradient(
    gradient: &DVector<f64>,
    equality_jacobian: &DMatrix<f64>,
    inequality_jacobian: &DMatrix<f64>,
    multipliers: &Multipliers,
) -> DVector<f64> {
    gradient
        + equality_jacobian.tr_mul(&multipliers.lambda)
        + inequality_jacobian.tr_mul(&multipliers.mu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kkt_point_of_projection_problem_is_accepted() {
        // min (x0-1)² + (x1-2)² s.t. x0 + x1 = 0 at x = (-0.5, 0.5), λ = 3
        let gradient = DVector::from_vec(vec![-3.0, -3.0]);
        let equalities = DVector::from_vec(vec![0.0]);
        let jacobian = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);
        let multipliers = Multipliers {
            lambda: DVector::from_vec(vec![3.0]),
            mu: DVector::zeros(0),
        };

        let residuals = KktResiduals::evaluate(
            &gradient,
            &equalities,
            &jacobian,
            &DVector::zeros(0),
            &DMatrix::zeros(0, 2),
            &multipliers,
        );
        assert!(residuals.satisfied(1e-9));
        assert_eq!(residuals.norm(), 0.0);
    }

    #[test]
    fn each_violated_condition_is_detected() {
        let gradient = DVector::from_vec(vec![0.0]);
        let empty = DMatrix::zeros(0, 1);
        let jacobian = DMatrix::from_row_slice(1, 1, &[1.0]);

        // negative multiplier balancing a zero gradient is not dual feasible
        let residuals = KktResiduals::evaluate(
            &DVector::from_vec(vec![0.5]),
            &DVector::zeros(0),
            &empty,
            &DVector::from_vec(vec![0.0]),
            &jacobian,
            &Multipliers {
                lambda: DVector::zeros(0),
                mu: DVector::from_vec(vec![-0.5]),
            },
        );
        assert_eq!(residuals.stationarity, 0.0);
        assert!(!residuals.satisfied(1e-6));
        assert_eq!(residuals.norm(), 0.5);

        // inactive constraint with positive multiplier breaks complementarity
        let residuals = KktResiduals::evaluate(
            &gradient,
            &DVector::zeros(0),
            &empty,
            &DVector::from_vec(vec![-2.0]),
            &DMatrix::zeros(1, 1),
            &Multipliers {
                lambda: DVector::zeros(0),
                mu: DVector::from_vec(vec![1.0]),
            },
        );
        assert_eq!(residuals.complementarity, 2.0);
        assert!(!residuals.satisfied(1e-6));
    }

    #[test]
    fn state_records_terminal_status() {
        let mut state = ConvergenceState::new(10);
        assert_eq!(state.phase, Phase::Initializing);
        assert!(state.status().is_none());

        state.terminate(TerminationStatus::Converged);
        assert!(state.converged);
        assert!(state.phase.is_terminal());
        assert_eq!(state.status(), Some(&TerminationStatus::Converged));
    }
}
