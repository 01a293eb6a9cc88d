//! Quasi-Newton (BFGS) and sequential quadratic programming (SQP) solvers for
//! smooth nonlinear optimization.
//!
//! The crate focuses on the numerical core of both methods:
//!
//! - maintaining a positive-definite curvature approximation with the BFGS
//!   update (`curvature` module),
//! - solving a quadratic subproblem each iteration through an injectable
//!   solver (`subproblem` module),
//! - accepting steps with a backtracking Armijo line search (`line_search`
//!   module), and
//! - driving the iteration state machine with gradient-norm or KKT
//!   convergence tests (`bfgs` and `sqp` modules).
//!
//! Objectives, gradients, constraints and Jacobians are supplied by the caller
//! through the [`Objective`] and [`ConstrainedObjective`] traits, or assembled
//! from closures with [`Problem::builder`].
//!
//! # Quick start
//!
//! ```no_run
//! use nalgebra::{DMatrix, DVector};
//! use qnopt::{OptimizerOptions, Problem, Sqp};
//!
//! // minimize (x0 - 1)² + (x1 - 2)² subject to x0 + x1 = 0
//! let problem = Problem::builder(
//!     2,
//!     |x: &DVector<f64>| (x[0] - 1.0).powi(2) + (x[1] - 2.0).powi(2),
//!     |x: &DVector<f64>| DVector::from_vec(vec![2.0 * (x[0] - 1.0), 2.0 * (x[1] - 2.0)]),
//! )
//! .equalities(
//!     1,
//!     |x: &DVector<f64>| DVector::from_vec(vec![x[0] + x[1]]),
//!     |_: &DVector<f64>| DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
//! )
//! .build()
//! .expect("well-formed problem");
//!
//! let sqp = Sqp::new(OptimizerOptions::default());
//! let result = sqp
//!     .minimize(&problem, &DVector::zeros(2))
//!     .expect("valid configuration");
//! println!("x = {:?}, status = {:?}", result.x, result.status);
//! ```
//!
//! Runs never panic on numerical trouble. Precondition violations (mismatched
//! dimensions, invalid options) are returned as errors; a failed line search
//! or an infeasible subproblem ends the run with
//! [`TerminationStatus::Failed`] and the last accepted iterate.

pub mod bfgs;
pub mod convergence;
pub mod curvature;
mod driver;
pub mod error;
pub mod line_search;
pub mod linalg;
pub mod multistart;
pub mod options;
pub mod problem;
pub mod result;
pub mod sqp;
pub mod subproblem;

pub use bfgs::{Bfgs, BfgsRun};
pub use convergence::{ConvergenceState, KktResiduals, Multipliers, Phase, TerminationStatus};
pub use curvature::{bfgs_update, CurvatureEstimate, CurvatureUpdate};
pub use error::{OptimError, Result};
pub use line_search::BacktrackingLineSearch;
pub use linalg::LinearBackend;
pub use multistart::{MultiStartSummary, StartingPoints};
pub use options::OptimizerOptions;
pub use problem::{ConstrainedObjective, Objective, Problem, ProblemBuilder};
pub use result::OptimizationResult;
pub use sqp::{Sqp, SqpRun};
pub use subproblem::{ActiveSetSolver, DirectSolve, QpSolution, QpSubproblem, SubproblemSolver};
