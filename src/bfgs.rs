//! Unconstrained quasi-Newton minimization with BFGS curvature updates.

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

use crate::convergence::{ConvergenceState, Phase, TerminationStatus};
use crate::curvature::CurvatureEstimate;
use crate::driver::{self, Iteration};
use crate::error::{OptimError, Result};
use crate::line_search::BacktrackingLineSearch;
use crate::options::OptimizerOptions;
use crate::problem::{Evaluation, Objective};
use crate::result::OptimizationResult;
use crate::subproblem::{DirectSolve, QpSubproblem, SubproblemSolver};

/// BFGS minimizer for smooth unconstrained objectives.
///
/// Each iteration solves `B p = -∇f(x)` through the configured
/// [`SubproblemSolver`], backtracks along `p` until the Armijo condition
/// holds, and refreshes `B` with the accepted step. The run converges once
/// `‖∇f(x)‖ < tol_grad`.
#[derive(Clone, Debug)]
pub struct Bfgs<S = DirectSolve> {
    options: OptimizerOptions,
    solver: S,
}

impl Bfgs<DirectSolve> {
    pub fn new(options: OptimizerOptions) -> Self {
        let solver = DirectSolve::new(options.backend);
        Self { options, solver }
    }
}

impl Default for Bfgs<DirectSolve> {
    fn default() -> Self {
        Self::new(OptimizerOptions::default())
    }
}

impl<S: SubproblemSolver> Bfgs<S> {
    /// Replaces the direction solver.
    pub fn with_solver<T: SubproblemSolver>(self, solver: T) -> Bfgs<T> {
        Bfgs {
            options: self.options,
            solver,
        }
    }

    pub fn options(&self) -> &OptimizerOptions {
        &self.options
    }

    /// Validates the configuration, evaluates the oracle at `x0`, and returns
    /// a run ready to be stepped.
    pub fn start<'a, P>(&'a self, problem: &'a P, x0: DVector<f64>) -> Result<BfgsRun<'a, P, S>>
    where
        P: Objective + ?Sized,
    {
        self.options.validate()?;
        let n = problem.dimension();
        if x0.len() != n {
            return Err(OptimError::dimension_mismatch("initial point", n, x0.len()));
        }
        let current = Evaluation::of(problem, &x0)?;

        Ok(BfgsRun {
            problem,
            solver: &self.solver,
            options: &self.options,
            line_search: BacktrackingLineSearch::from_options(&self.options),
            x: x0,
            current,
            curvature: CurvatureEstimate::identity(n, self.options.sy_threshold),
            no_constraints: DVector::zeros(0),
            no_jacobian: DMatrix::zeros(0, n),
            state: ConvergenceState::new(self.options.max_iter),
            evaluations: 1,
        })
    }

    /// Runs the loop from `x0` until it converges, hits the cap, or fails.
    ///
    /// Only precondition violations are returned as `Err`; a failed line
    /// search is reported through [`OptimizationResult::status`].
    pub fn minimize<P>(&self, problem: &P, x0: &DVector<f64>) -> Result<OptimizationResult>
    where
        P: Objective + ?Sized,
    {
        let mut run = self.start(problem, x0.clone())?;
        run.run()?;
        Ok(run.into_result())
    }
}

/// In-progress BFGS run that owns its iterate and curvature estimate.
pub struct BfgsRun<'a, P: ?Sized, S> {
    problem: &'a P,
    solver: &'a S,
    options: &'a OptimizerOptions,
    line_search: BacktrackingLineSearch,
    x: DVector<f64>,
    current: Evaluation,
    curvature: CurvatureEstimate,
    no_constraints: DVector<f64>,
    no_jacobian: DMatrix<f64>,
    state: ConvergenceState,
    evaluations: usize,
}

impl<'a, P, S> BfgsRun<'a, P, S>
where
    P: Objective + ?Sized,
    S: SubproblemSolver,
{
    /// Performs one state-machine transition.
    pub fn step(&mut self) -> Result<Phase> {
        driver::advance(self)
    }

    /// Iterates to termination.
    pub fn run(&mut self) -> Result<Phase> {
        driver::drive(self, |_| true)
    }

    /// Iterates while `keep_going` returns `true`; stopping early leaves the
    /// last accepted iterate in place.
    pub fn run_while<F>(&mut self, keep_going: F) -> Result<Phase>
    where
        F: FnMut(&ConvergenceState) -> bool,
    {
        driver::drive(self, keep_going)
    }

    /// Last accepted iterate.
    pub fn x(&self) -> &DVector<f64> {
        &self.x
    }

    /// Objective value at the last accepted iterate.
    pub fn value(&self) -> f64 {
        self.current.value
    }

    pub fn gradient(&self) -> &DVector<f64> {
        &self.current.gradient
    }

    pub fn curvature(&self) -> &CurvatureEstimate {
        &self.curvature
    }

    pub fn state(&self) -> &ConvergenceState {
        &self.state
    }

    /// Packages the run; an unfinished run is reported as cancelled.
    pub fn into_result(self) -> OptimizationResult {
        let status = self
            .state
            .status()
            .cloned()
            .unwrap_or(TerminationStatus::Cancelled);
        OptimizationResult {
            objective: self.current.value,
            residual: self.current.gradient.norm(),
            x: self.x,
            iterations: self.state.iterations,
            status,
            multipliers: None,
            kkt: None,
            evaluations: self.evaluations,
            skipped_updates: self.curvature.skipped_updates(),
        }
    }

    fn search_direction(&mut self) -> Result<(DVector<f64>, f64)> {
        let qp = QpSubproblem {
            hessian: self.curvature.matrix(),
            gradient: &self.current.gradient,
            equalities: &self.no_constraints,
            equality_jacobian: &self.no_jacobian,
            inequalities: &self.no_constraints,
            inequality_jacobian: &self.no_jacobian,
        };
        let direction = self.solver.solve(&qp)?.step;
        if direction.len() != self.x.len() {
            return Err(OptimError::dimension_mismatch(
                "search direction",
                self.x.len(),
                direction.len(),
            ));
        }

        let slope = self.current.gradient.dot(&direction);
        if slope < 0.0 {
            return Ok((direction, slope));
        }

        warn!(
            "BFGS direction is not a descent direction (slope {slope:e}); resetting curvature"
        );
        self.curvature.reset();
        let steepest = -&self.current.gradient;
        let slope = -self.current.gradient.norm_squared();
        Ok((steepest, slope))
    }
}

impl<'a, P, S> Iteration for BfgsRun<'a, P, S>
where
    P: Objective + ?Sized,
    S: SubproblemSolver,
{
    fn state(&self) -> &ConvergenceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ConvergenceState {
        &mut self.state
    }

    fn convergence(&self) -> (f64, bool) {
        let norm = self.current.gradient.norm();
        (norm, norm < self.options.tol_grad)
    }

    fn iterate(&mut self) -> Result<()> {
        let (direction, slope) = self.search_direction()?;

        let problem = self.problem;
        let mut trials = 0usize;
        let accepted = self.line_search.search(
            &self.x,
            &direction,
            self.current.value,
            slope,
            |trial| {
                trials += 1;
                problem.value(trial)
            },
        );
        self.evaluations += trials;
        let accepted = accepted?;

        let x_next = &self.x + &direction * accepted.alpha;
        let next = Evaluation::of(problem, &x_next)?;
        self.evaluations += 1;

        let s = &x_next - &self.x;
        let y = &next.gradient - &self.current.gradient;
        self.curvature.update(&s, &y)?;

        debug!(
            "bfgs iteration {}: f = {:.6e}, |g| = {:.3e}, alpha = {:.3e}",
            self.state.iterations + 1,
            next.value,
            next.gradient.norm(),
            accepted.alpha
        );

        self.x = x_next;
        self.current = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::problem::Problem;

    fn paraboloid() -> Problem {
        Problem::builder(
            2,
            |x: &DVector<f64>| (x[0] - 1.0).powi(2) + (x[1] - 2.0).powi(2),
            |x: &DVector<f64>| DVector::from_vec(vec![2.0 * (x[0] - 1.0), 2.0 * (x[1] - 2.0)]),
        )
        .build()
        .unwrap()
    }

    #[test]
    fn paraboloid_converges_in_one_iteration() {
        let problem = paraboloid();
        let result = Bfgs::new(OptimizerOptions::default())
            .minimize(&problem, &DVector::zeros(2))
            .unwrap();

        assert_eq!(result.status, TerminationStatus::Converged);
        assert_eq!(result.iterations, 1);
        assert_relative_eq!(result.x, DVector::from_vec(vec![1.0, 2.0]), epsilon = 1e-12);
        assert_eq!(result.evaluations, 4);
    }

    #[test]
    fn wrong_initial_dimension_is_fatal() {
        let problem = paraboloid();
        let result = Bfgs::new(OptimizerOptions::default()).minimize(&problem, &DVector::zeros(3));
        assert_eq!(
            result.unwrap_err(),
            OptimError::dimension_mismatch("initial point", 2, 3)
        );
    }

    #[test]
    fn invalid_options_are_fatal() {
        let problem = paraboloid();
        let options = OptimizerOptions::default().with_tolerance(-1.0);
        let result = Bfgs::new(options).minimize(&problem, &DVector::zeros(2));
        assert!(matches!(result, Err(OptimError::InvalidOption { .. })));
    }

    #[test]
    fn stepping_exposes_intermediate_iterates() {
        let problem = paraboloid();
        let bfgs = Bfgs::new(OptimizerOptions::default());
        let mut run = bfgs.start(&problem, DVector::from_vec(vec![5.0, -3.0])).unwrap();
        assert_eq!(run.state().phase, Phase::Initializing);

        let phase = run.step().unwrap();
        assert_eq!(phase, Phase::Iterating);
        assert_eq!(run.state().iterations, 1);
        assert!(run.value() < 41.0);

        let result = run.into_result();
        assert_eq!(result.status, TerminationStatus::Cancelled);
        assert_eq!(result.iterations, 1);
    }

    #[test]
    fn cap_of_one_iteration_reports_max_iter_on_curved_valley() {
        let problem = Problem::builder(
            2,
            |x: &DVector<f64>| x[0].powi(4) + 10.0 * x[1].powi(2),
            |x: &DVector<f64>| DVector::from_vec(vec![4.0 * x[0].powi(3), 20.0 * x[1]]),
        )
        .build()
        .unwrap();
        let options = OptimizerOptions::default().with_max_iterations(1);
        let result = Bfgs::new(options)
            .minimize(&problem, &DVector::from_vec(vec![2.0, 1.0]))
            .unwrap();

        assert_eq!(result.status, TerminationStatus::MaxIterExceeded);
        assert_eq!(result.iterations, 1);
        assert!(result.objective < 26.0);
    }
}
