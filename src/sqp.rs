//! Sequential quadratic programming for problems with equality and inequality constraints.
//!
//! Every iteration linearizes the constraints at the current iterate, solves
//!
//! ```text
//! minimize    ∇f(x)ᵀs + ½ sᵀBs
//! subject to  h(x) + J_h(x) s = 0
//!             g(x) + J_g(x) s ≤ 0
//! ```
//!
//! for a step `s` and multipliers `(λ, μ)`, and backtracks on the exact ℓ1
//! merit function `φ(x) = f(x) + ρ (‖h(x)‖₁ + ‖max(0, g(x))‖₁)`. The curvature
//! estimate `B` tracks the Hessian of the Lagrangian through gradient
//! differences of `∇ₓL(·, λ, μ)` at the new multipliers.

use log::debug;
use nalgebra::DVector;

use crate::convergence::{
    lagrangian_gradient, ConvergenceState, KktResiduals, Multipliers, Phase, TerminationStatus,
};
use crate::curvature::CurvatureEstimate;
use crate::driver::{self, Iteration};
use crate::error::Result;
use crate::line_search::BacktrackingLineSearch;
use crate::linalg::check_len;
use crate::options::OptimizerOptions;
use crate::problem::{constraint_values, ConstrainedEvaluation, ConstrainedObjective};
use crate::result::OptimizationResult;
use crate::subproblem::{ActiveSetSolver, QpSolution, QpSubproblem, SubproblemSolver};

/// SQP minimizer with a BFGS approximation of the Lagrangian Hessian.
#[derive(Clone, Debug)]
pub struct Sqp<S = ActiveSetSolver> {
    options: OptimizerOptions,
    solver: S,
}

impl Sqp<ActiveSetSolver> {
    pub fn new(options: OptimizerOptions) -> Self {
        Self {
            options,
            solver: ActiveSetSolver::default(),
        }
    }
}

impl Default for Sqp<ActiveSetSolver> {
    fn default() -> Self {
        Self::new(OptimizerOptions::default())
    }
}

impl<S: SubproblemSolver> Sqp<S> {
    /// Replaces the QP solver.
    pub fn with_solver<T: SubproblemSolver>(self, solver: T) -> Sqp<T> {
        Sqp {
            options: self.options,
            solver,
        }
    }

    pub fn options(&self) -> &OptimizerOptions {
        &self.options
    }

    /// Starts a run at `x0` with zero multipliers.
    pub fn start<'a, P>(&'a self, problem: &'a P, x0: DVector<f64>) -> Result<SqpRun<'a, P, S>>
    where
        P: ConstrainedObjective + ?Sized,
    {
        let multipliers = Multipliers::zeros(problem.equality_count(), problem.inequality_count());
        self.start_with_multipliers(problem, x0, multipliers)
    }

    /// Starts a run at `x0` with caller-provided multiplier estimates,
    /// typically the multipliers of an earlier run.
    pub fn start_with_multipliers<'a, P>(
        &'a self,
        problem: &'a P,
        x0: DVector<f64>,
        multipliers: Multipliers,
    ) -> Result<SqpRun<'a, P, S>>
    where
        P: ConstrainedObjective + ?Sized,
    {
        self.options.validate()?;
        let n = problem.dimension();
        check_len(&x0, n, "initial point")?;
        check_len(
            &multipliers.lambda,
            problem.equality_count(),
            "equality multipliers",
        )?;
        check_len(
            &multipliers.mu,
            problem.inequality_count(),
            "inequality multipliers",
        )?;
        let current = ConstrainedEvaluation::of(problem, &x0)?;

        Ok(SqpRun {
            problem,
            solver: &self.solver,
            options: &self.options,
            line_search: BacktrackingLineSearch::from_options(&self.options),
            x: x0,
            current,
            multipliers,
            curvature: CurvatureEstimate::identity(n, self.options.sy_threshold),
            penalty: 0.0,
            state: ConvergenceState::new(self.options.max_iter),
            evaluations: 1,
        })
    }

    /// Runs the loop from `x0` until the KKT test passes, the cap is hit, or
    /// a collaborator fails.
    pub fn minimize<P>(&self, problem: &P, x0: &DVector<f64>) -> Result<OptimizationResult>
    where
        P: ConstrainedObjective + ?Sized,
    {
        let mut run = self.start(problem, x0.clone())?;
        run.run()?;
        Ok(run.into_result())
    }
}

/// In-progress SQP run.
pub struct SqpRun<'a, P: ?Sized, S> {
    problem: &'a P,
    solver: &'a S,
    options: &'a OptimizerOptions,
    line_search: BacktrackingLineSearch,
    x: DVector<f64>,
    current: ConstrainedEvaluation,
    multipliers: Multipliers,
    curvature: CurvatureEstimate,
    penalty: f64,
    state: ConvergenceState,
    evaluations: usize,
}

impl<'a, P, S> SqpRun<'a, P, S>
where
    P: ConstrainedObjective + ?Sized,
    S: SubproblemSolver,
{
    pub fn step(&mut self) -> Result<Phase> {
        driver::advance(self)
    }

    pub fn run(&mut self) -> Result<Phase> {
        driver::drive(self, |_| true)
    }

    pub fn run_while<F>(&mut self, keep_going: F) -> Result<Phase>
    where
        F: FnMut(&ConvergenceState) -> bool,
    {
        driver::drive(self, keep_going)
    }

    pub fn x(&self) -> &DVector<f64> {
        &self.x
    }

    pub fn value(&self) -> f64 {
        self.current.objective.value
    }

    pub fn multipliers(&self) -> &Multipliers {
        &self.multipliers
    }

    pub fn curvature(&self) -> &CurvatureEstimate {
        &self.curvature
    }

    pub fn state(&self) -> &ConvergenceState {
        &self.state
    }

    /// KKT residuals at the last accepted iterate and multipliers.
    pub fn kkt(&self) -> KktResiduals {
        KktResiduals::evaluate(
            &self.current.objective.gradient,
            &self.current.equalities,
            &self.current.equality_jacobian,
            &self.current.inequalities,
            &self.current.inequality_jacobian,
            &self.multipliers,
        )
    }

    /// Packages the run; an unfinished run is reported as cancelled.
    pub fn into_result(self) -> OptimizationResult {
        let kkt = self.kkt();
        let status = self
            .state
            .status()
            .cloned()
            .unwrap_or(TerminationStatus::Cancelled);
        OptimizationResult {
            objective: self.current.objective.value,
            residual: kkt.norm(),
            x: self.x,
            iterations: self.state.iterations,
            status,
            multipliers: Some(self.multipliers),
            kkt: Some(kkt),
            evaluations: self.evaluations,
            skipped_updates: self.curvature.skipped_updates(),
        }
    }

    fn solve_subproblem(&self) -> Result<QpSolution> {
        let qp = QpSubproblem {
            hessian: self.curvature.matrix(),
            gradient: &self.current.objective.gradient,
            equalities: &self.current.equalities,
            equality_jacobian: &self.current.equality_jacobian,
            inequalities: &self.current.inequalities,
            inequality_jacobian: &self.current.inequality_jacobian,
        };
        let solution = self.solver.solve(&qp)?;
        check_len(&solution.step, self.x.len(), "subproblem step")?;
        check_len(
            &solution.lambda,
            self.current.equalities.len(),
            "subproblem equality multipliers",
        )?;
        check_len(
            &solution.mu,
            self.current.inequalities.len(),
            "subproblem inequality multipliers",
        )?;
        Ok(solution)
    }
}

/// `‖h‖₁ + ‖max(0, g)‖₁`.
fn l1_violation(equalities: &DVector<f64>, inequalities: &DVector<f64>) -> f64 {
    equalities.lp_norm(1) + inequalities.iter().map(|value| value.max(0.0)).sum::<f64>()
}

impl<'a, P, S> Iteration for SqpRun<'a, P, S>
where
    P: ConstrainedObjective + ?Sized,
    S: SubproblemSolver,
{
    fn state(&self) -> &ConvergenceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ConvergenceState {
        &mut self.state
    }

    fn convergence(&self) -> (f64, bool) {
        let kkt = self.kkt();
        (kkt.norm(), kkt.satisfied(self.options.tol_grad))
    }

    fn iterate(&mut self) -> Result<()> {
        let QpSolution { step, lambda, mu } = self.solve_subproblem()?;
        let candidate = Multipliers { lambda, mu };

        let penalty = self
            .penalty
            .max(candidate.max_abs() + self.options.penalty_offset);
        let violation = l1_violation(&self.current.equalities, &self.current.inequalities);
        let merit = self.current.objective.value + penalty * violation;
        let slope = self.current.objective.gradient.dot(&step) - penalty * violation;

        let problem = self.problem;
        let mut trials = 0usize;
        let mut oracle_error = None;
        let accepted = self.line_search.search(&self.x, &step, merit, slope, |trial| {
            trials += 1;
            let value = problem.value(trial);
            match constraint_values(problem, trial) {
                Ok((equalities, inequalities)) => {
                    value + penalty * l1_violation(&equalities, &inequalities)
                }
                Err(error) => {
                    oracle_error.get_or_insert(error);
                    f64::NAN
                }
            }
        });
        self.evaluations += trials;
        if let Some(error) = oracle_error {
            return Err(error);
        }
        let accepted = accepted?;

        let x_next = &self.x + &step * accepted.alpha;
        let next = ConstrainedEvaluation::of(problem, &x_next)?;
        self.evaluations += 1;

        let s = &x_next - &self.x;
        let y = lagrangian_gradient(
            &next.objective.gradient,
            &next.equality_jacobian,
            &next.inequality_jacobian,
            &candidate,
        ) - lagrangian_gradient(
            &self.current.objective.gradient,
            &self.current.equality_jacobian,
            &self.current.inequality_jacobian,
            &candidate,
        );
        self.curvature.update(&s, &y)?;

        debug!(
            "sqp iteration {}: f = {:.6e}, violation = {:.3e}, alpha = {:.3e}, rho = {:.3e}",
            self.state.iterations + 1,
            next.objective.value,
            l1_violation(&next.equalities, &next.inequalities),
            accepted.alpha,
            penalty
        );

        self.x = x_next;
        self.current = next;
        self.multipliers = candidate;
        self.penalty = penalty;
        Ok(())
    }
}
