//! Loop skeleton shared by the BFGS and SQP runs.
//!
//! One call to [`advance`] moves a run through exactly one transition of
//!
//! ```text
//! Initializing → Iterating → { Converged | MaxIterExceeded | Failed }
//! ```
//!
//! The convergence test is evaluated at the current iterate before any step
//! is taken, so a run started at a stationary point terminates without moving.

use log::warn;

use crate::convergence::{ConvergenceState, Phase, TerminationStatus};
use crate::error::Result;

/// One optimizer run that can be advanced an iteration at a time.
pub(crate) trait Iteration {
    fn state(&self) -> &ConvergenceState;

    fn state_mut(&mut self) -> &mut ConvergenceState;

    /// Convergence measure at the current iterate and whether it passes the test.
    fn convergence(&self) -> (f64, bool);

    /// Performs one iteration. On error the iterate must be left untouched.
    fn iterate(&mut self) -> Result<()>;
}

/// Moves `run` through one state-machine transition and returns the new phase.
///
/// Fatal errors (precondition violations) propagate; every other iteration
/// error terminates the run with [`TerminationStatus::Failed`].
pub(crate) fn advance<I: Iteration + ?Sized>(run: &mut I) -> Result<Phase> {
    if run.state().phase.is_terminal() {
        return Ok(run.state().phase.clone());
    }

    let (residual, converged) = run.convergence();
    {
        let state = run.state_mut();
        state.phase = Phase::Iterating;
        state.residual = residual;
        if converged {
            state.terminate(TerminationStatus::Converged);
            return Ok(state.phase.clone());
        }
        if state.iterations >= state.max_iterations {
            state.terminate(TerminationStatus::MaxIterExceeded);
            return Ok(state.phase.clone());
        }
    }

    match run.iterate() {
        Ok(()) => {
            run.state_mut().iterations += 1;
        }
        Err(error) if error.is_fatal() => return Err(error),
        Err(error) => {
            let state = run.state_mut();
            warn!(
                "optimizer failed after {} iterations: {error}",
                state.iterations
            );
            state.terminate(TerminationStatus::Failed(error));
        }
    }
    Ok(run.state().phase.clone())
}

/// Advances `run` while `keep_going` approves the current state.
///
/// Returning `false` from `keep_going` cancels between iterations and leaves
/// the last accepted iterate in place.
pub(crate) fn drive<I, F>(run: &mut I, mut keep_going: F) -> Result<Phase>
where
    I: Iteration + ?Sized,
    F: FnMut(&ConvergenceState) -> bool,
{
    loop {
        let phase = advance(run)?;
        if phase.is_terminal() || !keep_going(run.state()) {
            return Ok(phase);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OptimError;

    /// Scalar halving sequence that fails on request.
    struct Halving {
        value: f64,
        fail_at: Option<f64>,
        fatal: bool,
        state: ConvergenceState,
    }

    impl Halving {
        fn new(value: f64, max_iterations: usize) -> Self {
            Self {
                value,
                fail_at: None,
                fatal: false,
                state: ConvergenceState::new(max_iterations),
            }
        }
    }

    impl Iteration for Halving {
        fn state(&self) -> &ConvergenceState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut ConvergenceState {
            &mut self.state
        }

        fn convergence(&self) -> (f64, bool) {
            (self.value, self.value < 1e-3)
        }

        fn iterate(&mut self) -> Result<()> {
            if matches!(self.fail_at, Some(limit) if self.value < limit) {
                return Err(if self.fatal {
                    OptimError::dimension_mismatch("halving", 1, 2)
                } else {
                    OptimError::Infeasible { context: "halving" }
                });
            }
            self.value /= 2.0;
            Ok(())
        }
    }

    #[test]
    fn converges_and_then_stays_terminal() {
        let mut run = Halving::new(1.0, 100);
        let phase = drive(&mut run, |_| true).unwrap();
        assert_eq!(phase, Phase::Terminated(TerminationStatus::Converged));
        assert_eq!(run.state.iterations, 10);

        let again = advance(&mut run).unwrap();
        assert_eq!(again, phase);
        assert_eq!(run.state.iterations, 10);
    }

    #[test]
    fn stationary_start_converges_without_iterating() {
        let mut run = Halving::new(1e-4, 1);
        let phase = advance(&mut run).unwrap();
        assert_eq!(phase, Phase::Terminated(TerminationStatus::Converged));
        assert_eq!(run.state.iterations, 0);
        assert_eq!(run.value, 1e-4);
    }

    #[test]
    fn cap_is_reported_as_status() {
        let mut run = Halving::new(1.0, 3);
        let phase = drive(&mut run, |_| true).unwrap();
        assert_eq!(phase, Phase::Terminated(TerminationStatus::MaxIterExceeded));
        assert_eq!(run.state.iterations, 3);
        assert_eq!(run.value, 0.125);
    }

    #[test]
    fn collaborator_errors_fail_the_run_and_keep_the_iterate() {
        let mut run = Halving::new(1.0, 100);
        run.fail_at = Some(0.3);
        let phase = drive(&mut run, |_| true).unwrap();
        assert!(matches!(
            phase,
            Phase::Terminated(TerminationStatus::Failed(OptimError::Infeasible { .. }))
        ));
        assert_eq!(run.value, 0.25);
    }

    #[test]
    fn fatal_errors_propagate() {
        let mut run = Halving::new(1.0, 100);
        run.fail_at = Some(2.0);
        run.fatal = true;
        assert!(drive(&mut run, |_| true).is_err());
    }

    #[test]
    fn predicate_cancels_between_iterations() {
        let mut run = Halving::new(1.0, 100);
        let phase = drive(&mut run, |state| state.iterations < 4).unwrap();
        assert_eq!(phase, Phase::Iterating);
        assert_eq!(run.state.iterations, 4);
        assert_eq!(run.value, 0.0625);
    }
}
