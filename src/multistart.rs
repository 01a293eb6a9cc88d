//! Randomized restarts executed in parallel.
//!
//! A single run that fails or stalls is never retried automatically. This
//! module offers the explicit alternative: draw several starting points around
//! a base guess, run an independent BFGS minimization from each, and keep the
//! best result.

use log::debug;
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;

use crate::bfgs::Bfgs;
use crate::error::{OptimError, Result};
use crate::problem::Objective;
use crate::result::OptimizationResult;
use crate::subproblem::SubproblemSolver;

/// Starting points `x0 + scale · z` with standard normal `z`.
#[derive(Clone, Debug)]
pub struct StartingPoints {
    points: DMatrix<f64>,
}

impl StartingPoints {
    /// Builds starting points from a matrix with one point per row.
    pub fn new(points: DMatrix<f64>) -> Result<Self> {
        if points.nrows() == 0 {
            return Err(OptimError::dimension_mismatch("starting points", 1, 0));
        }
        Ok(Self { points })
    }

    /// Perturbs `center` with Gaussian noise. The first point is `center` itself.
    pub fn gaussian(center: &DVector<f64>, count: usize, scale: f64, seed: u64) -> Result<Self> {
        if count == 0 {
            return Err(OptimError::dimension_mismatch("starting points", 1, 0));
        }
        let n = center.len();
        let mut rng = SmallRng::seed_from_u64(seed);
        let points = DMatrix::from_fn(count, n, |row, col| {
            if row == 0 {
                center[col]
            } else {
                let z: f64 = StandardNormal.sample(&mut rng);
                center[col] + scale * z
            }
        });
        Ok(Self { points })
    }

    pub fn count(&self) -> usize {
        self.points.nrows()
    }

    pub fn dimension(&self) -> usize {
        self.points.ncols()
    }

    /// The `index`-th starting point.
    pub fn point(&self, index: usize) -> DVector<f64> {
        self.points.row(index).transpose()
    }
}

/// Outcome of a multistart search.
#[derive(Clone, Debug)]
pub struct MultiStartSummary {
    /// Result of the best run: lowest objective among converged runs, or
    /// among all runs when none converged.
    pub best: OptimizationResult,
    /// Index of the starting point that produced `best`.
    pub best_index: usize,
    /// Results of every run in starting-point order.
    pub runs: Vec<OptimizationResult>,
}

impl MultiStartSummary {
    pub fn converged_runs(&self) -> usize {
        self.runs.iter().filter(|run| run.converged()).count()
    }
}

impl<S> Bfgs<S>
where
    S: SubproblemSolver + Sync,
{
    /// Minimizes from every starting point in parallel.
    ///
    /// Runs are independent and share only the immutable problem.
    pub fn minimize_multistart<P>(
        &self,
        problem: &P,
        starts: &StartingPoints,
    ) -> Result<MultiStartSummary>
    where
        P: Objective + Sync + ?Sized,
    {
        if starts.dimension() != problem.dimension() {
            return Err(OptimError::dimension_mismatch(
                "starting point dimension",
                problem.dimension(),
                starts.dimension(),
            ));
        }

        let runs = (0..starts.count())
            .into_par_iter()
            .map(|index| self.minimize(problem, &starts.point(index)))
            .collect::<Result<Vec<_>>>()?;

        let best_index = select_best(&runs);
        debug!(
            "multistart: {} of {} runs converged, best start {best_index}",
            runs.iter().filter(|run| run.converged()).count(),
            runs.len()
        );

        Ok(MultiStartSummary {
            best: runs[best_index].clone(),
            best_index,
            runs,
        })
    }
}

/// Lowest objective among converged runs, falling back to all runs.
/// Ties keep the earliest starting point.
fn select_best(runs: &[OptimizationResult]) -> usize {
    let pick = |require_convergence: bool| {
        runs.iter()
            .enumerate()
            .filter(|(_, run)| !require_convergence || run.converged())
            .fold(None::<(usize, f64)>, |best, (index, run)| match best {
                Some((_, value)) if value <= run.objective => best,
                _ => Some((index, run.objective)),
            })
            .map(|(index, _)| index)
    };
    pick(true).or_else(|| pick(false)).unwrap_or(0)
}
