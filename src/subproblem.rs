//! Quadratic subproblems solved once per outer iteration.
//!
//! Each iteration asks a [`SubproblemSolver`] for a step `s` minimizing the
//! local model
//!
//! ```text
//! minimize    gᵀs + ½ sᵀBs
//! subject to  h + J_h s = 0
//!             c + J_c s ≤ 0
//! ```
//!
//! together with multiplier estimates for the linearized constraints. The
//! solver is injected so that callers can substitute any conforming convex
//! QP solver; two small dense implementations ship with the crate.

use log::trace;
use nalgebra::linalg::Cholesky;
use nalgebra::{DMatrix, DVector};

use crate::error::{OptimError, Result};
use crate::linalg::{check_shape, ensure_finite, residual_outside_span, solve_lu, LinearBackend};

/// Borrowed data describing one quadratic model.
#[derive(Clone, Copy, Debug)]
pub struct QpSubproblem<'a> {
    /// Curvature estimate `B` (n × n, symmetric).
    pub hessian: &'a DMatrix<f64>,
    /// Objective gradient `g` at the current iterate.
    pub gradient: &'a DVector<f64>,
    /// Equality constraint values `h(x)`.
    pub equalities: &'a DVector<f64>,
    /// Jacobian `J_h` of the equality constraints.
    pub equality_jacobian: &'a DMatrix<f64>,
    /// Inequality constraint values `c(x)`.
    pub inequalities: &'a DVector<f64>,
    /// Jacobian `J_c` of the inequality constraints.
    pub inequality_jacobian: &'a DMatrix<f64>,
}

impl<'a> QpSubproblem<'a> {
    /// Number of decision variables.
    pub fn dimension(&self) -> usize {
        self.gradient.len()
    }

    /// Whether the model carries any linearized constraint.
    pub fn is_constrained(&self) -> bool {
        !self.equalities.is_empty() || !self.inequalities.is_empty()
    }

    /// Checks that every block agrees with the gradient dimension.
    pub fn validate(&self) -> Result<()> {
        let n = self.dimension();
        check_shape(self.hessian, n, n, "subproblem Hessian")?;
        let me = self.equalities.len();
        check_shape(self.equality_jacobian, me, n, "subproblem equality Jacobian")?;
        let mi = self.inequalities.len();
        check_shape(
            self.inequality_jacobian,
            mi,
            n,
            "subproblem inequality Jacobian",
        )?;
        Ok(())
    }
}

/// Step and multiplier estimates returned by a subproblem solver.
#[derive(Clone, Debug, PartialEq)]
pub struct QpSolution {
    /// Step `s` from the current iterate.
    pub step: DVector<f64>,
    /// Equality multipliers `λ`.
    pub lambda: DVector<f64>,
    /// Inequality multipliers `μ ≥ 0`.
    pub mu: DVector<f64>,
}

/// Capability that solves a [`QpSubproblem`].
///
/// Implementations must return a point satisfying the KKT conditions of the
/// subproblem, or report `Infeasible` / `Unbounded`.
pub trait SubproblemSolver {
    fn solve(&self, qp: &QpSubproblem<'_>) -> Result<QpSolution>;
}

/// Newton-like direction `s = -B⁻¹g` for unconstrained models.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectSolve {
    backend: LinearBackend,
}

impl DirectSolve {
    pub fn new(backend: LinearBackend) -> Self {
        Self { backend }
    }
}

impl SubproblemSolver for DirectSolve {
    fn solve(&self, qp: &QpSubproblem<'_>) -> Result<QpSolution> {
        qp.validate()?;
        if qp.is_constrained() {
            return Err(OptimError::dimension_mismatch(
                "direct solve constraint count",
                0,
                qp.equalities.len() + qp.inequalities.len(),
            ));
        }
        let rhs = -qp.gradient;
        let step = self.backend.solve(qp.hessian, &rhs, "Newton direction")?;
        Ok(QpSolution {
            step,
            lambda: DVector::zeros(0),
            mu: DVector::zeros(0),
        })
    }
}

/// Dense dual active-set solver (Goldfarb–Idnani) for strictly convex QPs.
///
/// The search starts from the unconstrained minimizer `-B⁻¹g`, which is dual
/// feasible, and adds violated constraints one at a time while keeping every
/// working multiplier of an inequality nonnegative. A working inequality whose
/// multiplier would turn negative is dropped on the way. No feasible starting
/// step is needed. A violated constraint whose normal lies in the span of the
/// working normals, with no working inequality left to release, proves that
/// the linearized constraints have no common solution.
///
/// Equality rows that repeat earlier rows and agree with them are skipped and
/// receive a zero multiplier.
#[derive(Clone, Debug)]
pub struct ActiveSetSolver {
    /// Upper bound on primal and dual steps.
    pub max_iterations: usize,
    /// Slack allowed on linearized constraints and working multipliers.
    pub tolerance: f64,
}

impl Default for ActiveSetSolver {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-10,
        }
    }
}

impl ActiveSetSolver {
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }
}

impl SubproblemSolver for ActiveSetSolver {
    fn solve(&self, qp: &QpSubproblem<'_>) -> Result<QpSolution> {
        qp.validate()?;
        let cholesky = Cholesky::new(qp.hessian.clone()).ok_or(OptimError::Unbounded {
            context: "curvature estimate is not positive definite",
        })?;
        let x = cholesky.solve(&(-qp.gradient));
        ensure_finite(&x, "unconstrained model minimizer")?;

        let mut search = DualSearch {
            solver: self,
            qp,
            x,
            working: Vec::new(),
            steps: 0,
        };

        for index in 0..qp.equalities.len() {
            if search.add(Bound::Equality(index))? == Addition::Redundant {
                trace!("active set: equality {index} repeats earlier rows, skipped");
            }
        }

        loop {
            let violated = (0..qp.inequalities.len())
                .map(Bound::Inequality)
                .filter(|bound| !search.is_working(*bound))
                .map(|bound| (bound, search.residual(bound)))
                .filter(|(_, value)| *value > self.tolerance)
                .max_by(|a, b| a.1.total_cmp(&b.1));

            match violated {
                Some((bound, value)) => {
                    trace!("active set: adding {bound:?} (violation {value:e})");
                    search.add(bound)?;
                }
                None => return Ok(search.into_solution()),
            }
        }
    }
}

/// Tolerance on the relative residual that marks a normal as linearly
/// dependent on the working normals.
const DEPENDENCE_TOLERANCE: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Bound {
    Equality(usize),
    Inequality(usize),
}

#[derive(Debug, PartialEq, Eq)]
enum Addition {
    Added,
    Redundant,
}

/// Constraint in the working set, stored with the orientation it was added in.
struct Working {
    bound: Bound,
    /// `-1` for an equality approached from below, `+1` otherwise.
    sign: f64,
    normal: DVector<f64>,
    multiplier: f64,
}

/// Iterate of the dual method.
///
/// Invariant: `B x + g + Σ multiplier · normal = 0` over the working set, every
/// working constraint holds with equality, and working inequality multipliers
/// are nonnegative.
struct DualSearch<'s, 'q> {
    solver: &'s ActiveSetSolver,
    qp: &'s QpSubproblem<'q>,
    x: DVector<f64>,
    working: Vec<Working>,
    steps: usize,
}

impl DualSearch<'_, '_> {
    fn normal(&self, bound: Bound) -> DVector<f64> {
        match bound {
            Bound::Equality(index) => self.qp.equality_jacobian.row(index).transpose(),
            Bound::Inequality(index) => self.qp.inequality_jacobian.row(index).transpose(),
        }
    }

    /// Linearized constraint value at `x`; positive means violated for inequalities.
    fn residual(&self, bound: Bound) -> f64 {
        let value = match bound {
            Bound::Equality(index) => self.qp.equalities[index],
            Bound::Inequality(index) => self.qp.inequalities[index],
        };
        value + self.normal(bound).dot(&self.x)
    }

    fn is_working(&self, bound: Bound) -> bool {
        self.working.iter().any(|entry| entry.bound == bound)
    }

    fn working_normals(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.x.len(), self.working.len(), |row, col| {
            self.working[col].normal[row]
        })
    }

    fn count_step(&mut self) -> Result<()> {
        if self.steps >= self.solver.max_iterations {
            return Err(OptimError::SubproblemDidNotConverge {
                iterations: self.steps,
            });
        }
        self.steps += 1;
        Ok(())
    }

    /// Primal direction `z` and working multiplier direction `r` for adding
    /// `normal`: `B z + N r = -normal` with `Nᵀ z = 0`.
    fn directions(
        &self,
        normals: &DMatrix<f64>,
        normal: &DVector<f64>,
    ) -> Result<(DVector<f64>, DVector<f64>)> {
        let n = self.x.len();
        let q = normals.ncols();
        let kkt = DMatrix::from_fn(n + q, n + q, |r, c| match (r < n, c < n) {
            (true, true) => self.qp.hessian[(r, c)],
            (true, false) => normals[(r, c - n)],
            (false, true) => normals[(c, r - n)],
            (false, false) => 0.0,
        });
        let rhs = DVector::from_fn(n + q, |r, _| if r < n { -normal[r] } else { 0.0 });
        let solution = solve_lu(&kkt, &rhs, "active-set KKT system")?;
        Ok((solution.rows(0, n).into_owned(), solution.rows(n, q).into_owned()))
    }

    /// Brings `bound` into the working set, releasing working inequalities
    /// whose multipliers reach zero on the way.
    fn add(&mut self, bound: Bound) -> Result<Addition> {
        let sign = match bound {
            Bound::Equality(_) if self.residual(bound) < 0.0 => -1.0,
            _ => 1.0,
        };
        let normal = self.normal(bound) * sign;
        let mut multiplier = 0.0;

        loop {
            let violation = sign * self.residual(bound);
            let normals = self.working_normals();
            let dependent = residual_outside_span(&normals, &normal)?
                <= DEPENDENCE_TOLERANCE * normal.norm();
            if dependent && multiplier == 0.0 && violation.abs() <= self.solver.tolerance {
                return Ok(Addition::Redundant);
            }

            self.count_step()?;
            let (z, r) = self.directions(&normals, &normal)?;

            let full = if dependent {
                f64::INFINITY
            } else {
                let curvature = z.dot(&(self.qp.hessian * &z));
                if curvature > 0.0 {
                    violation.max(0.0) / curvature
                } else {
                    f64::INFINITY
                }
            };
            let release = self
                .working
                .iter()
                .enumerate()
                .filter(|(slot, entry)| {
                    matches!(entry.bound, Bound::Inequality(_))
                        && r[*slot] < -self.solver.tolerance
                })
                .map(|(slot, entry)| (slot, entry.multiplier / -r[slot]))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .filter(|&(_, length)| length < full);

            let length = release.map_or(full, |(_, length)| length);
            if !length.is_finite() {
                return Err(OptimError::Infeasible {
                    context: "linearized constraints admit no common step",
                });
            }

            if !dependent {
                self.x.axpy(length, &z, 1.0);
            }
            for (entry, rate) in self.working.iter_mut().zip(r.iter()) {
                entry.multiplier += length * rate;
            }
            multiplier += length;

            match release {
                Some((slot, _)) => {
                    let released = self.working.remove(slot);
                    trace!("active set: releasing {:?}", released.bound);
                }
                None => {
                    self.working.push(Working {
                        bound,
                        sign,
                        normal,
                        multiplier,
                    });
                    return Ok(Addition::Added);
                }
            }
        }
    }

    fn into_solution(self) -> QpSolution {
        let mut lambda = DVector::zeros(self.qp.equalities.len());
        let mut mu = DVector::zeros(self.qp.inequalities.len());
        for entry in &self.working {
            match entry.bound {
                Bound::Equality(index) => lambda[index] = entry.sign * entry.multiplier,
                Bound::Inequality(index) => mu[index] = entry.multiplier.max(0.0),
            }
        }
        QpSolution {
            step: self.x,
            lambda,
            mu,
        }
    }
}
