//! Oracle interfaces supplied by callers and a closure-backed problem container.
//!
//! The optimizer never differentiates anything itself: callers provide the
//! objective, its gradient and, for constrained problems, constraint values
//! together with their Jacobians. Oracles must be deterministic and
//! mutually consistent (the gradient must match the objective). That is a
//! precondition and is not checked; only output dimensions are validated.

use nalgebra::{DMatrix, DVector};

use crate::error::{OptimError, Result};
use crate::linalg::{check_len, check_shape};

/// Smooth objective `f: ℝⁿ → ℝ` with an analytic gradient.
pub trait Objective {
    /// Number of decision variables `n`.
    fn dimension(&self) -> usize;

    /// Evaluates `f(x)`.
    fn value(&self, x: &DVector<f64>) -> f64;

    /// Evaluates `∇f(x)`.
    fn gradient(&self, x: &DVector<f64>) -> DVector<f64>;
}

/// Objective with equality constraints `h(x) = 0` and inequality constraints `g(x) ≤ 0`.
///
/// Both constraint families default to empty so that unconstrained objectives
/// can opt in with an empty `impl` block.
pub trait ConstrainedObjective: Objective {
    /// Number of equality constraints.
    fn equality_count(&self) -> usize {
        0
    }

    /// Number of inequality constraints.
    fn inequality_count(&self) -> usize {
        0
    }

    /// Evaluates `h(x)`.
    fn equalities(&self, _x: &DVector<f64>) -> DVector<f64> {
        DVector::zeros(0)
    }

    /// Evaluates `g(x)`.
    fn inequalities(&self, _x: &DVector<f64>) -> DVector<f64> {
        DVector::zeros(0)
    }

    /// Jacobian of `h` at `x`, one row per constraint.
    fn equality_jacobian(&self, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::zeros(0, self.dimension())
    }

    /// Jacobian of `g` at `x`, one row per constraint.
    fn inequality_jacobian(&self, _x: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::zeros(0, self.dimension())
    }
}

type ScalarFn = Box<dyn Fn(&DVector<f64>) -> f64 + Send + Sync>;
type VectorFn = Box<dyn Fn(&DVector<f64>) -> DVector<f64> + Send + Sync>;
type MatrixFn = Box<dyn Fn(&DVector<f64>) -> DMatrix<f64> + Send + Sync>;

struct ConstraintBlock {
    count: usize,
    values: VectorFn,
    jacobian: MatrixFn,
}

/// Problem assembled from closures.
pub struct Problem {
    dimension: usize,
    objective: ScalarFn,
    gradient: VectorFn,
    equalities: Option<ConstraintBlock>,
    inequalities: Option<ConstraintBlock>,
}

impl Problem {
    /// Starts building a problem over `ℝ^dimension`.
    pub fn builder<F, G>(dimension: usize, objective: F, gradient: G) -> ProblemBuilder
    where
        F: Fn(&DVector<f64>) -> f64 + Send + Sync + 'static,
        G: Fn(&DVector<f64>) -> DVector<f64> + Send + Sync + 'static,
    {
        ProblemBuilder {
            dimension,
            objective: Box::new(objective),
            gradient: Box::new(gradient),
            equalities: None,
            inequalities: None,
        }
    }
}

impl std::fmt::Debug for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Problem")
            .field("dimension", &self.dimension)
            .field("equalities", &self.equality_count())
            .field("inequalities", &self.inequality_count())
            .finish()
    }
}

impl Objective for Problem {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn value(&self, x: &DVector<f64>) -> f64 {
        (self.objective)(x)
    }

    fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        (self.gradient)(x)
    }
}

impl ConstrainedObjective for Problem {
    fn equality_count(&self) -> usize {
        self.equalities.as_ref().map_or(0, |block| block.count)
    }

    fn inequality_count(&self) -> usize {
        self.inequalities.as_ref().map_or(0, |block| block.count)
    }

    fn equalities(&self, x: &DVector<f64>) -> DVector<f64> {
        match &self.equalities {
            Some(block) => (block.values)(x),
            None => DVector::zeros(0),
        }
    }

    fn inequalities(&self, x: &DVector<f64>) -> DVector<f64> {
        match &self.inequalities {
            Some(block) => (block.values)(x),
            None => DVector::zeros(0),
        }
    }

    fn equality_jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        match &self.equalities {
            Some(block) => (block.jacobian)(x),
            None => DMatrix::zeros(0, self.dimension),
        }
    }

    fn inequality_jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        match &self.inequalities {
            Some(block) => (block.jacobian)(x),
            None => DMatrix::zeros(0, self.dimension),
        }
    }
}

/// Builder that attaches constraint blocks before constructing a [`Problem`].
pub struct ProblemBuilder {
    dimension: usize,
    objective: ScalarFn,
    gradient: VectorFn,
    equalities: Option<ConstraintBlock>,
    inequalities: Option<ConstraintBlock>,
}

impl ProblemBuilder {
    /// Attaches `count` equality constraints `h(x) = 0` and their Jacobian.
    pub fn equalities<H, J>(mut self, count: usize, values: H, jacobian: J) -> Self
    where
        H: Fn(&DVector<f64>) -> DVector<f64> + Send + Sync + 'static,
        J: Fn(&DVector<f64>) -> DMatrix<f64> + Send + Sync + 'static,
    {
        self.equalities = Some(ConstraintBlock {
            count,
            values: Box::new(values),
            jacobian: Box::new(jacobian),
        });
        self
    }

    /// Attaches `count` inequality constraints `g(x) ≤ 0` and their Jacobian.
    pub fn inequalities<G, J>(mut self, count: usize, values: G, jacobian: J) -> Self
    where
        G: Fn(&DVector<f64>) -> DVector<f64> + Send + Sync + 'static,
        J: Fn(&DVector<f64>) -> DMatrix<f64> + Send + Sync + 'static,
    {
        self.inequalities = Some(ConstraintBlock {
            count,
            values: Box::new(values),
            jacobian: Box::new(jacobian),
        });
        self
    }

    /// Finalizes construction.
    pub fn build(self) -> Result<Problem> {
        if self.dimension == 0 {
            return Err(OptimError::dimension_mismatch("problem dimension", 1, 0));
        }
        Ok(Problem {
            dimension: self.dimension,
            objective: self.objective,
            gradient: self.gradient,
            equalities: self.equalities,
            inequalities: self.inequalities,
        })
    }
}

/// Objective value and gradient at one point.
#[derive(Clone, Debug)]
pub(crate) struct Evaluation {
    pub value: f64,
    pub gradient: DVector<f64>,
}

impl Evaluation {
    /// Evaluates `f` and `∇f`, rejecting malformed or non-finite oracle output.
    pub fn of<P: Objective + ?Sized>(problem: &P, x: &DVector<f64>) -> Result<Self> {
        let value = problem.value(x);
        if !value.is_finite() {
            return Err(OptimError::NumericalError {
                context: "objective evaluation",
            });
        }
        let gradient = problem.gradient(x);
        check_len(&gradient, problem.dimension(), "gradient length")?;
        if gradient.iter().any(|g| !g.is_finite()) {
            return Err(OptimError::NumericalError {
                context: "gradient evaluation",
            });
        }
        Ok(Self { value, gradient })
    }
}

/// Full first-order information of a constrained problem at one point.
#[derive(Clone, Debug)]
pub(crate) struct ConstrainedEvaluation {
    pub objective: Evaluation,
    pub equalities: DVector<f64>,
    pub inequalities: DVector<f64>,
    pub equality_jacobian: DMatrix<f64>,
    pub inequality_jacobian: DMatrix<f64>,
}

impl ConstrainedEvaluation {
    pub fn of<P: ConstrainedObjective + ?Sized>(problem: &P, x: &DVector<f64>) -> Result<Self> {
        let objective = Evaluation::of(problem, x)?;
        let (equalities, inequalities) = constraint_values(problem, x)?;
        let n = problem.dimension();
        let equality_jacobian = problem.equality_jacobian(x);
        check_shape(
            &equality_jacobian,
            problem.equality_count(),
            n,
            "equality Jacobian",
        )?;
        let inequality_jacobian = problem.inequality_jacobian(x);
        check_shape(
            &inequality_jacobian,
            problem.inequality_count(),
            n,
            "inequality Jacobian",
        )?;
        if equality_jacobian
            .iter()
            .chain(inequality_jacobian.iter())
            .any(|v| !v.is_finite())
        {
            return Err(OptimError::NumericalError {
                context: "constraint Jacobian evaluation",
            });
        }
        Ok(Self {
            objective,
            equalities,
            inequalities,
            equality_jacobian,
            inequality_jacobian,
        })
    }
}

/// Evaluates `h(x)` and `g(x)` with dimension checks.
pub(crate) fn constraint_values<P: ConstrainedObjective + ?Sized>(
    problem: &P,
    x: &DVector<f64>,
) -> Result<(DVector<f64>, DVector<f64>)> {
    let equalities = problem.equalities(x);
    check_len(&equalities, problem.equality_count(), "equality constraints")?;
    let inequalities = problem.inequalities(x);
    check_len(
        &inequalities,
        problem.inequality_count(),
        "inequality constraints",
    )?;
    Ok((equalities, inequalities))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paraboloid() -> ProblemBuilder {
        Problem::builder(
            2,
            |x: &DVector<f64>| (x[0] - 1.0).powi(2) + (x[1] - 2.0).powi(2),
            |x: &DVector<f64>| DVector::from_vec(vec![2.0 * (x[0] - 1.0), 2.0 * (x[1] - 2.0)]),
        )
    }

    #[test]
    fn builder_attaches_constraint_blocks() {
        let problem = paraboloid()
            .equalities(
                1,
                |x: &DVector<f64>| DVector::from_vec(vec![x[0] + x[1]]),
                |_: &DVector<f64>| DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
            )
            .build()
            .unwrap();

        assert_eq!(problem.dimension(), 2);
        assert_eq!(problem.equality_count(), 1);
        assert_eq!(problem.inequality_count(), 0);

        let x = DVector::from_vec(vec![0.5, 0.25]);
        let evaluation = ConstrainedEvaluation::of(&problem, &x).unwrap();
        assert_eq!(evaluation.equalities[0], 0.75);
        assert_eq!(evaluation.inequality_jacobian.shape(), (0, 2));
    }

    #[test]
    fn malformed_oracle_output_is_rejected() {
        let problem = Problem::builder(
            2,
            |x: &DVector<f64>| x.norm_squared(),
            |x: &DVector<f64>| DVector::from_vec(vec![2.0 * x[0]]),
        )
        .build()
        .unwrap();

        let x = DVector::from_vec(vec![1.0, 1.0]);
        let result = Evaluation::of(&problem, &x);
        assert!(matches!(
            result,
            Err(OptimError::InvalidDimension {
                context: "gradient length",
                expected: 2,
                found: 1,
            })
        ));
    }

    #[test]
    fn zero_dimensional_problems_are_rejected() {
        let result = Problem::builder(0, |_: &DVector<f64>| 0.0, |_: &DVector<f64>| DVector::zeros(0))
            .build();
        assert!(matches!(result, Err(OptimError::InvalidDimension { .. })));
    }
}
