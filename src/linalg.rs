//! Dense linear-algebra helpers and backend selection.

use nalgebra::linalg::{Cholesky, LU};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{OptimError, Result};

/// Factorization strategy used for symmetric direction solves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinearBackend {
    /// Cholesky factorization, falling back to LU when the matrix is not positive definite.
    #[default]
    Cholesky,
    /// Partial-pivoting LU factorization.
    Lu,
}

impl LinearBackend {
    /// Solves `matrix * x = rhs`.
    pub fn solve(
        &self,
        matrix: &DMatrix<f64>,
        rhs: &DVector<f64>,
        context: &'static str,
    ) -> Result<DVector<f64>> {
        if !matrix.is_square() || matrix.nrows() != rhs.len() {
            return Err(OptimError::dimension_mismatch(
                context,
                matrix.nrows(),
                rhs.len(),
            ));
        }
        let solution = match self {
            Self::Cholesky => match Cholesky::new(matrix.clone()) {
                Some(cholesky) => cholesky.solve(rhs),
                None => solve_lu(matrix, rhs, context)?,
            },
            Self::Lu => solve_lu(matrix, rhs, context)?,
        };
        ensure_finite(&solution, context)?;
        Ok(solution)
    }
}

/// Solves a general square system with partial-pivoting LU.
pub(crate) fn solve_lu(
    matrix: &DMatrix<f64>,
    rhs: &DVector<f64>,
    context: &'static str,
) -> Result<DVector<f64>> {
    let solution = LU::new(matrix.clone())
        .solve(rhs)
        .ok_or_else(|| OptimError::singular(context))?;
    ensure_finite(&solution, context)?;
    Ok(solution)
}

/// Norm of the component of `vector` outside the column space of `columns`.
///
/// `columns` is expected to have full column rank.
pub(crate) fn residual_outside_span(columns: &DMatrix<f64>, vector: &DVector<f64>) -> Result<f64> {
    if columns.ncols() == 0 {
        return Ok(vector.norm());
    }
    let coefficients = columns
        .clone()
        .svd(true, true)
        .solve(vector, 1e-14)
        .map_err(|_| OptimError::NumericalError {
            context: "least-squares projection",
        })?;
    Ok((vector - columns * coefficients).norm())
}

pub(crate) fn ensure_finite(vector: &DVector<f64>, context: &'static str) -> Result<()> {
    if vector.iter().all(|value| value.is_finite()) {
        Ok(())
    } else {
        Err(OptimError::NumericalError { context })
    }
}

pub(crate) fn check_len(vector: &DVector<f64>, expected: usize, context: &'static str) -> Result<()> {
    if vector.len() != expected {
        return Err(OptimError::dimension_mismatch(context, expected, vector.len()));
    }
    Ok(())
}

pub(crate) fn check_shape(
    matrix: &DMatrix<f64>,
    rows: usize,
    cols: usize,
    context: &'static str,
) -> Result<()> {
    if matrix.nrows() != rows {
        return Err(OptimError::dimension_mismatch(context, rows, matrix.nrows()));
    }
    if matrix.ncols() != cols {
        return Err(OptimError::dimension_mismatch(context, cols, matrix.ncols()));
    }
    Ok(())
}
