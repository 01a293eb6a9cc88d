//! BFGS curvature approximation.
//!
//! The estimate `B` approximates the Hessian itself, not its inverse. Search
//! directions are therefore obtained by solving `B p = -g` rather than by a
//! matrix-vector product with a cached inverse.

use log::trace;
use nalgebra::{DMatrix, DVector};

use crate::error::{OptimError, Result};

/// Outcome of a single curvature update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CurvatureUpdate {
    /// The rank-2 correction was applied.
    Applied,
    /// The pair `(s, y)` failed the curvature condition and `B` was left untouched.
    Skipped,
}

/// Applies the direct BFGS update `B + yyᵀ/(yᵀs) − Bs(Bs)ᵀ/(sᵀBs)`.
///
/// Returns `B` unchanged when `yᵀs <= sy_threshold` or when `sᵀBs` is not a
/// positive finite number, so that a positive-definite `B` stays positive
/// definite.
pub fn bfgs_update(
    b: &DMatrix<f64>,
    s: &DVector<f64>,
    y: &DVector<f64>,
    sy_threshold: f64,
) -> Result<DMatrix<f64>> {
    let mut updated = b.clone();
    apply_update(&mut updated, s, y, sy_threshold)?;
    Ok(updated)
}

fn apply_update(
    b: &mut DMatrix<f64>,
    s: &DVector<f64>,
    y: &DVector<f64>,
    sy_threshold: f64,
) -> Result<CurvatureUpdate> {
    let n = b.nrows();
    if b.ncols() != n {
        return Err(OptimError::dimension_mismatch(
            "curvature matrix columns",
            n,
            b.ncols(),
        ));
    }
    if s.len() != n {
        return Err(OptimError::dimension_mismatch("step length", n, s.len()));
    }
    if y.len() != n {
        return Err(OptimError::dimension_mismatch(
            "gradient difference length",
            n,
            y.len(),
        ));
    }

    let sy = y.dot(s);
    if !(sy > sy_threshold) {
        trace!("skipping BFGS update: yᵀs = {sy:e}");
        return Ok(CurvatureUpdate::Skipped);
    }

    let bs = &*b * s;
    let sbs = s.dot(&bs);
    if !(sbs > 0.0 && sbs.is_finite()) {
        trace!("skipping BFGS update: sᵀBs = {sbs:e}");
        return Ok(CurvatureUpdate::Skipped);
    }

    *b += (y * y.transpose()) / sy - (&bs * bs.transpose()) / sbs;
    Ok(CurvatureUpdate::Applied)
}

/// Stateful Hessian approximation owned by a single optimizer run.
#[derive(Clone, Debug)]
pub struct CurvatureEstimate {
    matrix: DMatrix<f64>,
    sy_threshold: f64,
    skipped: usize,
}

impl CurvatureEstimate {
    /// Starts from the `n × n` identity.
    pub fn identity(n: usize, sy_threshold: f64) -> Self {
        Self {
            matrix: DMatrix::identity(n, n),
            sy_threshold,
            skipped: 0,
        }
    }

    /// Current approximation `B`.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Number of updates rejected by the curvature condition so far.
    pub fn skipped_updates(&self) -> usize {
        self.skipped
    }

    /// Refreshes `B` with the step `s` and gradient difference `y`.
    pub fn update(&mut self, s: &DVector<f64>, y: &DVector<f64>) -> Result<CurvatureUpdate> {
        let outcome = apply_update(&mut self.matrix, s, y, self.sy_threshold)?;
        if outcome == CurvatureUpdate::Skipped {
            self.skipped += 1;
        }
        Ok(outcome)
    }

    /// Discards accumulated curvature and returns to the identity.
    pub fn reset(&mut self) {
        let n = self.matrix.nrows();
        self.matrix = DMatrix::identity(n, n);
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, StandardNormal};

    use super::*;

    #[test]
    fn update_preserves_symmetry_and_satisfies_secant() {
        let b = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.5, 1.0, 3.0, 0.2, 0.5, 0.2, 2.0]);
        let s = DVector::from_vec(vec![0.3, -0.7, 1.1]);
        let y = DVector::from_vec(vec![1.0, -1.5, 2.5]);
        assert!(y.dot(&s) > 1e-6);

        let updated = bfgs_update(&b, &s, &y, 1e-6).unwrap();
        assert_relative_eq!(updated, updated.transpose(), epsilon = 1e-14);
        assert_relative_eq!(&updated * &s, y, epsilon = 1e-12);
        assert!(nalgebra::linalg::Cholesky::new(updated).is_some());
    }

    #[test]
    fn updates_of_random_positive_definite_matrices_stay_symmetric() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut applied = 0;

        for _ in 0..200 {
            let n = rng.gen_range(1..=6);
            let factor: DMatrix<f64> = DMatrix::from_fn(n, n, |_, _| StandardNormal.sample(&mut rng));
            let b = &factor * factor.transpose() + DMatrix::identity(n, n) * 0.5;
            let s = DVector::from_fn(n, |_, _| StandardNormal.sample(&mut rng));
            let y = DVector::from_fn(n, |_, _| StandardNormal.sample(&mut rng));
            if y.dot(&s) <= 1e-6 {
                continue;
            }
            applied += 1;

            let updated = bfgs_update(&b, &s, &y, 1e-6).unwrap();
            let scale = updated.amax().max(1.0);
            assert_relative_eq!(updated, updated.transpose(), epsilon = 1e-12 * scale);
            assert_relative_eq!(&updated * &s, y, epsilon = 1e-9 * scale * s.norm().max(1.0));
            if y.dot(&s) > 1e-3 {
                assert!(nalgebra::linalg::Cholesky::new(updated).is_some());
            }
        }

        assert!(applied > 50);
    }

    #[test]
    fn small_curvature_leaves_matrix_bit_identical() {
        let b = DMatrix::from_row_slice(2, 2, &[2.0, 0.3, 0.3, 1.0]);
        let s = DVector::from_vec(vec![1.0, 0.0]);
        let y = DVector::from_vec(vec![5e-7, 3.0]);

        let updated = bfgs_update(&b, &s, &y, 1e-6).unwrap();
        assert_eq!(updated, b);

        let negative = DVector::from_vec(vec![-1.0, 0.0]);
        assert_eq!(bfgs_update(&b, &s, &negative, 1e-6).unwrap(), b);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let b = DMatrix::identity(2, 2);
        let s = DVector::from_vec(vec![1.0, 0.0, 0.0]);
        let y = DVector::from_vec(vec![1.0, 0.0]);
        let result = bfgs_update(&b, &s, &y, 1e-6);
        assert_eq!(
            result,
            Err(OptimError::dimension_mismatch("step length", 2, 3))
        );
    }

    #[test]
    fn estimate_counts_skipped_updates_and_resets() {
        let mut estimate = CurvatureEstimate::identity(2, 1e-6);
        let s = DVector::from_vec(vec![1.0, 1.0]);

        let skipped = estimate.update(&s, &DVector::zeros(2)).unwrap();
        assert_eq!(skipped, CurvatureUpdate::Skipped);
        assert_eq!(estimate.skipped_updates(), 1);

        let applied = estimate.update(&s, &(&s * 2.0)).unwrap();
        assert_eq!(applied, CurvatureUpdate::Applied);
        assert_relative_eq!(estimate.matrix() * &s, &s * 2.0, epsilon = 1e-12);

        estimate.reset();
        assert_eq!(estimate.matrix(), &DMatrix::identity(2, 2));
    }
}
