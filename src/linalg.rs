use super::{SolverError, SolverResult};
use error_stack::{Report, ResultExt};
use faer::{Mat, Side, linalg::solvers::Llt, mat::MatMut, prelude::Solve};
use faer_traits::ComplexField;
use num_traits::Float;

/// A factor-then-solve backend for the square symmetric systems both
/// drivers produce. Must report failure on a singular system rather
/// than returning garbage.
pub trait LinearSolver<T: ComplexField<Real = T>, M> {
    fn factor(&mut self, a: &M) -> SolverResult<()>;
    /// Solves in-place, overwriting `rhs` with the solution.
    fn solve_in_place(&mut self, rhs: MatMut<T>) -> SolverResult<()>;
}

/// Dense Cholesky (LLᵀ) of a symmetric positive-definite matrix.
///
/// Factorization fails when the matrix is not positive definite beyond
/// faer's tolerance, which is exactly the singularity report the normal
/// equations need.
pub struct DenseLlt<T: ComplexField<Real = T>> {
    chol: Option<Llt<T>>,
}

impl<T: ComplexField<Real = T>> Default for DenseLlt<T> {
    fn default() -> Self {
        Self { chol: None }
    }
}

impl<T: ComplexField<Real = T>> LinearSolver<T, Mat<T>> for DenseLlt<T> {
    fn factor(&mut self, a: &Mat<T>) -> SolverResult<()> {
        self.chol = Some(Llt::new(a.as_ref(), Side::Lower).map_err(|_| {
            Report::new(SolverError)
                .attach_printable("Cholesky factorization failed: matrix is not positive definite")
        })?);
        Ok(())
    }

    fn solve_in_place(&mut self, mut rhs: MatMut<T>) -> SolverResult<()> {
        let chol = self
            .chol
            .as_ref()
            .ok_or(SolverError)
            .attach_printable("Cholesky not factorized")?;

        // Llt returns a new matrix; copy the result back into `rhs` to keep in-place.
        let solution = chol.solve(rhs.as_ref());
        rhs.copy_from(&solution);
        Ok(())
    }
}

/// Assembles the normal-equation pair for a dense Jacobian:
/// JᵀJ (n-by-n, symmetric) and the gradient g = Jᵀr.
pub(crate) fn normal_equations<T>(j: &Mat<T>, r: &[T]) -> (Mat<T>, Vec<T>)
where
    T: ComplexField<Real = T> + Float,
{
    let m = j.nrows();
    let n = j.ncols();
    let mut jtj = Mat::<T>::zeros(n, n);
    let mut g = vec![T::zero(); n];

    for col in 0..n {
        let mut grad = T::zero();
        for row in 0..m {
            grad = grad + j[(row, col)] * r[row];
        }
        g[col] = grad;

        // Upper triangle, mirrored; JᵀJ is symmetric.
        for other in col..n {
            let mut acc = T::zero();
            for row in 0..m {
                acc = acc + j[(row, col)] * j[(row, other)];
            }
            jtj[(col, other)] = acc;
            jtj[(other, col)] = acc;
        }
    }

    (jtj, g)
}

pub(crate) fn mat_vec<T>(a: &Mat<T>, v: &[T]) -> Vec<T>
where
    T: ComplexField<Real = T> + Float,
{
    let mut out = vec![T::zero(); a.nrows()];
    for row in 0..a.nrows() {
        let mut acc = T::zero();
        for col in 0..a.ncols() {
            acc = acc + a[(row, col)] * v[col];
        }
        out[row] = acc;
    }
    out
}

pub(crate) fn max_diag<T>(a: &Mat<T>) -> T
where
    T: ComplexField<Real = T> + Float,
{
    let mut max = T::neg_infinity();
    for i in 0..a.nrows().min(a.ncols()) {
        if a[(i, i)] > max {
            max = a[(i, i)];
        }
    }
    max
}

pub(crate) fn add_to_diag<T>(a: &mut Mat<T>, mu: T)
where
    T: ComplexField<Real = T> + Float,
{
    for i in 0..a.nrows().min(a.ncols()) {
        a[(i, i)] = a[(i, i)] + mu;
    }
}

/// Solves the symmetric positive-definite system `a * dx = -b` by
/// Cholesky, reporting failure when `a` is singular or indefinite.
pub(crate) fn solve_spd_neg<T>(a: &Mat<T>, b: &[T]) -> SolverResult<Vec<T>>
where
    T: ComplexField<Real = T> + Float,
{
    let n = b.len();
    let mut rhs = Mat::<T>::zeros(n, 1);
    for (i, &bi) in b.iter().enumerate() {
        rhs[(i, 0)] = -bi;
    }

    let mut llt = DenseLlt::<T>::default();
    llt.factor(a)?;
    llt.solve_in_place(rhs.as_mut())?;

    Ok(rhs.col(0).iter().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cholesky_solves_spd_system() {
        // [4 1; 1 3] * [2, 5] = [13, 17], so b = [-13, -17] recovers [2, 5].
        let mut a = Mat::<f64>::zeros(2, 2);
        a[(0, 0)] = 4.0;
        a[(0, 1)] = 1.0;
        a[(1, 0)] = 1.0;
        a[(1, 1)] = 3.0;
        let dx = solve_spd_neg(&a, &[-13.0, -17.0]).expect("SPD solve");
        assert!((dx[0] - 2.0).abs() < 1e-12);
        assert!((dx[1] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn cholesky_rejects_singular_system() {
        // Rank-one matrix; not positive definite.
        let mut a = Mat::<f64>::zeros(2, 2);
        a[(0, 0)] = 1.0;
        a[(0, 1)] = 2.0;
        a[(1, 0)] = 2.0;
        a[(1, 1)] = 4.0;
        assert!(solve_spd_neg(&a, &[1.0, 1.0]).is_err());
    }

    #[test]
    fn normal_equations_of_small_jacobian() {
        // J = [1 0; 0 2; 1 1], r = [1, 1, 1].
        let mut j = Mat::<f64>::zeros(3, 2);
        j[(0, 0)] = 1.0;
        j[(1, 1)] = 2.0;
        j[(2, 0)] = 1.0;
        j[(2, 1)] = 1.0;
        let (jtj, g) = normal_equations(&j, &[1.0, 1.0, 1.0]);
        assert_eq!(jtj[(0, 0)], 2.0);
        assert_eq!(jtj[(0, 1)], 1.0);
        assert_eq!(jtj[(1, 0)], 1.0);
        assert_eq!(jtj[(1, 1)], 5.0);
        assert_eq!(g, vec![2.0, 3.0]);
    }

    #[test]
    fn diag_utilities() {
        let mut a = Mat::<f64>::zeros(2, 2);
        a[(0, 0)] = 3.0;
        a[(1, 1)] = 7.0;
        assert_eq!(max_diag(&a), 7.0);
        add_to_diag(&mut a, 0.5);
        assert_eq!(a[(0, 0)], 3.5);
        assert_eq!(a[(1, 1)], 7.5);
    }

    #[test]
    fn mat_vec_multiplies() {
        let mut a = Mat::<f64>::zeros(2, 3);
        a[(0, 0)] = 1.0;
        a[(0, 1)] = 2.0;
        a[(0, 2)] = 3.0;
        a[(1, 0)] = 4.0;
        a[(1, 1)] = 5.0;
        a[(1, 2)] = 6.0;
        assert_eq!(mat_vec(&a, &[1.0, 1.0, 1.0]), vec![6.0, 15.0]);
    }
}
