#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]
mod linalg;
mod solver;

pub mod dogleg;
pub mod lm;

pub use linalg::{DenseLlt, LinearSolver};
pub use solver::{IterationStats, Results, SolverCfg, Status};

use core::fmt::{self, Display, Formatter};
use faer::Mat;

/// A nonlinear least-squares problem: a residual function F(x) mapping
/// `n_parameters` values to `n_residuals` values, plus its Jacobian.
///
/// Both callables must be pure functions of `x` with fixed output
/// dimensions; the solvers check the dimensions of the first evaluation
/// against `n_residuals()`/`n_parameters()` and panic on a mismatch,
/// since that is a bug in the model rather than a runtime condition.
pub trait LeastSquaresSystem {
    type Real: num_traits::Float;

    /// Dimension of the parameter vector (n).
    fn n_parameters(&self) -> usize;
    /// Dimension of the residual vector (m).
    fn n_residuals(&self) -> usize;
    /// F(x): the residual vector at `x`.
    fn residual(&self, x: &[Self::Real]) -> Vec<Self::Real>;
    /// J(x): the m-by-n matrix of partials dF/dx at `x`.
    fn jacobian(&self, x: &[Self::Real]) -> Mat<Self::Real>;
}

#[derive(Debug, Clone, Copy)]
pub struct SolverError;

impl Display for SolverError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("solver error")
    }
}

impl std::error::Error for SolverError {}

pub type SolverResult<T> = Result<T, error_stack::Report<SolverError>>;

/// Validates the startup evaluation of a model against its declared
/// dimensions. Runs before any iteration; panics on caller bugs.
pub(crate) fn check_dimensions<M: LeastSquaresSystem>(
    model: &M,
    residual: &[M::Real],
    jacobian: &Mat<M::Real>,
) {
    let n = model.n_parameters();
    let m = model.n_residuals();
    assert!(n > 0, "model must have at least one parameter");
    assert!(m > 0, "model must have at least one residual");
    assert_eq!(
        residual.len(),
        m,
        "residual dimension {} does not match n_residuals() = {}",
        residual.len(),
        m,
    );
    assert_eq!(
        (jacobian.nrows(), jacobian.ncols()),
        (m, n),
        "Jacobian is {}x{} but the model declares {}x{}",
        jacobian.nrows(),
        jacobian.ncols(),
        m,
        n,
    );
}
