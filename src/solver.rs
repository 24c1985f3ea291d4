use num_traits::Float;
use serde::{Deserialize, Serialize};

/// Shared configuration for both solvers.
///
/// `initial_scale` seeds the Levenberg-Marquardt damping factor as
/// `initial_scale * max(diag(JᵀJ))`, the classic Marquardt scaling that
/// keeps the first step well-conditioned regardless of problem scale.
/// `initial_radius` seeds the dogleg trust-region radius instead.
///
/// The default thresholds target `f64`; problems with residuals that are
/// squares themselves need very tight gradient/error cutoffs, since both
/// quantities shrink as high powers of the distance to the optimum. For
/// `f32` solves raise the thresholds to match the working precision.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SolverCfg<T> {
    pub initial_scale: T,
    pub initial_radius: T,
    pub gradient_threshold: T,
    pub relative_step_threshold: T,
    pub error_threshold: T,
    pub damping_factor: T,
    pub max_iterations: usize,
}

impl<T: Float> Default for SolverCfg<T> {
    fn default() -> Self {
        Self {
            initial_scale: T::from(1e-3).expect("Type must support 1e-3 for default scale"),
            initial_radius: T::one(),
            gradient_threshold: T::from(1e-16)
                .expect("Type must support 1e-16 for default gradient threshold"),
            relative_step_threshold: T::from(1e-12)
                .expect("Type must support 1e-12 for default step threshold"),
            error_threshold: T::from(1e-24)
                .expect("Type must support 1e-24 for default error threshold"),
            damping_factor: T::from(10.0).expect("Type must support 10.0 for damping factor"),
            max_iterations: 100,
        }
    }
}

impl<T: Float> SolverCfg<T> {
    pub fn with_initial_scale(mut self, initial_scale: T) -> Self {
        self.initial_scale = initial_scale;
        self
    }
    pub fn with_initial_radius(mut self, initial_radius: T) -> Self {
        self.initial_radius = initial_radius;
        self
    }
    pub fn with_gradient_threshold(mut self, gradient_threshold: T) -> Self {
        self.gradient_threshold = gradient_threshold;
        self
    }
    pub fn with_relative_step_threshold(mut self, relative_step_threshold: T) -> Self {
        self.relative_step_threshold = relative_step_threshold;
        self
    }
    pub fn with_error_threshold(mut self, error_threshold: T) -> Self {
        self.error_threshold = error_threshold;
        self
    }
    pub fn with_damping_factor(mut self, damping_factor: T) -> Self {
        self.damping_factor = damping_factor;
        self
    }
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Why a solve stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Internal transient state while iterating; never returned.
    Running,
    /// ||Jᵀr||∞ fell below the gradient threshold.
    GradientTooSmall,
    /// ||Δx|| fell below the relative step threshold.
    RelativeStepSizeTooSmall,
    /// ||r||² fell below the error threshold.
    ErrorTooSmall,
    /// The iteration cap was reached without passing any convergence test.
    HitMaxIterations,
    /// Levenberg-Marquardt damping grew without bound; the local model
    /// never produced an acceptable step.
    DampingDiverged,
    /// The linear solve reported a singular system, or the startup error
    /// was not finite.
    Failed,
}

impl Status {
    /// True when one of the three convergence tests passed.
    pub fn converged(self) -> bool {
        matches!(
            self,
            Self::GradientTooSmall | Self::RelativeStepSizeTooSmall | Self::ErrorTooSmall
        )
    }

    /// True when the solve stopped on a numerical failure.
    pub fn failed(self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Outcome of one `solve` call.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Results<T> {
    pub status: Status,
    /// Outer-loop passes consumed, counting rejected trial steps.
    pub iterations: usize,
    /// Best sum-of-squares error found.
    pub error: T,
    /// Sum-of-squares error at the initial guess.
    pub startup_error: T,
}

/// Per-iteration snapshot handed to the `solve_cb` observer.
///
/// `damping` is the LM damping factor μ or the dogleg trust-region
/// radius Δ, whichever the solver maintains.
#[derive(Clone, Debug)]
pub struct IterationStats<T> {
    pub iter: usize,
    pub error: T,
    pub damping: T,
}

pub(crate) fn sum_of_squares<T: Float>(v: &[T]) -> T {
    v.iter().map(|&x| x * x).fold(T::zero(), |a, b| a + b)
}

pub(crate) fn norm_l2<T: Float>(v: &[T]) -> T {
    sum_of_squares(v).sqrt()
}

pub(crate) fn norm_inf<T: Float>(v: &[T]) -> T {
    v.iter().map(|&x| x.abs()).fold(T::zero(), |a, b| a.max(b))
}

pub(crate) fn dot<T: Float>(a: &[T], b: &[T]) -> T {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| x * y)
        .fold(T::zero(), |acc, v| acc + v)
}

/// The relative step-size convergence test: ||Δx|| ≤ ε(||x|| + ε),
/// which stays meaningful when x approaches the origin.
pub(crate) fn step_too_small<T: Float>(dx: &[T], x: &[T], threshold: T) -> bool {
    norm_l2(dx) <= threshold * (norm_l2(x) + threshold)
}
