//! Dogleg trust-region iteration.
//!
//! Steps are bounded by a trust-region radius Δ. Inside the region the
//! full Gauss-Newton step is taken; when the model is distrusted the
//! step falls back toward the steepest-descent (Cauchy) point, and in
//! between the step follows the piecewise-linear dogleg path to the
//! boundary. The radius adapts to the ratio ρ of actual to predicted
//! error reduction. Because the Cauchy step stays well-defined when JᵀJ
//! is singular, this driver survives problems whose Jacobian vanishes at
//! the optimum, where plain damped Gauss-Newton struggles.

use crate::linalg::{mat_vec, normal_equations, solve_spd_neg};
use crate::solver::{
    IterationStats, Results, SolverCfg, Status, dot, norm_inf, norm_l2, step_too_small,
    sum_of_squares,
};
use crate::{LeastSquaresSystem, check_dimensions};
use faer::Mat;
use faer_traits::ComplexField;
use num_traits::{Float, NumCast, Zero};

/// Local quadratic model at the current iterate, rebuilt after every
/// accepted step and reused across rejected ones.
struct LocalModel<T> {
    j: Mat<T>,
    g: Vec<T>,
    /// Gauss-Newton step; `None` when JᵀJ would not factor or the solve
    /// produced non-finite values. The Cauchy step covers for it.
    gauss_newton: Option<Vec<T>>,
    /// Cauchy step −(‖g‖²/‖Jg‖²)·g; empty when the model is flat along
    /// the gradient (‖Jg‖ = 0).
    cauchy: Vec<T>,
    cauchy_norm: T,
}

impl<T> LocalModel<T>
where
    T: ComplexField<Real = T> + Float,
{
    fn new(j: Mat<T>, r: &[T]) -> Self {
        let (jtj, g) = normal_equations(&j, r);

        let gauss_newton = solve_spd_neg(&jtj, &g)
            .ok()
            .filter(|p| p.iter().all(|v| v.is_finite()));

        let jg_sq = sum_of_squares(&mat_vec(&j, &g));
        let (cauchy, cauchy_norm) = if jg_sq > T::zero() {
            let alpha = sum_of_squares(&g) / jg_sq;
            let p: Vec<T> = g.iter().map(|&gi| -(alpha * gi)).collect();
            let norm = norm_l2(&p);
            (p, norm)
        } else {
            (Vec::new(), T::zero())
        };

        Self {
            j,
            g,
            gauss_newton,
            cauchy,
            cauchy_norm,
        }
    }

    /// Picks the dogleg step for the given radius.
    fn step(&self, radius: T) -> Vec<T> {
        if let Some(gn) = &self.gauss_newton {
            if norm_l2(gn) <= radius {
                // Model trusted: the full Gauss-Newton step fits.
                return gn.clone();
            }
        }

        if self.cauchy_norm >= radius {
            // Model distrusted: steepest descent, scaled to the boundary.
            let g_norm = norm_l2(&self.g);
            let scale = radius / g_norm;
            return self.g.iter().map(|&gi| -(scale * gi)).collect();
        }

        match &self.gauss_newton {
            Some(gn) => {
                // The dogleg proper: walk from the Cauchy point toward the
                // Gauss-Newton point, stopping exactly on the boundary.
                // beta solves ||a + beta*b||² = radius² on [0, 1].
                let a = &self.cauchy;
                let b: Vec<T> = gn.iter().zip(a.iter()).map(|(&p, &q)| p - q).collect();
                let a_sq = sum_of_squares(a);
                let b_sq = sum_of_squares(&b);
                let c = dot(a, &b);
                let disc = (c * c + b_sq * (radius * radius - a_sq)).sqrt();
                let beta = if c <= T::zero() {
                    (disc - c) / b_sq
                } else {
                    (radius * radius - a_sq) / (c + disc)
                };
                a.iter()
                    .zip(b.iter())
                    .map(|(&ai, &bi)| ai + beta * bi)
                    .collect()
            }
            // Gauss-Newton unavailable and the Cauchy point is interior:
            // take the Cauchy point itself.
            None => self.cauchy.clone(),
        }
    }

    /// Reduction the quadratic model predicts for step `p`:
    /// −(2gᵀp + ‖Jp‖²). Positive for any descent step.
    fn predicted_reduction(&self, p: &[T]) -> T {
        let two = T::one() + T::one();
        let linear = two * dot(&self.g, p);
        let curved = sum_of_squares(&mat_vec(&self.j, p));
        -(linear + curved)
    }
}

/// Minimizes `||F(x)||²` starting from the guess in `x`, mutating `x` in
/// place to the best-found parameters.
pub fn solve<M>(model: &M, x: &mut [M::Real], cfg: SolverCfg<M::Real>) -> Results<M::Real>
where
    M: LeastSquaresSystem,
    M::Real: ComplexField<Real = M::Real> + Float,
{
    solve_cb(model, x, cfg, |_| {})
}

/// Like [`solve`], invoking `on_iter` with statistics after every pass,
/// accepted or rejected. `IterationStats::damping` carries the current
/// trust-region radius.
pub fn solve_cb<M, Cb>(
    model: &M,
    x: &mut [M::Real],
    cfg: SolverCfg<M::Real>,
    mut on_iter: Cb,
) -> Results<M::Real>
where
    M: LeastSquaresSystem,
    M::Real: ComplexField<Real = M::Real> + Float,
    Cb: FnMut(&IterationStats<M::Real>),
{
    let n = model.n_parameters();
    let m = model.n_residuals();
    assert_eq!(
        x.len(),
        n,
        "initial guess has {} entries but the model declares {} parameters",
        x.len(),
        n,
    );

    let r = model.residual(x);
    let j = model.jacobian(x);
    check_dimensions(model, &r, &j);

    let mut e = sum_of_squares(&r);
    let startup_error = e;
    if !e.is_finite() {
        return Results {
            status: Status::Failed,
            iterations: 0,
            error: e,
            startup_error,
        };
    }

    let rho_bad = <M::Real as NumCast>::from(0.25).unwrap();
    let rho_good = <M::Real as NumCast>::from(0.75).unwrap();
    let half = <M::Real as NumCast>::from(0.5).unwrap();
    let three = <M::Real as NumCast>::from(3.0).unwrap();

    let mut local = LocalModel::new(j, &r);
    let mut radius = cfg.initial_radius;
    let mut status = Status::Running;
    let mut iterations = 0;
    let mut x_trial = vec![M::Real::zero(); n];

    while iterations < cfg.max_iterations {
        if norm_inf(&local.g) < cfg.gradient_threshold {
            status = Status::GradientTooSmall;
            break;
        }
        if e < cfg.error_threshold {
            status = Status::ErrorTooSmall;
            break;
        }
        if local.cauchy.is_empty() {
            // Gradient is above threshold yet J maps it to zero; the
            // model cannot make progress in any trusted direction.
            status = Status::Failed;
            break;
        }
        iterations += 1;

        let dx = local.step(radius);
        if step_too_small(&dx, x, cfg.relative_step_threshold) {
            status = Status::RelativeStepSizeTooSmall;
            break;
        }
        let dx_norm = norm_l2(&dx);

        for (i, xt) in x_trial.iter_mut().enumerate() {
            *xt = x[i] + dx[i];
        }
        let r_trial = model.residual(&x_trial);
        debug_assert_eq!(r_trial.len(), m, "residual dimension changed mid-solve");
        let e_trial = sum_of_squares(&r_trial);

        let predicted = local.predicted_reduction(&dx);
        let actual = e - e_trial;
        let rho = actual / predicted;

        if predicted > M::Real::zero() && rho.is_finite() && rho >= rho_bad {
            // Accept and rebuild the local model at the new iterate.
            x.copy_from_slice(&x_trial);
            e = e_trial;
            let j = model.jacobian(x);
            debug_assert_eq!(
                (j.nrows(), j.ncols()),
                (m, n),
                "Jacobian dimensions changed mid-solve"
            );
            local = LocalModel::new(j, &r_trial);
            if rho > rho_good {
                // Model trustworthy near this iterate; widen the region.
                radius = radius.max(three * dx_norm);
            }
        } else {
            // Reject: keep the iterate and the model, shrink the region
            // below the failed step so the next candidate differs.
            radius = half * dx_norm;
        }

        on_iter(&IterationStats {
            iter: iterations,
            error: e,
            damping: radius,
        });
    }

    if status == Status::Running {
        status = Status::HitMaxIterations;
    }
    Results {
        status,
        iterations,
        error: e,
        startup_error,
    }
}
