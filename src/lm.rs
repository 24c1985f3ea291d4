//! Levenberg-Marquardt: damped Gauss-Newton iteration.
//!
//! Each pass solves `(JᵀJ + μI) Δx = −Jᵀr`. An improving trial point is
//! committed and μ shrinks, trusting the local quadratic model more; a
//! worsening one is discarded and μ grows, biasing the next step toward
//! steepest descent. μ is seeded from the largest diagonal entry of JᵀJ
//! so the first step is sensible at any problem scale.

use crate::linalg::{add_to_diag, max_diag, normal_equations, solve_spd_neg};
use crate::solver::{
    IterationStats, Results, SolverCfg, Status, norm_inf, step_too_small, sum_of_squares,
};
use crate::{LeastSquaresSystem, check_dimensions};
use faer_traits::ComplexField;
use num_traits::{Float, One, Zero};

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
/// accepted or rejected.
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

    let (mut jtj, mut g) = normal_equations(&j, &r);

    // Classic Marquardt seeding. A zero diagonal (J vanishing at the
    // start) falls back to the bare scale so mu stays strictly positive.
    let seed = max_diag(&jtj);
    let mut mu = if seed > M::Real::zero() {
        cfg.initial_scale * seed
    } else {
        cfg.initial_scale
    };
    let mu_cap = M::Real::one() / (M::Real::epsilon() * M::Real::epsilon());

    let mut status = Status::Running;
    let mut iterations = 0;
    let mut x_trial = vec![M::Real::zero(); n];

    while iterations < cfg.max_iterations {
        if norm_inf(&g) < cfg.gradient_threshold {
            status = Status::GradientTooSmall;
            break;
        }
        if e < cfg.error_threshold {
            status = Status::ErrorTooSmall;
            break;
        }
        iterations += 1;

        let mut augmented = jtj.clone();
        add_to_diag(&mut augmented, mu);
        let dx = match solve_spd_neg(&augmented, &g) {
            Ok(dx) => dx,
            // mu > 0 regularizes the system, so a singular factorization
            // here means the numbers have already gone bad.
            Err(_) => {
                status = Status::Failed;
                break;
            }
        };
        if dx.iter().any(|v| !v.is_finite()) {
            status = Status::Failed;
            break;
        }
        if step_too_small(&dx, x, cfg.relative_step_threshold) {
            status = Status::RelativeStepSizeTooSmall;
            break;
        }

        for (i, xt) in x_trial.iter_mut().enumerate() {
            *xt = x[i] + dx[i];
        }
        let r_trial = model.residual(&x_trial);
        debug_assert_eq!(r_trial.len(), m, "residual dimension changed mid-solve");
        let e_trial = sum_of_squares(&r_trial);

        if e_trial.is_finite() && e_trial < e {
            // Accept: commit the trial point and rebuild the local model.
            x.copy_from_slice(&x_trial);
            e = e_trial;
            let j = model.jacobian(x);
            debug_assert_eq!(
                (j.nrows(), j.ncols()),
                (m, n),
                "Jacobian dimensions changed mid-solve"
            );
            let (a, grad) = normal_equations(&j, &r_trial);
            jtj = a;
            g = grad;
            mu = (mu / cfg.damping_factor).max(M::Real::min_positive_value());
        } else {
            // Reject: keep x and the current model, shrink the step
            // toward steepest descent. A non-finite trial error lands
            // here too; growing mu pulls the trial back into range.
            mu = mu * cfg.damping_factor;
            if !mu.is_finite() || mu > mu_cap {
                status = Status::DampingDiverged;
                break;
            }
        }

        on_iter(&IterationStats {
            iter: iterations,
            error: e,
            damping: mu,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::Bowl;
    use faer::Mat;

    #[test]
    fn minimizes_bowl_from_far_away() {
        let mut x = [0.76026643, -30.01799744, 0.55192142];
        let results = solve(&Bowl, &mut x, SolverCfg::default());

        assert!(results.status.converged(), "status: {:?}", results.status);
        assert!((x[0] - 2.0).abs() < 1e-5, "x = {x:?}");
        assert!((x[1] - 5.0).abs() < 1e-5, "x = {x:?}");
        assert!(x[2].abs() < 1e-5, "x = {x:?}");
        assert!(results.error < results.startup_error);
    }

    #[test]
    fn accepted_errors_never_increase_and_mu_stays_positive() {
        let mut x = [0.76026643, -30.01799744, 0.55192142];
        let mut last_error = f64::INFINITY;
        let results = solve_cb(&Bowl, &mut x, SolverCfg::default(), |stats| {
            assert!(
                stats.error <= last_error,
                "error rose from {last_error} to {} at iter {}",
                stats.error,
                stats.iter
            );
            assert!(stats.damping > 0.0, "mu hit zero at iter {}", stats.iter);
            last_error = stats.error;
        });
        assert!(results.status.converged());
    }

    #[test]
    fn second_solve_from_converged_point_is_a_no_op() {
        let mut x = [0.76026643, -30.01799744, 0.55192142];
        let first = solve(&Bowl, &mut x, SolverCfg::default());
        assert!(first.status.converged());

        let before = x;
        let second = solve(&Bowl, &mut x, SolverCfg::default());
        assert!(second.status.converged());
        for (a, b) in before.iter().zip(x.iter()) {
            assert!((a - b).abs() < 1e-10, "x moved from {before:?} to {x:?}");
        }
    }

    #[test]
    fn iteration_cap_reports_no_convergence() {
        let mut x = [0.76026643, -30.01799744, 0.55192142];
        let results = solve(&Bowl, &mut x, SolverCfg::default().with_max_iterations(2));
        assert_eq!(results.status, Status::HitMaxIterations);
        assert_eq!(results.iterations, 2);
        assert!(!results.status.converged());
    }

    #[test]
    fn non_finite_startup_residual_fails() {
        struct Nan;
        impl LeastSquaresSystem for Nan {
            type Real = f64;
            fn n_parameters(&self) -> usize {
                1
            }
            fn n_residuals(&self) -> usize {
                1
            }
            fn residual(&self, _x: &[f64]) -> Vec<f64> {
                vec![f64::NAN]
            }
            fn jacobian(&self, _x: &[f64]) -> Mat<f64> {
                Mat::zeros(1, 1)
            }
        }

        let mut x = [1.0];
        let results = solve(&Nan, &mut x, SolverCfg::default());
        assert!(results.status.failed());
        assert_eq!(results.iterations, 0);
    }

    #[test]
    fn endless_rejections_diverge_the_damping() {
        // Finite only at the start, so every trial point is rejected and
        // mu grows tenfold per pass until it blows past the cap.
        struct Cliff;
        impl LeastSquaresSystem for Cliff {
            type Real = f64;
            fn n_parameters(&self) -> usize {
                1
            }
            fn n_residuals(&self) -> usize {
                1
            }
            fn residual(&self, x: &[f64]) -> Vec<f64> {
                if (x[0] - 3.0).abs() < 1e-12 {
                    vec![1.0]
                } else {
                    vec![f64::NAN]
                }
            }
            fn jacobian(&self, _x: &[f64]) -> Mat<f64> {
                let mut j = Mat::zeros(1, 1);
                j[(0, 0)] = 1.0;
                j
            }
        }

        let mut x = [3.0];
        // The step-size test is disabled so the shrinking rejected steps
        // cannot end the solve before the damping cap trips.
        let cfg = SolverCfg::default().with_relative_step_threshold(0.0);
        let results = solve(&Cliff, &mut x, cfg);

        assert_eq!(results.status, Status::DampingDiverged);
        assert!(!results.status.converged());
        // Rejections never commit the trial point.
        assert_eq!(x[0], 3.0);
        assert_eq!(results.error, 1.0);
        assert!(results.iterations < 100, "took {} passes", results.iterations);
    }

    #[test]
    #[should_panic(expected = "residual dimension")]
    fn dimension_mismatch_panics_before_iterating() {
        struct Liar;
        impl LeastSquaresSystem for Liar {
            type Real = f64;
            fn n_parameters(&self) -> usize {
                2
            }
            fn n_residuals(&self) -> usize {
                3
            }
            fn residual(&self, x: &[f64]) -> Vec<f64> {
                vec![x[0], x[1]] // Two residuals, not the declared three.
            }
            fn jacobian(&self, _x: &[f64]) -> Mat<f64> {
                Mat::zeros(3, 2)
            }
        }

        let mut x = [1.0, 1.0];
        let _ = solve(&Liar, &mut x, SolverCfg::default());
    }
}
