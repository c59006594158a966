//! Powell's hybrid method for square systems of nonlinear equations.
//!
//! Each iteration takes a dogleg step inside a trust region, combining the Newton step with the
//! steepest-descent direction for the squared residual norm. Between Jacobian evaluations the
//! Jacobian is refined with Broyden rank-one updates; it is recomputed after two consecutive
//! unsuccessful steps.
use super::{Matrix, NonlinearSystem, Vector, norm_inf, norm2, solve_linear};
use anyhow::{Result, ensure};
use log::debug;

/// Steps with a smaller ratio of actual to predicted reduction are rejected
const ACCEPT_RATIO: f64 = 1e-4;

/// Number of consecutive rejected steps before the Jacobian is recomputed
const MAX_FAILED_STEPS: u32 = 2;

/// Options for [`solve`]
#[derive(Debug, Clone, PartialEq)]
pub struct HybridOptions {
    /// Converged when every residual is at most this in absolute value
    pub residual_tolerance: f64,
    /// Give up when the trust region is smaller than this, relative to the size of `x`
    pub step_tolerance: f64,
    /// The initial trust region radius is this times the norm of the initial guess (or one)
    pub initial_step_bound: f64,
    /// Maximum number of residual evaluations
    pub max_evaluations: u32,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            residual_tolerance: 1e-9,
            step_tolerance: 1.49012e-8,
            initial_step_bound: 100.0,
            max_evaluations: 1000,
        }
    }
}

/// The result of [`solve`]
#[derive(Debug, Clone, PartialEq)]
pub struct HybridOutcome {
    /// Whether the residual tolerance was reached
    pub success: bool,
    /// Why the iteration stopped
    pub message: String,
    /// The final iterate
    pub x: Vector,
    /// The residuals at `x`
    pub residual: Vector,
    /// Number of residual evaluations, not counting those used for finite differences
    pub evaluations: u32,
}

impl HybridOutcome {
    fn new(
        success: bool,
        message: impl Into<String>,
        x: Vector,
        residual: Vector,
        evaluations: u32,
    ) -> Self {
        Self {
            success,
            message: message.into(),
            x,
            residual,
            evaluations,
        }
    }
}

/// Find `x` such that `system.residual(x)` is zero, starting from `x0`.
///
/// `Err` is only returned if the system itself fails. Failure to converge is reported through the
/// outcome.
pub fn solve<S: NonlinearSystem + ?Sized>(
    system: &S,
    x0: Vector,
    options: &HybridOptions,
) -> Result<HybridOutcome> {
    let mut x = x0;
    let mut f = system.residual(&x)?;
    ensure!(
        f.len() == x.len(),
        "The system has {} residuals but {} unknowns",
        f.len(),
        x.len()
    );
    let mut evaluations = 1;

    if !f.iter().all(|v| v.is_finite()) {
        return Ok(HybridOutcome::new(
            false,
            "The residual is not finite at the initial guess.",
            x,
            f,
            evaluations,
        ));
    }
    if norm_inf(&f) <= options.residual_tolerance {
        return Ok(HybridOutcome::new(
            true,
            "The solution converged.",
            x,
            f,
            evaluations,
        ));
    }

    let mut jacobian = system.jacobian(&x)?;
    let mut delta = options.initial_step_bound * norm2(&x).max(1.0);
    let mut failed_steps = 0;
    loop {
        if evaluations >= options.max_evaluations {
            let message = format!(
                "The number of calls to the function has reached {}.",
                options.max_evaluations
            );
            return Ok(HybridOutcome::new(false, message, x, f, evaluations));
        }

        let Some(step) = dogleg(&jacobian, &f, delta) else {
            return Ok(HybridOutcome::new(
                false,
                "The iteration is not making good progress: the residual norm is stationary.",
                x,
                f,
                evaluations,
            ));
        };
        let step_norm = norm2(&step);
        let trial = &x + &step;
        let trial_f = system.residual(&trial)?;
        evaluations += 1;

        // Reductions in the squared residual norm
        let predicted_change = jacobian.dot(&step);
        let predicted = -(2.0 * f.dot(&predicted_change) + predicted_change.dot(&predicted_change));
        let finite = trial_f.iter().all(|v| v.is_finite());
        let actual = if finite {
            f.dot(&f) - trial_f.dot(&trial_f)
        } else {
            f64::NEG_INFINITY
        };
        let ratio = if predicted > 0.0 {
            actual / predicted
        } else {
            0.0
        };

        if ratio < 0.25 {
            delta = 0.5 * step_norm;
        } else if ratio >= 0.5 {
            delta = delta.max(2.0 * step_norm);
        }

        if finite {
            let mismatch = &trial_f - &f - &predicted_change;
            broyden_update(&mut jacobian, &step, &mismatch);
        }

        if ratio > ACCEPT_RATIO {
            x = trial;
            f = trial_f;
            failed_steps = 0;
            if norm_inf(&f) <= options.residual_tolerance {
                return Ok(HybridOutcome::new(
                    true,
                    "The solution converged.",
                    x,
                    f,
                    evaluations,
                ));
            }
        } else {
            failed_steps += 1;
            if failed_steps == MAX_FAILED_STEPS {
                debug!("Recomputing the Jacobian after {failed_steps} unsuccessful steps");
                jacobian = system.jacobian(&x)?;
                failed_steps = 0;
            }
        }

        if delta <= options.step_tolerance * (norm2(&x) + options.step_tolerance) {
            return Ok(HybridOutcome::new(
                false,
                "The iteration is not making good progress: the trust region has collapsed.",
                x,
                f,
                evaluations,
            ));
        }
    }
}

/// The dogleg step for the linear model `f + J s` within radius `delta`.
///
/// Returns `None` if the gradient of the squared residual norm vanishes.
fn dogleg(jacobian: &Matrix, f: &Vector, delta: f64) -> Option<Vector> {
    let newton = solve_linear(jacobian.view(), &-f);
    if newton.as_ref().is_some_and(|newton| norm2(newton) <= delta) {
        return newton;
    }

    let gradient = jacobian.t().dot(f);
    let gradient_norm = norm2(&gradient);
    if !gradient_norm.is_finite() || gradient_norm <= 0.0 {
        return None;
    }

    // Minimiser of the linear model along the steepest-descent direction
    let jg = jacobian.dot(&gradient);
    let curvature = jg.dot(&jg);
    let to_boundary = -(delta / gradient_norm) * &gradient;
    if curvature <= 0.0 {
        return Some(to_boundary);
    }
    let cauchy = -(gradient_norm * gradient_norm / curvature) * &gradient;
    if norm2(&cauchy) >= delta {
        return Some(to_boundary);
    }
    let Some(newton) = newton else {
        return Some(cauchy);
    };

    // Walk from the Cauchy point towards the Newton point until reaching the boundary
    let diff = &newton - &cauchy;
    let a = diff.dot(&diff);
    let b = 2.0 * cauchy.dot(&diff);
    let c = cauchy.dot(&cauchy) - delta * delta;
    let tau = (-b + (b * b - 4.0 * a * c).sqrt()) / (2.0 * a);

    Some(cauchy + tau * diff)
}

/// Broyden's rank-one update: `J += (mismatch * step^T) / |step|^2`
fn broyden_update(jacobian: &mut Matrix, step: &Vector, mismatch: &Vector) {
    let step_sq = step.dot(step);
    if step_sq <= 0.0 {
        return;
    }

    for ((i, j), value) in jacobian.indexed_iter_mut() {
        *value += mismatch[i] * step[j] / step_sq;
    }
}
