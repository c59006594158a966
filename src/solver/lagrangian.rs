//! Equality-constrained minimisation by the augmented Lagrangian method.
//!
//! The problem `min f(x)` subject to `c(x) = 0` is replaced by a sequence of unconstrained
//! problems
//!
//! ```text
//! L(x) = f(x) + lambda . c(x) + mu / 2 * |c(x)|^2
//! ```
//!
//! each minimised with `argmin`'s L-BFGS and a More-Thuente line search. After each one the
//! multipliers are updated with `lambda += mu * c(x)`, and the penalty `mu` grows if the constraint
//! violation did not fall fast enough.
use super::{NonlinearSystem, Objective, Vector, capture, norm_inf};
use anyhow::{Error, Result, anyhow, ensure};
use argmin::core::{CostFunction, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use log::debug;
use std::cell::RefCell;

/// Penalty for the first subproblem
const INITIAL_PENALTY: f64 = 10.0;

/// Factor by which the penalty grows
const PENALTY_GROWTH: f64 = 10.0;

/// The penalty never grows beyond this
const MAX_PENALTY: f64 = 1e10;

/// The penalty grows unless the violation falls below this fraction of its previous value
const REQUIRED_PROGRESS: f64 = 0.25;

/// Number of correction pairs kept by L-BFGS
const LBFGS_MEMORY: usize = 7;

/// Iteration limit for each subproblem
const MAX_INNER_ITERATIONS: u64 = 1000;

/// Options for [`minimize`]
#[derive(Debug, Clone, PartialEq)]
pub struct LagrangianOptions {
    /// Maximum number of multiplier updates
    pub max_iterations: u32,
    /// Converged when the gradient of the Lagrangian is at most this, relative to the objective
    pub optimality_tolerance: f64,
    /// Converged only if every constraint is at most this in absolute value
    pub constraint_tolerance: f64,
}

impl Default for LagrangianOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            optimality_tolerance: 1e-6,
            constraint_tolerance: 1e-8,
        }
    }
}

/// The result of [`minimize`]
#[derive(Debug, Clone, PartialEq)]
pub struct LagrangianOutcome {
    /// Whether the optimality conditions were met
    pub success: bool,
    /// Why the iteration stopped
    pub message: String,
    /// The final iterate
    pub x: Vector,
    /// The objective at `x`
    pub objective: f64,
    /// Largest absolute constraint value at `x`
    pub constraint_violation: f64,
    /// Number of multiplier updates
    pub iterations: u32,
}

/// The augmented Lagrangian for fixed multipliers and penalty, as an `argmin` problem
struct Subproblem<'a, O: ?Sized, C: ?Sized> {
    objective: &'a O,
    constraints: &'a C,
    multipliers: &'a Vector,
    penalty: f64,
    /// The first error raised by the objective or constraints
    failure: &'a RefCell<Option<Error>>,
}

impl<O, C> Subproblem<'_, O, C>
where
    O: Objective + ?Sized,
    C: NonlinearSystem + ?Sized,
{
    fn value(&self, x: &Vector) -> Result<f64> {
        let c = self.constraints.residual(x)?;
        Ok(self.objective.value(x)? + self.multipliers.dot(&c) + 0.5 * self.penalty * c.dot(&c))
    }

    fn lagrangian_gradient(&self, x: &Vector) -> Result<Vector> {
        let c = self.constraints.residual(x)?;
        let weights = self.multipliers + &(self.penalty * &c);
        Ok(self.objective.gradient(x)? + self.constraints.jacobian(x)?.t().dot(&weights))
    }

    /// Keep model errors apart from failures of the optimiser itself
    fn record<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|err| {
            let message = err.to_string();
            capture(self.failure, err);
            anyhow!(message)
        })
    }
}

impl<O, C> CostFunction for Subproblem<'_, O, C>
where
    O: Objective + ?Sized,
    C: NonlinearSystem + ?Sized,
{
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output> {
        self.record(self.value(&Vector::from(x.clone())))
    }
}

impl<O, C> Gradient for Subproblem<'_, O, C>
where
    O: Objective + ?Sized,
    C: NonlinearSystem + ?Sized,
{
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, x: &Self::Param) -> Result<Self::Gradient> {
        self.record(self.lagrangian_gradient(&Vector::from(x.clone())))
            .map(Vector::into_raw_vec)
    }
}

fn outcome<O, C>(
    objective: &O,
    constraints: &C,
    x: Vector,
    success: bool,
    message: impl Into<String>,
    iterations: u32,
) -> Result<LagrangianOutcome>
where
    O: Objective + ?Sized,
    C: NonlinearSystem + ?Sized,
{
    Ok(LagrangianOutcome {
        success,
        message: message.into(),
        objective: objective.value(&x)?,
        constraint_violation: norm_inf(&constraints.residual(&x)?),
        x,
        iterations,
    })
}

/// Minimise `objective` subject to `constraints(x) = 0`, starting from `x0`.
///
/// `Err` is only returned if the objective or constraints fail. Failure to converge is reported
/// through the outcome.
pub fn minimize<O, C>(
    objective: &O,
    constraints: &C,
    x0: Vector,
    options: &LagrangianOptions,
) -> Result<LagrangianOutcome>
where
    O: Objective + ?Sized,
    C: NonlinearSystem + ?Sized,
{
    let n = x0.len();
    let value = objective.value(&x0)?;
    let gradient = objective.gradient(&x0)?;
    let c = constraints.residual(&x0)?;
    let jacobian = constraints.jacobian(&x0)?;
    let m = c.len();
    ensure!(
        gradient.len() == n,
        "Gradient has length {}, expected {n}",
        gradient.len()
    );
    ensure!(
        jacobian.dim() == (m, n),
        "Constraint Jacobian has shape {:?}, expected ({m}, {n})",
        jacobian.dim()
    );

    if !value.is_finite() || !c.iter().all(|v| v.is_finite()) {
        return outcome(
            objective,
            constraints,
            x0,
            false,
            "The objective or constraints are not finite at the initial point.",
            0,
        );
    }

    let mut x = x0;
    let mut multipliers = Vector::zeros(m);
    let mut penalty = INITIAL_PENALTY;
    let mut violation = norm_inf(&c);
    for iteration in 1..=options.max_iterations {
        let failure = RefCell::new(None);
        let subproblem = Subproblem {
            objective,
            constraints,
            multipliers: &multipliers,
            penalty,
            failure: &failure,
        };
        let solver = LBFGS::new(MoreThuenteLineSearch::new(), LBFGS_MEMORY)
            .with_tolerance_grad(options.optimality_tolerance)?;
        let result = Executor::new(subproblem, solver)
            .configure(|state| state.param(x.to_vec()).max_iters(MAX_INNER_ITERATIONS))
            .run();

        match result {
            Ok(result) => {
                let state = result.state();
                debug!(
                    "Subproblem {iteration} stopped after {} iterations: {:?}",
                    state.get_iter(),
                    state.get_termination_status()
                );
                if let Some(best) = state.get_best_param() {
                    x = Vector::from(best.clone());
                }
            }
            Err(err) => {
                if let Some(model_err) = failure.borrow_mut().take() {
                    return Err(model_err);
                }

                // Keep the previous iterate; new multipliers or a larger penalty may help
                debug!("Subproblem {iteration} failed: {err}");
            }
        }

        let c = constraints.residual(&x)?;
        multipliers = &multipliers + &(penalty * &c);
        let stationarity = norm_inf(
            &(objective.gradient(&x)? + constraints.jacobian(&x)?.t().dot(&multipliers)),
        );
        let value = objective.value(&x)?;
        let new_violation = norm_inf(&c);
        debug!(
            "Augmented Lagrangian iteration {iteration}: objective {value}, constraint violation \
             {new_violation}, stationarity {stationarity}, penalty {penalty}"
        );

        if new_violation <= options.constraint_tolerance
            && stationarity <= options.optimality_tolerance * (1.0 + value.abs())
        {
            return outcome(
                objective,
                constraints,
                x,
                true,
                "Optimization terminated successfully.",
                iteration,
            );
        }

        if new_violation > REQUIRED_PROGRESS * violation {
            penalty = (penalty * PENALTY_GROWTH).min(MAX_PENALTY);
        }
        violation = new_violation;
    }

    outcome(
        objective,
        constraints,
        x,
        false,
        "Iteration limit reached.",
        options.max_iterations,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::assert_error;
    use crate::solver::Matrix;
    use anyhow::bail;
    use float_cmp::assert_approx_eq;
    use ndarray::array;

    /// `(x0 - 1)^2 + (x1 - 2)^2`
    struct Distance;

    impl Objective for Distance {
        fn value(&self, x: &Vector) -> Result<f64> {
            Ok((x[0] - 1.0).powi(2) + (x[1] - 2.0).powi(2))
        }

        fn gradient(&self, x: &Vector) -> Result<Vector> {
            Ok(array![2.0 * (x[0] - 1.0), 2.0 * (x[1] - 2.0)])
        }
    }

    /// `x0 + x1`, with a finite-difference gradient
    struct Sum;

    impl Objective for Sum {
        fn value(&self, x: &Vector) -> Result<f64> {
            Ok(x[0] + x[1])
        }
    }

    /// `x0 + x1 = 1`
    struct Line;

    impl NonlinearSystem for Line {
        fn residual(&self, x: &Vector) -> Result<Vector> {
            Ok(array![x[0] + x[1] - 1.0])
        }

        fn jacobian(&self, _x: &Vector) -> Result<Matrix> {
            Ok(array![[1.0, 1.0]])
        }
    }

    /// `x0^2 + x1^2 = 2`, with a finite-difference Jacobian
    struct Circle;

    impl NonlinearSystem for Circle {
        fn residual(&self, x: &Vector) -> Result<Vector> {
            Ok(array![x[0] * x[0] + x[1] * x[1] - 2.0])
        }
    }

    /// No constraints at all
    struct Unconstrained;

    impl NonlinearSystem for Unconstrained {
        fn residual(&self, _x: &Vector) -> Result<Vector> {
            Ok(Vector::zeros(0))
        }

        fn jacobian(&self, x: &Vector) -> Result<Matrix> {
            Ok(Matrix::zeros((0, x.len())))
        }
    }

    /// Fails once `x0` goes below zero
    struct Fragile;

    impl NonlinearSystem for Fragile {
        fn residual(&self, x: &Vector) -> Result<Vector> {
            if x[0] < 0.0 {
                bail!("Negative input");
            }
            Ok(array![x[0] + x[1] - 1.0])
        }

        fn jacobian(&self, _x: &Vector) -> Result<Matrix> {
            Ok(array![[1.0, 1.0]])
        }
    }

    #[test]
    fn test_linear_constraint() {
        let outcome = minimize(
            &Distance,
            &Line,
            array![3.0, 3.0],
            &LagrangianOptions::default(),
        )
        .unwrap();
        assert!(outcome.success, "{}", outcome.message);
        assert_approx_eq!(f64, outcome.x[0], 0.0, epsilon = 1e-5);
        assert_approx_eq!(f64, outcome.x[1], 1.0, epsilon = 1e-5);
        assert_approx_eq!(f64, outcome.objective, 2.0, epsilon = 1e-5);
        assert!(outcome.constraint_violation <= 1e-8);
    }

    #[test]
    fn test_nonlinear_constraint() {
        let outcome = minimize(
            &Sum,
            &Circle,
            array![-1.2, -0.8],
            &LagrangianOptions::default(),
        )
        .unwrap();
        assert!(outcome.success, "{}", outcome.message);
        assert_approx_eq!(f64, outcome.x[0], -1.0, epsilon = 1e-5);
        assert_approx_eq!(f64, outcome.x[1], -1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_unconstrained() {
        let outcome = minimize(
            &Distance,
            &Unconstrained,
            array![-4.0, 10.0],
            &LagrangianOptions::default(),
        )
        .unwrap();
        assert!(outcome.success, "{}", outcome.message);
        assert_approx_eq!(f64, outcome.x[0], 1.0, epsilon = 1e-5);
        assert_approx_eq!(f64, outcome.x[1], 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_iteration_limit() {
        let options = LagrangianOptions {
            max_iterations: 1,
            ..LagrangianOptions::default()
        };
        let outcome = minimize(&Sum, &Circle, array![-1.2, -0.8], &options).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Iteration limit reached.");
        assert_eq!(outcome.iterations, 1);
    }

    #[test]
    fn test_non_finite_start() {
        struct Log;
        impl Objective for Log {
            fn value(&self, x: &Vector) -> Result<f64> {
                Ok(x[0].ln())
            }
        }

        let outcome = minimize(
            &Log,
            &Unconstrained,
            array![-1.0],
            &LagrangianOptions::default(),
        )
        .unwrap();
        assert!(!outcome.success);
        assert_eq!(
            outcome.message,
            "The objective or constraints are not finite at the initial point."
        );
    }

    #[test]
    fn test_constraint_error_propagates() {
        // The constrained minimum is at (-2, 3), where the constraint cannot be evaluated
        struct Shifted;
        impl Objective for Shifted {
            fn value(&self, x: &Vector) -> Result<f64> {
                Ok((x[0] + 5.0).powi(2) + x[1].powi(2))
            }

            fn gradient(&self, x: &Vector) -> Result<Vector> {
                Ok(array![2.0 * (x[0] + 5.0), 2.0 * x[1]])
            }
        }

        assert_error!(
            minimize(
                &Shifted,
                &Fragile,
                array![1.0, 0.0],
                &LagrangianOptions::default()
            ),
            "Negative input"
        );
    }
}
