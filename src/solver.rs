//! Generic numerical solvers.
//!
//! [`hybrid`] finds roots of square nonlinear systems and [`lagrangian`] minimises a smooth objective
//! subject to nonlinear equality constraints. Both work on plain `ndarray` vectors and know
//! nothing about markets.
use anyhow::{Context, Error, Result, ensure};
use finitediff::FiniteDiff;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use std::cell::RefCell;

pub mod hybrid;
pub mod lagrangian;

/// A flat vector of unknowns or residuals
pub type Vector = Array1<f64>;

/// A dense matrix, e.g. a Jacobian with one row per residual and one column per unknown
pub type Matrix = Array2<f64>;

/// A system of nonlinear equations `F(x) = 0`
pub trait NonlinearSystem {
    /// Evaluate the residuals at `x`
    fn residual(&self, x: &Vector) -> Result<Vector>;

    /// The Jacobian of the residuals at `x`.
    ///
    /// Defaults to forward differences.
    fn jacobian(&self, x: &Vector) -> Result<Matrix> {
        finite_difference_jacobian(self, x)
    }
}

/// A scalar function to be minimised
pub trait Objective {
    /// Evaluate the objective at `x`
    fn value(&self, x: &Vector) -> Result<f64>;

    /// The gradient of the objective at `x`.
    ///
    /// Defaults to central differences.
    fn gradient(&self, x: &Vector) -> Result<Vector> {
        finite_difference_gradient(self, x)
    }
}

/// Store the first error raised inside a finite-difference closure
fn capture(slot: &RefCell<Option<Error>>, err: Error) {
    let mut slot = slot.borrow_mut();
    if slot.is_none() {
        *slot = Some(err);
    }
}

/// Central-difference gradient of `objective` at `x`
pub fn finite_difference_gradient<O: Objective + ?Sized>(
    objective: &O,
    x: &Vector,
) -> Result<Vector> {
    let closure_err = RefCell::new(None);
    let func = |x: &Vector| -> f64 {
        objective.value(x).unwrap_or_else(|err| {
            capture(&closure_err, err);
            f64::NAN
        })
    };
    let gradient = x.central_diff(&func);
    if let Some(err) = closure_err.into_inner() {
        return Err(err.context("Objective failed while computing finite differences"));
    }

    Ok(gradient)
}

/// Forward-difference Jacobian of `system` at `x`, with one row per residual
pub fn finite_difference_jacobian<S: NonlinearSystem + ?Sized>(
    system: &S,
    x: &Vector,
) -> Result<Matrix> {
    let rows = system.residual(x)?.len();
    let closure_err = RefCell::new(None);
    let func = |x: &Vector| -> Vector {
        system.residual(x).unwrap_or_else(|err| {
            capture(&closure_err, err);
            Vector::from_elem(rows, f64::NAN)
        })
    };
    let jacobian = x.forward_jacobian(&func);
    if let Some(err) = closure_err.into_inner() {
        return Err(err.context("Residual failed while computing finite differences"));
    }

    // finitediff lays the Jacobian out with one row per unknown
    ensure!(
        jacobian.dim() == (x.len(), rows),
        "Finite-difference Jacobian has shape {:?}, expected ({}, {rows})",
        jacobian.dim(),
        x.len()
    );

    Ok(jacobian.reversed_axes())
}

/// Several systems evaluated as one, with their residuals stacked in order
pub struct StackedSystem<'a> {
    parts: Vec<&'a dyn NonlinearSystem>,
}

impl<'a> StackedSystem<'a> {
    /// Stack the given systems
    pub fn new(parts: Vec<&'a dyn NonlinearSystem>) -> Self {
        Self { parts }
    }
}

impl NonlinearSystem for StackedSystem<'_> {
    fn residual(&self, x: &Vector) -> Result<Vector> {
        let residuals = self
            .parts
            .iter()
            .map(|part| part.residual(x))
            .collect::<Result<Vec<_>>>()?;

        Ok(residuals
            .iter()
            .flat_map(|residual| residual.iter().copied())
            .collect())
    }

    fn jacobian(&self, x: &Vector) -> Result<Matrix> {
        let jacobians = self
            .parts
            .iter()
            .map(|part| part.jacobian(x))
            .collect::<Result<Vec<_>>>()?;
        if jacobians.is_empty() {
            return Ok(Matrix::zeros((0, x.len())));
        }

        let views = jacobians.iter().map(Matrix::view).collect::<Vec<_>>();
        ndarray::concatenate(Axis(0), &views).context("Constraint Jacobians have different widths")
    }
}

/// Largest absolute element, or zero for an empty vector
pub fn norm_inf(x: &Vector) -> f64 {
    x.iter().fold(0.0, |acc, v| acc.max(v.abs()))
}

/// Euclidean norm
pub fn norm2(x: &Vector) -> f64 {
    x.dot(x).sqrt()
}

/// Solve the square system `a * x = b` by LU decomposition.
///
/// Returns `None` if the matrix is singular or the solution is not finite.
pub fn solve_linear(a: ArrayView2<f64>, b: &Vector) -> Option<Vector> {
    let n = b.len();
    let lu = DMatrix::from_fn(n, n, |i, j| a[(i, j)]).lu();
    let solution = lu.solve(&DVector::from_iterator(n, b.iter().copied()))?;
    solution
        .iter()
        .all(|v| v.is_finite())
        .then(|| solution.iter().copied().collect())
}
