//! Solving for market-clearing prices.
use crate::market::{MarketEquations, MarketModel, PRICE};
use crate::solver::hybrid::{self, HybridOptions};
use crate::solver::{Matrix, NonlinearSystem, Vector, norm_inf};
use anyhow::{Context, Result, ensure};
use log::{info, warn};
use ndarray::s;
use std::ops::Range;

/// The result of [`MarketModel::solve_equilibrium`]
#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    /// Whether excess demand was driven to within tolerance of zero
    pub success: bool,
    /// Diagnostic message from the root finder
    pub message: String,
    /// Number of excess demand evaluations
    pub evaluations: u32,
    /// Largest absolute excess demand at the final prices
    pub residual_norm: f64,
}

/// Excess demand as a function of prices only, with the other variables held fixed
struct PriceSystem<'a> {
    equations: &'a MarketEquations,
    base: Vector,
    prices: Range<usize>,
}

impl PriceSystem<'_> {
    fn full_vector(&self, p: &Vector) -> Vector {
        let mut x = self.base.clone();
        x.slice_mut(s![self.prices.clone()]).assign(p);
        x
    }
}

impl NonlinearSystem for PriceSystem<'_> {
    fn residual(&self, p: &Vector) -> Result<Vector> {
        self.equations.excess_demand(&self.full_vector(p))
    }

    fn jacobian(&self, p: &Vector) -> Result<Matrix> {
        let jacobian = self
            .equations
            .excess_demand_jacobian(&self.full_vector(p))?;
        Ok(jacobian.slice(s![.., self.prices.clone()]).to_owned())
    }
}

/// `200 * (hours + 1)`, saturating at `u32::MAX`
fn default_evaluation_budget(hours: usize) -> u32 {
    u32::try_from(hours)
        .ok()
        .and_then(|hours| hours.checked_add(1))
        .and_then(|n| n.checked_mul(200))
        .unwrap_or(u32::MAX)
}

impl MarketModel {
    /// Find prices at which excess demand is zero in every hour.
    ///
    /// Starts from `initial_guess` if given, otherwise from the stored prices. Any other
    /// endogenous variables are held at their stored values. If no evaluation budget is given,
    /// the one from the settings is used, falling back to `200 * (H + 1)`.
    ///
    /// The solution is written back into the store only on success; failure to converge is
    /// reported through the outcome and leaves the store unchanged.
    pub fn solve_equilibrium(
        &mut self,
        initial_guess: Option<Vec<f64>>,
        max_evaluations: Option<u32>,
    ) -> Result<SolveOutcome> {
        let registry = self.registry()?;
        let equations = self.equations()?;
        let mut x = registry.pack(self.store())?;
        let prices = registry
            .range(PRICE)
            .with_context(|| format!("'{PRICE}' is not registered"))?;
        let hours = prices.len();

        let p0 = match initial_guess {
            Some(guess) => {
                ensure!(
                    guess.len() == hours,
                    "Expected an initial guess with {hours} prices, got {}",
                    guess.len()
                );
                Vector::from(guess)
            }
            None => x.slice(s![prices.clone()]).to_owned(),
        };

        let max_evaluations = max_evaluations
            .or(self.settings().max_evaluations)
            .unwrap_or_else(|| default_evaluation_budget(hours));
        ensure!(max_evaluations > 0, "max_evaluations cannot be zero");

        let settings = self.settings();
        let options = HybridOptions {
            residual_tolerance: settings.residual_tolerance,
            step_tolerance: settings.step_tolerance,
            initial_step_bound: settings.initial_step_bound,
            max_evaluations,
        };
        let system = PriceSystem {
            equations: &equations,
            base: x.clone(),
            prices: prices.clone(),
        };
        let outcome = hybrid::solve(&system, p0, &options)?;
        let residual_norm = norm_inf(&outcome.residual);

        if outcome.success {
            x.slice_mut(s![prices]).assign(&outcome.x);
            registry.write_back(&x, self.store_mut())?;
            info!(
                "Market cleared after {} evaluations (largest excess demand {residual_norm:e})",
                outcome.evaluations
            );
        } else {
            warn!(
                "Market did not clear after {} evaluations: {}",
                outcome.evaluations, outcome.message
            );
        }

        Ok(SolveOutcome {
            success: outcome.success,
            message: outcome.message,
            evaluations: outcome.evaluations,
            residual_norm,
        })
    }
}
