//! Constrained maximum-likelihood estimation of cost parameters from observed prices.
//!
//! Observed prices are modelled as equilibrium prices plus standard normal noise. The estimator
//! minimises the negative log-likelihood over prices, `sigma_E` and `OtherMC`, subject to the
//! market clearing in every hour.
use crate::market::{MarginalCostMode, MarketModel, PRICE, normal_pdf};
use crate::parameters::HOUR;
use crate::registry::VariableRegistry;
use crate::settings::Settings;
use crate::solver::lagrangian::{self, LagrangianOptions};
use crate::solver::{NonlinearSystem, Objective, StackedSystem, Vector};
use crate::store::{Store, Table};
use anyhow::{Context, Result, ensure};
use log::{info, warn};
use ndarray::s;
use std::ops::Range;

/// Options for [`Estimator::constrained_mle`]
#[derive(Default)]
pub struct EstimationOptions<'a> {
    /// Starting values for the parameters after `p` in the flat vector (`sigma_E` then
    /// `OtherMC`). Defaults to the stored values.
    pub theta0: Option<Vec<f64>>,
    /// Starting prices. Defaults to the stored prices.
    pub p0: Option<Vec<f64>>,
    /// Maximum number of iterations. Defaults to the value in the settings.
    pub max_iterations: Option<u32>,
    /// Equality constraints on the flat vector, in addition to market clearing
    pub constraints: Vec<&'a dyn NonlinearSystem>,
}

/// The result of [`Estimator::constrained_mle`]
#[derive(Debug, Clone, PartialEq)]
pub struct EstimationOutcome {
    /// Whether the optimiser converged
    pub success: bool,
    /// Diagnostic message from the optimiser
    pub message: String,
    /// Number of iterations taken
    pub iterations: u32,
    /// The estimated parameters: `sigma_E` followed by `OtherMC`
    pub theta_hat: Vector,
    /// The negative log-likelihood at the final iterate
    pub objective: f64,
}

/// Negative log-likelihood of observed prices
struct Likelihood {
    observed: Vector,
    prices: Range<usize>,
    len: usize,
}

impl Likelihood {
    /// Align `data` with the model's hours
    fn new(store: &Store, registry: &VariableRegistry, data: &Table) -> Result<Self> {
        ensure!(
            data.dims() == [HOUR],
            "Observed prices must be indexed by '{HOUR}', got [{}]",
            data.dims().join(", ")
        );
        let prices = registry
            .range(PRICE)
            .with_context(|| format!("'{PRICE}' is not registered"))?;
        let observed = store
            .table(PRICE)?
            .keys()
            .map(|key| {
                data.get(key)
                    .with_context(|| format!("No observed price for hour {}", key[0]))
            })
            .collect::<Result<Vector>>()?;

        Ok(Self {
            observed,
            prices,
            len: registry.len(),
        })
    }

    fn check_len(&self, x: &Vector) -> Result<()> {
        ensure!(
            x.len() == self.len,
            "Expected a vector of length {}, got {}",
            self.len,
            x.len()
        );

        Ok(())
    }

    /// Standardised errors `data - p`
    fn errors(&self, x: &Vector) -> Vector {
        &self.observed - &x.slice(s![self.prices.clone()])
    }
}

impl Objective for Likelihood {
    fn value(&self, x: &Vector) -> Result<f64> {
        self.check_len(x)?;
        Ok(self
            .errors(x)
            .iter()
            .map(|z| -normal_pdf(*z).max(f64::EPSILON).ln())
            .sum())
    }

    fn gradient(&self, x: &Vector) -> Result<Vector> {
        self.check_len(x)?;
        let mut gradient = Vector::zeros(self.len);
        let errors = self.errors(x);
        let mut slice = gradient.slice_mut(s![self.prices.clone()]);
        for (dest, z) in slice.iter_mut().zip(&errors) {
            // The density is floored, so its derivative vanishes there
            if normal_pdf(*z) > f64::EPSILON {
                *dest = -z;
            }
        }

        Ok(gradient)
    }
}

/// Estimates `sigma_E` and `OtherMC` from observed prices
#[derive(Debug, Clone)]
pub struct Estimator {
    model: MarketModel,
    solution: Option<Vector>,
    theta_hat: Option<Vector>,
}

impl Estimator {
    /// Create an estimator with default settings
    pub fn new(store: &Store) -> Result<Self> {
        Self::with_settings(store, Settings::default())
    }

    /// Create an estimator over a copy of `store`
    pub fn with_settings(store: &Store, settings: Settings) -> Result<Self> {
        Ok(Self {
            model: MarketModel::with_settings(store, settings, MarginalCostMode::Estimated)?,
            solution: None,
            theta_hat: None,
        })
    }

    /// The underlying market model
    pub fn model(&self) -> &MarketModel {
        &self.model
    }

    /// The underlying market model, e.g. for overriding parameters or solving for equilibrium
    pub fn model_mut(&mut self) -> &mut MarketModel {
        &mut self.model
    }

    /// The flat vector found by the last successful estimation
    pub fn solution(&self) -> Option<&Vector> {
        self.solution.as_ref()
    }

    /// The parameters found by the last successful estimation
    pub fn theta_hat(&self) -> Option<&Vector> {
        self.theta_hat.as_ref()
    }

    /// Negative log-likelihood of the observed prices `data` given the flat vector `x`.
    ///
    /// Densities below machine epsilon are floored so the result is always finite.
    pub fn log_likelihood(&self, x: &Vector, data: &Table) -> Result<f64> {
        let registry = self.model.registry()?;
        Likelihood::new(self.model.store(), &registry, data)?.value(x)
    }

    /// Estimate the parameters by maximum likelihood, subject to market clearing.
    ///
    /// On success the estimates are written back into the store. Failure to converge is
    /// reported through the outcome and leaves the store unchanged.
    pub fn constrained_mle(
        &mut self,
        data: &Table,
        options: EstimationOptions,
    ) -> Result<EstimationOutcome> {
        let registry = self.model.registry()?;
        let mut x = registry.pack(self.model.store())?;
        let prices = registry
            .range(PRICE)
            .with_context(|| format!("'{PRICE}' is not registered"))?;
        let theta = prices.end..registry.len();

        if let Some(p0) = options.p0 {
            ensure!(
                p0.len() == prices.len(),
                "Expected {} starting prices, got {}",
                prices.len(),
                p0.len()
            );
            x.slice_mut(s![prices.clone()]).assign(&Vector::from(p0));
        }
        if let Some(theta0) = options.theta0 {
            ensure!(
                theta0.len() == theta.len(),
                "Expected {} starting parameters, got {}",
                theta.len(),
                theta0.len()
            );
            x.slice_mut(s![theta.clone()]).assign(&Vector::from(theta0));
        }

        let likelihood = Likelihood::new(self.model.store(), &registry, data)?;
        let equations = self.model.equations()?;
        let mut parts: Vec<&dyn NonlinearSystem> = vec![&equations];
        parts.extend(options.constraints);
        let constraints = StackedSystem::new(parts);

        let settings = self.model.settings();
        let lagrangian_options = LagrangianOptions {
            max_iterations: options.max_iterations.unwrap_or(settings.max_iterations),
            optimality_tolerance: settings.optimality_tolerance,
            constraint_tolerance: settings.constraint_tolerance,
        };
        let outcome = lagrangian::minimize(&likelihood, &constraints, x, &lagrangian_options)?;
        let theta_hat = outcome.x.slice(s![theta]).to_owned();

        if outcome.success {
            registry.write_back(&outcome.x, self.model.store_mut())?;
            info!(
                "Estimation converged after {} iterations with negative log-likelihood {}",
                outcome.iterations, outcome.objective
            );
            self.solution = Some(outcome.x);
            self.theta_hat = Some(theta_hat.clone());
        } else {
            warn!(
                "Estimation failed after {} iterations: {}",
                outcome.iterations, outcome.message
            );
        }

        Ok(EstimationOutcome {
            success: outcome.success,
            message: outcome.message,
            iterations: outcome.iterations,
            theta_hat,
            objective: outcome.objective,
        })
    }
}
