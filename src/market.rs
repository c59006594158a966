//! The smooth electricity market model.
//!
//! Supply and load are smoothed with the normal distribution: a unit with marginal cost `c`
//! supplies `capacity * Phi((p - c) / sigma_E)` at price `p`, and consumers demand
//! `Demand * Phi((meanMWP - p) / sigma_L)`. The market clears when excess demand is zero in every
//! hour.
use crate::id::{Label, LabelCollection};
use crate::parameters::{DerivedParameter, HOUR, OTHER_MC, Parameters, UNIT};
use crate::registry::VariableRegistry;
use crate::settings::Settings;
use crate::solver::{Matrix, NonlinearSystem, Vector};
use crate::store::{Entry, LabelSet, Store, Table};
use anyhow::{Context, Result, bail, ensure};
use indexmap::IndexSet;
use log::debug;
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use std::ops::Range;
use std::slice;

/// Store entry: the market-clearing price per hour
pub const PRICE: &str = "p";
/// Store entry: smoothing parameter of the supply curve
pub const SIGMA_E: &str = "sigma_E";
/// Store entry: smoothing parameter of the load curve
pub const SIGMA_L: &str = "sigma_L";
/// Store entry: mean marginal willingness to pay
pub const MEAN_MWP: &str = "meanMWP";
/// Alias for the hour set
pub const HOUR_ALIAS: &str = "h_alias";

/// The standard normal cumulative distribution function
pub fn normal_cdf(z: f64) -> f64 {
    Normal::standard().cdf(z)
}

/// The standard normal probability density function
pub fn normal_pdf(z: f64) -> f64 {
    Normal::standard().pdf(z)
}

/// Where the marginal costs of generation come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarginalCostMode {
    /// Use the derived average marginal cost and the stored `sigma_E`; only prices are unknown
    #[default]
    Fixed,
    /// Read `sigma_E` and `OtherMC` from the flat vector, e.g. to estimate them
    Estimated,
}

impl MarginalCostMode {
    /// The endogenous variables, in the order they appear in the flat vector
    pub fn variables(self) -> &'static [&'static str] {
        match self {
            MarginalCostMode::Fixed => &[PRICE],
            MarginalCostMode::Estimated => &[PRICE, SIGMA_E, OTHER_MC],
        }
    }
}

/// A market model over a private copy of the data store
#[derive(Debug, Clone)]
pub struct MarketModel {
    store: Store,
    parameters: Parameters,
    settings: Settings,
    mode: MarginalCostMode,
}

impl MarketModel {
    /// Create a model with default settings and fixed marginal costs
    pub fn new(store: &Store) -> Result<Self> {
        Self::with_settings(store, Settings::default(), MarginalCostMode::Fixed)
    }

    /// Create a model from a copy of `store`.
    ///
    /// `sigma_E`, `sigma_L` and `p` are filled in from the settings if the store does not
    /// provide them.
    pub fn with_settings(store: &Store, settings: Settings, mode: MarginalCostMode) -> Result<Self> {
        settings.validate()?;

        let mut store = store.clone();
        store.update_alias(&[(HOUR, HOUR_ALIAS)])?;
        if !store.contains(SIGMA_E) {
            store.set(SIGMA_E, settings.default_sigma_e);
        }
        if !store.contains(SIGMA_L) {
            store.set(SIGMA_L, settings.default_sigma_l);
        }
        if !store.contains(PRICE) {
            let hours = store.label_set(HOUR)?;
            let price = Table::from_entries(
                hours.dims(),
                hours.iter().map(|key| (key.clone(), settings.initial_price)),
            )?;
            store.set(PRICE, price);
        }

        let parameters = Parameters::from_store(&store)?;
        let model = Self {
            store,
            parameters,
            settings,
            mode,
        };

        // Check the data is usable before anyone tries to solve
        model.equations()?;

        Ok(model)
    }

    /// The model's copy of the data store
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// The settings the model was created with
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Where marginal costs come from
    pub fn mode(&self) -> MarginalCostMode {
        self.mode
    }

    /// The derived parameters
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// The hours of the model
    pub fn hours(&self) -> Result<&LabelSet> {
        self.store.label_set(HOUR)
    }

    /// Number of hours (`H`)
    pub fn hour_count(&self) -> Result<usize> {
        Ok(self.hours()?.len())
    }

    /// The `(id, h)` pairs with generating capacity
    pub fn id2h(&self) -> &LabelSet {
        self.parameters.id2h()
    }

    /// Hourly demand
    pub fn demand(&self) -> &Table {
        self.parameters.demand()
    }

    /// Override a derived parameter by name.
    ///
    /// `Demand`, `H` and `id2h` are read-only; attempts to set them fail and leave the model
    /// unchanged.
    pub fn override_parameter(&mut self, name: &str, value: Table) -> Result<()> {
        let parameter = DerivedParameter::from_name(name)?;
        self.set_parameter(parameter, value)
    }

    /// Override hourly generating capacity per `(id, h)`
    pub fn set_hourly_generating_capacity(&mut self, value: Table) -> Result<()> {
        self.set_parameter(DerivedParameter::HourlyGeneratingCapacity, value)
    }

    /// Override hourly demand per consumer
    pub fn set_hourly_demand_c(&mut self, value: Table) -> Result<()> {
        self.set_parameter(DerivedParameter::HourlyDemandByConsumer, value)
    }

    /// Override the fuel cost per fuel type
    pub fn set_fuel_cost(&mut self, value: Table) -> Result<()> {
        self.set_parameter(DerivedParameter::FuelCost, value)
    }

    /// Override the average marginal cost, per `id` or per `(id, h)`.
    ///
    /// Not allowed in [`MarginalCostMode::Estimated`], where marginal costs are built from
    /// `OtherMC` in the flat vector.
    pub fn set_average_mc(&mut self, value: Table) -> Result<()> {
        self.set_parameter(DerivedParameter::AverageMC, value)
    }

    fn set_parameter(&mut self, parameter: DerivedParameter, value: Table) -> Result<()> {
        if parameter == DerivedParameter::AverageMC && self.mode == MarginalCostMode::Estimated {
            let name: &str = parameter.into();
            bail!("{name} cannot be overridden while '{OTHER_MC}' is estimated");
        }

        let mut parameters = self.parameters.clone();
        parameters.set(parameter, value, &self.store)?;
        let previous = std::mem::replace(&mut self.parameters, parameters);
        if let Err(err) = self.equations() {
            self.parameters = previous;
            return Err(err);
        }

        Ok(())
    }

    /// The registry of endogenous variables, compiled from the current store
    pub fn registry(&self) -> Result<VariableRegistry> {
        VariableRegistry::for_store(&self.store, self.mode.variables())
    }

    /// The current store values of the endogenous variables as a flat vector
    pub fn pack(&self) -> Result<Vector> {
        self.registry()?.pack(&self.store)
    }

    /// The value of `name` given the flat vector `x`
    pub fn unpack(&self, x: &Vector, name: &str) -> Result<Entry> {
        self.registry()?.unpack(x, name, &self.store)
    }

    /// The market equations for the current store and parameters
    pub fn equations(&self) -> Result<MarketEquations> {
        MarketEquations::new(self, &self.registry()?)
    }

    /// Supply per hour
    pub fn supply(&self, x: &Vector) -> Result<Vector> {
        self.equations()?.supply(x)
    }

    /// Load per hour
    pub fn load(&self, x: &Vector) -> Result<Vector> {
        self.equations()?.load(x)
    }

    /// Load minus supply per hour
    pub fn excess_demand(&self, x: &Vector) -> Result<Vector> {
        self.equations()?.excess_demand(x)
    }

    /// Jacobian of [`MarketModel::excess_demand`], with one row per hour and one column per
    /// element of `x`
    pub fn excess_demand_jacobian(&self, x: &Vector) -> Result<Matrix> {
        self.equations()?.excess_demand_jacobian(x)
    }
}

/// A value which is either fixed or read from the flat vector
#[derive(Debug, Clone, Copy, PartialEq)]
enum Source {
    Fixed(f64),
    Position(usize),
}

impl Source {
    fn value(self, x: &Vector) -> f64 {
        match self {
            Source::Fixed(value) => value,
            Source::Position(i) => x[i],
        }
    }
}

/// The contribution of one unit in one hour to supply
#[derive(Debug, Clone, PartialEq)]
struct SupplyTerm {
    hour: usize,
    capacity: f64,
    /// Marginal cost excluding `OtherMC` when that is read from the flat vector
    cost: f64,
    other_mc: Option<usize>,
}

impl SupplyTerm {
    fn marginal_cost(&self, x: &Vector) -> f64 {
        self.cost + self.other_mc.map_or(0.0, |i| x[i])
    }
}

/// Excess demand as a function of the flat vector.
///
/// Everything which does not depend on `x` is resolved up front, so evaluation only indexes into
/// `x` and precomputed vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketEquations {
    len: usize,
    prices: Range<usize>,
    sigma_e: Source,
    demand: Vec<f64>,
    mean_mwp: Vec<f64>,
    sigma_l: Vec<f64>,
    terms: Vec<SupplyTerm>,
}

/// Values of a scalar or per-hour store entry for each of `hours`
fn per_hour(store: &Store, name: &str, hours: &IndexSet<Label>) -> Result<Vec<f64>> {
    match store.get(name)? {
        Entry::Scalar(value) => Ok(vec![*value; hours.len()]),
        Entry::Table(table) => {
            ensure!(
                table.dims() == [HOUR],
                "'{name}' must be a scalar or indexed by '{HOUR}', got [{}]",
                table.dims().join(", ")
            );
            hours
                .iter()
                .map(|hour| {
                    table
                        .get(slice::from_ref(hour))
                        .with_context(|| format!("'{name}' has no value for hour {hour}"))
                })
                .collect()
        }
        Entry::Set(_) => bail!("'{name}' is a set, not a scalar or variable"),
    }
}

fn check_positive(values: &[f64], name: &str) -> Result<()> {
    ensure!(
        values.iter().all(|v| v.is_finite() && *v > 0.0),
        "'{name}' must be greater than zero"
    );

    Ok(())
}

impl MarketEquations {
    fn new(model: &MarketModel, registry: &VariableRegistry) -> Result<Self> {
        let store = &model.store;
        let price = store.table(PRICE)?;
        ensure!(
            price.dims() == [HOUR],
            "'{PRICE}' must be indexed by '{HOUR}', got [{}]",
            price.dims().join(", ")
        );
        let hours = price.labels(HOUR)?;
        let prices = registry
            .range(PRICE)
            .with_context(|| format!("'{PRICE}' is not registered"))?;

        let demand_table = model.parameters.demand();
        let demand = hours
            .iter()
            .map(|hour| demand_table.get(slice::from_ref(hour)).unwrap_or(0.0))
            .collect();
        let mean_mwp = per_hour(store, MEAN_MWP, &hours)?;
        let sigma_l = per_hour(store, SIGMA_L, &hours)?;
        check_positive(&sigma_l, SIGMA_L)?;

        let sigma_e = match registry.range(SIGMA_E) {
            Some(range) => Source::Position(range.start),
            None => {
                let sigma_e = store.scalar(SIGMA_E)?;
                check_positive(&[sigma_e], SIGMA_E)?;
                Source::Fixed(sigma_e)
            }
        };

        Ok(Self {
            len: registry.len(),
            prices,
            sigma_e,
            demand,
            mean_mwp,
            sigma_l,
            terms: supply_terms(model, registry, &hours)?,
        })
    }

    /// Number of hours
    pub fn hour_count(&self) -> usize {
        self.prices.len()
    }

    /// Length of the flat vector
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the flat vector is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The range of the flat vector holding prices
    pub fn prices(&self) -> Range<usize> {
        self.prices.clone()
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

    fn price(&self, x: &Vector, hour: usize) -> f64 {
        x[self.prices.start + hour]
    }

    fn load_z(&self, x: &Vector, hour: usize) -> f64 {
        (self.mean_mwp[hour] - self.price(x, hour)) / self.sigma_l[hour]
    }

    fn supply_z(&self, x: &Vector, term: &SupplyTerm, sigma_e: f64) -> f64 {
        (self.price(x, term.hour) - term.marginal_cost(x)) / sigma_e
    }

    /// Load per hour
    pub fn load(&self, x: &Vector) -> Result<Vector> {
        self.check_len(x)?;
        Ok((0..self.hour_count())
            .map(|hour| self.demand[hour] * normal_cdf(self.load_z(x, hour)))
            .collect())
    }

    /// Supply per hour; hours without generating units have zero supply
    pub fn supply(&self, x: &Vector) -> Result<Vector> {
        self.check_len(x)?;
        let sigma_e = self.sigma_e.value(x);
        let mut supply = Vector::zeros(self.hour_count());
        for term in &self.terms {
            supply[term.hour] += term.capacity * normal_cdf(self.supply_z(x, term, sigma_e));
        }

        Ok(supply)
    }

    /// Load minus supply per hour
    pub fn excess_demand(&self, x: &Vector) -> Result<Vector> {
        Ok(self.load(x)? - self.supply(x)?)
    }

    /// Analytic Jacobian of [`MarketEquations::excess_demand`]
    pub fn excess_demand_jacobian(&self, x: &Vector) -> Result<Matrix> {
        self.check_len(x)?;
        let mut jacobian = Matrix::zeros((self.hour_count(), self.len));
        for (hour, (demand, sigma_l)) in self.demand.iter().zip(&self.sigma_l).enumerate() {
            let z = self.load_z(x, hour);
            jacobian[(hour, self.prices.start + hour)] -= demand * normal_pdf(z) / sigma_l;
        }

        let sigma_e = self.sigma_e.value(x);
        for term in &self.terms {
            let z = self.supply_z(x, term, sigma_e);
            let weight = term.capacity * normal_pdf(z) / sigma_e;
            jacobian[(term.hour, self.prices.start + term.hour)] -= weight;
            if let Source::Position(i) = self.sigma_e {
                jacobian[(term.hour, i)] += weight * z;
            }
            if let Some(i) = term.other_mc {
                jacobian[(term.hour, i)] += weight;
            }
        }

        Ok(jacobian)
    }
}

impl NonlinearSystem for MarketEquations {
    fn residual(&self, x: &Vector) -> Result<Vector> {
        self.excess_demand(x)
    }

    fn jacobian(&self, x: &Vector) -> Result<Matrix> {
        self.excess_demand_jacobian(x)
    }
}

/// Resolve capacities and marginal costs for every `(id, h)` pair with capacity.
///
/// With fixed marginal costs, units without an average marginal cost are left out. Otherwise the
/// cost is `OtherMC` from the flat vector plus the fuel component, either of which may be missing.
fn supply_terms(
    model: &MarketModel,
    registry: &VariableRegistry,
    hours: &IndexSet<Label>,
) -> Result<Vec<SupplyTerm>> {
    let capacity = model.parameters.hourly_generating_capacity();
    let unit_pos = capacity
        .dim_position(UNIT)
        .with_context(|| format!("Hourly generating capacity has no '{UNIT}' dimension"))?;
    let hour_pos = capacity
        .dim_position(HOUR)
        .with_context(|| format!("Hourly generating capacity has no '{HOUR}' dimension"))?;
    let hour_of = |key: &[Label]| {
        hours.position_of(&key[hour_pos].0).with_context(|| {
            format!(
                "Capacity of unit {} refers to an hour with no price",
                key[unit_pos]
            )
        })
    };

    let mut terms = Vec::new();
    match model.mode {
        MarginalCostMode::Fixed => {
            let average_mc = model.parameters.average_mc();
            let lookup = average_mc
                .projector(capacity.dims())
                .context("Cannot look up average marginal cost by unit and hour")?;
            for (key, value) in capacity.iter() {
                let Some(cost) = average_mc.get_projected(&lookup, key) else {
                    continue;
                };
                terms.push(SupplyTerm {
                    hour: hour_of(key)?,
                    capacity: value,
                    cost,
                    other_mc: None,
                });
            }
        }
        MarginalCostMode::Estimated => {
            let other_mc = model.store.table(OTHER_MC)?;
            let offset = registry
                .range(OTHER_MC)
                .with_context(|| format!("'{OTHER_MC}' is not registered"))?
                .start;
            let other_lookup = other_mc
                .projector(capacity.dims())
                .with_context(|| format!("Cannot look up '{OTHER_MC}' by unit and hour"))?;
            let fuel_component = model.parameters.fuel_component();
            let fuel_lookup = fuel_component
                .projector(capacity.dims())
                .context("Cannot look up fuel costs by unit and hour")?;
            for (key, value) in capacity.iter() {
                let other = other_mc
                    .index_of_projected(&other_lookup, key)
                    .map(|i| offset + i);
                let fuel = fuel_component.get_projected(&fuel_lookup, key);
                if other.is_none() && fuel.is_none() {
                    continue;
                }
                terms.push(SupplyTerm {
                    hour: hour_of(key)?,
                    capacity: value,
                    cost: fuel.unwrap_or(0.0),
                    other_mc: other,
                });
            }
        }
    }

    if terms.len() < capacity.len() {
        debug!(
            "{} of {} unit-hours have no marginal cost and are left out of supply",
            capacity.len() - terms.len(),
            capacity.len()
        );
    }

    Ok(terms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, market_store, single_hour_store};
    use crate::id::key;
    use float_cmp::assert_approx_eq;
    use ndarray::array;
    use rstest::rstest;

    #[rstest]
    fn test_defaults_filled_in(market_store: Store) {
        let model = MarketModel::new(&market_store).unwrap();
        let store = model.store();
        assert_approx_eq!(f64, store.scalar(SIGMA_E).unwrap(), 2.0);
        assert_approx_eq!(f64, store.scalar(SIGMA_L).unwrap(), 2.0);
        assert_eq!(model.pack().unwrap(), array![0.0, 0.0]);
        assert_eq!(store.label_set(HOUR_ALIAS).unwrap().len(), 2);
        assert_eq!(model.hour_count().unwrap(), 2);

        // The caller's store is untouched
        assert!(!market_store.contains(SIGMA_E));
    }

    #[rstest]
    fn test_stored_values_kept(mut market_store: Store) {
        market_store.set(SIGMA_E, 5.0);
        market_store.set(PRICE, Table::vector("h", [("1", 30.0), ("2", 40.0)]));
        let model = MarketModel::new(&market_store).unwrap();
        assert_approx_eq!(f64, model.store().scalar(SIGMA_E).unwrap(), 5.0);
        assert_eq!(model.pack().unwrap(), array![30.0, 40.0]);
    }

    #[rstest]
    fn test_settings_defaults(market_store: Store) {
        let settings = Settings {
            default_sigma_e: 3.0,
            initial_price: 10.0,
            ..Settings::default()
        };
        let model =
            MarketModel::with_settings(&market_store, settings, MarginalCostMode::Fixed).unwrap();
        assert_approx_eq!(f64, model.store().scalar(SIGMA_E).unwrap(), 3.0);
        assert_eq!(model.pack().unwrap(), array![10.0, 10.0]);
    }

    #[rstest]
    fn test_supply_and_load(market_store: Store) {
        let model = MarketModel::new(&market_store).unwrap();
        let x = array![17.0, 1.0];

        // Hour 1: coal is at its marginal cost, wind is far above it
        // Hour 2: coal is far below its marginal cost, wind is at it
        let supply = model.supply(&x).unwrap();
        assert_approx_eq!(f64, supply[0], 50.0 + 10.0, epsilon = 1e-9);
        assert_approx_eq!(f64, supply[1], 20.0, epsilon = 1e-9);

        // Load is effectively the full demand with meanMWP = 40
        let load = model.load(&x).unwrap();
        assert_approx_eq!(f64, load[0], 80.0, epsilon = 1e-6);
        assert_approx_eq!(f64, load[1], 120.0, epsilon = 1e-6);

        let excess = model.excess_demand(&x).unwrap();
        assert_approx_eq!(f64, excess[0], load[0] - supply[0]);
        assert_approx_eq!(f64, excess[1], load[1] - supply[1]);
    }

    #[rstest]
    fn test_single_hour_symmetry(single_hour_store: Store) {
        let model = MarketModel::new(&single_hour_store).unwrap();
        let excess = model.excess_demand(&array![22.5]).unwrap();
        assert_approx_eq!(f64, excess[0], 0.0, epsilon = 1e-9);
    }

    #[rstest]
    fn test_monotonic_in_price(market_store: Store) {
        let model = MarketModel::new(&market_store).unwrap();
        let mut last_supply = model.supply(&array![0.0, 0.0]).unwrap();
        let mut last_load = model.load(&array![0.0, 0.0]).unwrap();
        for i in 1..=60 {
            let p = f64::from(i);
            let x = array![p, p];
            let supply = model.supply(&x).unwrap();
            let load = model.load(&x).unwrap();
            for hour in 0..2 {
                assert!(supply[hour] >= last_supply[hour]);
                assert!(load[hour] <= last_load[hour]);
            }
            last_supply = supply;
            last_load = load;
        }
    }

    #[rstest]
    fn test_step_function_limit(mut market_store: Store) {
        market_store.set(SIGMA_E, 1e-6);
        let model = MarketModel::new(&market_store).unwrap();

        // Coal (cost 17) is off below its cost and fully on above it
        let supply = model.supply(&array![16.9, 17.1]).unwrap();
        assert_approx_eq!(f64, supply[0], 10.0, epsilon = 1e-9);
        assert_approx_eq!(f64, supply[1], 140.0, epsilon = 1e-9);
    }

    #[rstest]
    fn test_hour_without_units_or_demand(mut market_store: Store) {
        market_store.set("h", LabelSet::from_labels("h", ["1", "2", "3"]));
        let model = MarketModel::new(&market_store).unwrap();
        let x = array![20.0, 20.0, 20.0];
        assert_approx_eq!(f64, model.supply(&x).unwrap()[2], 0.0);
        assert_approx_eq!(f64, model.load(&x).unwrap()[2], 0.0);
    }

    #[rstest]
    fn test_per_hour_mean_mwp(mut market_store: Store) {
        market_store.set(MEAN_MWP, Table::vector("h", [("1", 40.0), ("2", 10.0)]));
        let model = MarketModel::new(&market_store).unwrap();
        let load = model.load(&array![10.0, 10.0]).unwrap();
        assert_approx_eq!(f64, load[0], 80.0, epsilon = 1e-6);
        assert_approx_eq!(f64, load[1], 60.0, epsilon = 1e-9);

        market_store.set(MEAN_MWP, Table::vector("h", [("1", 40.0)]));
        assert_error!(
            MarketModel::new(&market_store),
            "'meanMWP' has no value for hour 2"
        );
    }

    #[rstest]
    fn test_fixed_jacobian_matches_finite_differences(market_store: Store) {
        let model = MarketModel::new(&market_store).unwrap();
        let equations = model.equations().unwrap();
        let x = array![15.0, 18.0];
        let analytic = equations.excess_demand_jacobian(&x).unwrap();
        let numeric = crate::solver::finite_difference_jacobian(&equations, &x).unwrap();
        assert_eq!(analytic.dim(), (2, 2));
        for (a, n) in analytic.iter().zip(numeric.iter()) {
            assert_approx_eq!(f64, *a, *n, epsilon = 1e-4);
        }
    }

    #[rstest]
    fn test_estimated_jacobian_matches_finite_differences(market_store: Store) {
        let model =
            MarketModel::with_settings(&market_store, Settings::default(), MarginalCostMode::Estimated)
                .unwrap();
        let equations = model.equations().unwrap();

        // [p1, p2, sigma_E, OtherMC coal, OtherMC wind]
        let x = array![15.0, 18.0, 2.5, 3.0, 1.0];
        let analytic = equations.excess_demand_jacobian(&x).unwrap();
        let numeric = crate::solver::finite_difference_jacobian(&equations, &x).unwrap();
        assert_eq!(analytic.dim(), (2, 5));
        assert_eq!(numeric.dim(), (2, 5));
        for (a, n) in analytic.iter().zip(numeric.iter()) {
            assert_approx_eq!(f64, *a, *n, epsilon = 1e-4);
        }
    }

    #[rstest]
    fn test_estimated_mode_reads_vector(market_store: Store) {
        let fixed = MarketModel::new(&market_store).unwrap();
        let estimated =
            MarketModel::with_settings(&market_store, Settings::default(), MarginalCostMode::Estimated)
                .unwrap();
        let registry = estimated.registry().unwrap();
        assert_eq!(registry.range(PRICE), Some(0..2));
        assert_eq!(registry.range(SIGMA_E), Some(2..3));
        assert_eq!(registry.range(OTHER_MC), Some(3..5));

        // With store values the two modes agree
        let x = estimated.pack().unwrap();
        let p = array![x[0], x[1]];
        assert_eq!(
            estimated.supply(&x).unwrap(),
            fixed.supply(&p).unwrap()
        );

        // Raising OtherMC for coal lowers supply
        let higher = array![20.0, 20.0, 2.0, 10.0, 1.0];
        let lower = array![20.0, 20.0, 2.0, 3.0, 1.0];
        let supply_higher = estimated.supply(&higher).unwrap();
        let supply_lower = estimated.supply(&lower).unwrap();
        assert!(supply_higher[0] < supply_lower[0]);
    }

    #[rstest]
    fn test_override_parameter(market_store: Store) {
        let mut model = MarketModel::new(&market_store).unwrap();
        model
            .override_parameter("averageMC", Table::vector("id", [("coal", 30.0), ("wind", 1.0)]))
            .unwrap();
        let supply = model.supply(&array![30.0, 30.0]).unwrap();
        assert_approx_eq!(f64, supply[0], 50.0 + 10.0, epsilon = 1e-9);

        // Per-hour marginal costs
        let per_hour = Table::from_entries(
            &["id", "h"],
            [
                (key(&["coal", "1"]), 30.0),
                (key(&["coal", "2"]), 10.0),
                (key(&["wind", "1"]), 1.0),
                (key(&["wind", "2"]), 1.0),
            ],
        )
        .unwrap();
        model.set_average_mc(per_hour).unwrap();
        let supply = model.supply(&array![30.0, 30.0]).unwrap();
        assert_approx_eq!(f64, supply[0], 50.0 + 10.0, epsilon = 1e-9);
        assert_approx_eq!(f64, supply[1], 140.0, epsilon = 1e-9);
    }

    #[rstest]
    fn test_override_demand_by_consumer(market_store: Store) {
        let mut model = MarketModel::new(&market_store).unwrap();
        let demand = Table::from_entries(
            &["c", "h"],
            [(key(&["households", "1"]), 10.0), (key(&["households", "2"]), 20.0)],
        )
        .unwrap();
        model.set_hourly_demand_c(demand).unwrap();
        assert_approx_eq!(f64, model.demand().get(&key(&["2"])).unwrap(), 20.0);
    }

    #[rstest]
    #[case("Demand")]
    #[case("H")]
    #[case("id2h")]
    fn test_read_only(market_store: Store, #[case] name: &str) {
        let mut model = MarketModel::new(&market_store).unwrap();
        let before = model.parameters().clone();
        assert_error!(
            model.override_parameter(name, Table::vector("h", [("1", 1.0)])),
            format!("{name} is read-only and derived from the data")
        );
        assert_eq!(model.parameters(), &before);
        assert_eq!(model.id2h().len(), 4);
    }

    #[rstest]
    fn test_invalid_override_leaves_model_unchanged(market_store: Store) {
        let mut model = MarketModel::new(&market_store).unwrap();
        let before = model.parameters().clone();
        assert!(
            model
                .set_hourly_generating_capacity(Table::vector("id", [("coal", 1.0)]))
                .is_err()
        );
        assert_eq!(model.parameters(), &before);
    }

    #[rstest]
    fn test_average_mc_fixed_when_estimated(market_store: Store) {
        let mut model = MarketModel::with_settings(
            &market_store,
            Settings::default(),
            MarginalCostMode::Estimated,
        )
        .unwrap();
        let before = model.parameters().clone();
        let value = Table::vector("id", [("coal", 50.0), ("wind", 50.0)]);
        assert_error!(
            model.set_average_mc(value.clone()),
            "averageMC cannot be overridden while 'OtherMC' is estimated"
        );
        assert_error!(
            model.override_parameter("averageMC", value),
            "averageMC cannot be overridden while 'OtherMC' is estimated"
        );
        assert_eq!(model.parameters(), &before);

        // Fuel costs still feed into the estimated marginal costs
        model
            .set_fuel_cost(Table::vector("BFt", [("Coal", 8.0)]))
            .unwrap();
    }

    #[rstest]
    fn test_invalid_sigma(mut market_store: Store) {
        market_store.set(SIGMA_L, 0.0);
        assert_error!(
            MarketModel::new(&market_store),
            "'sigma_L' must be greater than zero"
        );
    }

    #[rstest]
    fn test_wrong_vector_length(market_store: Store) {
        let model = MarketModel::new(&market_store).unwrap();
        assert_error!(
            model.supply(&array![1.0]),
            "Expected a vector of length 2, got 1"
        );
    }

    #[test]
    fn test_normal_distribution() {
        assert_approx_eq!(f64, normal_cdf(0.0), 0.5);
        assert_approx_eq!(f64, normal_cdf(1.96), 0.975, epsilon = 1e-4);
        assert_approx_eq!(f64, normal_cdf(-40.0), 0.0);
        assert_approx_eq!(f64, normal_pdf(0.0), 0.398_942_280_401_432_7, epsilon = 1e-15);
    }
}
