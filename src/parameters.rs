//! Derived technology and demand parameters.
//!
//! These are computed once from the raw store entries when a model is created. Some of them may
//! be overridden afterwards for scenario analysis; the others (`Demand`, `H` and `id2h`) are
//! always derived from the data.
use crate::store::{LabelSet, Store, Table};
use anyhow::{Context, Result, bail, ensure};
use strum::{EnumString, IntoStaticStr};

/// Dimension: hours
pub const HOUR: &str = "h";
/// Dimension: generation units
pub const UNIT: &str = "id";
/// Dimension: technology-hour profiles
pub const PROFILE: &str = "hvt";
/// Dimension: fuel types
pub const FUEL: &str = "BFt";
/// Dimension: emission types
pub const EMISSION: &str = "EmissionType";

/// Store entry: installed capacity per unit
pub const GENERATING_CAPACITY: &str = "GeneratingCapacity";
/// Store entry: mapping from unit to its profile
pub const UNIT_PROFILE: &str = "id2hvt";
/// Store entry: hourly capacity variation per profile
pub const CAP_VARIATION: &str = "CapVariation";
/// Store entry: base load per consumer group
pub const LOAD: &str = "Load";
/// Store entry: hourly load variation per consumer group
pub const LOAD_VARIATION: &str = "LoadVariation";
/// Store entry: fuel prices
pub const FUEL_PRICE: &str = "FuelPrice";
/// Store entry: emissions per unit of fuel
pub const EMISSION_INTENSITY: &str = "EmissionIntensity";
/// Store entry: tax per unit of emissions
pub const EMISSION_TAX: &str = "EmissionTax";
/// Store entry: marginal costs other than fuel
pub const OTHER_MC: &str = "OtherMC";
/// Store entry: fuel use per unit of output
pub const FUEL_MIX: &str = "FuelMix";

/// Quantities which are always derived from the data and can never be assigned
pub const READ_ONLY: [&str; 3] = ["Demand", "H", "id2h"];

/// Derived parameters which may be overridden for scenario analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
pub enum DerivedParameter {
    /// Capacity per `(id, h)`
    #[strum(serialize = "hourlyGeneratingCapacity")]
    HourlyGeneratingCapacity,
    /// Demand per `(c, h)`
    #[strum(serialize = "hourlyDemand_c")]
    HourlyDemandByConsumer,
    /// Marginal fuel cost per fuel type
    #[strum(serialize = "fuelCost")]
    FuelCost,
    /// Average marginal generation cost
    #[strum(serialize = "averageMC")]
    AverageMC,
}

impl DerivedParameter {
    /// Parse a parameter name, rejecting read-only quantities with a dedicated message
    pub fn from_name(name: &str) -> Result<Self> {
        if READ_ONLY.contains(&name) {
            bail!("{name} is read-only and derived from the data");
        }

        name.parse()
            .with_context(|| format!("'{name}' is not an overridable parameter"))
    }
}

/// Parameters derived from the raw store entries
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    hourly_generating_capacity: Table,
    id2h: LabelSet,
    hourly_demand_c: Table,
    demand: Table,
    fuel_cost: Table,
    fuel_component: Table,
    average_mc: Table,
}

/// Capacity per `(id, h)`: base capacity broadcast onto each unit's profile, times the profile's
/// hourly variation
pub fn hourly_generating_capacity(store: &Store) -> Result<Table> {
    let capacity = store.broadcast(GENERATING_CAPACITY, UNIT_PROFILE)?;
    capacity
        .mul(store.table(CAP_VARIATION)?)
        .drop_nan()
        .drop_dim(PROFILE)
        .context("Cannot derive hourly generating capacity")
}

/// Demand per `(c, h)`: hourly load variation times base load
pub fn hourly_demand_c(store: &Store) -> Result<Table> {
    Ok(store.table(LOAD_VARIATION)?.mul(store.table(LOAD)?))
}

/// Demand per hour, summed over consumers
pub fn demand(hourly_demand_c: &Table) -> Result<Table> {
    hourly_demand_c
        .group_sum(&[HOUR])
        .context("Cannot derive demand")
}

/// Marginal fuel cost: fuel price plus the cost of taxed emissions
pub fn fuel_cost(store: &Store) -> Result<Table> {
    let emission_cost = store
        .table(EMISSION_INTENSITY)?
        .mul(store.table(EMISSION_TAX)?)
        .sum_over(EMISSION)?;
    store
        .table(FUEL_PRICE)?
        .add_with_fill(&emission_cost, 0.0)
        .context("Cannot derive fuel cost")
}

/// Fuel-mix-weighted fuel cost per unit
pub fn fuel_component(store: &Store, fuel_cost: &Table) -> Result<Table> {
    store
        .table(FUEL_MIX)?
        .mul(fuel_cost)
        .drop_nan()
        .sum_over(FUEL)
}

/// Average marginal cost: non-fuel marginal cost plus the fuel component
pub fn average_mc(other_mc: &Table, fuel_component: &Table) -> Result<Table> {
    other_mc
        .add_with_fill(fuel_component, 0.0)
        .context("Cannot derive average marginal cost")
}

/// Check a table has exactly the given dimensions, in any order
fn check_dims(table: &Table, expected: &[&str], what: &str) -> Result<()> {
    ensure!(
        table.dims().len() == expected.len()
            && expected
                .iter()
                .all(|dim| table.dims().iter().any(|d| d.as_str() == *dim)),
        "{what} must have dimensions [{}], got [{}]",
        expected.join(", "),
        table.dims().join(", ")
    );

    Ok(())
}

/// The `(id, h)` pairs with generating capacity
fn id2h_from(capacity: &Table) -> Result<LabelSet> {
    let mut id2h = LabelSet::new(capacity.dims());
    for key in capacity.keys() {
        id2h.insert(key.clone())?;
    }

    Ok(id2h)
}

impl Parameters {
    /// Derive all parameters from the store
    pub fn from_store(store: &Store) -> Result<Self> {
        let hourly_generating_capacity = hourly_generating_capacity(store)?;
        check_dims(
            &hourly_generating_capacity,
            &[UNIT, HOUR],
            "Hourly generating capacity",
        )?;
        let id2h = id2h_from(&hourly_generating_capacity)?;
        let hourly_demand_c = hourly_demand_c(store)?;
        let demand = demand(&hourly_demand_c)?;
        let fuel_cost = fuel_cost(store)?;
        let fuel_component = fuel_component(store, &fuel_cost)?;
        let average_mc = average_mc(store.table(OTHER_MC)?, &fuel_component)?;

        Ok(Self {
            hourly_generating_capacity,
            id2h,
            hourly_demand_c,
            demand,
            fuel_cost,
            fuel_component,
            average_mc,
        })
    }

    /// Hourly generating capacity per `(id, h)`
    pub fn hourly_generating_capacity(&self) -> &Table {
        &self.hourly_generating_capacity
    }

    /// The `(id, h)` pairs with generating capacity
    pub fn id2h(&self) -> &LabelSet {
        &self.id2h
    }

    /// Hourly demand per consumer
    pub fn hourly_demand_c(&self) -> &Table {
        &self.hourly_demand_c
    }

    /// Hourly demand
    pub fn demand(&self) -> &Table {
        &self.demand
    }

    /// Marginal fuel cost per fuel type
    pub fn fuel_cost(&self) -> &Table {
        &self.fuel_cost
    }

    /// Fuel-mix-weighted fuel cost per unit
    pub fn fuel_component(&self) -> &Table {
        &self.fuel_component
    }

    /// Average marginal cost
    pub fn average_mc(&self) -> &Table {
        &self.average_mc
    }

    /// Override a derived parameter, re-deriving whatever depends on it.
    ///
    /// Nothing is changed if the new value is invalid.
    pub fn set(&mut self, parameter: DerivedParameter, value: Table, store: &Store) -> Result<()> {
        match parameter {
            DerivedParameter::HourlyGeneratingCapacity => {
                check_dims(&value, &[UNIT, HOUR], "Hourly generating capacity")?;
                self.id2h = id2h_from(&value)?;
                self.hourly_generating_capacity = value;
            }
            DerivedParameter::HourlyDemandByConsumer => {
                self.demand = demand(&value)?;
                self.hourly_demand_c = value;
            }
            DerivedParameter::FuelCost => {
                let fuel_component = fuel_component(store, &value)?;
                self.average_mc = average_mc(store.table(OTHER_MC)?, &fuel_component)?;
                self.fuel_component = fuel_component;
                self.fuel_cost = value;
            }
            DerivedParameter::AverageMC => {
                ensure!(
                    value.dim_position(UNIT).is_some(),
                    "Average marginal cost must have an '{UNIT}' dimension"
                );
                self.average_mc = value;
            }
        }

        Ok(())
    }
}
