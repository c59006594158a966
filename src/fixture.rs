//! Fixtures for tests

use crate::id::key;
use crate::store::{LabelSet, Store, Table};
use rstest::fixture;

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

/// A two-hour market with a coal plant, a wind farm and two consumer groups.
///
/// Derived values:
///
/// * hourly capacity: coal 100 in both hours, wind 10 in hour 1 and 40 in hour 2
/// * demand: 80 in hour 1, 120 in hour 2
/// * fuel cost of coal: 2 + 0.1 * 50 = 7
/// * average marginal cost: coal 3 + 2 * 7 = 17, wind 1
#[fixture]
pub fn market_store() -> Store {
    let mut store = Store::new();
    store.set("h", LabelSet::from_labels("h", ["1", "2"]));
    store.set(
        "GeneratingCapacity",
        Table::vector("id", [("coal", 100.0), ("wind", 50.0)]),
    );

    let mut profiles = LabelSet::new(&["id", "hvt"]);
    profiles.insert(key(&["coal", "base"])).unwrap();
    profiles.insert(key(&["wind", "wind"])).unwrap();
    store.set("id2hvt", profiles);

    store.set(
        "CapVariation",
        Table::from_entries(
            &["h", "hvt"],
            [
                (key(&["1", "base"]), 1.0),
                (key(&["2", "base"]), 1.0),
                (key(&["1", "wind"]), 0.2),
                (key(&["2", "wind"]), 0.8),
            ],
        )
        .unwrap(),
    );
    store.set(
        "Load",
        Table::vector("c", [("households", 80.0), ("industry", 40.0)]),
    );
    store.set(
        "LoadVariation",
        Table::from_entries(
            &["c", "h"],
            [
                (key(&["households", "1"]), 0.5),
                (key(&["households", "2"]), 1.0),
                (key(&["industry", "1"]), 1.0),
                (key(&["industry", "2"]), 1.0),
            ],
        )
        .unwrap(),
    );
    store.set("FuelPrice", Table::vector("BFt", [("Coal", 2.0)]));
    store.set(
        "EmissionIntensity",
        Table::from_entries(&["BFt", "EmissionType"], [(key(&["Coal", "CO2"]), 0.1)]).unwrap(),
    );
    store.set("EmissionTax", Table::vector("EmissionType", [("CO2", 50.0)]));
    store.set(
        "OtherMC",
        Table::vector("id", [("coal", 3.0), ("wind", 1.0)]),
    );
    store.set(
        "FuelMix",
        Table::from_entries(&["id", "BFt"], [(key(&["coal", "Coal"]), 2.0)]).unwrap(),
    );
    store.set("meanMWP", 40.0);

    store
}

/// A single hour with one generator (capacity 100, marginal cost 20) and demand of 100 with a
/// mean willingness to pay of 25. Both smoothing parameters are 2, so the clearing price is 22.5.
#[fixture]
pub fn single_hour_store() -> Store {
    let mut store = Store::new();
    store.set("h", LabelSet::from_labels("h", ["1"]));
    store.set("GeneratingCapacity", Table::vector("id", [("g1", 100.0)]));

    let mut profiles = LabelSet::new(&["id", "hvt"]);
    profiles.insert(key(&["g1", "base"])).unwrap();
    store.set("id2hvt", profiles);

    store.set(
        "CapVariation",
        Table::from_entries(&["h", "hvt"], [(key(&["1", "base"]), 1.0)]).unwrap(),
    );
    store.set("Load", Table::vector("c", [("all", 100.0)]));
    store.set(
        "LoadVariation",
        Table::from_entries(&["c", "h"], [(key(&["all", "1"]), 1.0)]).unwrap(),
    );
    store.set("FuelPrice", Table::vector("BFt", [("Gas", 0.0)]));
    store.set(
        "EmissionIntensity",
        Table::from_entries(&["BFt", "EmissionType"], [(key(&["Gas", "CO2"]), 0.0)]).unwrap(),
    );
    store.set("EmissionTax", Table::vector("EmissionType", [("CO2", 0.0)]));
    store.set("OtherMC", Table::vector("id", [("g1", 20.0)]));
    store.set("FuelMix", Table::new(&["id", "BFt"]));
    store.set("meanMWP", 25.0);
    store.set("sigma_E", 2.0);
    store.set("sigma_L", 2.0);
    store.set("p", Table::vector("h", [("1", 20.0)]));

    store
}
