//! Shared data for integration tests.
use smoothmarket::id::key;
use smoothmarket::store::{LabelSet, Store, Table};

/// Demand in each of the 16 hours
pub const DEMANDS: [f64; 16] = [
    15.0, 20.0, 25.0, 30.0, 35.0, 40.0, 45.0, 50.0, 70.0, 75.0, 80.0, 85.0, 90.0, 95.0, 100.0,
    105.0,
];

/// Hour labels, "1" to "16"
pub fn hour_labels() -> Vec<String> {
    (1..=DEMANDS.len()).map(|h| h.to_string()).collect()
}

/// A rough starting price for each hour: near the cheap unit's cost while it can cover demand
pub fn rough_prices() -> Vec<f64> {
    DEMANDS
        .iter()
        .map(|&d| if d <= 60.0 { 10.0 } else { 30.0 })
        .collect()
}

/// Two generators with capacity 60 each and marginal costs of 10 and 30, serving a single
/// consumer whose demand varies by hour. Both smoothing parameters are 2.
pub fn two_generator_store() -> Store {
    let hours = hour_labels();

    let mut store = Store::new();
    store.set("h", LabelSet::from_labels("h", hours.iter().map(String::as_str)));
    store.set(
        "GeneratingCapacity",
        Table::vector("id", [("cheap", 60.0), ("peak", 60.0)]),
    );

    let mut profiles = LabelSet::new(&["id", "hvt"]);
    profiles.insert(key(&["cheap", "base"])).unwrap();
    profiles.insert(key(&["peak", "base"])).unwrap();
    store.set("id2hvt", profiles);

    store.set(
        "CapVariation",
        Table::from_entries(
            &["h", "hvt"],
            hours.iter().map(|h| (key(&[h.as_str(), "base"]), 1.0)),
        )
        .unwrap(),
    );
    store.set("Load", Table::vector("c", [("all", 1.0)]));
    store.set(
        "LoadVariation",
        Table::from_entries(
            &["c", "h"],
            hours
                .iter()
                .zip(DEMANDS)
                .map(|(h, d)| (key(&["all", h.as_str()]), d)),
        )
        .unwrap(),
    );
    store.set("FuelPrice", Table::vector("BFt", [("Gas", 0.0)]));
    store.set(
        "EmissionIntensity",
        Table::from_entries(&["BFt", "EmissionType"], [(key(&["Gas", "CO2"]), 0.0)]).unwrap(),
    );
    store.set("EmissionTax", Table::vector("EmissionType", [("CO2", 0.0)]));
    store.set(
        "OtherMC",
        Table::vector("id", [("cheap", 10.0), ("peak", 30.0)]),
    );
    store.set("FuelMix", Table::new(&["id", "BFt"]));
    store.set("meanMWP", 60.0);
    store.set("sigma_E", 2.0);
    store.set("sigma_L", 2.0);

    store
}
