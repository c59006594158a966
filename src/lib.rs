//! A smooth electricity market model.
//!
//! Named model data lives in a labelled [`Store`](store::Store). A [`MarketModel`](market::MarketModel)
//! derives generator and consumer parameters from it and evaluates smooth supply, load and excess
//! demand per hour. Market-clearing prices are found with
//! [`MarketModel::solve_equilibrium`](market::MarketModel::solve_equilibrium) and unknown
//! parameters can be fitted to observed prices with an [`Estimator`](estimation::Estimator).
#![warn(missing_docs)]
pub mod equilibrium;
pub mod estimation;
pub mod id;
pub mod log;
pub mod market;
pub mod parameters;
pub mod registry;
pub mod settings;
pub mod solver;
pub mod store;

#[cfg(test)]
mod fixture;
