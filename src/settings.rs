//! Code for loading solver and model settings.
use crate::log::DEFAULT_LOG_LEVEL;
use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

macro_rules! define_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            $value
        }
    };
}

define_param_default!(default_log_level, String, DEFAULT_LOG_LEVEL.to_string());
define_param_default!(default_sigma, f64, 2.0);
define_param_default!(default_initial_price, f64, 0.0);
define_param_default!(default_residual_tolerance, f64, 1e-9);
define_param_default!(default_step_tolerance, f64, 1.49012e-8);
define_param_default!(default_initial_step_bound, f64, 100.0);
define_param_default!(default_max_iterations, u32, 100);
define_param_default!(default_optimality_tolerance, f64, 1e-6);
define_param_default!(default_constraint_tolerance, f64, 1e-8);

/// Read a TOML file at the specified path.
///
/// # Arguments
///
/// * `file_path` - Path to the TOML file
///
/// # Returns
///
/// * The deserialised TOML data or an error if the file could not be read or parsed.
pub fn read_toml<T: DeserializeOwned>(file_path: &Path) -> Result<T> {
    let toml_str = fs::read_to_string(file_path)
        .with_context(|| format!("Could not read {}", file_path.display()))?;
    let toml_data = toml::from_str(&toml_str)
        .with_context(|| format!("Could not parse {}", file_path.display()))?;
    Ok(toml_data)
}

/// Settings for the market model and its solvers
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// The default program log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Supply smoothing parameter used when the data does not provide `sigma_E`
    #[serde(default = "default_sigma")]
    pub default_sigma_e: f64,
    /// Load smoothing parameter used when the data does not provide `sigma_L`
    #[serde(default = "default_sigma")]
    pub default_sigma_l: f64,
    /// Price used for every hour when the data does not provide `p`
    #[serde(default = "default_initial_price")]
    pub initial_price: f64,
    /// Largest absolute excess demand accepted as an equilibrium
    #[serde(default = "default_residual_tolerance")]
    pub residual_tolerance: f64,
    /// Relative step size below which the root finder gives up
    #[serde(default = "default_step_tolerance")]
    pub step_tolerance: f64,
    /// Factor for the initial trust region of the root finder
    #[serde(default = "default_initial_step_bound")]
    pub initial_step_bound: f64,
    /// Maximum number of excess demand evaluations when solving for equilibrium.
    ///
    /// If unset, `200 * (H + 1)` is used.
    #[serde(default)]
    pub max_evaluations: Option<u32>,
    /// Maximum number of iterations of the estimator
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Step size tolerance for the estimator
    #[serde(default = "default_optimality_tolerance")]
    pub optimality_tolerance: f64,
    /// Largest absolute constraint violation accepted by the estimator
    #[serde(default = "default_constraint_tolerance")]
    pub constraint_tolerance: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            default_sigma_e: default_sigma(),
            default_sigma_l: default_sigma(),
            initial_price: default_initial_price(),
            residual_tolerance: default_residual_tolerance(),
            step_tolerance: default_step_tolerance(),
            initial_step_bound: default_initial_step_bound(),
            max_evaluations: None,
            max_iterations: default_max_iterations(),
            optimality_tolerance: default_optimality_tolerance(),
            constraint_tolerance: default_constraint_tolerance(),
        }
    }
}

/// Check that a value is finite and strictly positive
fn check_positive(value: f64, name: &str) -> Result<()> {
    ensure!(
        value.is_finite() && value > 0.0,
        "{name} must be a finite number greater than zero"
    );

    Ok(())
}

impl Settings {
    /// Read settings from a TOML file.
    ///
    /// Missing fields take their default values.
    pub fn from_path(file_path: &Path) -> Result<Settings> {
        let settings: Settings = read_toml(file_path)?;
        settings
            .validate()
            .with_context(|| format!("Invalid settings in {}", file_path.display()))?;

        Ok(settings)
    }

    /// Read settings from a TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Settings> {
        let settings: Settings = toml::from_str(toml_str).context("Could not parse settings")?;
        settings.validate()?;

        Ok(settings)
    }

    /// Validate parameters after reading
    pub fn validate(&self) -> Result<()> {
        check_positive(self.default_sigma_e, "default_sigma_e")?;
        check_positive(self.default_sigma_l, "default_sigma_l")?;
        ensure!(
            self.initial_price.is_finite(),
            "initial_price must be a finite number"
        );
        check_positive(self.residual_tolerance, "residual_tolerance")?;
        check_positive(self.step_tolerance, "step_tolerance")?;
        check_positive(self.initial_step_bound, "initial_step_bound")?;
        if let Some(max_evaluations) = self.max_evaluations {
            ensure!(max_evaluations > 0, "max_evaluations cannot be zero");
        }
        ensure!(self.max_iterations > 0, "max_iterations cannot be zero");
        check_positive(self.optimality_tolerance, "optimality_tolerance")?;
        check_positive(self.constraint_tolerance, "constraint_tolerance")?;

        Ok(())
    }
}
