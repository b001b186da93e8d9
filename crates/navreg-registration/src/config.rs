//! Registration run configuration.

use serde::{Deserialize, Serialize};

use crate::error::{RegistrationError, Result};
use crate::model::{ModelKind, NavierConfig};
use crate::timestep::TimeStepConfig;
use crate::validation::{validate_iterations, validate_positive, validate_range};

/// Settings of a multi-resolution registration run.
///
/// Serializable so runs can be described in JSON; every field has a
/// default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Number of pyramid levels used by
    /// [`run_configured`](crate::MultiResolutionRegistration::run_configured).
    pub levels: usize,
    /// Smallest extent of a coarse level along any axis.
    pub start_size: usize,
    /// Outer iteration cap per level.
    pub max_iterations: usize,
    /// A level converges once `cost / initial cost` drops to this value.
    pub outer_epsilon: f64,
    /// The step grows when one iteration scales the cost below this ratio.
    pub increase_ratio: f64,
    pub model: ModelKind,
    pub navier: NavierConfig,
    pub time_step: TimeStepConfig,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            levels: 3,
            start_size: 16,
            max_iterations: 200,
            outer_epsilon: 1.0e-4,
            increase_ratio: 0.9,
            model: ModelKind::Fluid,
            navier: NavierConfig::default(),
            time_step: TimeStepConfig::default(),
        }
    }
}

impl RegistrationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_levels(mut self, levels: usize) -> Self {
        self.levels = levels;
        self
    }

    pub fn with_start_size(mut self, start_size: usize) -> Self {
        self.start_size = start_size;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_outer_epsilon(mut self, outer_epsilon: f64) -> Self {
        self.outer_epsilon = outer_epsilon;
        self
    }

    pub fn with_model(mut self, model: ModelKind, navier: NavierConfig) -> Self {
        self.model = model;
        self.navier = navier;
        self
    }

    pub fn with_time_step(mut self, time_step: TimeStepConfig) -> Self {
        self.time_step = time_step;
        self
    }

    /// Check all settings, including the nested model and time step.
    pub fn validate(&self) -> Result<()> {
        validate_iterations("levels", self.levels, 1, 16)?;
        if self.start_size < 2 {
            return Err(RegistrationError::invalid_configuration(format!(
                "start size must be at least 2, got {}",
                self.start_size
            )));
        }
        validate_iterations("max iterations", self.max_iterations, 1, 1_000_000)?;
        validate_positive("outer epsilon", self.outer_epsilon)?;
        validate_range("outer epsilon", self.outer_epsilon, 0.0, 1.0)?;
        validate_range("increase ratio", self.increase_ratio, 0.0, 1.0)?;
        self.navier.validate()?;
        self.time_step.validate()
    }
}
