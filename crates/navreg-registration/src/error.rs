//! Error types for registration operations.
//!
//! Configuration problems (bad descriptors, parameters out of range,
//! missing capabilities) and usage errors (evaluation before the grid size
//! is set, mismatched grids) are reported here. Numerical trouble inside the
//! solvers is not an error: it is logged and reflected in the solver and
//! level reports.

use navreg_core::GridSize;
use thiserror::Error;

/// Main error type for registration operations.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A component lacks a capability the chosen strategy needs.
    #[error("Missing capability: {0}")]
    MissingCapability(String),

    /// A stateful component was used before being sized or loaded.
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// Two grids that must agree do not.
    #[error("Size mismatch: expected {expected:?}, got {actual:?}")]
    SizeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A `name:key=value,...` descriptor could not be parsed or resolved.
    #[error("Descriptor error: {0}")]
    Descriptor(String),

    /// A cost term failed to evaluate.
    #[error("Cost error: {0}")]
    CostError(String),
}

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;

impl RegistrationError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a missing capability error.
    pub fn missing_capability(msg: impl Into<String>) -> Self {
        Self::MissingCapability(msg.into())
    }

    /// Create a not initialized error.
    pub fn not_initialized(msg: impl Into<String>) -> Self {
        Self::NotInitialized(msg.into())
    }

    /// Create a descriptor error.
    pub fn descriptor(msg: impl Into<String>) -> Self {
        Self::Descriptor(msg.into())
    }

    /// Create a cost error.
    pub fn cost(msg: impl Into<String>) -> Self {
        Self::CostError(msg.into())
    }

    /// Create a size mismatch error from two grids.
    pub fn size_mismatch<const D: usize>(expected: GridSize<D>, actual: GridSize<D>) -> Self {
        Self::SizeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Whether the error stems from how the engine was configured rather
    /// than from the data it was run on.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration(_) | Self::MissingCapability(_) | Self::Descriptor(_)
        )
    }
}
