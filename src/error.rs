//! Error types for configuring and starting the gate.
//!
//! Admission itself never fails; these only surface at startup.
use std::time::Duration;

/// Invalid or missing limiter configuration. Fatal at startup.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Capacity must be > 0.
    #[error("capacity must be > 0 (got {provided})")]
    InvalidCapacity {
        /// Value provided by caller.
        provided: i64,
    },
    /// Window must be > 0 and no longer than [`crate::config::MAX_WINDOW`].
    #[error("window must be > 0 and at most one year (got {0:?})")]
    InvalidWindow(Duration),
    /// A required environment variable is not set.
    #[error("environment variable {name} is not set")]
    MissingVar {
        /// Variable name.
        name: &'static str,
    },
    /// An environment variable could not be parsed.
    #[error("environment variable {name} has invalid value {value:?}")]
    InvalidVar {
        /// Variable name.
        name: &'static str,
        /// Raw value found.
        value: String,
    },
}

/// Errors from starting the limiter or its refill scheduler.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    /// The refill scheduler must be spawned from within a tokio runtime.
    #[error("refill scheduler requires a running tokio runtime")]
    NoRuntime,
    /// Configuration was rejected before anything started.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
