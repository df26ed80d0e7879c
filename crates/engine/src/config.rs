//! Engine configuration
//!
//! Defaults suit tests and embedded use; [`EngineConfig::from_env`] reads
//! overrides from `ARBOR_*` environment variables.

use serde::{Deserialize, Serialize};

/// Configuration shared by every run of a runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum work items a single run may execute (0 disables the limit)
    pub max_ticks_per_run: usize,

    /// Whether runs record an execution log in the workflow state
    pub record_execution_log: bool,

    /// Buffer size of broadcast notification channels
    pub broadcast_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_ticks_per_run: 100_000,
            record_execution_log: true,
            broadcast_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn with_max_ticks_per_run(mut self, max_ticks_per_run: usize) -> Self {
        self.max_ticks_per_run = max_ticks_per_run;
        self
    }

    pub fn with_execution_log(mut self, record: bool) -> Self {
        self.record_execution_log = record;
        self
    }

    pub fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `ARBOR_MAX_TICKS_PER_RUN`: work item budget per run (default: 100000, 0 = unlimited)
    /// - `ARBOR_RECORD_EXECUTION_LOG`: `true` or `false` (default: true)
    /// - `ARBOR_BROADCAST_CAPACITY`: notification buffer size (default: 256)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_ticks_per_run = match std::env::var("ARBOR_MAX_TICKS_PER_RUN") {
            Ok(value) => value.parse::<usize>().map_err(|_| {
                ConfigError::Invalid("ARBOR_MAX_TICKS_PER_RUN", "must be a non-negative integer")
            })?,
            Err(_) => defaults.max_ticks_per_run,
        };

        let record_execution_log = match std::env::var("ARBOR_RECORD_EXECUTION_LOG") {
            Ok(value) => value.parse::<bool>().map_err(|_| {
                ConfigError::Invalid("ARBOR_RECORD_EXECUTION_LOG", "must be true or false")
            })?,
            Err(_) => defaults.record_execution_log,
        };

        let broadcast_capacity = match std::env::var("ARBOR_BROADCAST_CAPACITY") {
            Ok(value) => match value.parse::<usize>() {
                Ok(capacity) if capacity > 0 => capacity,
                _ => {
                    return Err(ConfigError::Invalid(
                        "ARBOR_BROADCAST_CAPACITY",
                        "must be a positive integer",
                    ))
                }
            },
            Err(_) => defaults.broadcast_capacity,
        };

        Ok(Self {
            max_ticks_per_run,
            record_execution_log,
            broadcast_capacity,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
