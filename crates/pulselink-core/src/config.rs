//! Node configuration
//!
//! Every field has a default matching the shipped firmware, so a partial JSON
//! document (or none at all) yields a usable configuration.

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// Sensor poll cadence (DHT-class sensors cannot be read faster than ~2s)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
/// Pulse aggregation window
pub const DEFAULT_WINDOW_MS: u64 = 10_000;
/// Maximum number of buffered records
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
/// First reconnect delay, also the value restored after a successful connection
pub const DEFAULT_BACKOFF_FLOOR_MS: u64 = 1_000;
/// Upper bound for the reconnect delay
pub const DEFAULT_BACKOFF_CEILING_MS: u64 = 30_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Malformed configuration document")]
    Malformed,
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    pub sampling: SamplingConfig,
    pub queue: QueueConfig,
    pub backoff: BackoffConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct SamplingConfig {
    pub poll_interval_ms: u64,
    pub window_ms: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            window_ms: DEFAULT_WINDOW_MS,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct BackoffConfig {
    pub floor_ms: u64,
    pub ceiling_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            floor_ms: DEFAULT_BACKOFF_FLOOR_MS,
            ceiling_ms: DEFAULT_BACKOFF_CEILING_MS,
        }
    }
}

impl NodeConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = serde_json::from_str(text).map_err(|e| {
            log::error!("Config parse failed: {}", e);
            ConfigError::Malformed
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling.window_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "sampling.window_ms",
                reason: "must be greater than zero",
            });
        }
        if self.sampling.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "sampling.poll_interval_ms",
                reason: "must be greater than zero",
            });
        }
        if self.queue.capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "queue.capacity",
                reason: "must hold at least one record",
            });
        }
        if self.backoff.floor_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "backoff.floor_ms",
                reason: "must be greater than zero",
            });
        }
        if self.backoff.ceiling_ms < self.backoff.floor_ms {
            return Err(ConfigError::Invalid {
                field: "backoff.ceiling_ms",
                reason: "must not be below backoff.floor_ms",
            });
        }
        Ok(())
    }
}
