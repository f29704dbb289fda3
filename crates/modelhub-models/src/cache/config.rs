//! Configuration for model caching.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration for the model cache and its evictor.
///
/// The sweep max age and the evictor interval are independent: by default the
/// evictor fires hourly and evicts models idle for more than 45 minutes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Seconds a model may stay idle before a sweep evicts it (default: 2700 = 45 minutes).
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Minimum seconds between two sweeps that actually run (default: 300 = 5 minutes).
    #[serde(default = "default_sweep_min_interval_secs")]
    pub sweep_min_interval_secs: u64,

    /// How often the evictor fires in seconds (default: 3600 = 1 hour).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Seconds a single model load may take (default: 120).
    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: u64,

    /// Whether the background evictor is started.
    #[serde(default = "default_evictor_enabled")]
    pub evictor_enabled: bool,
}

fn default_max_age_secs() -> u64 {
    2700 // 45 minutes
}

fn default_sweep_min_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_sweep_interval_secs() -> u64 {
    3600 // 1 hour
}

fn default_load_timeout_secs() -> u64 {
    120
}

fn default_evictor_enabled() -> bool {
    true
}

/// Errors that can occur during cache configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheConfigError {
    /// Invalid sweep interval (must be > 0).
    #[error("Invalid sweep interval: must be greater than 0")]
    InvalidSweepInterval,

    /// Invalid load timeout (must be > 0).
    #[error("Invalid load timeout: must be greater than 0")]
    InvalidLoadTimeout,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age_secs(),
            sweep_min_interval_secs: default_sweep_min_interval_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            load_timeout_secs: default_load_timeout_secs(),
            evictor_enabled: default_evictor_enabled(),
        }
    }
}

impl CacheConfig {
    /// Validate the cache configuration.
    ///
    /// A zero max age and a zero minimum sweep interval are allowed: they
    /// mean "evict anything idle" and "never throttle".
    ///
    /// # Errors
    /// Returns `CacheConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), CacheConfigError> {
        if self.sweep_interval_secs == 0 {
            return Err(CacheConfigError::InvalidSweepInterval);
        }

        if self.load_timeout_secs == 0 {
            return Err(CacheConfigError::InvalidLoadTimeout);
        }

        Ok(())
    }

    /// Get the sweep max age as a Duration.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Get the sweep throttle interval as a Duration.
    #[must_use]
    pub fn sweep_min_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_min_interval_secs)
    }

    /// Get the evictor interval as a Duration.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Get the load timeout as a Duration.
    #[must_use]
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }
}
