//! Query service configuration
//!
//! Limits and timings shared by every collection. All fields are optional in
//! the JSON form and fall back to their defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        "QINDEX_CONFIG_INVALID"
    }
}

/// Query limits and live-query timings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Upper bound applied to every requested limit (default: 50)
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Delay between poll attempts of a wait-for session (default: 5000)
    #[serde(default = "default_poll_retry_delay_ms")]
    pub poll_retry_delay_ms: u64,

    /// Minimum age of index metadata before it is re-read (default: 3600)
    #[serde(default = "default_index_refresh_interval_secs")]
    pub index_refresh_interval_secs: u64,

    /// Timeout used when a request carries none; 0 executes once (default: 0)
    #[serde(default)]
    pub default_wait_timeout_ms: u64,
}

fn default_max_limit() -> usize {
    50
}

fn default_poll_retry_delay_ms() -> u64 {
    5000
}

fn default_index_refresh_interval_secs() -> u64 {
    3600
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_limit: default_max_limit(),
            poll_retry_delay_ms: default_poll_retry_delay_ms(),
            index_refresh_interval_secs: default_index_refresh_interval_secs(),
            default_wait_timeout_ms: 0,
        }
    }
}

impl QueryConfig {
    /// Loads and validates a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: QueryConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_limit == 0 {
            return Err(ConfigError::Invalid("max_limit must be positive".into()));
        }
        Ok(())
    }

    pub fn with_poll_retry_delay(mut self, delay: Duration) -> Self {
        self.poll_retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_index_refresh_interval(mut self, interval: Duration) -> Self {
        self.index_refresh_interval_secs = interval.as_secs();
        self
    }

    pub fn poll_retry_delay(&self) -> Duration {
        Duration::from_millis(self.poll_retry_delay_ms)
    }

    pub fn index_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.index_refresh_interval_secs)
    }

    /// Applies the configured maximum to a requested limit; absent or zero
    /// means the maximum.
    pub fn clamp_limit(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(n) if n > 0 => n.min(self.max_limit),
            _ => self.max_limit,
        }
    }
}
