//! Runtime Settings
//!
//! Every field has a default, so an empty or partial YAML file is valid.
//!
//! ```yaml
//! engine:
//!   ordering: topological
//! notifications:
//!   capacity: 100
//!   throttle_window_ms: 2000
//! monitoring:
//!   execution_timeout_secs: 600
//! ```

use std::fs;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workflow::OrderingMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineConfig,
    pub notifications: HubConfig,
    pub monitoring: MonitorConfig,
}

impl Settings {
    /// Loads settings from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub ordering: OrderingMode,

    /// Events a slow subscriber may fall behind before it starts losing them
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ordering: OrderingMode::Declaration,
            event_capacity: 1024,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct HubConfig {
    /// Nominal store size; persistent notifications may exceed it
    pub capacity: usize,
    pub throttle_window_ms: u64,
    pub success_ttl_ms: u64,
    pub max_age_secs: u64,
}

impl HubConfig {
    pub fn throttle_window(&self) -> Duration {
        Duration::milliseconds(self.throttle_window_ms as i64)
    }

    pub fn success_ttl(&self) -> Duration {
        Duration::milliseconds(self.success_ttl_ms as i64)
    }

    pub fn max_age(&self) -> Duration {
        Duration::seconds(self.max_age_secs as i64)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            throttle_window_ms: 5000,
            success_ttl_ms: 10_000,
            max_age_secs: 86_400,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub execution_timeout_secs: u64,

    /// Memory usage ratio (0.0 - 1.0) above which a resource alert is raised
    pub resource_threshold: f64,

    /// Share of finished executions that failed above which health degrades
    pub degraded_failure_ratio: f64,
}

impl MonitorConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::seconds(self.execution_timeout_secs as i64)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            execution_timeout_secs: 300,
            resource_threshold: 0.9,
            degraded_failure_ratio: 0.5,
        }
    }
}
