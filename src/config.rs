use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fancoil::PollTiming;
use crate::transport::{DEFAULT_PORT, Endpoint};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("port must not be 0")]
    InvalidPort,

    #[error("unit id must not be 0")]
    InvalidUnitId,

    #[error("poll interval must be at least one second")]
    InvalidPollInterval,
}

/// One fan-coil unit as configured by the host application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FancoilConfig {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub unit_id: u8,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Connect and exchange timeout of the bus connection. Hosts are shared
    /// per endpoint, so this belongs to the registry: build it with
    /// `HostRegistry::tcp(config.timeout())`.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

/// Auxiliary BCD temperature input register on the same unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub name: String,
    pub register: u16,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_step_delay_ms() -> u64 {
    250
}

fn default_settle_delay_ms() -> u64 {
    300
}

impl FancoilConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyField("name"));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyField("host"));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.unit_id == 0 {
            return Err(ConfigError::InvalidUnitId);
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        if self.sensors.iter().any(|s| s.name.trim().is_empty()) {
            return Err(ConfigError::EmptyField("sensor name"));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    /// How often the host scheduler should refresh this unit.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_timing(&self) -> PollTiming {
        PollTiming {
            step_delay: Duration::from_millis(self.step_delay_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
        }
    }
}
