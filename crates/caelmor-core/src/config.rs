//! Configuration loading and typed config structures for the Caelmor server.
//!
//! The canonical configuration lives in `caelmor-config.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure and a loader that reads, overrides, and validates the file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::clock::{MAX_TICK_RATE_HZ, MIN_TICK_RATE_HZ};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is out of range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level server configuration.
///
/// Mirrors the structure of `caelmor-config.yaml`. Every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// Process-level settings (name, tick rate, bounds).
    #[serde(default)]
    pub server: ServerSection,

    /// Simulation behavior.
    #[serde(default)]
    pub simulation: SimulationSection,

    /// Save storage.
    #[serde(default)]
    pub persistence: PersistenceSection,

    /// Snapshot delivery.
    #[serde(default)]
    pub replication: ReplicationSection,

    /// Logging output.
    #[serde(default)]
    pub logging: LoggingSection,
}

impl ServerConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `CAELMOR_STORE_PATH` overrides `persistence.store_path`
    /// - `CAELMOR_TICK_RATE_HZ` overrides `server.tick_rate_hz`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, and
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, applying environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] or [`ConfigError::Invalid`].
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override values with environment variables when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `CAELMOR_TICK_RATE_HZ` is not a
    /// number.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("CAELMOR_STORE_PATH") {
            self.persistence.store_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("CAELMOR_TICK_RATE_HZ") {
            self.server.tick_rate_hz = val.parse().map_err(|_err| ConfigError::Invalid {
                reason: format!("CAELMOR_TICK_RATE_HZ is not a number: {val}"),
            })?;
        }
        Ok(())
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let hz = self.server.tick_rate_hz;
        if !(MIN_TICK_RATE_HZ..=MAX_TICK_RATE_HZ).contains(&hz) {
            return Err(ConfigError::Invalid {
                reason: format!("server.tick_rate_hz must be 1..=1000, got {hz}"),
            });
        }
        if self.replication.broadcast_capacity == 0 {
            return Err(ConfigError::Invalid {
                reason: "replication.broadcast_capacity must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

/// Process-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSection {
    /// Human-readable server name.
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Fixed tick rate in Hz.
    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: u32,

    /// Stop after this many ticks (0 = unlimited).
    #[serde(default)]
    pub max_ticks: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            tick_rate_hz: default_tick_rate_hz(),
            max_ticks: 0,
        }
    }
}

/// Simulation behavior.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimulationSection {
    /// Execute every tick twice and compare the staged results.
    #[serde(default)]
    pub verify_determinism: bool,

    /// Seed for the reference decision source.
    #[serde(default = "default_world_seed")]
    pub world_seed: u64,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            verify_determinism: false,
            world_seed: default_world_seed(),
        }
    }
}

/// Save storage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PersistenceSection {
    /// Location of the JSON save file.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Attempt a save every N committed ticks (0 = never).
    #[serde(default = "default_autosave_interval_ticks")]
    pub autosave_interval_ticks: u64,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            autosave_interval_ticks: default_autosave_interval_ticks(),
        }
    }
}

/// Snapshot delivery.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReplicationSection {
    /// Capacity of the snapshot broadcast channel.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl Default for ReplicationSection {
    fn default() -> Self {
        Self {
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

/// Logging output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_server_name() -> String {
    "caelmor".to_owned()
}

const fn default_tick_rate_hz() -> u32 {
    10
}

const fn default_world_seed() -> u64 {
    42
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/caelmor-save.json")
}

const fn default_autosave_interval_ticks() -> u64 {
    600
}

const fn default_broadcast_capacity() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_owned()
}
