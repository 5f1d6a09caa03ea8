//! Engine configuration, read from `BPMN_MIGRATION_CONFIG` (YAML) with env
//! overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "BPMN_MIGRATION_CONFIG";
pub const PARTITIONS_ENV: &str = "BPMN_MIGRATION_PARTITIONS";
pub const TIMER_INTERVAL_ENV: &str = "BPMN_MIGRATION_TIMER_INTERVAL_MS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value '{value}' for {name}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_partitions")]
    pub partitions: u16,

    /// How often each partition looks for due timers.
    #[serde(default = "default_timer_check_interval_ms")]
    pub timer_check_interval_ms: u64,

    /// Directory whose `*.yaml` files are deployed on boot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definitions_dir: Option<PathBuf>,

    /// JSON-lines file of commands replayed on boot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_journal: Option<PathBuf>,
}

fn default_partitions() -> u16 {
    1
}

fn default_timer_check_interval_ms() -> u64 {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            timer_check_interval_ms: default_timer_check_interval_ms(),
            definitions_dir: None,
            command_journal: None,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// File named by `BPMN_MIGRATION_CONFIG` (defaults when unset), then env
    /// overrides, then validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides looked up through `var`.
    pub fn apply_overrides(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = var(PARTITIONS_ENV) {
            self.partitions = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: PARTITIONS_ENV,
                value,
            })?;
        }
        if let Some(value) = var(TIMER_INTERVAL_ENV) {
            self.timer_check_interval_ms =
                value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    name: TIMER_INTERVAL_ENV,
                    value,
                })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partitions == 0 {
            return Err(ConfigError::Zero("partitions"));
        }
        if self.timer_check_interval_ms == 0 {
            return Err(ConfigError::Zero("timer_check_interval_ms"));
        }
        Ok(())
    }
}
