//! Registry configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use loadbal_utils::{try_init_logging, LogFormat, LoggingError};

use crate::GroupError;

/// A group whose hosts are known before any proxy registers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Group name, unique within the registry.
    pub name: String,
    /// Hosts the group starts with. Must not be empty.
    pub hosts: Vec<String>,
}

/// Configuration for a registry of connection groups.
///
/// Can be loaded from a TOML file via [`RegistryConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Log format: "human" or "json".
    #[serde(default)]
    pub log_format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Groups to create up front, already seeded with hosts.
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RegistryConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, GroupError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| GroupError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, GroupError> {
        let config: Self = toml::from_str(s).map_err(|e| GroupError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, GroupError> {
        toml::to_string_pretty(self).map_err(|e| GroupError::Config(e.to_string()))
    }

    /// Install the global tracing subscriber with this config's format and
    /// level. `RUST_LOG` still wins over `log_level` when set.
    pub fn init_logging(&self) -> Result<(), LoggingError> {
        try_init_logging(self.log_format, &self.log_level)
    }

    /// Group names must be unique and every group needs a host.
    pub fn validate(&self) -> Result<(), GroupError> {
        let mut seen = HashSet::new();
        for group in &self.groups {
            if group.name.is_empty() {
                return Err(GroupError::Config("group name must not be empty".to_string()));
            }
            if !seen.insert(group.name.as_str()) {
                return Err(GroupError::Config(format!(
                    "group {} is defined more than once",
                    group.name
                )));
            }
            if group.hosts.is_empty() {
                return Err(GroupError::Config(format!(
                    "group {} has no hosts",
                    group.name
                )));
            }
        }
        Ok(())
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            groups: Vec::new(),
        }
    }
}
