//! Configuration type definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DaoError;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Named database connections offered as migration source or target.
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,

    /// Per-service configuration, keyed by service name.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// One named database connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Name used to pick this connection.
    pub name: String,

    /// Driver identifier (e.g. "sqlite3", "memory").
    pub driver: String,

    /// Driver-specific data source string.
    pub dsn: String,

    /// Services currently using this connection (informational).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
}

impl fmt::Display for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.driver, self.dsn)?;
        if !self.services.is_empty() {
            write!(f, " ({})", self.services.join(","))?;
        }
        Ok(())
    }
}

/// Configuration values of one service.
///
/// This is what a storage's prefix resolver reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Key-namespace prefix for this service's storages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Storage keys declared by this service (default: `["main"]`).
    #[serde(default = "default_storages")]
    pub storages: Vec<String>,

    /// Free-form configuration values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, String>,
}

impl ServiceConfig {
    /// Look up a free-form value.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Set a free-form value.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Set the prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            storages: default_storages(),
            values: BTreeMap::new(),
        }
    }
}

/// How the progress consumer renders status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressMode {
    /// Percentage milestones through tracing.
    #[default]
    Log,
    /// One JSON object per update on stderr.
    Json,
    /// Drain the channel silently.
    None,
}

impl FromStr for ProgressMode {
    type Err = DaoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "log" => Ok(ProgressMode::Log),
            "json" => Ok(ProgressMode::Json),
            "none" | "off" => Ok(ProgressMode::None),
            other => Err(DaoError::Config(format!(
                "Unknown progress mode: '{}'. Supported modes: log, json, none",
                other
            ))),
        }
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Dry run by default (default: true).
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Capacity of the bounded status channel (default: 1000).
    #[serde(default = "default_status_buffer")]
    pub status_buffer: usize,

    /// Progress rendering (default: log).
    #[serde(default)]
    pub progress: ProgressMode,

    /// Records copied between two status updates by the built-in copier (default: 100).
    #[serde(default = "default_report_every")]
    pub report_every: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            status_buffer: default_status_buffer(),
            progress: ProgressMode::default(),
            report_every: default_report_every(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_status_buffer() -> usize {
    1000
}

fn default_report_every() -> u64 {
    100
}

fn default_storages() -> Vec<String> {
    vec!["main".to_string()]
}
