//! Configuration loading and validation.

mod filters;
mod types;
mod validation;

pub use filters::{ConfigFilter, ConfigFilters};
pub use types::*;

use crate::error::{DaoError, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the configuration, used to tag run reports.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Look up a named database connection.
    pub fn database(&self, name: &str) -> Result<&DatabaseConfig> {
        self.databases
            .iter()
            .find(|db| db.name == name)
            .ok_or_else(|| {
                let known: Vec<&str> = self.databases.iter().map(|d| d.name.as_str()).collect();
                DaoError::Config(format!(
                    "Unknown database: '{}'. Configured databases: {}",
                    name,
                    known.join(", ")
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
databases:
  - name: main
    driver: sqlite3
    dsn: "sqlite:data/main.db"
    services: [docstore]
  - name: scratch
    driver: memory
    dsn: ":memory:"
services:
  docstore:
    prefix: docs_
    storages: [main, index]
    values:
      owner: ops
  acl: {}
migration:
  status_buffer: 500
  progress: json
"#;

    #[test]
    fn test_from_yaml() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.databases.len(), 2);
        assert_eq!(config.database("scratch").unwrap().driver, "memory");

        let docstore = &config.services["docstore"];
        assert_eq!(docstore.prefix.as_deref(), Some("docs_"));
        assert_eq!(docstore.storages, vec!["main", "index"]);
        assert_eq!(docstore.value("owner"), Some("ops"));

        let acl = &config.services["acl"];
        assert_eq!(acl.prefix, None);
        assert_eq!(acl.storages, vec!["main"]);

        assert!(config.migration.dry_run);
        assert_eq!(config.migration.status_buffer, 500);
        assert_eq!(config.migration.progress, ProgressMode::Json);
    }

    #[test]
    fn test_unknown_database() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        let err = config.database("nope").unwrap_err();
        assert!(err.to_string().contains("main, scratch"));
    }

    #[test]
    fn test_invalid_yaml_is_yaml_error() {
        let err = Config::from_yaml("databases: [").unwrap_err();
        assert!(matches!(err, DaoError::Yaml(_)));
    }

    #[test]
    fn test_hash_is_stable() {
        let a = Config::from_yaml(SAMPLE).unwrap();
        let b = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);
    }
}
