//! Configuration validation.

use std::collections::HashSet;

use super::Config;
use crate::error::{DaoError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.databases.is_empty() {
        return Err(DaoError::Config(
            "at least one entry in databases is required".into(),
        ));
    }

    let mut names = HashSet::new();
    for (i, db) in config.databases.iter().enumerate() {
        if db.name.trim().is_empty() {
            return Err(DaoError::Config(format!("databases[{}].name is required", i)));
        }
        if db.driver.trim().is_empty() {
            return Err(DaoError::Config(format!(
                "databases[{}].driver is required",
                i
            )));
        }
        if !names.insert(db.name.as_str()) {
            return Err(DaoError::Config(format!(
                "duplicate database name: '{}'",
                db.name
            )));
        }
    }

    for (name, service) in &config.services {
        if service.storages.iter().any(|s| s.trim().is_empty()) {
            return Err(DaoError::Config(format!(
                "services.{}.storages must not contain empty keys",
                name
            )));
        }
    }

    if config.migration.status_buffer == 0 {
        return Err(DaoError::Config(
            "migration.status_buffer must be at least 1".into(),
        ));
    }
    if config.migration.report_every == 0 {
        return Err(DaoError::Config(
            "migration.report_every must be at least 1".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, MigrationConfig, ServiceConfig};

    fn valid_config() -> Config {
        Config {
            databases: vec![
                DatabaseConfig {
                    name: "main".to_string(),
                    driver: "sqlite3".to_string(),
                    dsn: "sqlite:main.db".to_string(),
                    services: vec![],
                },
                DatabaseConfig {
                    name: "cache".to_string(),
                    driver: "memory".to_string(),
                    dsn: ":memory:".to_string(),
                    services: vec![],
                },
            ],
            services: [("docstore".to_string(), ServiceConfig::default())]
                .into_iter()
                .collect(),
            migration: MigrationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_no_databases() {
        let mut config = valid_config();
        config.databases.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_duplicate_database_name() {
        let mut config = valid_config();
        config.databases[1].name = "main".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate database name"));
    }

    #[test]
    fn test_empty_driver() {
        let mut config = valid_config();
        config.databases[0].driver = " ".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_status_buffer() {
        let mut config = valid_config();
        config.migration.status_buffer = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_storage_key() {
        let mut config = valid_config();
        config
            .services
            .get_mut("docstore")
            .unwrap()
            .storages
            .push(String::new());
        assert!(validate(&config).is_err());
    }
}
