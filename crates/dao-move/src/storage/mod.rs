//! Storage declarations: what each service persists and how it migrates.
//!
//! A service declares an immutable list of storages. Each storage has a key, a
//! prefix resolver computing its key-namespace prefix from the service's
//! configuration, and optionally a [`Migrator`]. Only storages with a migrator are
//! offered for migration.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{Config, ServiceConfig};
use crate::error::{DaoError, Result};
use crate::migrate::{Migrator, RecordCopier};

/// Storage key used when a service declares none.
pub const DEFAULT_STORAGE: &str = "main";

/// Pure function from service configuration to prefix.
pub type PrefixResolver = Arc<dyn Fn(&ServiceConfig) -> String + Send + Sync>;

/// One storage declared by a service.
#[derive(Clone)]
pub struct StorageOptions {
    key: String,
    prefix: PrefixResolver,
    migrator: Option<Arc<dyn Migrator>>,
}

impl StorageOptions {
    /// Declare a storage whose prefix is the service's configured prefix.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            prefix: Arc::new(|config: &ServiceConfig| config.prefix.clone().unwrap_or_default()),
            migrator: None,
        }
    }

    /// Replace the prefix resolver.
    pub fn with_prefix<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&ServiceConfig) -> String + Send + Sync + 'static,
    {
        self.prefix = Arc::new(resolver);
        self
    }

    /// Attach a migrator, making the storage migratable.
    pub fn with_migrator(mut self, migrator: impl Migrator + 'static) -> Self {
        self.migrator = Some(Arc::new(migrator));
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Compute the prefix for a service configuration.
    pub fn resolve_prefix(&self, config: &ServiceConfig) -> String {
        (self.prefix)(config)
    }

    pub fn migrator(&self) -> Option<Arc<dyn Migrator>> {
        self.migrator.clone()
    }

    pub fn is_migratable(&self) -> bool {
        self.migrator.is_some()
    }
}

impl fmt::Debug for StorageOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageOptions")
            .field("key", &self.key)
            .field("migratable", &self.is_migratable())
            .finish()
    }
}

/// Storages declared by one service.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    name: String,
    storages: Vec<StorageOptions>,
}

impl ServiceOptions {
    pub fn new(name: impl Into<String>, storages: Vec<StorageOptions>) -> Self {
        Self {
            name: name.into(),
            storages,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storages(&self) -> &[StorageOptions] {
        &self.storages
    }

    pub fn storage(&self, key: &str) -> Option<&StorageOptions> {
        self.storages.iter().find(|s| s.key == key)
    }
}

/// A (service, storage) pair that can be migrated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct MigratableStorage {
    pub service: String,
    pub storage: String,
}

impl fmt::Display for MigratableStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.service, self.storage)
    }
}

/// Every service known to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, ServiceOptions>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare every configured service, each storage migrated by a [`RecordCopier`].
    ///
    /// The `main` storage uses the service prefix; other storages append their key,
    /// so `docs_` with storage `index` becomes `docs_index_`.
    pub fn from_config(config: &Config) -> Self {
        let copier = RecordCopier::new().with_report_every(config.migration.report_every);
        let mut registry = Self::new();

        for (name, service) in &config.services {
            let storages = service
                .storages
                .iter()
                .map(|key| {
                    let storage = StorageOptions::new(key.clone()).with_migrator(copier.clone());
                    if key == DEFAULT_STORAGE {
                        storage
                    } else {
                        let suffix = format!("{}_", key);
                        storage.with_prefix(move |c: &ServiceConfig| {
                            format!("{}{}", c.prefix.as_deref().unwrap_or_default(), suffix)
                        })
                    }
                })
                .collect();
            registry.register(ServiceOptions::new(name.clone(), storages));
        }

        registry
    }

    /// Add or replace a service.
    pub fn register(&mut self, service: ServiceOptions) {
        self.services.insert(service.name.clone(), service);
    }

    pub fn get(&self, name: &str) -> Option<&ServiceOptions> {
        self.services.get(name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Every (service, storage) pair carrying a migrator, sorted.
    pub fn migratable(&self) -> Vec<MigratableStorage> {
        let mut out: Vec<MigratableStorage> = self
            .services
            .values()
            .flat_map(|service| {
                service
                    .storages
                    .iter()
                    .filter(|s| s.is_migratable())
                    .map(move |s| MigratableStorage {
                        service: service.name.clone(),
                        storage: s.key.clone(),
                    })
            })
            .collect();
        out.sort();
        out
    }

    /// Find a migratable storage.
    ///
    /// # Errors
    ///
    /// [`DaoError::UnknownStorage`] if the pair does not exist or has no migrator.
    pub fn find(&self, service: &str, storage: &str) -> Result<&StorageOptions> {
        self.services
            .get(service)
            .and_then(|s| s.storage(storage))
            .filter(|s| s.is_migratable())
            .ok_or_else(|| DaoError::UnknownStorage {
                service: service.to_string(),
                storage: storage.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::from_yaml(
            r#"
databases:
  - { name: a, driver: memory, dsn: ":memory:" }
services:
  docstore:
    prefix: docs_
    storages: [main, index]
  acl: {}
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_from_config_declares_every_storage() {
        let registry = ServiceRegistry::from_config(&config());
        let pairs: Vec<String> = registry.migratable().iter().map(|m| m.to_string()).collect();
        assert_eq!(
            pairs,
            vec!["acl (main)", "docstore (index)", "docstore (main)"]
        );
    }

    #[test]
    fn test_prefix_resolution() {
        let config = config();
        let registry = ServiceRegistry::from_config(&config);
        let docstore = &config.services["docstore"];

        let main = registry.find("docstore", "main").unwrap();
        assert_eq!(main.resolve_prefix(docstore), "docs_");
        let index = registry.find("docstore", "index").unwrap();
        assert_eq!(index.resolve_prefix(docstore), "docs_index_");

        let acl = registry.find("acl", "main").unwrap();
        assert_eq!(acl.resolve_prefix(&config.services["acl"]), "");
    }

    #[test]
    fn test_storage_without_migrator_is_not_offered() {
        let mut registry = ServiceRegistry::new();
        registry.register(ServiceOptions::new(
            "search",
            vec![StorageOptions::new("main").with_prefix(|_| "idx_".into())],
        ));

        assert!(registry.migratable().is_empty());
        let err = registry.find("search", "main").unwrap_err();
        assert!(matches!(err, DaoError::UnknownStorage { .. }));
        assert!(registry.find("nope", "main").is_err());
    }
}
