//! Driver catalog: the dispatch table from driver identifier to DAO constructor.
//!
//! The catalog is explicitly constructed and injected into the orchestrator rather
//! than consulted through global state. Each adapter module contributes its entry
//! through a `register` function, so adding a backend never touches the orchestrator.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use super::{Dao, DaoOptions};
use crate::error::{DaoError, Result};

/// Constructor closure stored in the catalog.
pub type DaoConstructor =
    Arc<dyn Fn(DaoOptions) -> BoxFuture<'static, Result<Arc<dyn Dao>>> + Send + Sync>;

/// Registry of DAO constructors keyed by driver identifier.
///
/// # Example
///
/// ```rust,ignore
/// let mut catalog = DriverCatalog::new();
/// sqlite::register(&mut catalog);
/// let dao = catalog.open(DaoOptions::new("sqlite3", "sqlite:data.db", "svc_")).await?;
/// ```
#[derive(Default, Clone)]
pub struct DriverCatalog {
    constructors: HashMap<String, DaoConstructor>,
}

impl DriverCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog with the built-in drivers registered.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        crate::drivers::sqlite::register(&mut catalog);
        crate::drivers::memory::register(&mut catalog);
        catalog
    }

    /// Register a constructor for a driver identifier, replacing any previous one.
    pub fn register<F, Fut>(&mut self, driver: impl Into<String>, constructor: F)
    where
        F: Fn(DaoOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn Dao>>> + Send + 'static,
    {
        let driver = driver.into();
        debug!("Registering driver: {}", driver);
        self.constructors.insert(
            driver,
            Arc::new(move |opts| -> BoxFuture<'static, Result<Arc<dyn Dao>>> {
                Box::pin(constructor(opts))
            }),
        );
    }

    /// Check if a driver is registered.
    pub fn has_driver(&self, driver: &str) -> bool {
        self.constructors.contains_key(driver)
    }

    /// Get the constructor for a driver, failing with "unsupported driver type".
    pub fn require(&self, driver: &str) -> Result<DaoConstructor> {
        self.constructors
            .get(driver)
            .cloned()
            .ok_or_else(|| DaoError::UnsupportedDriver(driver.to_string()))
    }

    /// All registered driver identifiers, sorted.
    pub fn driver_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Open a DAO through the registered constructor.
    ///
    /// Unknown drivers fail with [`DaoError::UnsupportedDriver`] before anything is
    /// opened; constructor failures are reported as [`DaoError::Connection`].
    pub async fn open(&self, opts: DaoOptions) -> Result<Arc<dyn Dao>> {
        let constructor = self.require(&opts.driver)?;
        let driver = opts.driver.clone();
        let data_source = opts.data_source.clone();

        debug!("Opening {} DAO on {}", driver, data_source);
        constructor(opts).await.map_err(|e| match e {
            e @ DaoError::Connection { .. } => e,
            other => DaoError::connection(driver, data_source, other.to_string()),
        })
    }
}

impl std::fmt::Debug for DriverCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverCatalog")
            .field("drivers", &self.driver_names())
            .finish()
    }
}
