//! Embedded key-value driver.
//!
//! Data lives in an in-process map. The data source is either `:memory:` or the
//! path of a JSON snapshot file, loaded on open and written back on close when
//! something changed. Every DAO prefix owns its own namespace of collections, so
//! services and storages sharing one snapshot never see each other's data, even
//! when one prefix starts with another.

use std::any::Any;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::ServiceConfig;
use crate::dao::{Connection, Dao, DaoOptions, DriverCatalog, Record, RecordStore};
use crate::error::{DaoError, Result};

/// Driver identifier.
pub const DRIVER: &str = "memory";

/// Data source meaning "no snapshot file".
pub const IN_MEMORY: &str = ":memory:";

type Collection = BTreeMap<String, Vec<u8>>;

/// prefix → collection → key → value
type Namespaces = BTreeMap<String, BTreeMap<String, Collection>>;

/// Namespaced collections shared by a memory DAO and its connection handle.
#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: RwLock<Namespaces>,
    dirty: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_namespaces(namespaces: Namespaces) -> Self {
        Self {
            namespaces: RwLock::new(namespaces),
            dirty: AtomicBool::new(false),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Namespaces> {
        self.namespaces
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Namespaces> {
        self.namespaces
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every prefix holding at least one collection, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Collections under exactly `prefix`, sorted.
    pub fn collections(&self, prefix: &str) -> Vec<String> {
        self.read()
            .get(prefix)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, prefix: &str, collection: &str, key: &str) -> Option<Vec<u8>> {
        self.read()
            .get(prefix)
            .and_then(|ns| ns.get(collection))
            .and_then(|c| c.get(key).cloned())
    }

    pub fn insert(&self, prefix: &str, collection: &str, key: &str, value: Vec<u8>) {
        self.write()
            .entry(prefix.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.dirty.store(true, Ordering::Release);
    }

    /// Number of keys in a collection (0 if missing).
    pub fn len(&self, prefix: &str, collection: &str) -> usize {
        self.read()
            .get(prefix)
            .and_then(|ns| ns.get(collection))
            .map_or(0, BTreeMap::len)
    }

    /// Whether no collection holds any key.
    pub fn is_empty(&self) -> bool {
        self.read()
            .values()
            .flat_map(BTreeMap::values)
            .all(BTreeMap::is_empty)
    }

    /// Entries of a collection, ordered by key.
    pub fn entries(&self, prefix: &str, collection: &str) -> Vec<(String, Vec<u8>)> {
        self.read()
            .get(prefix)
            .and_then(|ns| ns.get(collection))
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Drop the namespace of exactly `prefix`, returning how many collections it held.
    pub fn remove_namespace(&self, prefix: &str) -> usize {
        let removed = self.write().remove(prefix).map_or(0, |ns| ns.len());
        if removed > 0 {
            self.dirty.store(true, Ordering::Release);
        }
        removed
    }

    /// Whether the store changed since it was loaded or last saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&*self.read())?)
    }
}

/// DAO over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryDao {
    opts: DaoOptions,
    store: Arc<MemoryStore>,
    snapshot: Option<PathBuf>,
}

impl MemoryDao {
    /// Create a DAO over a fresh store that is never persisted.
    pub fn in_memory(opts: DaoOptions) -> Self {
        Self {
            opts,
            store: Arc::new(MemoryStore::new()),
            snapshot: None,
        }
    }

    /// Open a DAO, loading the snapshot file named by the data source if it exists.
    ///
    /// A missing snapshot yields an empty store, or a connection error when the
    /// options demand an existing data source. The file is created on close
    /// unless the DAO is read-only.
    pub async fn open(opts: DaoOptions) -> Result<Self> {
        let source = opts.data_source.trim();
        if source.is_empty() || source == IN_MEMORY {
            return Ok(Self::in_memory(opts));
        }

        let path = PathBuf::from(source);
        let store = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let namespaces: Namespaces = serde_json::from_slice(&bytes).map_err(|e| {
                    DaoError::connection(
                        &opts.driver,
                        &opts.data_source,
                        format!("invalid snapshot: {}", e),
                    )
                })?;
                debug!("Loaded {} namespaces from {}", namespaces.len(), path.display());
                MemoryStore::from_namespaces(namespaces)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && opts.must_exist => {
                return Err(DaoError::connection(
                    &opts.driver,
                    &opts.data_source,
                    "snapshot file does not exist",
                ));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Snapshot {} not found, starting empty", path.display());
                MemoryStore::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            opts,
            store: Arc::new(store),
            snapshot: Some(path),
        })
    }

    /// The shared namespaced store.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    fn ensure_writable(&self, operation: &str) -> Result<()> {
        if self.opts.read_only {
            return Err(DaoError::read_only(&self.opts.driver, operation));
        }
        Ok(())
    }
}

#[async_trait]
impl Dao for MemoryDao {
    fn driver(&self) -> &str {
        &self.opts.driver
    }

    fn data_source(&self) -> &str {
        &self.opts.data_source
    }

    fn prefix(&self) -> &str {
        &self.opts.prefix
    }

    fn is_read_only(&self) -> bool {
        self.opts.read_only
    }

    async fn init(&self, _config: &ServiceConfig) -> Result<()> {
        debug!(
            "Memory DAO ready: {} collections under prefix '{}'",
            self.store.collections(&self.opts.prefix).len(),
            self.opts.prefix
        );
        Ok(())
    }

    fn connection(&self) -> Connection {
        Connection::KeyValue(self.store.clone())
    }

    fn records(&self) -> Option<&dyn RecordStore> {
        Some(self)
    }

    async fn close(&self) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        if self.opts.read_only || !self.store.is_dirty() {
            return Ok(());
        }

        let bytes = self.store.snapshot()?;
        tokio::fs::write(path, bytes).await?;
        self.store.dirty.store(false, Ordering::Release);
        info!("Wrote snapshot {}", path.display());
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl RecordStore for MemoryDao {
    async fn collections(&self) -> Result<Vec<String>> {
        Ok(self.store.collections(&self.opts.prefix))
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        Ok(self.store.len(&self.opts.prefix, collection) as u64)
    }

    async fn scan(&self, collection: &str) -> Result<Vec<Record>> {
        Ok(self
            .store
            .entries(&self.opts.prefix, collection)
            .into_iter()
            .map(|(key, value)| Record { key, value })
            .collect())
    }

    async fn put(&self, collection: &str, record: &Record) -> Result<()> {
        self.ensure_writable("put")?;
        self.store.insert(
            &self.opts.prefix,
            collection,
            &record.key,
            record.value.clone(),
        );
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_writable("clear")?;
        let removed = self.store.remove_namespace(&self.opts.prefix);
        debug!("Cleared {} collections under prefix '{}'", removed, self.opts.prefix);
        Ok(())
    }
}

/// Register the memory driver.
pub fn register(catalog: &mut DriverCatalog) {
    catalog.register(DRIVER, |opts: DaoOptions| async move {
        let dao: Arc<dyn Dao> = Arc::new(MemoryDao::open(opts).await?);
        Ok(dao)
    });
}
