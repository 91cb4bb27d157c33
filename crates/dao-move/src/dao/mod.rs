//! DAO contract shared by every storage backend adapter.
//!
//! - [`Dao`]: the uniform handle the rest of the system talks to
//! - [`RecordStore`]: optional family-agnostic record access used by generic migrators
//! - [`DriverCatalog`]: driver identifier → constructor dispatch table
//!
//! A DAO is bound to one driver identifier, one data source and one key-namespace
//! prefix. It is owned by whoever opened it and closed when that owner is done.

mod catalog;

pub use catalog::{DaoConstructor, DriverCatalog};

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ServiceConfig;
use crate::error::Result;

/// Parameters handed to a driver constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaoOptions {
    /// Driver identifier used for dispatch.
    pub driver: String,
    /// Driver-specific data source string.
    pub data_source: String,
    /// Key-namespace prefix.
    pub prefix: String,
    /// Reject every write through this DAO.
    pub read_only: bool,
    /// Fail to open when the data source does not exist yet.
    pub must_exist: bool,
}

impl DaoOptions {
    pub fn new(
        driver: impl Into<String>,
        data_source: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            driver: driver.into(),
            data_source: data_source.into(),
            prefix: prefix.into(),
            read_only: false,
            must_exist: false,
        }
    }

    /// Open the DAO in read-only mode.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Refuse to open a data source that does not exist instead of starting empty.
    pub fn must_exist(mut self, must_exist: bool) -> Self {
        self.must_exist = must_exist;
        self
    }
}

/// Live connection handle exposed by a DAO.
#[derive(Clone)]
#[non_exhaustive]
pub enum Connection {
    /// Relational pool.
    Sql(sqlx::SqlitePool),
    /// Embedded key-value store.
    KeyValue(Arc<crate::drivers::memory::MemoryStore>),
    /// Connection of an adapter registered outside this crate.
    Other(Arc<dyn Any + Send + Sync>),
}

impl Connection {
    /// The relational pool, if this is a relational connection.
    pub fn as_sql(&self) -> Option<&sqlx::SqlitePool> {
        match self {
            Connection::Sql(pool) => Some(pool),
            _ => None,
        }
    }

    /// Downcast a foreign connection to its concrete type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Connection::Other(conn) => conn.clone().downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connection::Sql(_) => f.write_str("Connection::Sql"),
            Connection::KeyValue(_) => f.write_str("Connection::KeyValue"),
            Connection::Other(_) => f.write_str("Connection::Other"),
        }
    }
}

/// Uniform handle over one storage backend.
///
/// Adapters implement this for each backend family. Service-specific migrators that
/// need more than the generic surface downcast through [`as_any`](Dao::as_any).
#[async_trait]
pub trait Dao: Send + Sync + 'static {
    /// Driver identifier this DAO was opened with.
    fn driver(&self) -> &str;

    /// Data source string this DAO was opened with.
    fn data_source(&self) -> &str;

    /// Key-namespace prefix.
    fn prefix(&self) -> &str;

    /// Whether writes are rejected.
    fn is_read_only(&self) -> bool;

    /// Initialize the backend for a service (create tables, buckets, ...).
    ///
    /// This should be idempotent - safe to call multiple times.
    async fn init(&self, config: &ServiceConfig) -> Result<()>;

    /// The underlying live connection.
    fn connection(&self) -> Connection;

    /// Family-agnostic record access, when the backend supports it.
    fn records(&self) -> Option<&dyn RecordStore> {
        None
    }

    /// Flush and release resources. The DAO must not be used afterwards.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;
}

/// One keyed record inside a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: Vec<u8>,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Record-level access shared by backends that can store opaque keyed values.
///
/// Collections are the entity types reported in a migration result.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Collection names, sorted.
    async fn collections(&self) -> Result<Vec<String>>;

    /// Number of records in a collection (0 if it does not exist).
    async fn count(&self, collection: &str) -> Result<u64>;

    /// All records of a collection, ordered by key.
    async fn scan(&self, collection: &str) -> Result<Vec<Record>>;

    /// Insert or replace a record.
    async fn put(&self, collection: &str, record: &Record) -> Result<()>;

    /// Remove every record.
    async fn clear(&self) -> Result<()>;
}
