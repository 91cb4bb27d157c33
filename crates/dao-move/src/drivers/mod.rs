//! Built-in storage backend adapters.
//!
//! - [`sqlite`]: relational driver (`sqlite3`) built on the statement registry
//! - [`memory`]: embedded key-value driver (`memory`) with an optional JSON snapshot
//!
//! Each module exposes a `register` function contributing its constructor to a
//! [`DriverCatalog`](crate::dao::DriverCatalog). Adapters for other backends are
//! registered the same way from outside the crate.

pub mod memory;
pub mod sqlite;

pub use memory::{MemoryDao, MemoryStore};
pub use sqlite::SqliteDao;
