//! # dao-move
//!
//! Storage-backend abstraction and cross-backend data migration.
//!
//! Services talk to their configured backend through one generic DAO contract and
//! can move their persisted data from one backend to another:
//!
//! - **Statement registry** with a prepared-statement cache keyed by final SQL text
//!   and an optional single-writer guard for relational backends
//! - **Driver catalog** dispatching driver identifiers to DAO constructors
//! - **Storage declarations** naming what each service persists and how it migrates
//! - **Orchestrator** opening both sides, running the migrator and reporting counts
//! - **Progress consumer** rendering the migrator's status stream
//!
//! ## Example
//!
//! ```rust,no_run
//! use dao_move::{Config, DataSource, DriverCatalog, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> dao_move::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let mut orchestrator = Orchestrator::from_config(&config, DriverCatalog::with_builtins());
//!     orchestrator.select("docstore", "main")?;
//!     orchestrator.select_source(DataSource::new("sqlite3", "sqlite:data/main.db"))?;
//!     orchestrator.select_target(DataSource::new("memory", "data/main.json"))?;
//!     let result = orchestrator.run(false).await?;
//!     println!("Copied {} entities", result.total_copied);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dao;
pub mod drivers;
pub mod error;
pub mod migrate;
pub mod orchestrator;
pub mod progress;
pub mod sql;
pub mod storage;

// Re-exports for convenient access
pub use config::{Config, ConfigFilters, DatabaseConfig, MigrationConfig, ProgressMode, ServiceConfig};
pub use dao::{Connection, Dao, DaoOptions, DriverCatalog, Record, RecordStore};
pub use error::{DaoError, Result};
pub use migrate::{MigrationCounts, Migrator, MigratorStatus, RecordCopier, StatusSender};
pub use orchestrator::{DataSource, MigrationPhase, MigrationResult, Orchestrator};
pub use progress::{ProgressSink, ProgressSummary};
pub use sql::{SqlValue, StatementDef, StatementPreparer, StatementRegistry};
pub use storage::{MigratableStorage, ServiceOptions, ServiceRegistry, StorageOptions};
