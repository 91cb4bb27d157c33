//! SQLite driver built on the statement registry.
//!
//! Records live in a `%PREFIX%records(collection, key, value)` table created by
//! `init`. SQLite serializes writers poorly under concurrent access, so this DAO
//! declares the single-writer capability and every write holds the registry lock.
//!
//! # Data source
//!
//! SQLx connection format:
//! ```text
//! sqlite:path/to/file.db
//! sqlite::memory:
//! ```

use std::any::Any;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteStatement,
};
use sqlx::{Row, Statement};
use tracing::{debug, info};

use crate::config::ServiceConfig;
use crate::dao::{Connection, Dao, DaoOptions, DriverCatalog, Record, RecordStore};
use crate::error::{DaoError, Result};
use crate::sql::{SqlValue, StatementDef, StatementPreparer, StatementRegistry};

/// Driver identifier.
pub const DRIVER: &str = "sqlite3";

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Pool size for file databases.
const FILE_POOL_SIZE: u32 = 4;

const CREATE_RECORDS: &str = "records.create";
const TABLE_EXISTS: &str = "records.exists";
const LIST_COLLECTIONS: &str = "records.collections";
const COUNT_RECORDS: &str = "records.count";
const SCAN_RECORDS: &str = "records.scan";
const PUT_RECORD: &str = "records.put";
const CLEAR_RECORDS: &str = "records.clear";

#[async_trait]
impl StatementPreparer for SqlitePool {
    type Statement = Arc<SqliteStatement<'static>>;

    async fn prepare(&self, sql: &str) -> Result<Self::Statement> {
        let stmt = sqlx::Executor::prepare(self, sql)
            .await
            .map_err(|e| DaoError::prepare(sql, e))?;
        Ok(Arc::new(Statement::to_owned(&stmt)))
    }
}

/// Bind owned values onto a query in order.
fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: Vec<SqlValue>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            SqlValue::Null => query.bind(None::<i64>),
            SqlValue::Bool(b) => query.bind(b),
            SqlValue::Int(i) => query.bind(i),
            SqlValue::Float(f) => query.bind(f),
            SqlValue::Text(s) => query.bind(s),
            SqlValue::Bytes(b) => query.bind(b),
        };
    }
    query
}

/// File path named by a SQLite data source, `None` for in-memory databases.
fn database_path(data_source: &str) -> Option<PathBuf> {
    let rest = data_source
        .trim()
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

/// DAO over a SQLite pool.
pub struct SqliteDao {
    opts: DaoOptions,
    registry: StatementRegistry<SqlitePool>,
    table_ready: AtomicBool,
}

impl SqliteDao {
    /// Connect to the data source and register the record statements.
    ///
    /// A read-only DAO on a file that does not exist gets an empty in-memory
    /// database instead, so nothing is created on disk. With
    /// [`DaoOptions::must_exist`] a missing file is a connection error.
    pub async fn open(opts: DaoOptions) -> Result<Self> {
        let path = database_path(&opts.data_source);
        let missing = path.as_ref().map_or(false, |p| !p.exists());
        if missing && opts.must_exist {
            return Err(DaoError::connection(
                &opts.driver,
                &opts.data_source,
                "database file does not exist",
            ));
        }

        let (options, max_conns) = match path {
            Some(_) if opts.read_only && missing => {
                info!(
                    "{} does not exist, using an empty in-memory database (read-only)",
                    opts.data_source
                );
                (SqliteConnectOptions::from_str("sqlite::memory:")?, 1)
            }
            Some(_) => (
                SqliteConnectOptions::from_str(&opts.data_source)?
                    .create_if_missing(!opts.read_only)
                    .read_only(opts.read_only),
                FILE_POOL_SIZE,
            ),
            None => (SqliteConnectOptions::from_str(&opts.data_source)?, 1),
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_conns)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            // An in-memory database lives exactly as long as its connection.
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| DaoError::connection(&opts.driver, &opts.data_source, e.to_string()))?;

        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| DaoError::connection(&opts.driver, &opts.data_source, e.to_string()))?;

        debug!("Connected to SQLite: {}", opts.data_source);

        let registry = StatementRegistry::new(pool, opts.prefix.clone(), true);
        register_record_statements(&registry);

        Ok(Self {
            opts,
            registry,
            table_ready: AtomicBool::new(false),
        })
    }

    /// The statement registry. Service migrators register their own queries here.
    pub fn registry(&self) -> &StatementRegistry<SqlitePool> {
        &self.registry
    }

    pub fn pool(&self) -> &SqlitePool {
        self.registry.preparer()
    }

    /// Name of the records table for this prefix.
    pub fn records_table(&self) -> String {
        format!("{}records", self.opts.prefix)
    }

    /// Execute a registered statement under the write lock.
    ///
    /// Parametrized keys bind the values returned by their definition; other
    /// shapes are built from `params` and bind them in order. Returns the number
    /// of affected rows.
    pub async fn execute(&self, key: &str, params: &[SqlValue]) -> Result<u64> {
        if self.opts.read_only {
            return Err(DaoError::read_only(&self.opts.driver, key));
        }
        let (stmt, bound) = self.statement(key, params).await?;

        let _guard = self.registry.lock().await;
        let result = bind_all(stmt.query(), bound)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    /// Run a registered query and return every row.
    pub async fn fetch_all(&self, key: &str, params: &[SqlValue]) -> Result<Vec<SqliteRow>> {
        let (stmt, bound) = self.statement(key, params).await?;
        let rows = bind_all(stmt.query(), bound)
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }

    async fn statement(
        &self,
        key: &str,
        params: &[SqlValue],
    ) -> Result<(Arc<SqliteStatement<'static>>, Vec<SqlValue>)> {
        match self.registry.resolve(key, params).await {
            Ok(stmt) => Ok((stmt, params.to_vec())),
            Err(DaoError::UnsupportedShape(_)) => {
                self.registry.resolve_with_params(key, params).await
            }
            Err(e) => Err(e),
        }
    }

    async fn table_exists(&self) -> Result<bool> {
        let rows = self
            .fetch_all(TABLE_EXISTS, &[SqlValue::Text(self.records_table())])
            .await?;
        let n: i64 = match rows.first() {
            Some(row) => row.try_get("n")?,
            None => 0,
        };
        Ok(n > 0)
    }

    fn is_ready(&self) -> bool {
        self.table_ready.load(Ordering::Acquire)
    }
}

fn register_record_statements(registry: &StatementRegistry<SqlitePool>) {
    registry.register(
        CREATE_RECORDS,
        "CREATE TABLE IF NOT EXISTS %PREFIX%records (
            collection TEXT NOT NULL,
            key TEXT NOT NULL,
            value BLOB NOT NULL,
            PRIMARY KEY (collection, key)
        )",
    );
    registry.register(
        TABLE_EXISTS,
        StatementDef::with_params(|args| {
            let name = args.first().cloned().unwrap_or_default();
            (
                "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?"
                    .to_string(),
                vec![SqlValue::Text(name)],
            )
        }),
    );
    registry.register(
        LIST_COLLECTIONS,
        "SELECT DISTINCT collection FROM %PREFIX%records ORDER BY collection",
    );
    registry.register(
        COUNT_RECORDS,
        StatementDef::with_params(|args| {
            let collection = args.first().cloned().unwrap_or_default();
            (
                "SELECT COUNT(*) AS n FROM %PREFIX%records WHERE collection = ?".to_string(),
                vec![SqlValue::Text(collection)],
            )
        }),
    );
    registry.register(
        SCAN_RECORDS,
        "SELECT key, value FROM %PREFIX%records WHERE collection = ? ORDER BY key",
    );
    registry.register(
        PUT_RECORD,
        "INSERT OR REPLACE INTO %%PREFIX%%records (collection, key, value) VALUES (?, ?, ?)",
    );
    registry.register(CLEAR_RECORDS, "DELETE FROM %PREFIX%records");
}

#[async_trait]
impl Dao for SqliteDao {
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
        if self.opts.read_only {
            let exists = self.table_exists().await?;
            self.table_ready.store(exists, Ordering::Release);
            debug!("{} present: {}", self.records_table(), exists);
            return Ok(());
        }

        self.execute(CREATE_RECORDS, &[]).await?;
        self.table_ready.store(true, Ordering::Release);
        debug!("Initialized {}", self.records_table());
        Ok(())
    }

    fn connection(&self) -> Connection {
        Connection::Sql(self.pool().clone())
    }

    fn records(&self) -> Option<&dyn RecordStore> {
        Some(self)
    }

    async fn close(&self) -> Result<()> {
        self.pool().close().await;
        debug!("Closed SQLite pool: {}", self.opts.data_source);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
impl RecordStore for SqliteDao {
    async fn collections(&self) -> Result<Vec<String>> {
        if !self.is_ready() {
            return Ok(Vec::new());
        }
        let rows = self.fetch_all(LIST_COLLECTIONS, &[]).await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("collection").map_err(DaoError::from))
            .collect()
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        if !self.is_ready() {
            return Ok(0);
        }
        let rows = self.fetch_all(COUNT_RECORDS, &[collection.into()]).await?;
        let n: i64 = match rows.first() {
            Some(row) => row.try_get("n")?,
            None => 0,
        };
        Ok(n.max(0) as u64)
    }

    async fn scan(&self, collection: &str) -> Result<Vec<Record>> {
        if !self.is_ready() {
            return Ok(Vec::new());
        }
        let rows = self.fetch_all(SCAN_RECORDS, &[collection.into()]).await?;
        rows.iter()
            .map(|row| -> Result<Record> {
                Ok(Record {
                    key: row.try_get("key")?,
                    value: row.try_get("value")?,
                })
            })
            .collect()
    }

    async fn put(&self, collection: &str, record: &Record) -> Result<()> {
        self.execute(
            PUT_RECORD,
            &[
                collection.into(),
                record.key.as_str().into(),
                record.value.clone().into(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let removed = self.execute(CLEAR_RECORDS, &[]).await?;
        debug!("Deleted {} rows from {}", removed, self.records_table());
        Ok(())
    }
}

/// Register the sqlite3 driver.
pub fn register(catalog: &mut DriverCatalog) {
    catalog.register(DRIVER, |opts: DaoOptions| async move {
        let dao: Arc<dyn Dao> = Arc::new(SqliteDao::open(opts).await?);
        Ok(dao)
    });
}
