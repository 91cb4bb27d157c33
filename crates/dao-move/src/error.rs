//! Error types for DAO access and data migration.

use thiserror::Error;

/// Boxed driver error kept as the source of a statement preparation failure.
pub type DriverError = Box<dyn std::error::Error + Send + Sync>;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for connection errors (open/init of either DAO).
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for statement resolution errors.
pub const EXIT_STATEMENT_ERROR: u8 = 3;
/// Exit code for a migration that failed mid-run.
pub const EXIT_MIGRATION_ERROR: u8 = 4;
/// Exit code for a write rejected by a read-only DAO.
pub const EXIT_READ_ONLY_ERROR: u8 = 5;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for DAO and migration operations.
#[derive(Error, Debug)]
pub enum DaoError {
    /// Configuration error (invalid YAML, missing fields, phase misuse, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// No adapter registered for the driver identifier.
    #[error("unsupported driver type: {0}")]
    UnsupportedDriver(String),

    /// No declared storage carries a migrator.
    #[error("no migratable services")]
    NoMigratableServices,

    /// The selected (service, storage) pair is unknown or not migratable.
    #[error("unknown migratable storage '{storage}' for service '{service}'")]
    UnknownStorage { service: String, storage: String },

    /// Opening or initializing a DAO failed.
    #[error("connection failed for {driver} ({data_source}): {message}")]
    Connection {
        driver: String,
        data_source: String,
        message: String,
    },

    /// No statement is registered under the key.
    #[error("cannot find query for {0}")]
    StatementNotFound(String),

    /// The key is registered under a shape the caller cannot use.
    #[error("unsupported statement shape for {0}")]
    UnsupportedShape(String),

    /// Resolution produced no usable SQL text.
    #[error("empty statement for {0}")]
    EmptyStatement(String),

    /// The driver rejected the SQL text.
    #[error("statement preparation failed: {sql}")]
    Prepare {
        sql: String,
        #[source]
        source: DriverError,
    },

    /// A write was attempted through a read-only DAO.
    #[error("{driver} DAO is read-only, {operation} rejected")]
    ReadOnly { driver: String, operation: String },

    /// Migrator failure, reported verbatim.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Query execution error from the relational driver.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DaoError {
    /// Create a Connection error for one side of a migration.
    pub fn connection(
        driver: impl Into<String>,
        data_source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        DaoError::Connection {
            driver: driver.into(),
            data_source: data_source.into(),
            message: message.into(),
        }
    }

    /// Create a Prepare error wrapping the driver's rejection.
    pub fn prepare(sql: impl Into<String>, source: impl Into<DriverError>) -> Self {
        DaoError::Prepare {
            sql: sql.into(),
            source: source.into(),
        }
    }

    /// Create a ReadOnly error.
    pub fn read_only(driver: impl Into<String>, operation: impl Into<String>) -> Self {
        DaoError::ReadOnly {
            driver: driver.into(),
            operation: operation.into(),
        }
    }

    /// Whether the error comes from statement registration or resolution.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            DaoError::StatementNotFound(_)
                | DaoError::UnsupportedShape(_)
                | DaoError::EmptyStatement(_)
                | DaoError::Prepare { .. }
        )
    }

    /// Process exit code for this error class.
    pub fn exit_code(&self) -> u8 {
        match self {
            DaoError::Config(_)
            | DaoError::UnsupportedDriver(_)
            | DaoError::NoMigratableServices
            | DaoError::UnknownStorage { .. }
            | DaoError::Yaml(_)
            | DaoError::Json(_) => EXIT_CONFIG_ERROR,
            DaoError::Connection { .. } | DaoError::Database(_) => EXIT_CONNECTION_ERROR,
            DaoError::StatementNotFound(_)
            | DaoError::UnsupportedShape(_)
            | DaoError::EmptyStatement(_)
            | DaoError::Prepare { .. } => EXIT_STATEMENT_ERROR,
            DaoError::Migration(_) => EXIT_MIGRATION_ERROR,
            DaoError::ReadOnly { .. } => EXIT_READ_ONLY_ERROR,
            DaoError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for DAO and migration operations.
pub type Result<T> = std::result::Result<T, DaoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_class() {
        assert_eq!(DaoError::NoMigratableServices.exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(
            DaoError::UnsupportedDriver("cassandra".into()).exit_code(),
            EXIT_CONFIG_ERROR
        );
        assert_eq!(
            DaoError::connection("sqlite3", "sqlite:x.db", "boom").exit_code(),
            EXIT_CONNECTION_ERROR
        );
        assert_eq!(
            DaoError::StatementNotFound("getUser".into()).exit_code(),
            EXIT_STATEMENT_ERROR
        );
        assert_eq!(
            DaoError::read_only("memory", "put").exit_code(),
            EXIT_READ_ONLY_ERROR
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(DaoError::from(io).exit_code(), EXIT_IO_ERROR);
    }

    #[test]
    fn test_format_detailed_includes_source_chain() {
        let err = DaoError::prepare("SELECT * FROM", "near \"FROM\": syntax error");
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: statement preparation failed: SELECT * FROM"));
        assert!(detailed.contains("Caused by:\n  1: near \"FROM\": syntax error"));
        assert!(err.is_resolution());
    }

    #[test]
    fn test_not_found_message() {
        let err = DaoError::StatementNotFound("unknownKey".into());
        assert_eq!(err.to_string(), "cannot find query for unknownKey");
    }
}
