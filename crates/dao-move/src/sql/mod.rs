//! Statement registration and prepared-statement caching for relational DAOs.
//!
//! A relational DAO declares its queries once under a key, in one of four shapes
//! (see [`StatementDef`]), and resolves them at call time:
//!
//! - [`StatementRegistry::resolve`] turns a key and arguments into a prepared statement
//! - [`StatementRegistry::resolve_with_params`] additionally returns values to bind
//! - [`StatementRegistry::lock`] serializes writes for engines with weak locking
//!
//! Prepared statements are cached by their final SQL text, so semantically distinct
//! keys compiling to the same query share one handle.

mod cache;
mod value;

pub use cache::StatementCache;
pub use value::{coerce_to_strings, SqlValue};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::{DaoError, Result};

/// Placeholder tokens replaced with the DAO's key-namespace prefix.
pub const PREFIX_TOKENS: [&str; 2] = ["%%PREFIX%%", "%PREFIX%"];

/// Query built from typed arguments.
pub type TypedQuery = Arc<dyn Fn(&[SqlValue]) -> String + Send + Sync>;

/// Query built from string-coerced arguments.
pub type StringQuery = Arc<dyn Fn(&[String]) -> String + Send + Sync>;

/// Query and bound parameters built from string-coerced arguments.
pub type ParamQuery = Arc<dyn Fn(&[String]) -> (String, Vec<SqlValue>) + Send + Sync>;

/// One registered statement definition.
#[derive(Clone)]
pub enum StatementDef {
    /// Literal SQL text, prefix substituted at registration.
    Text(String),
    /// Function of typed arguments, prefix substituted at resolution.
    Typed(TypedQuery),
    /// Function of string-coerced arguments.
    Strings(StringQuery),
    /// Function of string-coerced arguments returning SQL plus parameters to bind.
    WithParams(ParamQuery),
}

impl StatementDef {
    /// Literal SQL text.
    pub fn text(sql: impl Into<String>) -> Self {
        StatementDef::Text(sql.into())
    }

    /// SQL built from typed arguments.
    pub fn typed<F>(f: F) -> Self
    where
        F: Fn(&[SqlValue]) -> String + Send + Sync + 'static,
    {
        StatementDef::Typed(Arc::new(f))
    }

    /// SQL built from string-coerced arguments.
    pub fn strings<F>(f: F) -> Self
    where
        F: Fn(&[String]) -> String + Send + Sync + 'static,
    {
        StatementDef::Strings(Arc::new(f))
    }

    /// SQL and bound parameters built from string-coerced arguments.
    pub fn with_params<F>(f: F) -> Self
    where
        F: Fn(&[String]) -> (String, Vec<SqlValue>) + Send + Sync + 'static,
    {
        StatementDef::WithParams(Arc::new(f))
    }

    fn shape(&self) -> &'static str {
        match self {
            StatementDef::Text(_) => "text",
            StatementDef::Typed(_) => "typed",
            StatementDef::Strings(_) => "strings",
            StatementDef::WithParams(_) => "with_params",
        }
    }
}

impl fmt::Debug for StatementDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementDef::Text(sql) => f.debug_tuple("Text").field(sql).finish(),
            other => write!(f, "{}(<fn>)", other.shape()),
        }
    }
}

impl From<&str> for StatementDef {
    fn from(sql: &str) -> Self {
        StatementDef::text(sql)
    }
}

impl From<String> for StatementDef {
    fn from(sql: String) -> Self {
        StatementDef::Text(sql)
    }
}

/// Driver-side statement preparation.
///
/// Implemented by relational connection handles; the registry only needs a way to
/// turn SQL text into a cloneable prepared handle.
#[async_trait]
pub trait StatementPreparer: Send + Sync {
    /// Live prepared statement handle.
    type Statement: Clone + Send + Sync + 'static;

    /// Prepare the SQL text, failing with [`DaoError::Prepare`] if the driver rejects it.
    async fn prepare(&self, sql: &str) -> Result<Self::Statement>;
}

/// Replaces prefix tokens with the DAO's prefix.
#[derive(Debug, Clone)]
pub struct PrefixReplacer {
    prefix: String,
}

impl PrefixReplacer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Substitute every prefix token. The doubled form is replaced first.
    pub fn apply(&self, sql: &str) -> String {
        PREFIX_TOKENS
            .iter()
            .fold(sql.to_string(), |acc, token| acc.replace(token, &self.prefix))
    }
}

/// Guard held for the duration of a write on a single-writer DAO.
///
/// Dropping the guard releases the mutex. On DAOs without a single-writer mutex
/// the guard is empty and acquiring it never blocks.
#[must_use = "the write lock is released as soon as the guard is dropped"]
pub struct WriteGuard<'a> {
    guard: Option<MutexGuard<'a, ()>>,
}

impl WriteGuard<'_> {
    /// Whether this guard actually holds a mutex.
    pub fn is_exclusive(&self) -> bool {
        self.guard.is_some()
    }
}

/// Registry of named statements plus the prepared statement cache.
pub struct StatementRegistry<P: StatementPreparer> {
    preparer: P,
    replacer: PrefixReplacer,
    definitions: RwLock<HashMap<String, StatementDef>>,
    cache: StatementCache<P::Statement>,
    writer: Option<Mutex<()>>,
}

impl<P: StatementPreparer> StatementRegistry<P> {
    /// Create a registry bound to a preparer and a key-namespace prefix.
    ///
    /// `single_writer` attaches the write mutex; adapters set it when their engine
    /// serializes writes poorly on its own.
    pub fn new(preparer: P, prefix: impl Into<String>, single_writer: bool) -> Self {
        Self {
            preparer,
            replacer: PrefixReplacer::new(prefix),
            definitions: RwLock::new(HashMap::new()),
            cache: StatementCache::new(),
            writer: single_writer.then(|| Mutex::new(())),
        }
    }

    /// The underlying preparer (usually the connection pool).
    pub fn preparer(&self) -> &P {
        &self.preparer
    }

    pub fn prefix(&self) -> &str {
        self.replacer.prefix()
    }

    /// Register a statement under `key`, replacing any previous definition.
    ///
    /// Literal text has its prefix tokens substituted immediately. Nothing is
    /// validated here; malformed SQL surfaces when the statement is resolved.
    pub fn register(&self, key: impl Into<String>, def: impl Into<StatementDef>) {
        let key = key.into();
        let def = match def.into() {
            StatementDef::Text(sql) => StatementDef::Text(self.replacer.apply(&sql)),
            other => other,
        };
        debug!("Registering {} statement: {}", def.shape(), key);
        self.definitions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, def);
    }

    /// Whether a statement is registered under `key`.
    pub fn is_registered(&self, key: &str) -> bool {
        self.definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn registered_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Number of distinct prepared statements held by the cache.
    pub fn prepared_count(&self) -> usize {
        self.cache.len()
    }

    fn definition(&self, key: &str) -> Option<StatementDef> {
        self.definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    /// Resolve the final SQL text for `key` without preparing it.
    pub fn sql_for(&self, key: &str, args: &[SqlValue]) -> Result<String> {
        match self.definition(key) {
            None => Err(DaoError::StatementNotFound(key.to_string())),
            Some(StatementDef::Text(sql)) => Ok(sql),
            Some(StatementDef::Typed(f)) => Ok(self.replacer.apply(&f(args))),
            Some(StatementDef::Strings(f)) => {
                Ok(self.replacer.apply(&f(&coerce_to_strings(args))))
            }
            Some(StatementDef::WithParams(_)) => Err(DaoError::UnsupportedShape(key.to_string())),
        }
    }

    /// Resolve `key` to a prepared statement.
    ///
    /// # Errors
    ///
    /// - [`DaoError::StatementNotFound`] if nothing is registered under `key`
    /// - [`DaoError::UnsupportedShape`] if `key` needs [`resolve_with_params`](Self::resolve_with_params)
    /// - [`DaoError::Prepare`] if the driver rejects the SQL text
    pub async fn resolve(&self, key: &str, args: &[SqlValue]) -> Result<P::Statement> {
        let sql = self.sql_for(key, args)?;
        self.statement_for(sql).await
    }

    /// Resolve a parametrized `key` to a prepared statement and the values to bind.
    ///
    /// # Errors
    ///
    /// - [`DaoError::StatementNotFound`] if nothing is registered under `key`
    /// - [`DaoError::UnsupportedShape`] if `key` is not parametrized
    /// - [`DaoError::EmptyStatement`] if the definition produced no SQL
    /// - [`DaoError::Prepare`] if the driver rejects the SQL text
    pub async fn resolve_with_params(
        &self,
        key: &str,
        params: &[SqlValue],
    ) -> Result<(P::Statement, Vec<SqlValue>)> {
        let f = match self.definition(key) {
            Some(StatementDef::WithParams(f)) => f,
            Some(_) => return Err(DaoError::UnsupportedShape(key.to_string())),
            None => return Err(DaoError::StatementNotFound(key.to_string())),
        };

        let (sql, bound) = f(&coerce_to_strings(params));
        let sql = self.replacer.apply(&sql);
        if sql.trim().is_empty() {
            return Err(DaoError::EmptyStatement(key.to_string()));
        }

        let stmt = self.statement_for(sql).await?;
        Ok((stmt, bound))
    }

    /// Look up or prepare the statement for final SQL text.
    async fn statement_for(&self, sql: String) -> Result<P::Statement> {
        if let Some(stmt) = self.cache.get(&sql) {
            return Ok(stmt);
        }

        debug!("Preparing statement: {}", sql);
        let stmt = self.preparer.prepare(&sql).await?;
        Ok(self.cache.insert_if_absent(sql, stmt))
    }

    /// Acquire the single-writer guard.
    ///
    /// Hold the returned guard across every statement of a write; it is released
    /// when dropped, including on early returns and errors.
    pub async fn lock(&self) -> WriteGuard<'_> {
        match &self.writer {
            Some(mutex) => WriteGuard {
                guard: Some(mutex.lock().await),
            },
            None => WriteGuard { guard: None },
        }
    }

    /// Whether this registry carries a single-writer mutex.
    pub fn has_writer_guard(&self) -> bool {
        self.writer.is_some()
    }
}

impl<P: StatementPreparer> fmt::Debug for StatementRegistry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementRegistry")
            .field("prefix", &self.replacer.prefix())
            .field("statements", &self.registered_keys())
            .field("prepared", &self.cache.len())
            .field("single_writer", &self.writer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct MockStatement {
        id: usize,
        sql: String,
    }

    /// Preparer that hands out numbered statements and rejects SQL containing BROKEN.
    #[derive(Default)]
    struct MockPreparer {
        prepared: AtomicUsize,
    }

    #[async_trait]
    impl StatementPreparer for MockPreparer {
        type Statement = Arc<MockStatement>;

        async fn prepare(&self, sql: &str) -> Result<Self::Statement> {
            // Give concurrent callers a chance to interleave.
            tokio::task::yield_now().await;
            if sql.contains("BROKEN") {
                return Err(DaoError::prepare(sql, "syntax error"));
            }
            let id = self.prepared.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockStatement {
                id,
                sql: sql.to_string(),
            }))
        }
    }

    fn registry(prefix: &str) -> StatementRegistry<MockPreparer> {
        StatementRegistry::new(MockPreparer::default(), prefix, false)
    }

    #[test]
    fn test_prefix_replacer() {
        let replacer = PrefixReplacer::new("svc_");
        assert_eq!(
            replacer.apply("SELECT * FROM %PREFIX%a JOIN %%PREFIX%%b"),
            "SELECT * FROM svc_a JOIN svc_b"
        );
        assert_eq!(replacer.apply("SELECT 1"), "SELECT 1");
    }

    #[tokio::test]
    async fn test_literal_prefix_substitution() {
        let reg = registry("svc_");
        reg.register("getUser", "SELECT * FROM %PREFIX%users WHERE id=?");

        let stmt = reg.resolve("getUser", &[]).await.unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM svc_users WHERE id=?");
    }

    #[tokio::test]
    async fn test_unknown_key_not_found_without_mutation() {
        let reg = registry("svc_");
        reg.register("getUser", "SELECT * FROM %PREFIX%users WHERE id=?");

        let err = reg.resolve("unknownKey", &[]).await.unwrap_err();
        assert!(matches!(err, DaoError::StatementNotFound(ref k) if k == "unknownKey"));
        assert_eq!(reg.prepared_count(), 0);
        assert_eq!(reg.registered_keys(), vec!["getUser".to_string()]);
    }

    #[tokio::test]
    async fn test_distinct_keys_share_statement() {
        let reg = registry("svc_");
        reg.register("listActive", "SELECT id FROM %PREFIX%users");
        reg.register("exportIds", "SELECT id FROM %%PREFIX%%users");

        let a = reg.resolve("listActive", &[]).await.unwrap();
        let b = reg.resolve("exportIds", &[]).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.prepared_count(), 1);
    }

    #[tokio::test]
    async fn test_typed_function_shape() {
        let reg = registry("p_");
        reg.register(
            "byLimit",
            StatementDef::typed(|args| match args.first() {
                Some(SqlValue::Int(n)) => format!("SELECT * FROM %PREFIX%nodes LIMIT {}", n),
                _ => "SELECT * FROM %PREFIX%nodes".to_string(),
            }),
        );

        let limited = reg.resolve("byLimit", &[SqlValue::Int(10)]).await.unwrap();
        assert_eq!(limited.sql, "SELECT * FROM p_nodes LIMIT 10");
        let all = reg.resolve("byLimit", &[]).await.unwrap();
        assert_eq!(all.sql, "SELECT * FROM p_nodes");
        assert_eq!(reg.prepared_count(), 2);
    }

    #[tokio::test]
    async fn test_string_function_shape_coerces_arguments() {
        let reg = registry("p_");
        reg.register(
            "inList",
            StatementDef::strings(|args| {
                format!(
                    "SELECT * FROM %PREFIX%acl WHERE role IN ({})",
                    args.join(",")
                )
            }),
        );

        let stmt = reg
            .resolve("inList", &[SqlValue::Int(1), SqlValue::Int(2)])
            .await
            .unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM p_acl WHERE role IN (1,2)");
    }

    #[tokio::test]
    async fn test_with_params_shape() {
        let reg = registry("p_");
        reg.register(
            "byUuid",
            StatementDef::with_params(|args| {
                let placeholders = vec!["?"; args.len()].join(",");
                let sql = format!("SELECT * FROM %PREFIX%idx WHERE uuid IN ({})", placeholders);
                let params = args.iter().cloned().map(SqlValue::Text).collect();
                (sql, params)
            }),
        );

        let (stmt, params) = reg
            .resolve_with_params("byUuid", &[SqlValue::from("a"), SqlValue::from("b")])
            .await
            .unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM p_idx WHERE uuid IN (?,?)");
        assert_eq!(
            params,
            vec![SqlValue::Text("a".into()), SqlValue::Text("b".into())]
        );
    }

    #[tokio::test]
    async fn test_shape_mismatch_errors() {
        let reg = registry("");
        reg.register("literal", "SELECT 1");
        reg.register(
            "params",
            StatementDef::with_params(|_| ("SELECT ?".to_string(), vec![SqlValue::Int(1)])),
        );

        let err = reg.resolve_with_params("literal", &[]).await.unwrap_err();
        assert!(matches!(err, DaoError::UnsupportedShape(_)));

        let err = reg.resolve("params", &[]).await.unwrap_err();
        assert!(matches!(err, DaoError::UnsupportedShape(_)));

        let err = reg.resolve_with_params("missing", &[]).await.unwrap_err();
        assert!(matches!(err, DaoError::StatementNotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_statement() {
        let reg = registry("");
        reg.register(
            "nothing",
            StatementDef::with_params(|_| ("   ".to_string(), Vec::new())),
        );

        let err = reg.resolve_with_params("nothing", &[]).await.unwrap_err();
        assert!(matches!(err, DaoError::EmptyStatement(ref k) if k == "nothing"));
        assert_eq!(reg.prepared_count(), 0);
    }

    #[tokio::test]
    async fn test_reregistration_overwrites_across_shapes() {
        let reg = registry("x_");
        reg.register("q", "SELECT 1");
        reg.register("q", StatementDef::typed(|_| "SELECT 2 FROM %PREFIX%t".into()));

        let stmt = reg.resolve("q", &[]).await.unwrap();
        assert_eq!(stmt.sql, "SELECT 2 FROM x_t");
        assert_eq!(reg.registered_keys().len(), 1);
    }

    #[tokio::test]
    async fn test_prepare_failure_is_not_cached() {
        let reg = registry("");
        reg.register("bad", "SELECT BROKEN");

        let err = reg.resolve("bad", &[]).await.unwrap_err();
        assert!(matches!(err, DaoError::Prepare { .. }));
        assert_eq!(reg.prepared_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolve_prepares_once_per_sql() {
        let reg = Arc::new(registry("svc_"));
        reg.register("getUser", "SELECT * FROM %PREFIX%users WHERE id=?");

        let mut handles = Vec::new();
        for _ in 0..64 {
            let reg = reg.clone();
            handles.push(tokio::spawn(async move {
                reg.resolve("getUser", &[]).await.unwrap()
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().id);
        }

        assert_eq!(reg.prepared_count(), 1);
        let cached = reg.resolve("getUser", &[]).await.unwrap();
        assert!(ids.iter().all(|id| *id == cached.id));
    }

    #[tokio::test]
    async fn test_lock_without_guard_never_blocks() {
        let reg = registry("");
        assert!(!reg.has_writer_guard());

        let first = reg.lock().await;
        let second = tokio::time::timeout(Duration::from_millis(100), reg.lock())
            .await
            .expect("lock without a guard must not block");
        assert!(!first.is_exclusive());
        assert!(!second.is_exclusive());
    }

    #[tokio::test]
    async fn test_single_writer_guard_serializes() {
        let reg = StatementRegistry::new(MockPreparer::default(), "", true);
        assert!(reg.has_writer_guard());

        let held = reg.lock().await;
        assert!(held.is_exclusive());
        let blocked = tokio::time::timeout(Duration::from_millis(50), reg.lock()).await;
        assert!(blocked.is_err());

        drop(held);
        let reacquired = tokio::time::timeout(Duration::from_millis(100), reg.lock()).await;
        assert!(reacquired.is_ok());
    }
}
