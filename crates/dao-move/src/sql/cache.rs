//! Prepared statement cache keyed by final SQL text.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

/// Cache of live prepared statements.
///
/// The key is the fully substituted SQL text, not the registration key, so two
/// registrations that resolve to the same text share one handle. Entries live as
/// long as the cache; there is no eviction.
#[derive(Debug)]
pub struct StatementCache<S> {
    prepared: RwLock<HashMap<String, S>>,
}

impl<S: Clone> StatementCache<S> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            prepared: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a statement under the read lock.
    pub fn get(&self, sql: &str) -> Option<S> {
        let prepared = self
            .prepared
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        prepared.get(sql).cloned()
    }

    /// Insert a freshly prepared statement unless a concurrent caller got there first.
    ///
    /// Returns the cached handle. When another caller already inserted the same
    /// text, `stmt` is dropped and the existing handle is returned.
    pub fn insert_if_absent(&self, sql: String, stmt: S) -> S {
        let mut prepared = self
            .prepared
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = prepared.get(&sql) {
            debug!("Statement already cached by a concurrent caller: {}", sql);
            return existing.clone();
        }
        prepared.insert(sql, stmt.clone());
        stmt
    }

    /// Number of distinct SQL texts with a live statement.
    pub fn len(&self) -> usize {
        self.prepared
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether nothing has been prepared yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a statement exists for the given SQL text.
    pub fn contains(&self, sql: &str) -> bool {
        self.prepared
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(sql)
    }
}

impl<S: Clone> Default for StatementCache<S> {
    fn default() -> Self {
        Self::new()
    }
}
