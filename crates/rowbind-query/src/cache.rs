//! Caching of built statements.
//!
//! Descriptors never change after they are built, so the statement for a
//! given record type, dialect and shape is always the same text. The cache
//! keeps the most recently used ones and evicts the least recently used when
//! full.

use crate::builder::Aggregate;
use crate::statement::Statement;
use rowbind_core::{Dialect, Result};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Shape of a statement, independent of the values bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select {
        condition: Option<String>,
        order: Option<String>,
    },
    Page {
        condition: Option<String>,
        order: Option<String>,
        limit: u64,
        offset: u64,
    },
    Insert,
    Update,
    Delete,
    Aggregate {
        function: Aggregate,
        target: String,
        condition: Option<String>,
    },
}

/// Cache key: record type, dialect and statement shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatementKey {
    pub record: TypeId,
    pub dialect: Dialect,
    pub kind: StatementKind,
}

#[derive(Debug, Clone)]
struct CachedStatement {
    statement: Arc<Statement>,
    last_used: Instant,
    hit_count: u64,
}

/// LRU-style cache for built statements.
///
/// ```
/// use rowbind_core::Dialect;
/// use rowbind_query::{Statement, StatementCache, StatementKey, StatementKind};
/// use std::any::TypeId;
///
/// let mut cache = StatementCache::new(16);
/// let key = StatementKey {
///     record: TypeId::of::<u8>(),
///     dialect: Dialect::Sqlite,
///     kind: StatementKind::Delete,
/// };
/// let build = || {
///     Ok(Statement {
///         sql: "DELETE FROM \"t\" WHERE \"id\" = ?1".to_string(),
///         params: Vec::new(),
///         columns: Vec::new(),
///         arguments: 0,
///     })
/// };
/// let first = cache.get_or_build(key.clone(), build).unwrap();
/// let second = cache.get_or_build(key, || unreachable!()).unwrap();
/// assert!(std::sync::Arc::ptr_eq(&first, &second));
/// ```
#[derive(Debug)]
pub struct StatementCache {
    cache: HashMap<StatementKey, CachedStatement>,
    max_size: usize,
}

impl StatementCache {
    /// Create a new cache with the given maximum number of entries.
    pub fn new(max_size: usize) -> Self {
        Self {
            cache: HashMap::with_capacity(max_size.min(256)),
            max_size: max_size.max(1),
        }
    }

    /// Get a cached statement or build and insert it.
    ///
    /// The `build` closure is only called on a miss. Build errors are
    /// returned and nothing is cached.
    pub fn get_or_build(
        &mut self,
        key: StatementKey,
        build: impl FnOnce() -> Result<Statement>,
    ) -> Result<Arc<Statement>> {
        if let Some(entry) = self.cache.get_mut(&key) {
            entry.last_used = Instant::now();
            entry.hit_count += 1;
            return Ok(Arc::clone(&entry.statement));
        }

        let statement = Arc::new(build()?);
        if self.cache.len() >= self.max_size {
            self.evict_lru();
        }
        self.cache.insert(
            key,
            CachedStatement {
                statement: Arc::clone(&statement),
                last_used: Instant::now(),
                hit_count: 0,
            },
        );
        Ok(statement)
    }

    /// Check if a statement is cached.
    pub fn contains(&self, key: &StatementKey) -> bool {
        self.cache.contains_key(key)
    }

    /// Times a cached statement was reused.
    pub fn hits(&self, key: &StatementKey) -> Option<u64> {
        self.cache.get(key).map(|e| e.hit_count)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Clear all cached statements.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    fn evict_lru(&mut self) {
        if let Some(lru_key) = self
            .cache
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(k, _)| k.clone())
        {
            self.cache.remove(&lru_key);
        }
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new(1024)
    }
}
