//! Sessions, row caching and cascades for rowbind.
//!
//! `rowbind-session` is the **unit-of-work layer**. It runs the statements
//! built by `rowbind-query` over a `Connection`, follows declared
//! relationships, and keeps a per-session row cache.
//!
//! # Role In The Architecture
//!
//! - **Executor**: one statement per call, for one record type.
//! - **Cascade engine**: [`Relation`] bindings that insert, update, delete and
//!   load children along with their parent.
//! - **Row cache**: read-only or read-write per record type, staged until
//!   flush.
//! - **Pagination**: [`PaginatedSelect`] with offset/limit or scrolling.
//!
//! # Example
//!
//! ```ignore
//! let conn = Arc::new(SqliteConnection::open_memory()?);
//! let config = SessionConfig::new().cache::<Part>(CachePolicy::ReadWrite);
//! let mut session = Session::new(conn, config)?;
//!
//! session.begin()?;
//! session.insert(&mut Part { part_number: 1234, qty: 99 })?;
//! let part = session.select::<Part>(&[Value::Int(1234)])?;
//! session.commit()?;
//! ```

pub mod cache;
pub mod cascade;
pub mod executor;
pub mod flush;
pub mod paginate;

pub use cache::CachePolicy;
pub use cascade::{ChildSlot, Deferred, Projection, Relation};
pub use executor::RecordCursor;
pub use flush::FlushSummary;
pub use paginate::{PageStrategy, Pages, PaginatedSelect};

use cache::{CacheKey, Lookup, RowCache};
use executor::Selection;
use rowbind_core::{
    Connection, ConnectionProvider, Error, IsolationLevel, MappingError, MappingErrorKind,
    OperationError, OperationKind, Record, RecordType, Result, SharedConnection,
    TransactionError, TransactionErrorKind, Value, relationship::CascadeContext,
};
use rowbind_query::Aggregate;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

// ============================================================================
// Session Configuration
// ============================================================================

type PolicyCheck = fn(CachePolicy) -> Result<()>;

/// Refuse a read-write cache for a type whose keys the database assigns.
fn check_policy<R: Record>(policy: CachePolicy) -> Result<()> {
    let descriptor = RecordType::<R>::get()?;
    if policy == CachePolicy::ReadWrite && descriptor.identity().is_some() {
        return Err(Error::Mapping(MappingError::new(
            MappingErrorKind::InvalidPolicy,
            descriptor.type_name(),
            "read-write caching needs caller-supplied keys; the type has an identity column",
        )));
    }
    Ok(())
}

/// Configuration for Session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Isolation level used by [`Session::begin`].
    pub isolation: IsolationLevel,
    /// Keep cache entries, as clean rows, after a commit.
    pub retain_across_transactions: bool,
    /// Install lazy handles for lazy relationships instead of loading them.
    pub lazy_loading: bool,
    policies: HashMap<TypeId, (CachePolicy, PolicyCheck)>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::default(),
            retain_across_transactions: false,
            lazy_loading: true,
            policies: HashMap::new(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = level;
        self
    }

    /// Cache rows of `R` with `policy`. Types without a policy are not cached.
    #[must_use]
    pub fn cache<R: Record>(mut self, policy: CachePolicy) -> Self {
        self.policies
            .insert(TypeId::of::<R>(), (policy, check_policy::<R>));
        self
    }

    #[must_use]
    pub fn retain_across_transactions(mut self, retain: bool) -> Self {
        self.retain_across_transactions = retain;
        self
    }

    #[must_use]
    pub fn lazy_loading(mut self, enabled: bool) -> Self {
        self.lazy_loading = enabled;
        self
    }

    pub fn policy<R: 'static>(&self) -> Option<CachePolicy> {
        self.policies.get(&TypeId::of::<R>()).map(|(p, _)| *p)
    }
}

// ============================================================================
// Session
// ============================================================================

/// One unit of work over a connection.
///
/// Writes to read-write cached types are staged and reach the database on
/// [`flush`](Session::flush) or [`commit`](Session::commit); everything else
/// runs immediately. Records come back as `Arc<R>`: repeated selects of a
/// cached key return the same instance.
pub struct Session<C: Connection + 'static> {
    connection: Arc<C>,
    /// Handed to lazy relationships; outlives the session.
    provider: Arc<dyn ConnectionProvider>,
    config: SessionConfig,
    cache: RowCache,
    in_transaction: bool,
}

impl<C: Connection + 'static> Session<C> {
    /// Create a session, validating the configured cache policies.
    pub fn new(connection: Arc<C>, config: SessionConfig) -> Result<Self> {
        for (policy, check) in config.policies.values() {
            check(*policy)?;
        }
        let policies = config
            .policies
            .iter()
            .map(|(id, (policy, _))| (*id, *policy))
            .collect();
        let provider: Arc<dyn ConnectionProvider> =
            Arc::new(SharedConnection::new(Arc::clone(&connection)));
        Ok(Self {
            connection,
            provider,
            config,
            cache: RowCache::new(policies),
            in_transaction: false,
        })
    }

    /// A session with the default configuration: no caching, lazy loading on.
    pub fn open(connection: Arc<C>) -> Self {
        let provider: Arc<dyn ConnectionProvider> =
            Arc::new(SharedConnection::new(Arc::clone(&connection)));
        Self {
            connection,
            provider,
            config: SessionConfig::default(),
            cache: RowCache::default(),
            in_transaction: false,
        }
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Number of cached entries for `R`, staged deletes included.
    pub fn cached<R: Record>(&self) -> usize {
        self.cache.len::<R>()
    }

    fn context(&self) -> CascadeContext<'_> {
        CascadeContext::new(self.connection.as_ref())
            .with_provider(Arc::clone(&self.provider))
            .lazy_loading(self.config.lazy_loading)
    }

    // ========================================================================
    // Transaction Management
    // ========================================================================

    /// Begin a transaction at the configured isolation level.
    pub fn begin(&mut self) -> Result<()> {
        self.begin_with(self.config.isolation)
    }

    pub fn begin_with(&mut self, isolation: IsolationLevel) -> Result<()> {
        if self.in_transaction {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::AlreadyActive,
                message: "session already has an open transaction".to_string(),
            }));
        }
        self.connection.begin(isolation)?;
        self.in_transaction = true;
        tracing::debug!(?isolation, "Transaction started");
        Ok(())
    }

    /// Flush staged writes, commit, and end the unit of work.
    ///
    /// Without an open transaction the flush runs in autocommit mode. If the
    /// flush fails, the transaction stays open and staged entries stay
    /// staged; the error lists the keys already written.
    pub fn commit(&mut self) -> Result<FlushSummary> {
        let start = Instant::now();
        let summary = self.flush()?;
        if self.in_transaction {
            self.connection.commit()?;
            self.in_transaction = false;
        }
        self.cache.commit(self.config.retain_across_transactions);
        tracing::info!(
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Session committed"
        );
        Ok(summary)
    }

    /// Roll back the open transaction, if any, and discard staged writes.
    pub fn rollback(&mut self) -> Result<()> {
        let rolled_back = if self.in_transaction {
            self.in_transaction = false;
            self.connection.rollback()
        } else {
            Ok(())
        };
        self.cache.rollback();
        tracing::info!("Session rolled back");
        rolled_back
    }

    /// Write staged entries now, keeping the unit of work open.
    pub fn flush(&mut self) -> Result<FlushSummary> {
        flush::flush(&mut self.cache, self.connection.as_ref())
    }

    /// Forget every cached row, staged writes included. The database is not
    /// touched.
    pub fn evict_all(&mut self) {
        if self.cache.has_pending() {
            tracing::warn!("Evicting staged writes that were never flushed");
        }
        self.cache.clear();
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert `record` and its cascaded children.
    ///
    /// For a read-write cached type the insert is staged and 1 is returned.
    /// Otherwise the rows are written now and any identity value is stored
    /// back into `record`.
    pub fn insert<R: Record>(&mut self, record: &mut R) -> Result<u64> {
        let descriptor = RecordType::<R>::get()?;
        if self.cache.policy::<R>() == Some(CachePolicy::ReadWrite) {
            let key = CacheKey::new(descriptor.key_of(record));
            return self.cache.stage_insert(key, Arc::new(record.clone()));
        }

        let (rows, touched) = {
            let mut ctx = self.context();
            ctx.enter(TypeId::of::<R>(), descriptor.type_name());
            let rows = cascade::insert(&mut ctx, &descriptor, record)?;
            (rows, ctx.touched().to_vec())
        };
        let key = CacheKey::new(descriptor.key_of(record));
        self.cache.invalidate::<R>(&key, &touched);
        Ok(rows)
    }

    /// Insert every record in order.
    ///
    /// A failure is reported as an `OperationError` whose `completed` count
    /// says how many records went in first; those are not undone.
    pub fn insert_all<'r, R: Record>(
        &mut self,
        records: impl IntoIterator<Item = &'r mut R>,
    ) -> Result<u64> {
        let mut total = 0;
        let mut completed = 0;
        for record in records {
            match self.insert(record) {
                Ok(rows) => {
                    total += rows;
                    completed += 1;
                }
                Err(e) => {
                    let descriptor = RecordType::<R>::get()?;
                    return Err(Error::Operation(
                        OperationError::new(
                            OperationKind::InsertAll,
                            descriptor.table(),
                            format!("insert failed after {} record(s): {}", completed, e),
                        )
                        .with_key(descriptor.key_of(record))
                        .with_completed(completed)
                        .with_source(e),
                    ));
                }
            }
        }
        Ok(total)
    }

    /// Update `record` and its cascaded children. 0 means no row matched, or
    /// the key is staged as deleted.
    pub fn update<R: Record>(&mut self, record: &R) -> Result<u64> {
        let descriptor = RecordType::<R>::get()?;
        let key = CacheKey::new(descriptor.key_of(record));
        if self.cache.policy::<R>() == Some(CachePolicy::ReadWrite) {
            return Ok(self.cache.stage_update(key, Arc::new(record.clone())));
        }

        let (rows, touched) = {
            let mut ctx = self.context();
            ctx.enter(TypeId::of::<R>(), descriptor.type_name());
            let rows = cascade::update(&mut ctx, &descriptor, record)?;
            (rows, ctx.touched().to_vec())
        };
        self.cache.invalidate::<R>(&key, &touched);
        Ok(rows)
    }

    /// Delete `record` and its cascaded children. Deleting a key twice is
    /// not an error.
    pub fn delete<R: Record>(&mut self, record: &R) -> Result<u64> {
        let descriptor = RecordType::<R>::get()?;
        let key = CacheKey::new(descriptor.key_of(record));
        if self.cache.policy::<R>() == Some(CachePolicy::ReadWrite) {
            return Ok(self.cache.stage_delete(key, Arc::new(record.clone())));
        }

        let (rows, touched) = {
            let mut ctx = self.context();
            ctx.enter(TypeId::of::<R>(), descriptor.type_name());
            let rows = cascade::delete(&mut ctx, &descriptor, record)?;
            (rows, ctx.touched().to_vec())
        };
        self.cache.invalidate::<R>(&key, &touched);
        Ok(rows)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Select one record by primary key, in primary key field order.
    ///
    /// Cached rows are returned without a query; keys staged as deleted
    /// return `None`.
    pub fn select<R: Record>(&mut self, key: &[Value]) -> Result<Option<Arc<R>>> {
        let descriptor = RecordType::<R>::get()?;
        if key.len() != descriptor.primary_key().len() {
            return Err(Error::Operation(OperationError::new(
                OperationKind::Select,
                descriptor.table(),
                format!(
                    "expected {} key value(s), got {}",
                    descriptor.primary_key().len(),
                    key.len()
                ),
            )));
        }
        let cache_key = CacheKey::new(key.to_vec());
        match self.cache.lookup::<R>(&cache_key) {
            Lookup::Hit(record) => {
                tracing::trace!(record = %descriptor.describe_key(key), "Cache hit");
                return Ok(Some(record));
            }
            Lookup::Hidden => return Ok(None),
            Lookup::Miss => {}
        }

        let loaded = {
            let mut ctx = self.context();
            match executor::select_by_key(ctx.connection(), &descriptor, key)? {
                Some(mut record) => {
                    ctx.enter(TypeId::of::<R>(), descriptor.type_name());
                    cascade::load(&mut ctx, &descriptor, &mut record)?;
                    Some(record)
                }
                None => None,
            }
        };
        Ok(loaded.map(|record| self.cache.admit(cache_key, record)))
    }

    /// Every record matching a named condition, in database order.
    pub fn select_all<R: Record>(
        &mut self,
        condition: Option<&str>,
        params: &[Value],
    ) -> Result<Vec<Arc<R>>> {
        self.select_all_ordered(condition, None, params)
    }

    /// Every record matching a named condition, sorted by a named order.
    ///
    /// For read-write cached types the result reflects staged writes:
    /// staged deletes are left out and staged inserts that match are added.
    pub fn select_all_ordered<R: Record>(
        &mut self,
        condition: Option<&str>,
        order: Option<&str>,
        params: &[Value],
    ) -> Result<Vec<Arc<R>>> {
        let descriptor = RecordType::<R>::get()?;
        let condition = condition.filter(|c| !c.is_empty());
        let order = order.filter(|o| !o.is_empty());
        let rows: Vec<R> = executor::open_cursor(
            self.context(),
            Arc::clone(&descriptor),
            &Selection::Named { condition, order },
            params,
        )?
        .collect::<Result<_>>()?;

        let condition = condition.map(|c| descriptor.condition(c)).transpose()?;
        let order = order.map(|o| descriptor.order(o)).transpose()?;
        Ok(self
            .cache
            .overlay(&descriptor, condition, order, params, rows))
    }

    /// A lazy cursor over matching records. Bypasses the cache; relationships
    /// still cascade as each row is read.
    pub fn cursor<R: Record>(
        &self,
        condition: Option<&str>,
        order: Option<&str>,
        params: &[Value],
    ) -> Result<RecordCursor<'_, R>> {
        executor::open_cursor(
            self.context(),
            RecordType::<R>::get()?,
            &Selection::Named { condition, order },
            params,
        )
    }

    // ========================================================================
    // Aggregates
    // ========================================================================

    /// Run an aggregate over a field or named expression. Staged writes are
    /// not visible until flushed.
    pub fn aggregate<R: Record>(
        &self,
        function: Aggregate,
        target: &str,
        condition: Option<&str>,
        params: &[Value],
    ) -> Result<Value> {
        let descriptor = RecordType::<R>::get()?;
        executor::aggregate(
            self.connection.as_ref(),
            &descriptor,
            function,
            target,
            condition,
            params,
        )
    }

    /// Number of rows matching a named condition.
    pub fn count<R: Record>(&self, condition: Option<&str>, params: &[Value]) -> Result<u64> {
        let value = self.aggregate::<R>(Aggregate::Count, "*", condition, params)?;
        value
            .as_i64()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| {
                Error::Operation(OperationError::new(
                    OperationKind::Aggregate,
                    short_table::<R>(),
                    format!("COUNT returned {}", value.type_name()),
                ))
            })
    }

    pub fn sum<R: Record>(&self, target: &str, condition: Option<&str>, params: &[Value]) -> Result<Value> {
        self.aggregate::<R>(Aggregate::Sum, target, condition, params)
    }

    pub fn avg<R: Record>(&self, target: &str, condition: Option<&str>, params: &[Value]) -> Result<Value> {
        self.aggregate::<R>(Aggregate::Avg, target, condition, params)
    }

    pub fn min<R: Record>(&self, target: &str, condition: Option<&str>, params: &[Value]) -> Result<Value> {
        self.aggregate::<R>(Aggregate::Min, target, condition, params)
    }

    pub fn max<R: Record>(&self, target: &str, condition: Option<&str>, params: &[Value]) -> Result<Value> {
        self.aggregate::<R>(Aggregate::Max, target, condition, params)
    }

    // ========================================================================
    // Pagination
    // ========================================================================

    /// Split a select into pages of `page_size` rows.
    pub fn paginate<R: Record>(
        &self,
        condition: Option<&str>,
        order: Option<&str>,
        params: Vec<Value>,
        page_size: u64,
    ) -> Result<PaginatedSelect<'_, R>> {
        Ok(
            PaginatedSelect::new(self.connection.as_ref(), condition, order, params, page_size)?
                .with_provider(Arc::clone(&self.provider), self.config.lazy_loading),
        )
    }
}

fn short_table<R: Record>() -> String {
    RecordType::<R>::get().map_or_else(
        |_| rowbind_core::short_type_name::<R>().to_string(),
        |d| d.table().to_string(),
    )
}

impl<C: Connection + 'static> Drop for Session<C> {
    fn drop(&mut self) {
        if self.in_transaction {
            tracing::warn!("Session dropped with an open transaction; rollback is left to the connection");
        }
        if self.cache.has_pending() {
            tracing::warn!("Session dropped with staged writes that were never flushed");
        }
    }
}

impl<C: Connection + 'static> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("in_transaction", &self.in_transaction)
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
