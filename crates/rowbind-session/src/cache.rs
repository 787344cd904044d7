//! Per-session row cache.
//!
//! Each record type opts in with a [`CachePolicy`]. Read-only tables hand
//! out shared instances and are invalidated by writes; read-write tables
//! stage every write until the session flushes.
//!
//! Entry lifecycle for one key of a read-write table:
//!
//! ```text
//! absent ──select──▶ clean ──update──▶ updated ─┐
//!    │                 │                         ├─flush─▶ clean
//!    └──insert──▶ inserted ◀──insert── deleted ──┘
//!                                         │ flush
//!                                         ▼
//!                                      removed ──commit──▶ absent
//! ```
//!
//! Rollback puts every touched entry back to what it was before the unit of
//! work started.

use crate::cascade;
use rowbind_core::{
    Connection, DuplicateCacheError, Error, OrderSpec, Record, RecordType, Result, Value,
    WhereCondition, relationship::CascadeContext,
};
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// How a session caches one record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Shared instances; writes go to the database and evict the key.
    ReadOnly,
    /// Writes are staged and applied on flush or commit.
    ReadWrite,
}

// ============================================================================
// Keys
// ============================================================================

/// Primary key values of one cached row.
#[derive(Debug, Clone)]
pub(crate) struct CacheKey(Vec<Value>);

impl CacheKey {
    pub(crate) fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub(crate) fn values(&self) -> &[Value] {
        &self.0
    }
}

/// Tag each variant so `Int(1)` and `Text("1")` never collide.
fn hash_value(value: &Value, state: &mut impl Hasher) {
    match value {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        // Integers of every width hash alike so a key read back as BigInt
        // finds the entry staged as Int.
        Value::TinyInt(i) => {
            2u8.hash(state);
            i64::from(*i).hash(state);
        }
        Value::SmallInt(i) => {
            2u8.hash(state);
            i64::from(*i).hash(state);
        }
        Value::Int(i) => {
            2u8.hash(state);
            i64::from(*i).hash(state);
        }
        Value::BigInt(i) => {
            2u8.hash(state);
            i.hash(state);
        }
        Value::Float(f) => {
            3u8.hash(state);
            f64::from(*f).to_bits().hash(state);
        }
        Value::Double(f) => {
            3u8.hash(state);
            f.to_bits().hash(state);
        }
        Value::Decimal(s) => {
            4u8.hash(state);
            s.hash(state);
        }
        Value::Text(s) => {
            5u8.hash(state);
            s.hash(state);
        }
        Value::Bytes(b) => {
            6u8.hash(state);
            b.hash(state);
        }
        Value::Date(d) => {
            7u8.hash(state);
            d.hash(state);
        }
        Value::Time(t) => {
            8u8.hash(state);
            t.hash(state);
        }
        Value::Timestamp(t) => {
            9u8.hash(state);
            t.hash(state);
        }
        Value::Uuid(u) => {
            10u8.hash(state);
            u.hash(state);
        }
        Value::Json(j) => {
            11u8.hash(state);
            j.to_string().hash(state);
        }
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::TinyInt(i) => Some(i64::from(*i)),
        Value::SmallInt(i) => Some(i64::from(*i)),
        Value::Int(i) => Some(i64::from(*i)),
        Value::BigInt(i) => Some(*i),
        _ => None,
    }
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
        (Value::Float(x), Value::Double(y)) | (Value::Double(y), Value::Float(x)) => {
            f64::from(*x).to_bits() == y.to_bits()
        }
        _ => match (as_integer(a), as_integer(b)) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
    }
}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for value in &self.0 {
            hash_value(value, state);
        }
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| same_value(a, b))
    }
}

impl Eq for CacheKey {}

// ============================================================================
// Entries
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryState {
    Clean,
    Inserted,
    Updated,
    Deleted,
    /// Delete flushed; hidden until the unit of work ends.
    Removed,
}

impl EntryState {
    fn is_pending(self) -> bool {
        matches!(self, Self::Inserted | Self::Updated | Self::Deleted)
    }

    fn is_hidden(self) -> bool {
        matches!(self, Self::Deleted | Self::Removed)
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Inserted => "inserted",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Removed => "removed",
        }
    }
}

/// What rollback restores an entry to.
#[derive(Debug, Clone)]
enum Baseline<R> {
    /// Not touched in this unit of work.
    Untouched,
    /// Was clean with this instance.
    Restore(Arc<R>),
    /// Did not exist.
    Absent,
}

#[derive(Debug)]
struct Entry<R> {
    current: Arc<R>,
    /// Row still in the database that a staged insert replaces.
    replaced: Option<Arc<R>>,
    baseline: Baseline<R>,
    state: EntryState,
    seq: u64,
}

impl<R> Entry<R> {
    fn clean(record: Arc<R>) -> Self {
        Self {
            current: record,
            replaced: None,
            baseline: Baseline::Untouched,
            state: EntryState::Clean,
            seq: 0,
        }
    }

    fn staged(record: Arc<R>, state: EntryState, seq: u64) -> Self {
        Self {
            current: record,
            replaced: None,
            baseline: Baseline::Absent,
            state,
            seq,
        }
    }

    /// Remember the pre-transaction state the first time this entry is
    /// touched.
    fn touch(&mut self, seq: u64) {
        if matches!(self.baseline, Baseline::Untouched) {
            self.baseline = Baseline::Restore(Arc::clone(&self.current));
            self.seq = seq;
        }
    }
}

/// Result of a cache lookup.
#[derive(Debug)]
pub(crate) enum Lookup<R> {
    Hit(Arc<R>),
    /// Staged or flushed as deleted.
    Hidden,
    Miss,
}

/// A staged operation that a flush applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Applied {
    Inserted,
    Updated,
    Deleted,
}

// ============================================================================
// Tables
// ============================================================================

struct Table<R> {
    policy: CachePolicy,
    entries: HashMap<CacheKey, Entry<R>>,
}

impl<R: Record> Table<R> {
    fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
        }
    }

    fn duplicate(key: &CacheKey, state: EntryState) -> Error {
        let table = RecordType::<R>::get()
            .map(|d| d.table().to_string())
            .unwrap_or_else(|_| rowbind_core::short_type_name::<R>().to_string());
        Error::DuplicateCache(DuplicateCacheError {
            table,
            key: key.values().to_vec(),
            state: state.as_str(),
        })
    }

    fn stage_insert(&mut self, key: CacheKey, record: Arc<R>, seq: u64) -> Result<u64> {
        let Some(entry) = self.entries.get_mut(&key) else {
            self.entries
                .insert(key, Entry::staged(record, EntryState::Inserted, seq));
            return Ok(1);
        };
        match entry.state {
            EntryState::Clean | EntryState::Inserted | EntryState::Updated => {
                Err(Self::duplicate(&key, entry.state))
            }
            EntryState::Deleted => {
                entry.replaced = Some(std::mem::replace(&mut entry.current, record));
                entry.state = EntryState::Inserted;
                Ok(1)
            }
            EntryState::Removed => {
                entry.current = record;
                entry.state = EntryState::Inserted;
                Ok(1)
            }
        }
    }

    fn stage_update(&mut self, key: CacheKey, record: Arc<R>, seq: u64) -> u64 {
        let Some(entry) = self.entries.get_mut(&key) else {
            self.entries
                .insert(key, Entry::staged(record, EntryState::Updated, seq));
            return 1;
        };
        match entry.state {
            EntryState::Deleted | EntryState::Removed => 0,
            EntryState::Clean => {
                entry.touch(seq);
                entry.current = record;
                entry.state = EntryState::Updated;
                1
            }
            EntryState::Inserted | EntryState::Updated => {
                entry.current = record;
                1
            }
        }
    }

    fn stage_delete(&mut self, key: CacheKey, record: Arc<R>, seq: u64) -> u64 {
        let Some(entry) = self.entries.get_mut(&key) else {
            self.entries
                .insert(key, Entry::staged(record, EntryState::Deleted, seq));
            return 1;
        };
        match entry.state {
            EntryState::Deleted | EntryState::Removed => 0,
            EntryState::Clean => {
                entry.touch(seq);
                entry.current = record;
                entry.state = EntryState::Deleted;
                1
            }
            EntryState::Updated => {
                entry.current = record;
                entry.state = EntryState::Deleted;
                1
            }
            EntryState::Inserted => {
                if let Some(replaced) = entry.replaced.take() {
                    // Back to deleting the row that is still stored.
                    entry.current = replaced;
                    entry.state = EntryState::Deleted;
                } else if matches!(entry.baseline, Baseline::Absent) {
                    self.entries.remove(&key);
                } else {
                    entry.state = EntryState::Removed;
                }
                1
            }
        }
    }

    fn lookup(&self, key: &CacheKey) -> Lookup<R> {
        match self.entries.get(key) {
            Some(entry) if entry.state.is_hidden() => Lookup::Hidden,
            Some(entry) => Lookup::Hit(Arc::clone(&entry.current)),
            None => Lookup::Miss,
        }
    }

    /// Cache a row read from the database, or return the instance already
    /// cached for its key.
    fn admit(&mut self, key: CacheKey, record: R) -> Arc<R> {
        match self.entries.get(&key) {
            Some(entry) if !entry.state.is_hidden() => Arc::clone(&entry.current),
            Some(_) => Arc::new(record),
            None => {
                let record = Arc::new(record);
                self.entries.insert(key, Entry::clean(Arc::clone(&record)));
                record
            }
        }
    }

    /// Merge database rows with staged state.
    fn overlay(
        &mut self,
        descriptor: &RecordType<R>,
        condition: Option<&WhereCondition>,
        order: Option<&OrderSpec>,
        params: &[Value],
        rows: Vec<R>,
    ) -> Vec<Arc<R>> {
        let qualifies = |record: &R| {
            condition.is_none_or(|c| descriptor.matches(c, record, params) == Some(true))
        };
        let mut seen = HashSet::new();
        let mut merged = Vec::with_capacity(rows.len());
        for row in rows {
            let key = CacheKey::new(descriptor.key_of(&row));
            match self.entries.get(&key) {
                Some(entry) if entry.state.is_hidden() => {}
                Some(entry) if entry.state.is_pending() => {
                    // Unsupported operators evaluate to None; trust the database then.
                    let keep = condition.is_none_or(|c| {
                        descriptor.matches(c, &entry.current, params) != Some(false)
                    });
                    if keep {
                        merged.push(Arc::clone(&entry.current));
                    }
                    seen.insert(key);
                }
                _ => {
                    seen.insert(key.clone());
                    merged.push(self.admit(key, row));
                }
            }
        }

        if self.policy == CachePolicy::ReadWrite {
            let mut staged: Vec<_> = self
                .entries
                .iter()
                .filter(|(key, entry)| {
                    matches!(entry.state, EntryState::Inserted | EntryState::Updated)
                        && !seen.contains(*key)
                        && qualifies(entry.current.as_ref())
                })
                .map(|(_, entry)| (entry.seq, Arc::clone(&entry.current)))
                .collect();
            staged.sort_by_key(|(seq, _)| *seq);
            merged.extend(staged.into_iter().map(|(_, record)| record));
        }

        if let Some(order) = order {
            merged.sort_by(|a, b| descriptor.compare(order, a, b));
        }
        merged
    }
}

/// Type-erased view of a [`Table`], so one cache holds every record type.
trait AnyTable: Send {
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn pending(&self) -> Vec<(u64, CacheKey)>;
    fn apply(
        &mut self,
        connection: &dyn Connection,
        key: &CacheKey,
    ) -> Result<Option<(Applied, Vec<TypeId>)>>;
    fn invalidate_clean(&mut self);
    fn commit(&mut self, retain: bool);
    fn rollback(&mut self);
    fn clear(&mut self);
    fn len(&self) -> usize;
}

impl<R: Record> AnyTable for Table<R> {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn pending(&self) -> Vec<(u64, CacheKey)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state.is_pending())
            .map(|(k, e)| (e.seq, k.clone()))
            .collect()
    }

    /// Write one staged entry through the cascade engine.
    fn apply(
        &mut self,
        connection: &dyn Connection,
        key: &CacheKey,
    ) -> Result<Option<(Applied, Vec<TypeId>)>> {
        let Some(entry) = self.entries.get_mut(key) else {
            return Ok(None);
        };
        let descriptor = RecordType::<R>::get()?;
        let mut ctx = CascadeContext::new(connection);
        ctx.enter(TypeId::of::<R>(), descriptor.type_name());

        let applied = match entry.state {
            EntryState::Clean | EntryState::Removed => return Ok(None),
            EntryState::Inserted => {
                if let Some(replaced) = &entry.replaced {
                    cascade::delete(&mut ctx, &descriptor, replaced)?;
                    entry.replaced = None;
                }
                let mut record = R::clone(&entry.current);
                cascade::insert(&mut ctx, &descriptor, &mut record)?;
                entry.current = Arc::new(record);
                entry.state = EntryState::Clean;
                Applied::Inserted
            }
            EntryState::Updated => {
                cascade::update(&mut ctx, &descriptor, &entry.current)?;
                entry.state = EntryState::Clean;
                Applied::Updated
            }
            EntryState::Deleted => {
                cascade::delete(&mut ctx, &descriptor, &entry.current)?;
                entry.state = EntryState::Removed;
                Applied::Deleted
            }
        };
        let own = TypeId::of::<R>();
        let touched = ctx.touched().iter().copied().filter(|t| *t != own).collect();
        Ok(Some((applied, touched)))
    }

    fn invalidate_clean(&mut self) {
        self.entries.retain(|_, e| {
            e.state != EntryState::Clean || !matches!(e.baseline, Baseline::Untouched)
        });
    }

    fn commit(&mut self, retain: bool) {
        if !retain {
            self.entries.clear();
            return;
        }
        self.entries.retain(|_, e| e.state != EntryState::Removed);
        for entry in self.entries.values_mut() {
            entry.baseline = Baseline::Untouched;
            entry.state = EntryState::Clean;
            entry.replaced = None;
        }
    }

    fn rollback(&mut self) {
        self.entries.retain(|_, entry| {
            match std::mem::replace(&mut entry.baseline, Baseline::Untouched) {
                Baseline::Untouched => true,
                Baseline::Absent => false,
                Baseline::Restore(original) => {
                    entry.current = original;
                    entry.replaced = None;
                    entry.state = EntryState::Clean;
                    true
                }
            }
        });
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Row cache for one session.
#[derive(Default)]
pub(crate) struct RowCache {
    tables: HashMap<TypeId, Box<dyn AnyTable>>,
    policies: HashMap<TypeId, CachePolicy>,
    seq: u64,
}

impl RowCache {
    pub(crate) fn new(policies: HashMap<TypeId, CachePolicy>) -> Self {
        Self {
            tables: HashMap::new(),
            policies,
            seq: 0,
        }
    }

    pub(crate) fn policy<R: 'static>(&self) -> Option<CachePolicy> {
        self.policies.get(&TypeId::of::<R>()).copied()
    }

    fn table<R: Record>(&mut self) -> Option<&mut Table<R>> {
        let policy = self.policy::<R>()?;
        self.tables
            .entry(TypeId::of::<R>())
            .or_insert_with(|| Box::new(Table::<R>::new(policy)))
            .as_any_mut()
            .downcast_mut::<Table<R>>()
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    pub(crate) fn stage_insert<R: Record>(&mut self, key: CacheKey, record: Arc<R>) -> Result<u64> {
        let seq = self.next_seq();
        match self.table::<R>() {
            Some(table) => table.stage_insert(key, record, seq),
            None => Ok(0),
        }
    }

    pub(crate) fn stage_update<R: Record>(&mut self, key: CacheKey, record: Arc<R>) -> u64 {
        let seq = self.next_seq();
        self.table::<R>()
            .map_or(0, |table| table.stage_update(key, record, seq))
    }

    pub(crate) fn stage_delete<R: Record>(&mut self, key: CacheKey, record: Arc<R>) -> u64 {
        let seq = self.next_seq();
        self.table::<R>()
            .map_or(0, |table| table.stage_delete(key, record, seq))
    }

    pub(crate) fn lookup<R: Record>(&mut self, key: &CacheKey) -> Lookup<R> {
        self.table::<R>().map_or(Lookup::Miss, |table| table.lookup(key))
    }

    /// Cache a row read from the database. Uncached types get a fresh `Arc`.
    pub(crate) fn admit<R: Record>(&mut self, key: CacheKey, record: R) -> Arc<R> {
        match self.table::<R>() {
            Some(table) => table.admit(key, record),
            None => Arc::new(record),
        }
    }

    pub(crate) fn overlay<R: Record>(
        &mut self,
        descriptor: &RecordType<R>,
        condition: Option<&WhereCondition>,
        order: Option<&OrderSpec>,
        params: &[Value],
        rows: Vec<R>,
    ) -> Vec<Arc<R>> {
        match self.table::<R>() {
            Some(table) => table.overlay(descriptor, condition, order, params, rows),
            None => rows.into_iter().map(Arc::new).collect(),
        }
    }

    /// Drop `key` of `R` and the clean entries of every other type in
    /// `touched`, after a write that bypassed staging.
    pub(crate) fn invalidate<R: Record>(&mut self, key: &CacheKey, touched: &[TypeId]) {
        if let Some(table) = self.table::<R>() {
            table.entries.remove(key);
        }
        self.invalidate_types(touched, TypeId::of::<R>());
    }

    pub(crate) fn invalidate_types(&mut self, touched: &[TypeId], except: TypeId) {
        for type_id in touched {
            if *type_id == except {
                continue;
            }
            if let Some(table) = self.tables.get_mut(type_id) {
                table.invalidate_clean();
            }
        }
    }

    /// Staged entries across all types, in first-touch order.
    pub(crate) fn pending(&self) -> Vec<(TypeId, CacheKey)> {
        let mut all: Vec<(u64, TypeId, CacheKey)> = self
            .tables
            .iter()
            .flat_map(|(type_id, table)| {
                table
                    .pending()
                    .into_iter()
                    .map(move |(seq, key)| (seq, *type_id, key))
            })
            .collect();
        all.sort_by_key(|(seq, _, _)| *seq);
        all.into_iter().map(|(_, t, k)| (t, k)).collect()
    }

    pub(crate) fn apply(
        &mut self,
        connection: &dyn Connection,
        type_id: TypeId,
        key: &CacheKey,
    ) -> Result<Option<Applied>> {
        let Some(table) = self.tables.get_mut(&type_id) else {
            return Ok(None);
        };
        let Some((applied, touched)) = table.apply(connection, key)? else {
            return Ok(None);
        };
        self.invalidate_types(&touched, type_id);
        Ok(Some(applied))
    }

    pub(crate) fn commit(&mut self, retain: bool) {
        for table in self.tables.values_mut() {
            table.commit(retain);
        }
        self.seq = 0;
    }

    pub(crate) fn rollback(&mut self) {
        for table in self.tables.values_mut() {
            table.rollback();
        }
        self.seq = 0;
    }

    pub(crate) fn clear(&mut self) {
        for table in self.tables.values_mut() {
            table.clear();
        }
    }

    /// Number of cached entries of `R`, hidden ones included.
    pub(crate) fn len<R: Record>(&self) -> usize {
        self.tables
            .get(&TypeId::of::<R>())
            .map_or(0, |table| table.len())
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.tables.values().any(|t| !t.pending().is_empty())
    }

    #[cfg(test)]
    fn state<R: Record>(&mut self, key: &CacheKey) -> Option<EntryState> {
        self.tables
            .get_mut(&TypeId::of::<R>())?
            .as_any_mut()
            .downcast_mut::<Table<R>>()?
            .entries
            .get(key)
            .map(|e| e.state)
    }
}

impl std::fmt::Debug for RowCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowCache")
            .field("tables", &self.tables.len())
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowbind_core::{FieldType, RecordConfig, field};

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Bin {
        code: String,
        qty: i32,
    }

    impl Record for Bin {
        fn mapping() -> RecordConfig<Self> {
            RecordConfig::new()
                .field(field!(Bin, code, FieldType::Text))
                .field(field!(Bin, qty, FieldType::Int32))
        }
    }

    fn bin(code: &str, qty: i32) -> Arc<Bin> {
        Arc::new(Bin {
            code: code.to_string(),
            qty,
        })
    }

    fn key(code: &str) -> CacheKey {
        CacheKey::new(vec![Value::Text(code.to_string())])
    }

    fn cache() -> RowCache {
        let mut policies = HashMap::new();
        policies.insert(TypeId::of::<Bin>(), CachePolicy::ReadWrite);
        RowCache::new(policies)
    }

    #[test]
    fn integer_widths_share_a_key() {
        let a = CacheKey::new(vec![Value::Int(7)]);
        let b = CacheKey::new(vec![Value::BigInt(7)]);
        assert_eq!(a, b);
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert_ne!(
            CacheKey::new(vec![Value::Int(1)]),
            CacheKey::new(vec![Value::Text("1".into())])
        );
    }

    #[test]
    fn delete_then_insert_returns_the_inserted_instance() {
        let mut cache = cache();
        cache.admit(key("a"), Bin::clone(&bin("a", 1)));
        assert_eq!(cache.stage_delete(key("a"), bin("a", 1)), 1);
        assert!(matches!(cache.lookup::<Bin>(&key("a")), Lookup::Hidden));

        let fresh = bin("a", 2);
        cache.stage_insert(key("a"), Arc::clone(&fresh)).unwrap();
        match cache.lookup::<Bin>(&key("a")) {
            Lookup::Hit(found) => assert!(Arc::ptr_eq(&found, &fresh)),
            other => panic!("unexpected lookup: {other:?}"),
        }
        assert_eq!(cache.state::<Bin>(&key("a")), Some(EntryState::Inserted));
    }

    #[test]
    fn delete_then_update_is_a_no_op() {
        let mut cache = cache();
        cache.stage_delete(key("a"), bin("a", 1));
        assert_eq!(cache.stage_update(key("a"), bin("a", 5)), 0);
        assert_eq!(cache.state::<Bin>(&key("a")), Some(EntryState::Deleted));
    }

    #[test]
    fn repeated_delete_is_idempotent() {
        let mut cache = cache();
        assert_eq!(cache.stage_delete(key("a"), bin("a", 1)), 1);
        assert_eq!(cache.stage_delete(key("a"), bin("a", 1)), 0);
        assert_eq!(cache.pending().len(), 1);
    }

    #[test]
    fn insert_over_clean_is_a_duplicate() {
        let mut cache = cache();
        cache.admit(key("a"), Bin::clone(&bin("a", 1)));
        let err = cache.stage_insert(key("a"), bin("a", 2)).unwrap_err();
        assert!(matches!(
            err,
            Error::DuplicateCache(DuplicateCacheError { state: "clean", .. })
        ));

        cache.stage_insert(key("b"), bin("b", 1)).unwrap();
        assert!(matches!(
            cache.stage_insert(key("b"), bin("b", 1)),
            Err(Error::DuplicateCache(_))
        ));
    }

    #[test]
    fn insert_then_delete_cancels() {
        let mut cache = cache();
        cache.stage_insert(key("a"), bin("a", 1)).unwrap();
        cache.stage_delete(key("a"), bin("a", 1));
        assert!(cache.pending().is_empty());
        assert!(matches!(cache.lookup::<Bin>(&key("a")), Lookup::Miss));
    }

    #[test]
    fn rollback_restores_clean_entries() {
        let mut cache = cache();
        let original = cache.admit(key("a"), Bin::clone(&bin("a", 1)));
        cache.stage_update(key("a"), bin("a", 9));
        cache.stage_insert(key("b"), bin("b", 1)).unwrap();
        cache.rollback();

        match cache.lookup::<Bin>(&key("a")) {
            Lookup::Hit(found) => assert!(Arc::ptr_eq(&found, &original)),
            other => panic!("unexpected lookup: {other:?}"),
        }
        assert!(matches!(cache.lookup::<Bin>(&key("b")), Lookup::Miss));
        assert!(!cache.has_pending());
    }

    #[test]
    fn pending_follows_first_touch() {
        let mut cache = cache();
        cache.stage_insert(key("b"), bin("b", 1)).unwrap();
        cache.stage_insert(key("a"), bin("a", 1)).unwrap();
        cache.stage_update(key("b"), bin("b", 2));
        let order: Vec<_> = cache
            .pending()
            .into_iter()
            .map(|(_, k)| k.values().to_vec())
            .collect();
        assert_eq!(
            order,
            vec![vec![Value::Text("b".into())], vec![Value::Text("a".into())]]
        );
    }

    #[test]
    fn commit_without_retention_empties_the_cache() {
        let mut cache = cache();
        cache.admit(key("a"), Bin::clone(&bin("a", 1)));
        cache.commit(false);
        assert_eq!(cache.len::<Bin>(), 0);
    }

    #[test]
    fn uncached_types_are_not_staged() {
        let mut cache = RowCache::default();
        assert_eq!(cache.stage_insert(key("a"), bin("a", 1)).unwrap(), 0);
        assert!(matches!(cache.lookup::<Bin>(&key("a")), Lookup::Miss));
    }
}
