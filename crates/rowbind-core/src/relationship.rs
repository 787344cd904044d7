//! Relationship metadata, the cascade traversal context and lazy values.
//!
//! The descriptor of a parent record type holds its relationships as
//! `Arc<dyn RelationshipBinding<P>>`. The session crate provides the concrete
//! binding (`Relation<P, C>`) that knows how to run child operations; this
//! crate only fixes the contract, so descriptors can hold relationships
//! without depending on the executor.

use crate::connection::{Connection, ConnectionProvider};
use crate::descriptor::RecordType;
use crate::error::{Error, LazyCascadeError, Result};
use std::any::TypeId;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// How many child records a relationship holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// At most one child: `Order` has one `Invoice`.
    OneToOne,
    /// An ordered collection: `Order` has many `OrderLine`s.
    OneToMany,
    /// A collection keyed by a value extracted from each child.
    OneToManyKeyed,
}

/// Which parent operations a relationship cascades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeOps {
    pub select: bool,
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
}

impl CascadeOps {
    pub const ALL: Self = Self {
        select: true,
        insert: true,
        update: true,
        delete: true,
    };

    pub const NONE: Self = Self {
        select: false,
        insert: false,
        update: false,
        delete: false,
    };

    pub const SELECT: Self = Self {
        select: true,
        ..Self::NONE
    };

    /// Everything except select: children are written with the parent but
    /// loaded separately.
    pub const WRITES: Self = Self {
        select: false,
        ..Self::ALL
    };
}

impl Default for CascadeOps {
    fn default() -> Self {
        Self::ALL
    }
}

/// A declared relationship from parent type `P` to some child type.
///
/// `validate` runs while the parent descriptor is being built and may only
/// inspect the parent side; the child descriptor is resolved when the cascade
/// first runs, so mutually referential types never recurse during
/// descriptor construction.
pub trait RelationshipBinding<P>: Send + Sync {
    fn name(&self) -> &str;

    /// `TypeId` of the child record type.
    fn target_type(&self) -> TypeId;

    /// Short name of the child record type.
    fn target_name(&self) -> &'static str;

    fn cardinality(&self) -> Cardinality;

    fn is_lazy(&self) -> bool;

    /// Copy the parent key into the children's foreign key fields on insert.
    fn propagates_foreign_key(&self) -> bool;

    /// Run child updates and deletes before the parent's.
    fn children_first(&self) -> bool;

    fn cascades(&self) -> CascadeOps;

    /// `(parent field, child field)` pairs joining the two types.
    fn key_map(&self) -> &[(&'static str, &'static str)];

    /// Check the parent side of the mapping.
    fn validate(&self, parent: &RecordType<P>) -> Result<()>;

    /// Insert the children held by `parent`. Returns child rows inserted.
    fn insert(&self, ctx: &mut CascadeContext<'_>, parent: &mut P) -> Result<u64>;

    /// Update the children held by `parent`.
    fn update(&self, ctx: &mut CascadeContext<'_>, parent: &P) -> Result<u64>;

    /// Delete the children held by `parent`.
    fn delete(&self, ctx: &mut CascadeContext<'_>, parent: &P) -> Result<u64>;

    /// Load the children of a freshly materialized `parent`, or install a
    /// lazy handle for them.
    fn select(&self, ctx: &mut CascadeContext<'_>, parent: &mut P) -> Result<()>;
}

/// State carried through one cascaded operation.
///
/// The stack holds every record type currently being processed; a
/// relationship whose target is already on it is not followed.
pub struct CascadeContext<'c> {
    connection: &'c dyn Connection,
    provider: Option<Arc<dyn ConnectionProvider>>,
    stack: Vec<(TypeId, &'static str)>,
    touched: Vec<TypeId>,
    lazy_enabled: bool,
}

impl<'c> CascadeContext<'c> {
    pub fn new(connection: &'c dyn Connection) -> Self {
        Self {
            connection,
            provider: None,
            stack: Vec::new(),
            touched: Vec::new(),
            lazy_enabled: true,
        }
    }

    /// Provider captured by lazy handles created during this cascade.
    /// Without one, lazy relationships are fetched eagerly.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn ConnectionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn lazy_loading(mut self, enabled: bool) -> Self {
        self.lazy_enabled = enabled;
        self
    }

    pub fn connection(&self) -> &'c dyn Connection {
        self.connection
    }

    pub fn provider(&self) -> Option<&Arc<dyn ConnectionProvider>> {
        self.provider.as_ref()
    }

    /// Lazy handles can be installed: lazy loading is on and a provider is
    /// available.
    pub fn defers_lazy(&self) -> bool {
        self.lazy_enabled && self.provider.is_some()
    }

    pub fn lazy_enabled(&self) -> bool {
        self.lazy_enabled
    }

    /// Push a type onto the stack. `false` (and no push) if it is already
    /// being processed.
    pub fn enter(&mut self, type_id: TypeId, name: &'static str) -> bool {
        if self.is_active(type_id) {
            return false;
        }
        self.stack.push((type_id, name));
        true
    }

    pub fn leave(&mut self) {
        self.stack.pop();
    }

    pub fn is_active(&self, type_id: TypeId) -> bool {
        self.stack.iter().any(|(id, _)| *id == type_id)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn stack(&self) -> &[(TypeId, &'static str)] {
        &self.stack
    }

    /// `Order -> OrderLine -> Product`
    pub fn path(&self) -> String {
        let names: Vec<&str> = self.stack.iter().map(|(_, n)| *n).collect();
        names.join(" -> ")
    }

    /// Record that rows of a type were written during this cascade.
    pub fn touch(&mut self, type_id: TypeId) {
        if !self.touched.contains(&type_id) {
            self.touched.push(type_id);
        }
    }

    /// Types written during this cascade, in first-write order.
    pub fn touched(&self) -> &[TypeId] {
        &self.touched
    }
}

impl fmt::Debug for CascadeContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CascadeContext")
            .field("path", &self.path())
            .field("has_provider", &self.provider.is_some())
            .field("lazy_enabled", &self.lazy_enabled)
            .finish_non_exhaustive()
    }
}

/// Fetch progress of a lazy value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    NotFetched,
    Fetched,
    /// The last attempt failed; the next access tries again.
    Failed,
}

/// Runs a deferred fetch on a connection.
pub type Fetcher<T> = Arc<dyn Fn(&dyn Connection) -> Result<T> + Send + Sync>;

/// What a lazy value needs to fetch itself later.
///
/// The owner is recorded as an identifier (type name and key), never as a
/// reference to the owning record.
pub struct LazyHandle<T> {
    owner: String,
    relationship: String,
    state: FetchState,
    provider: Arc<dyn ConnectionProvider>,
    fetch: Fetcher<T>,
}

impl<T> LazyHandle<T> {
    pub fn new(
        owner: impl Into<String>,
        relationship: impl Into<String>,
        provider: Arc<dyn ConnectionProvider>,
        fetch: Fetcher<T>,
    ) -> Self {
        Self {
            owner: owner.into(),
            relationship: relationship.into(),
            state: FetchState::NotFetched,
            provider,
            fetch,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn relationship(&self) -> &str {
        &self.relationship
    }

    pub fn state(&self) -> FetchState {
        self.state
    }

    fn run(&self) -> Result<T> {
        let connection = self.provider.acquire()?;
        (self.fetch)(connection.as_ref())
    }
}

impl<T> Clone for LazyHandle<T> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            relationship: self.relationship.clone(),
            state: self.state,
            provider: Arc::clone(&self.provider),
            fetch: Arc::clone(&self.fetch),
        }
    }
}

impl<T> fmt::Debug for LazyHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyHandle")
            .field("owner", &self.owner)
            .field("relationship", &self.relationship)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// A relationship value fetched on first access.
///
/// Records loaded through a session get a pending `Lazy` carrying a
/// [`LazyHandle`]. The first [`get`](Lazy::get) runs the fetch through the
/// handle's connection provider, which stays valid after the loading session
/// is gone; later calls return the same value without querying again.
///
/// # States
///
/// - **Detached**: never attached to a session; `get` fails
/// - **Pending**: has a handle, not fetched yet (or the last fetch failed)
/// - **Fetched**: value cached
///
/// ```
/// use rowbind_core::{FetchState, Lazy};
///
/// let lines: Lazy<Vec<u32>> = Lazy::resolved(vec![1, 2]);
/// assert_eq!(lines.get().unwrap(), &vec![1, 2]);
/// assert_eq!(lines.state(), FetchState::Fetched);
/// ```
pub struct Lazy<T> {
    value: OnceLock<T>,
    handle: Mutex<Option<LazyHandle<T>>>,
}

impl<T> Lazy<T> {
    /// A lazy value to be fetched through `handle`.
    pub fn pending(handle: LazyHandle<T>) -> Self {
        Self {
            value: OnceLock::new(),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// An already-fetched value, e.g. children of a record about to be
    /// inserted.
    pub fn resolved(value: T) -> Self {
        Self {
            value: OnceLock::from(value),
            handle: Mutex::new(None),
        }
    }

    /// The value, fetching it on first access.
    ///
    /// A failed fetch is reported as `LazyCascadeError` and leaves the
    /// handle in place, so a later call retries. Concurrent first accesses
    /// are serialized; exactly one fetch runs.
    pub fn get(&self) -> Result<&T> {
        if let Some(value) = self.value.get() {
            return Ok(value);
        }
        let mut guard = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = self.value.get() {
            return Ok(value);
        }
        let Some(handle) = guard.as_mut() else {
            return Err(Error::LazyCascade(LazyCascadeError {
                relationship: String::new(),
                owner: String::new(),
                message: "lazy value is not attached to a session".to_string(),
                source: None,
            }));
        };

        tracing::debug!(
            owner = %handle.owner,
            relationship = %handle.relationship,
            "Fetching lazy relationship"
        );
        match handle.run() {
            Ok(value) => {
                handle.state = FetchState::Fetched;
                Ok(self.value.get_or_init(|| value))
            }
            Err(e) => {
                handle.state = FetchState::Failed;
                tracing::warn!(
                    owner = %handle.owner,
                    relationship = %handle.relationship,
                    error = %e,
                    "Lazy fetch failed"
                );
                Err(Error::LazyCascade(LazyCascadeError {
                    relationship: handle.relationship.clone(),
                    owner: handle.owner.clone(),
                    message: e.to_string(),
                    source: Some(Box::new(e)),
                }))
            }
        }
    }

    /// The value if it has been fetched; never queries.
    pub fn peek(&self) -> Option<&T> {
        self.value.get()
    }

    /// Mutable access to a fetched value; never queries.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.value.get_mut()
    }

    /// Replace the value, marking it fetched.
    pub fn set(&mut self, value: T) {
        self.value = OnceLock::from(value);
        if let Some(handle) = self
            .handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            handle.state = FetchState::Fetched;
        }
    }

    pub fn is_fetched(&self) -> bool {
        self.value.get().is_some()
    }

    /// Detached values report `NotFetched` until set.
    pub fn state(&self) -> FetchState {
        if self.is_fetched() {
            return FetchState::Fetched;
        }
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(FetchState::NotFetched, LazyHandle::state)
    }

    /// Is a handle attached?
    pub fn is_attached(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Owner identifier of the attached handle.
    pub fn owner(&self) -> Option<String> {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|h| h.owner.clone())
    }

    pub fn into_inner(self) -> Option<T> {
        self.value.into_inner()
    }
}

impl<T> Default for Lazy<T> {
    fn default() -> Self {
        Self {
            value: OnceLock::new(),
            handle: Mutex::new(None),
        }
    }
}

impl<T: Clone> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let value = OnceLock::new();
        if let Some(v) = self.value.get() {
            let _ = value.set(v.clone());
        }
        Self {
            value,
            handle: Mutex::new(handle),
        }
    }
}

/// Compares fetched values only. Two unfetched values are equal.
impl<T: PartialEq> PartialEq for Lazy<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value.get() == other.value.get()
    }
}

impl<T: fmt::Debug> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value.get() {
            Some(v) => f.debug_tuple("Lazy").field(v).finish(),
            None => write!(f, "Lazy({:?})", self.state()),
        }
    }
}
