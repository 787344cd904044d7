//! Cascaded operations across related record types.
//!
//! A parent type declares its relationships with [`Relation`] in its
//! `Record::mapping`. Each relation knows where the children live on the
//! parent (a [`ChildSlot`]), which fields join the two types, and which
//! operations follow the parent.
//!
//! ```ignore
//! RecordConfig::new()
//!     .field(field!(Order, id, FieldType::Int64).identity())
//!     .relationship(
//!         Relation::many("lines", slot!(Order, lines))
//!             .key("id", "order_id")
//!             .propagate_foreign_key()
//!             .children_first(),
//!     )
//! ```
//!
//! Traversal keeps a stack of record types in progress; a relation whose
//! target is already on the stack is skipped, so self-referential and
//! mutually referential mappings terminate.

use crate::executor::{self, Selection};
use rowbind_core::{
    Cardinality, CascadeOps, Connection, ConnectionProvider, Error, Fetcher, Lazy, LazyHandle,
    MappingError, MappingErrorKind, OperationError, OperationKind, Record, RecordType,
    RelationshipBinding, Result, Value, WhereCondition,
    relationship::CascadeContext,
    short_type_name,
};
use std::any::TypeId;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

// ============================================================================
// Graph operations
// ============================================================================

/// Insert `record`, then the children of every relation that cascades
/// inserts. Returns the parent row count.
pub(crate) fn insert<R: Record>(
    ctx: &mut CascadeContext<'_>,
    descriptor: &RecordType<R>,
    record: &mut R,
) -> Result<u64> {
    let rows = executor::insert(ctx.connection(), descriptor, record)?;
    ctx.touch(TypeId::of::<R>());
    for relation in descriptor.relationships() {
        if relation.cascades().insert {
            relation.insert(ctx, record)?;
        }
    }
    Ok(rows)
}

/// Update or delete `record` with its children, honoring each relation's
/// ordering.
fn write<R: Record>(
    ctx: &mut CascadeContext<'_>,
    descriptor: &RecordType<R>,
    record: &R,
    kind: OperationKind,
) -> Result<u64> {
    let deleting = kind == OperationKind::Delete;
    let mut before = Vec::new();
    let mut after = Vec::new();
    for relation in descriptor.relationships() {
        let ops = relation.cascades();
        let follows = if deleting { ops.delete } else { ops.update };
        if !follows {
            continue;
        }
        if relation.children_first() {
            before.push(relation);
        } else {
            after.push(relation);
        }
    }

    for relation in before {
        write_children(ctx, relation.as_ref(), record, deleting)?;
    }
    let rows = if deleting {
        executor::delete(ctx.connection(), descriptor, record)?
    } else {
        executor::update(ctx.connection(), descriptor, record)?
    };
    ctx.touch(TypeId::of::<R>());
    for relation in after {
        write_children(ctx, relation.as_ref(), record, deleting)?;
    }
    Ok(rows)
}

fn write_children<R>(
    ctx: &mut CascadeContext<'_>,
    relation: &dyn RelationshipBinding<R>,
    record: &R,
    deleting: bool,
) -> Result<u64> {
    if deleting {
        relation.delete(ctx, record)
    } else {
        relation.update(ctx, record)
    }
}

pub(crate) fn update<R: Record>(
    ctx: &mut CascadeContext<'_>,
    descriptor: &RecordType<R>,
    record: &R,
) -> Result<u64> {
    write(ctx, descriptor, record, OperationKind::Update)
}

pub(crate) fn delete<R: Record>(
    ctx: &mut CascadeContext<'_>,
    descriptor: &RecordType<R>,
    record: &R,
) -> Result<u64> {
    write(ctx, descriptor, record, OperationKind::Delete)
}

/// Load the relationships of a freshly materialized record.
pub(crate) fn load<R: Record>(
    ctx: &mut CascadeContext<'_>,
    descriptor: &RecordType<R>,
    record: &mut R,
) -> Result<()> {
    for relation in descriptor.relationships() {
        if relation.cascades().select {
            relation.select(ctx, record)?;
        }
    }
    Ok(())
}

// ============================================================================
// Child slots
// ============================================================================

/// Field accessors for the place a parent keeps its children.
///
/// Built with the [`slot!`](crate::slot) macro.
pub struct Projection<P, T> {
    get: fn(&P) -> &T,
    get_mut: fn(&mut P) -> &mut T,
}

impl<P, T> Projection<P, T> {
    pub fn new(get: fn(&P) -> &T, get_mut: fn(&mut P) -> &mut T) -> Self {
        Self { get, get_mut }
    }
}

impl<P, T> Clone for Projection<P, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P, T> Copy for Projection<P, T> {}

/// Accessors for a child-holding field: `slot!(Order, lines)`.
#[macro_export]
macro_rules! slot {
    ($parent:ty, $field:ident) => {
        $crate::cascade::Projection::<$parent, _>::new(|p| &p.$field, |p| &mut p.$field)
    };
}

/// Where and how a parent holds the children of one relation.
pub trait ChildSlot<P, C>: Send + Sync {
    fn cardinality(&self) -> Cardinality;

    fn is_lazy(&self) -> bool {
        false
    }

    /// Children currently held. Unfetched lazy children are not visited.
    fn children<'p>(&self, parent: &'p P) -> Vec<&'p C>;

    fn children_mut<'p>(&self, parent: &'p mut P) -> Vec<&'p mut C>;

    /// Store loaded children, replacing whatever was held.
    fn fill(&self, parent: &mut P, rows: Vec<C>);

    /// Install a deferred fetch. Eager slots fetch immediately instead.
    fn defer(&self, parent: &mut P, handle: Deferred<C>) -> Result<()> {
        let rows = handle.fetch_now()?;
        self.fill(parent, rows);
        Ok(())
    }
}

/// Everything a lazy slot needs to build its `LazyHandle`.
pub struct Deferred<C> {
    owner: String,
    relationship: String,
    provider: Arc<dyn ConnectionProvider>,
    fetch: Fetcher<Vec<C>>,
}

impl<C> Deferred<C> {
    fn fetch_now(&self) -> Result<Vec<C>> {
        let connection = self.provider.acquire()?;
        (self.fetch)(connection.as_ref())
    }
}

impl<C: 'static> Deferred<C> {
    /// Adapt the fetched rows into the slot's own value type.
    fn handle<T: 'static>(self, shape: impl Fn(Vec<C>) -> T + Send + Sync + 'static) -> LazyHandle<T> {
        let fetch = self.fetch;
        LazyHandle::new(
            self.owner,
            self.relationship,
            self.provider,
            Arc::new(move |conn: &dyn Connection| fetch(conn).map(&shape)),
        )
    }
}

fn key_rows<C, K: Ord>(rows: Vec<C>, key: fn(&C) -> K) -> BTreeMap<K, C> {
    rows.into_iter().map(|c| (key(&c), c)).collect()
}

struct One<P, C>(Projection<P, Option<C>>);
struct Many<P, C>(Projection<P, Vec<C>>);
struct Keyed<P, C, K>(Projection<P, BTreeMap<K, C>>, fn(&C) -> K);
struct LazyOne<P, C>(Projection<P, Lazy<Option<C>>>);
struct LazyMany<P, C>(Projection<P, Lazy<Vec<C>>>);
struct LazyKeyed<P, C, K>(Projection<P, Lazy<BTreeMap<K, C>>>, fn(&C) -> K);

impl<P, C: Send + Sync> ChildSlot<P, C> for One<P, C> {
    fn cardinality(&self) -> Cardinality {
        Cardinality::OneToOne
    }
    fn children<'p>(&self, parent: &'p P) -> Vec<&'p C> {
        (self.0.get)(parent).iter().collect()
    }
    fn children_mut<'p>(&self, parent: &'p mut P) -> Vec<&'p mut C> {
        (self.0.get_mut)(parent).iter_mut().collect()
    }
    fn fill(&self, parent: &mut P, rows: Vec<C>) {
        *(self.0.get_mut)(parent) = rows.into_iter().next();
    }
}

impl<P, C: Send + Sync> ChildSlot<P, C> for Many<P, C> {
    fn cardinality(&self) -> Cardinality {
        Cardinality::OneToMany
    }
    fn children<'p>(&self, parent: &'p P) -> Vec<&'p C> {
        (self.0.get)(parent).iter().collect()
    }
    fn children_mut<'p>(&self, parent: &'p mut P) -> Vec<&'p mut C> {
        (self.0.get_mut)(parent).iter_mut().collect()
    }
    fn fill(&self, parent: &mut P, rows: Vec<C>) {
        *(self.0.get_mut)(parent) = rows;
    }
}

impl<P, C: Send + Sync, K: Ord + Send + Sync + 'static> ChildSlot<P, C> for Keyed<P, C, K> {
    fn cardinality(&self) -> Cardinality {
        Cardinality::OneToManyKeyed
    }
    fn children<'p>(&self, parent: &'p P) -> Vec<&'p C> {
        (self.0.get)(parent).values().collect()
    }
    fn children_mut<'p>(&self, parent: &'p mut P) -> Vec<&'p mut C> {
        (self.0.get_mut)(parent).values_mut().collect()
    }
    fn fill(&self, parent: &mut P, rows: Vec<C>) {
        *(self.0.get_mut)(parent) = key_rows(rows, self.1);
    }
}

impl<P, C: Send + Sync + 'static> ChildSlot<P, C> for LazyOne<P, C> {
    fn cardinality(&self) -> Cardinality {
        Cardinality::OneToOne
    }
    fn is_lazy(&self) -> bool {
        true
    }
    fn children<'p>(&self, parent: &'p P) -> Vec<&'p C> {
        (self.0.get)(parent).peek().into_iter().flatten().collect()
    }
    fn children_mut<'p>(&self, parent: &'p mut P) -> Vec<&'p mut C> {
        (self.0.get_mut)(parent).get_mut().into_iter().flatten().collect()
    }
    fn fill(&self, parent: &mut P, rows: Vec<C>) {
        (self.0.get_mut)(parent).set(rows.into_iter().next());
    }
    fn defer(&self, parent: &mut P, handle: Deferred<C>) -> Result<()> {
        *(self.0.get_mut)(parent) = Lazy::pending(handle.handle(|rows| rows.into_iter().next()));
        Ok(())
    }
}

impl<P, C: Send + Sync + 'static> ChildSlot<P, C> for LazyMany<P, C> {
    fn cardinality(&self) -> Cardinality {
        Cardinality::OneToMany
    }
    fn is_lazy(&self) -> bool {
        true
    }
    fn children<'p>(&self, parent: &'p P) -> Vec<&'p C> {
        (self.0.get)(parent).peek().into_iter().flatten().collect()
    }
    fn children_mut<'p>(&self, parent: &'p mut P) -> Vec<&'p mut C> {
        (self.0.get_mut)(parent).get_mut().into_iter().flatten().collect()
    }
    fn fill(&self, parent: &mut P, rows: Vec<C>) {
        (self.0.get_mut)(parent).set(rows);
    }
    fn defer(&self, parent: &mut P, handle: Deferred<C>) -> Result<()> {
        *(self.0.get_mut)(parent) = Lazy::pending(handle.handle(|rows| rows));
        Ok(())
    }
}

impl<P, C, K> ChildSlot<P, C> for LazyKeyed<P, C, K>
where
    C: Send + Sync + 'static,
    K: Ord + Send + Sync + 'static,
{
    fn cardinality(&self) -> Cardinality {
        Cardinality::OneToManyKeyed
    }
    fn is_lazy(&self) -> bool {
        true
    }
    fn children<'p>(&self, parent: &'p P) -> Vec<&'p C> {
        (self.0.get)(parent)
            .peek()
            .map(|m| m.values().collect())
            .unwrap_or_default()
    }
    fn children_mut<'p>(&self, parent: &'p mut P) -> Vec<&'p mut C> {
        (self.0.get_mut)(parent)
            .get_mut()
            .map(|m| m.values_mut().collect())
            .unwrap_or_default()
    }
    fn fill(&self, parent: &mut P, rows: Vec<C>) {
        (self.0.get_mut)(parent).set(key_rows(rows, self.1));
    }
    fn defer(&self, parent: &mut P, handle: Deferred<C>) -> Result<()> {
        let key = self.1;
        *(self.0.get_mut)(parent) = Lazy::pending(handle.handle(move |rows| key_rows(rows, key)));
        Ok(())
    }
}

// ============================================================================
// Relation
// ============================================================================

/// How a relation selects its children.
#[derive(Debug, Clone)]
struct ChildQuery {
    /// Named condition on the child type, or one matching the joined fields.
    condition: Option<String>,
    order: Option<String>,
    child_fields: Vec<&'static str>,
}

impl ChildQuery {
    /// Select the children matching `params` and load their own relations.
    fn run<C: Record>(&self, ctx: &mut CascadeContext<'_>, params: &[Value]) -> Result<Vec<C>> {
        let descriptor = RecordType::<C>::get()?;
        let matching;
        let selection = match &self.condition {
            Some(name) => Selection::Named {
                condition: Some(name.as_str()),
                order: self.order.as_deref(),
            },
            None => {
                matching = WhereCondition::fields(
                    format!(
                        "{}{}",
                        rowbind_core::MATCHING_CONDITION_PREFIX,
                        self.child_fields.join(",")
                    ),
                    &self.child_fields,
                );
                Selection::Matching {
                    condition: &matching,
                    order: self.order.as_deref(),
                }
            }
        };

        // Rows are read without cascading, then loaded with the shared
        // context so the cycle guard sees the whole path.
        let rows = executor::open_rows(ctx.connection(), Arc::clone(&descriptor), &selection, params)?;
        let mut children = Vec::new();
        for record in rows {
            let mut record = record?;
            load(ctx, &descriptor, &mut record)?;
            children.push(record);
        }
        tracing::debug!(
            child = descriptor.type_name(),
            rows = children.len(),
            path = %ctx.path(),
            "Cascaded select"
        );
        Ok(children)
    }
}

/// A relationship from parent `P` to child `C`.
///
/// Defaults: every operation cascades, parent before children, no
/// foreign-key propagation, children selected by matching the joined fields.
pub struct Relation<P, C> {
    name: String,
    slot: Box<dyn ChildSlot<P, C>>,
    keys: Vec<(&'static str, &'static str)>,
    propagate: bool,
    children_first: bool,
    cascades: CascadeOps,
    condition: Option<String>,
    order: Option<String>,
    _types: PhantomData<fn() -> (P, C)>,
}

impl<P: Record, C: Record> Relation<P, C> {
    fn with_slot(name: impl Into<String>, slot: impl ChildSlot<P, C> + 'static) -> Self {
        Self {
            name: name.into(),
            slot: Box::new(slot),
            keys: Vec::new(),
            propagate: false,
            children_first: false,
            cascades: CascadeOps::ALL,
            condition: None,
            order: None,
            _types: PhantomData,
        }
    }

    /// At most one child, held as `Option<C>`.
    pub fn one(name: impl Into<String>, slot: Projection<P, Option<C>>) -> Self {
        Self::with_slot(name, One(slot))
    }

    /// An ordered collection held as `Vec<C>`.
    pub fn many(name: impl Into<String>, slot: Projection<P, Vec<C>>) -> Self {
        Self::with_slot(name, Many(slot))
    }

    /// A collection keyed by `key(child)`.
    pub fn keyed<K: Ord + Send + Sync + 'static>(
        name: impl Into<String>,
        slot: Projection<P, BTreeMap<K, C>>,
        key: fn(&C) -> K,
    ) -> Self {
        Self::with_slot(name, Keyed(slot, key))
    }

    /// Like [`one`](Self::one), fetched on first access.
    pub fn lazy_one(name: impl Into<String>, slot: Projection<P, Lazy<Option<C>>>) -> Self {
        Self::with_slot(name, LazyOne(slot))
    }

    /// Like [`many`](Self::many), fetched on first access.
    pub fn lazy_many(name: impl Into<String>, slot: Projection<P, Lazy<Vec<C>>>) -> Self {
        Self::with_slot(name, LazyMany(slot))
    }

    /// Like [`keyed`](Self::keyed), fetched on first access.
    pub fn lazy_keyed<K: Ord + Send + Sync + 'static>(
        name: impl Into<String>,
        slot: Projection<P, Lazy<BTreeMap<K, C>>>,
        key: fn(&C) -> K,
    ) -> Self {
        Self::with_slot(name, LazyKeyed(slot, key))
    }

    /// Join `parent_field` to `child_field`. Call once per key column.
    #[must_use]
    pub fn key(mut self, parent_field: &'static str, child_field: &'static str) -> Self {
        self.keys.push((parent_field, child_field));
        self
    }

    /// Copy the parent's key values into the children before inserting them.
    #[must_use]
    pub fn propagate_foreign_key(mut self) -> Self {
        self.propagate = true;
        self
    }

    /// Update and delete children before the parent.
    #[must_use]
    pub fn children_first(mut self) -> Self {
        self.children_first = true;
        self
    }

    /// Select children with a named condition of the child type. Its
    /// parameters are the parent's key fields, in `key` order.
    #[must_use]
    pub fn condition(mut self, name: impl Into<String>) -> Self {
        self.condition = Some(name.into());
        self
    }

    /// Order children by a named order of the child type.
    #[must_use]
    pub fn order_by(mut self, name: impl Into<String>) -> Self {
        self.order = Some(name.into());
        self
    }

    /// Restrict which parent operations cascade.
    #[must_use]
    pub fn only(mut self, ops: CascadeOps) -> Self {
        self.cascades = ops;
        self
    }

    fn child_query(&self) -> ChildQuery {
        ChildQuery {
            condition: self.condition.clone(),
            order: self.order.clone(),
            child_fields: self.keys.iter().map(|(_, c)| *c).collect(),
        }
    }

    fn parent_values(&self, parent_desc: &RecordType<P>, parent: &P) -> Result<Vec<Value>> {
        self.keys
            .iter()
            .map(|(field, _)| parent_desc.value_of(parent, field))
            .collect()
    }

    fn invalid(&self, message: String) -> Error {
        Error::Mapping(MappingError::new(
            MappingErrorKind::InvalidRelationship,
            short_type_name::<P>(),
            format!("relationship '{}': {}", self.name, message),
        ))
    }

    /// Check the child side once its descriptor is available.
    fn check_child(&self, child: &RecordType<C>) -> Result<()> {
        for (_, field) in &self.keys {
            child.field(field)?;
        }
        if let Some(name) = &self.condition {
            let wanted = child.condition(name)?.parameter_count();
            if wanted != self.keys.len() {
                return Err(self.invalid(format!(
                    "condition '{}' takes {} parameter(s) but {} key field(s) are joined",
                    name,
                    wanted,
                    self.keys.len()
                )));
            }
        }
        if let Some(order) = &self.order {
            child.order(order)?;
        }
        Ok(())
    }

    /// Run `step` with the child type pushed on the traversal stack.
    ///
    /// `None` when the child type is already being processed. Failures are
    /// wrapped as cascade errors naming the parent and this relation.
    fn descend<T>(
        &self,
        ctx: &mut CascadeContext<'_>,
        parent_desc: &RecordType<P>,
        parent_key: Vec<Value>,
        step: impl FnOnce(&mut CascadeContext<'_>, &RecordType<C>) -> Result<T>,
    ) -> Result<Option<T>> {
        if !ctx.enter(TypeId::of::<C>(), short_type_name::<C>()) {
            tracing::warn!(
                relationship = %self.name,
                target = short_type_name::<C>(),
                path = %ctx.path(),
                "Skipping cascade into a type already in progress"
            );
            return Ok(None);
        }
        let result = RecordType::<C>::get()
            .and_then(|child| self.check_child(&child).map(|()| child))
            .and_then(|child| step(ctx, &child));
        ctx.leave();

        result.map(Some).map_err(|e| {
            Error::Operation(
                OperationError::new(
                    OperationKind::Cascade,
                    parent_desc.table(),
                    format!(
                        "relationship '{}' of {} failed: {}",
                        self.name,
                        parent_desc.describe_key(&parent_key),
                        e
                    ),
                )
                .with_key(parent_key)
                .with_source(e),
            )
        })
    }
}

impl<P: Record, C: Record> RelationshipBinding<P> for Relation<P, C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn target_type(&self) -> TypeId {
        TypeId::of::<C>()
    }

    fn target_name(&self) -> &'static str {
        short_type_name::<C>()
    }

    fn cardinality(&self) -> Cardinality {
        self.slot.cardinality()
    }

    fn is_lazy(&self) -> bool {
        self.slot.is_lazy()
    }

    fn propagates_foreign_key(&self) -> bool {
        self.propagate
    }

    fn children_first(&self) -> bool {
        self.children_first
    }

    fn cascades(&self) -> CascadeOps {
        self.cascades
    }

    fn key_map(&self) -> &[(&'static str, &'static str)] {
        &self.keys
    }

    fn validate(&self, parent: &RecordType<P>) -> Result<()> {
        if self.name.is_empty() {
            return Err(self.invalid("name is empty".to_string()));
        }
        if self.keys.is_empty() {
            return Err(self.invalid("no key fields joined".to_string()));
        }
        for (field, _) in &self.keys {
            parent.field(field)?;
        }
        Ok(())
    }

    fn insert(&self, ctx: &mut CascadeContext<'_>, parent: &mut P) -> Result<u64> {
        let parent_desc = RecordType::<P>::get()?;
        let key = parent_desc.key_of(parent);
        let values = self.parent_values(&parent_desc, parent)?;
        let rows = self.descend(ctx, &parent_desc, key, |ctx, child_desc| {
            let mut rows = 0;
            for child in self.slot.children_mut(parent) {
                if self.propagate {
                    for ((_, field), value) in self.keys.iter().zip(&values) {
                        child_desc.assign(child, field, value.clone())?;
                    }
                }
                rows += insert(ctx, child_desc, child)?;
            }
            Ok(rows)
        })?;
        Ok(rows.unwrap_or(0))
    }

    fn update(&self, ctx: &mut CascadeContext<'_>, parent: &P) -> Result<u64> {
        let parent_desc = RecordType::<P>::get()?;
        let key = parent_desc.key_of(parent);
        let rows = self.descend(ctx, &parent_desc, key, |ctx, child_desc| {
            let mut rows = 0;
            for child in self.slot.children(parent) {
                rows += update(ctx, child_desc, child)?;
            }
            Ok(rows)
        })?;
        Ok(rows.unwrap_or(0))
    }

    fn delete(&self, ctx: &mut CascadeContext<'_>, parent: &P) -> Result<u64> {
        let parent_desc = RecordType::<P>::get()?;
        let key = parent_desc.key_of(parent);
        let rows = self.descend(ctx, &parent_desc, key, |ctx, child_desc| {
            let mut rows = 0;
            for child in self.slot.children(parent) {
                rows += delete(ctx, child_desc, child)?;
            }
            Ok(rows)
        })?;
        Ok(rows.unwrap_or(0))
    }

    fn select(&self, ctx: &mut CascadeContext<'_>, parent: &mut P) -> Result<()> {
        let parent_desc = RecordType::<P>::get()?;
        let params = self.parent_values(&parent_desc, parent)?;
        let key = parent_desc.key_of(parent);

        if self.slot.is_lazy() && ctx.defers_lazy() {
            if let Some(provider) = ctx.provider().cloned() {
                let query = self.child_query();
                let lazy = ctx.lazy_enabled();
                let fetch_provider = Arc::clone(&provider);
                let fetch: Fetcher<Vec<C>> = Arc::new(move |conn: &dyn Connection| {
                    let mut ctx = CascadeContext::new(conn)
                        .with_provider(Arc::clone(&fetch_provider))
                        .lazy_loading(lazy);
                    ctx.enter(TypeId::of::<C>(), short_type_name::<C>());
                    query.run::<C>(&mut ctx, &params)
                });
                tracing::trace!(relationship = %self.name, "Deferred relationship");
                return self.slot.defer(
                    parent,
                    Deferred {
                        owner: parent_desc.describe_key(&key),
                        relationship: self.name.clone(),
                        provider,
                        fetch,
                    },
                );
            }
        }

        let query = self.child_query();
        self.descend(ctx, &parent_desc, key, |ctx, _| {
            let rows = query.run::<C>(ctx, &params)?;
            self.slot.fill(parent, rows);
            Ok(())
        })?;
        Ok(())
    }
}

impl<P, C> std::fmt::Debug for Relation<P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relation")
            .field("name", &self.name)
            .field("target", &short_type_name::<C>())
            .field("keys", &self.keys)
            .field("propagate", &self.propagate)
            .field("children_first", &self.children_first)
            .finish_non_exhaustive()
    }
}
