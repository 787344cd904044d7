//! Resolved mapping metadata for a record type.
//!
//! A [`RecordType`] is built once per record type from its
//! [`RecordConfig`](crate::RecordConfig), cached process-wide and never
//! changed afterwards. It owns the ordered column bindings, the key, the named
//! conditions, orders and aggregate expressions, and the declared
//! relationships.

use crate::error::{Error, MappingError, MappingErrorKind, Result, TranslationError};
use crate::field::{Getter, Setter};
use crate::identifiers::is_valid_identifier;
use crate::record::{Record, RecordConfig};
use crate::relationship::RelationshipBinding;
use crate::row::Row;
use crate::translate::TypeTranslator;
use crate::types::FieldType;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Name of the condition synthesized from the primary key.
pub const PRIMARY_KEY_CONDITION: &str = "primaryKey";

/// Prefix of conditions built on the fly from a set of matched fields.
/// Declared conditions may not use it.
pub const MATCHING_CONDITION_PREFIX: &str = "match:";

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    #[default]
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    IsNull,
    IsNotNull,
}

impl Comparison {
    pub const fn as_sql(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::NotEq => "<>",
            Comparison::Lt => "<",
            Comparison::LtEq => "<=",
            Comparison::Gt => ">",
            Comparison::GtEq => ">=",
            Comparison::Like => "LIKE",
            Comparison::IsNull => "IS NULL",
            Comparison::IsNotNull => "IS NOT NULL",
        }
    }

    /// The null tests take no operand.
    pub const fn takes_operand(self) -> bool {
        !matches!(self, Comparison::IsNull | Comparison::IsNotNull)
    }

    /// Evaluate in memory with SQL semantics. `None` means the comparison
    /// is unknown (a NULL operand) or the values are not comparable.
    pub fn matches(self, lhs: &Value, rhs: Option<&Value>) -> Option<bool> {
        match self {
            Comparison::IsNull => return Some(lhs.is_null()),
            Comparison::IsNotNull => return Some(!lhs.is_null()),
            _ => {}
        }
        let rhs = rhs?;
        if lhs.is_null() || rhs.is_null() {
            return None;
        }
        if self == Comparison::Like {
            return Some(like(lhs.as_str()?, rhs.as_str()?));
        }
        let ord = lhs.sql_cmp(rhs)?;
        Some(match self {
            Comparison::Eq => ord == Ordering::Equal,
            Comparison::NotEq => ord != Ordering::Equal,
            Comparison::Lt => ord == Ordering::Less,
            Comparison::LtEq => ord != Ordering::Greater,
            Comparison::Gt => ord == Ordering::Greater,
            Comparison::GtEq => ord != Ordering::Less,
            Comparison::Like | Comparison::IsNull | Comparison::IsNotNull => false,
        })
    }
}

// SQLite LIKE: `%` and `_` wildcards, ASCII case-insensitive.
fn like(text: &str, pattern: &str) -> bool {
    fn go(t: &[u8], p: &[u8]) -> bool {
        match p.split_first() {
            None => t.is_empty(),
            Some((b'%', rest)) => (0..=t.len()).any(|i| go(&t[i..], rest)),
            Some((b'_', rest)) => !t.is_empty() && go(&t[1..], rest),
            Some((c, rest)) => {
                t.first().is_some_and(|x| x.eq_ignore_ascii_case(c)) && go(&t[1..], rest)
            }
        }
    }
    go(text.as_bytes(), pattern.as_bytes())
}

/// One `field <op> operand` term of a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    #[serde(default)]
    pub op: Comparison,
    /// Literal operand. When absent the operand is the next positional
    /// parameter supplied by the caller.
    #[serde(default)]
    pub value: Option<Value>,
}

/// A named conjunction of predicates.
///
/// ```
/// use rowbind_core::{Comparison, WhereCondition};
///
/// let low_stock = WhereCondition::new("lowStock")
///     .compare("qty", Comparison::Lt)
///     .is_not_null("supplier");
/// assert_eq!(low_stock.parameter_count(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereCondition {
    pub name: String,
    #[serde(default)]
    pub predicates: Vec<Predicate>,
}

impl WhereCondition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            predicates: Vec::new(),
        }
    }

    /// Equality on each field, one positional parameter per field.
    pub fn fields(name: impl Into<String>, fields: &[&str]) -> Self {
        fields
            .iter()
            .fold(Self::new(name), |cond, f| cond.compare(*f, Comparison::Eq))
    }

    /// `field <op> ?`
    pub fn compare(mut self, field: impl Into<String>, op: Comparison) -> Self {
        self.predicates.push(Predicate {
            field: field.into(),
            op,
            value: None,
        });
        self
    }

    /// `field <op> literal`
    pub fn literal(mut self, field: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate {
            field: field.into(),
            op,
            value: Some(value.into()),
        });
        self
    }

    pub fn is_null(self, field: impl Into<String>) -> Self {
        self.compare(field, Comparison::IsNull)
    }

    pub fn is_not_null(self, field: impl Into<String>) -> Self {
        self.compare(field, Comparison::IsNotNull)
    }

    /// Number of positional parameters a caller must supply.
    pub fn parameter_count(&self) -> usize {
        self.predicates
            .iter()
            .filter(|p| p.op.takes_operand() && p.value.is_none())
            .count()
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderKey {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

/// A named ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub name: String,
    #[serde(default)]
    pub keys: Vec<OrderKey>,
}

impl OrderSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: Vec::new(),
        }
    }

    pub fn asc(mut self, field: impl Into<String>) -> Self {
        self.keys.push(OrderKey {
            field: field.into(),
            descending: false,
        });
        self
    }

    pub fn desc(mut self, field: impl Into<String>) -> Self {
        self.keys.push(OrderKey {
            field: field.into(),
            descending: true,
        });
        self
    }
}

/// A piece of a named aggregate expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpressionPart {
    /// SQL text copied verbatim
    Text(String),
    /// Index of a column binding, rendered as its quoted column name
    Column(usize),
}

/// A named aggregate expression, split into text and column references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub name: String,
    pub parts: Vec<ExpressionPart>,
}

/// One field mapped to one column, with its translator.
pub struct ColumnBinding<R> {
    field: &'static str,
    column: String,
    field_type: FieldType,
    nullable: bool,
    primary_key: bool,
    identity: bool,
    read_only: bool,
    write_only: bool,
    translator: Arc<dyn TypeTranslator>,
    get: Getter<R>,
    set: Setter<R>,
}

impl<R> ColumnBinding<R> {
    pub fn field(&self) -> &'static str {
        self.field
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_write_only(&self) -> bool {
        self.write_only
    }

    /// Written by UPDATE: not a key, read-only or identity column.
    pub fn is_updatable(&self) -> bool {
        !self.primary_key && !self.read_only && !self.identity
    }

    pub fn translator(&self) -> &Arc<dyn TypeTranslator> {
        &self.translator
    }

    /// Current field value of `record`.
    pub fn value(&self, record: &R) -> Value {
        (self.get)(record)
    }

    /// Assign a field-form value to `record`.
    pub fn assign(&self, record: &mut R, value: Value) -> Result<()> {
        (self.set)(record, value).map_err(|e| self.with_column(e))
    }

    /// Decode column `index` of `row` and assign it.
    pub fn decode_into(&self, record: &mut R, row: &Row, index: usize) -> Result<()> {
        let value = self
            .translator
            .decode(row, index)
            .map_err(|e| self.with_column(e))?;
        self.assign(record, value)
    }

    fn with_column(&self, err: Error) -> Error {
        match err {
            Error::Translation(t) if t.column.is_none() => {
                Error::Translation(t.with_column(self.column.clone()))
            }
            other => other,
        }
    }
}

impl<R> fmt::Debug for ColumnBinding<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnBinding")
            .field("field", &self.field)
            .field("column", &self.column)
            .field("field_type", &self.field_type)
            .field("primary_key", &self.primary_key)
            .field("identity", &self.identity)
            .field("read_only", &self.read_only)
            .field("write_only", &self.write_only)
            .field("translator", &self.translator.name())
            .finish()
    }
}

/// Resolved, immutable mapping metadata for one record type.
pub struct RecordType<R> {
    type_name: &'static str,
    table: String,
    columns: Vec<ColumnBinding<R>>,
    primary_key: Vec<usize>,
    identity: Option<usize>,
    conditions: BTreeMap<String, WhereCondition>,
    orders: BTreeMap<String, OrderSpec>,
    expressions: BTreeMap<String, Expression>,
    relationships: Vec<Arc<dyn RelationshipBinding<R>>>,
}

/// Short name of a Rust type: the last path segment, without generics.
pub fn short_type_name<R: ?Sized>() -> &'static str {
    let full = std::any::type_name::<R>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

fn descriptors() -> &'static RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>> {
    static DESCRIPTORS: OnceLock<RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>> =
        OnceLock::new();
    DESCRIPTORS.get_or_init(|| RwLock::new(HashMap::new()))
}

impl<R: Record> RecordType<R> {
    /// The process-wide descriptor for `R`, built on first use.
    ///
    /// A failed build is not cached: every call re-resolves and reports the
    /// same `MappingError`.
    pub fn get() -> Result<Arc<Self>> {
        let id = TypeId::of::<R>();
        let cached = descriptors()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned();
        if let Some(any) = cached {
            if let Ok(descriptor) = any.downcast::<Self>() {
                return Ok(descriptor);
            }
        }

        // Built without holding the lock: relationship validation may look
        // up other descriptors.
        let built = Arc::new(Self::resolve(R::mapping())?);
        tracing::debug!(
            record = built.type_name,
            table = %built.table,
            columns = built.columns.len(),
            relationships = built.relationships.len(),
            "Registered record type"
        );
        let stored = descriptors()
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_insert_with(|| built.clone() as Arc<dyn Any + Send + Sync>)
            .clone();
        Ok(stored.downcast::<Self>().unwrap_or(built))
    }

    /// Has `R` already been resolved into the process-wide registry?
    pub fn is_registered() -> bool {
        descriptors()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&TypeId::of::<R>())
    }

    /// Resolve a configuration into a descriptor.
    pub(crate) fn resolve(config: RecordConfig<R>) -> Result<Self> {
        Resolver::new(short_type_name::<R>()).resolve(config)
    }
}

impl<R> RecordType<R> {
    /// Short type name, used as the default table name.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// All column bindings in declaration order.
    pub fn columns(&self) -> &[ColumnBinding<R>] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&ColumnBinding<R>> {
        self.columns.get(index)
    }

    /// Index of the binding for a field.
    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.field == field)
    }

    /// Binding for a field, or `MappingError(UnknownField)`.
    pub fn field(&self, field: &str) -> Result<&ColumnBinding<R>> {
        self.field_index(field)
            .map(|i| &self.columns[i])
            .ok_or_else(|| self.unknown_field(field))
    }

    /// Binding indices of the primary key, in key order.
    pub fn primary_key(&self) -> &[usize] {
        &self.primary_key
    }

    pub fn primary_key_fields(&self) -> Vec<&'static str> {
        self.primary_key.iter().map(|&i| self.columns[i].field).collect()
    }

    /// Binding index of the identity column, if there is one.
    pub fn identity(&self) -> Option<usize> {
        self.identity
    }

    pub fn condition(&self, name: &str) -> Result<&WhereCondition> {
        self.conditions.get(name).ok_or_else(|| {
            self.mapping_error(
                MappingErrorKind::UnknownCondition,
                format!("no condition named '{}'", name),
            )
        })
    }

    pub fn conditions(&self) -> impl Iterator<Item = &WhereCondition> {
        self.conditions.values()
    }

    pub fn order(&self, name: &str) -> Result<&OrderSpec> {
        self.orders.get(name).ok_or_else(|| {
            self.mapping_error(
                MappingErrorKind::UnknownOrder,
                format!("no order named '{}'", name),
            )
        })
    }

    pub fn expression(&self, name: &str) -> Result<&Expression> {
        self.expressions.get(name).ok_or_else(|| {
            self.mapping_error(
                MappingErrorKind::UnknownExpression,
                format!("'{}' is neither a field nor a named expression", name),
            )
        })
    }

    pub fn relationships(&self) -> &[Arc<dyn RelationshipBinding<R>>] {
        &self.relationships
    }

    pub fn relationship(&self, name: &str) -> Option<&Arc<dyn RelationshipBinding<R>>> {
        self.relationships.iter().find(|r| r.name() == name)
    }

    /// Primary key field values of `record`, in key order.
    pub fn key_of(&self, record: &R) -> Vec<Value> {
        self.primary_key
            .iter()
            .map(|&i| self.columns[i].value(record))
            .collect()
    }

    /// `Type[k1, k2]`, for log lines and error messages.
    pub fn describe_key(&self, key: &[Value]) -> String {
        let parts: Vec<String> = key.iter().map(|v| format!("{v:?}")).collect();
        format!("{}[{}]", self.type_name, parts.join(", "))
    }

    /// Field value by field name.
    pub fn value_of(&self, record: &R, field: &str) -> Result<Value> {
        Ok(self.field(field)?.value(record))
    }

    /// Assign a field by name.
    pub fn assign(&self, record: &mut R, field: &str, value: Value) -> Result<()> {
        self.field(field)?.assign(record, value)
    }

    /// Write a database-generated id into the identity field.
    pub fn set_identity(&self, record: &mut R, id: i64) -> Result<()> {
        let Some(index) = self.identity else {
            return Ok(());
        };
        let binding = &self.columns[index];
        let value = binding
            .translator
            .from_column(&Value::BigInt(id))
            .map_err(|e| binding.with_column(e))?;
        binding.assign(record, value)
    }

    /// Evaluate a condition against an in-memory record.
    ///
    /// `None` when some predicate cannot be decided without the database
    /// (a NULL operand or values of unrelated kinds).
    pub fn matches(&self, condition: &WhereCondition, record: &R, params: &[Value]) -> Option<bool> {
        let mut args = params.iter();
        let mut result = Some(true);
        for predicate in &condition.predicates {
            let lhs = self.columns[self.field_index(&predicate.field)?].value(record);
            let rhs = match (&predicate.value, predicate.op.takes_operand()) {
                (Some(v), _) => Some(v),
                (None, true) => Some(args.next()?),
                (None, false) => None,
            };
            match predicate.op.matches(&lhs, rhs) {
                Some(true) => {}
                Some(false) => return Some(false),
                None => result = None,
            }
        }
        result
    }

    /// Compare two records by a named order, as the database would.
    pub fn compare(&self, order: &OrderSpec, a: &R, b: &R) -> Ordering {
        for key in &order.keys {
            let Some(index) = self.field_index(&key.field) else {
                continue;
            };
            let binding = &self.columns[index];
            let ord = binding
                .value(a)
                .sql_cmp(&binding.value(b))
                .unwrap_or(Ordering::Equal);
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    fn mapping_error(&self, kind: MappingErrorKind, message: String) -> Error {
        Error::Mapping(MappingError::new(kind, self.type_name, message))
    }

    fn unknown_field(&self, field: &str) -> Error {
        self.mapping_error(
            MappingErrorKind::UnknownField,
            format!("{} has no field '{}'", self.type_name, field),
        )
    }
}

impl<R: Default> RecordType<R> {
    /// Build a record from a row whose columns are the given bindings, in
    /// order. Fields not selected keep their default values.
    pub fn materialize(&self, row: &Row, columns: &[usize]) -> Result<R> {
        if row.len() < columns.len() {
            return Err(Error::Translation(TranslationError::new(
                "one value per selected column",
                format!("{} values for {} columns", row.len(), columns.len()),
            )));
        }
        let mut record = R::default();
        for (position, &index) in columns.iter().enumerate() {
            self.columns[index].decode_into(&mut record, row, position)?;
        }
        Ok(record)
    }
}

impl<R> fmt::Debug for RecordType<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let relationships: Vec<&str> = self.relationships.iter().map(|r| r.name()).collect();
        f.debug_struct("RecordType")
            .field("type_name", &self.type_name)
            .field("table", &self.table)
            .field("columns", &self.columns)
            .field("primary_key", &self.primary_key)
            .field("identity", &self.identity)
            .field("conditions", &self.conditions.keys().collect::<Vec<_>>())
            .field("orders", &self.orders.keys().collect::<Vec<_>>())
            .field("relationships", &relationships)
            .finish_non_exhaustive()
    }
}

struct Resolver {
    type_name: &'static str,
}

impl Resolver {
    fn new(type_name: &'static str) -> Self {
        Self { type_name }
    }

    fn error(&self, kind: MappingErrorKind, message: impl Into<String>) -> Error {
        Error::Mapping(MappingError::new(kind, self.type_name, message))
    }

    fn identifier(&self, what: &str, name: &str) -> Result<()> {
        if is_valid_identifier(name) {
            Ok(())
        } else {
            Err(self.error(
                MappingErrorKind::InvalidIdentifier,
                format!("{} '{}' is not a valid identifier", what, name),
            ))
        }
    }

    fn resolve<R>(&self, mut config: RecordConfig<R>) -> Result<RecordType<R>> {
        let overrides = config.overrides.take().unwrap_or_default();
        let field_names: Vec<&'static str> = config.fields.iter().map(|f| f.name).collect();
        let position = |name: &str| field_names.iter().position(|f| *f == name);

        for (i, name) in field_names.iter().enumerate() {
            if field_names[..i].contains(name) {
                return Err(self.error(
                    MappingErrorKind::InvalidField,
                    format!("field '{}' is declared twice", name),
                ));
            }
        }

        for (field, column) in &overrides.columns {
            let index = position(field).ok_or_else(|| self.unknown_field(field))?;
            config.fields[index].column = Some(column.clone());
        }
        for field in &overrides.read_only {
            let index = position(field).ok_or_else(|| self.unknown_field(field))?;
            config.fields[index].read_only = true;
        }

        let table = overrides
            .table
            .clone()
            .or_else(|| config.table.take())
            .unwrap_or_else(|| self.type_name.to_string());
        self.identifier("table", &table)?;

        // Key: overrides, then the config's list, then per-field flags, then
        // the first declared field.
        let key_names = overrides
            .primary_key
            .clone()
            .or_else(|| config.primary_key.take());
        let primary_key: Vec<usize> = match key_names {
            Some(names) => names
                .iter()
                .map(|n| position(n).ok_or_else(|| self.unknown_field(n)))
                .collect::<Result<_>>()?,
            None => {
                let flagged: Vec<usize> = config
                    .fields
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| f.primary_key)
                    .map(|(i, _)| i)
                    .collect();
                if flagged.is_empty() {
                    (0..config.fields.len().min(1)).collect()
                } else {
                    flagged
                }
            }
        };
        for (i, index) in primary_key.iter().enumerate() {
            if primary_key[..i].contains(index) {
                return Err(self.error(
                    MappingErrorKind::InvalidField,
                    format!(
                        "field '{}' is listed twice in the primary key",
                        config.fields[*index].name
                    ),
                ));
            }
        }
        if primary_key.is_empty() {
            return Err(self.error(
                MappingErrorKind::NoPrimaryKey,
                "no primary key: the record declares no fields",
            ));
        }

        let mut columns: Vec<ColumnBinding<R>> = Vec::with_capacity(config.fields.len());
        for (index, def) in config.fields.into_iter().enumerate() {
            let column = def.column.unwrap_or_else(|| def.name.to_string());
            self.identifier("column", &column)?;
            if let Some(other) = columns
                .iter()
                .find(|c| c.column.eq_ignore_ascii_case(&column))
            {
                return Err(self.error(
                    MappingErrorKind::DuplicateColumn,
                    format!(
                        "fields '{}' and '{}' both map to column '{}'",
                        other.field, def.name, column
                    ),
                ));
            }
            let is_key = primary_key.contains(&index);
            if is_key && def.write_only {
                return Err(self.error(
                    MappingErrorKind::InvalidField,
                    format!("primary key field '{}' cannot be write-only", def.name),
                ));
            }
            if def.read_only && def.write_only {
                return Err(self.error(
                    MappingErrorKind::InvalidField,
                    format!("field '{}' is both read-only and write-only", def.name),
                ));
            }
            let translator = match def.translator {
                Some(t) => t,
                None => config.translators.resolve(def.field_type).map_err(|_| {
                    self.error(
                        MappingErrorKind::UnsupportedType,
                        format!(
                            "no translator for field '{}' of type '{}'",
                            def.name, def.field_type
                        ),
                    )
                })?,
            };
            columns.push(ColumnBinding {
                field: def.name,
                column,
                field_type: def.field_type,
                nullable: def.nullable,
                primary_key: is_key,
                identity: def.identity,
                read_only: def.read_only,
                write_only: def.write_only,
                translator,
                get: def.get,
                set: def.set,
            });
        }

        let identities: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.identity)
            .map(|(i, _)| i)
            .collect();
        if identities.len() > 1 {
            return Err(self.error(
                MappingErrorKind::InvalidField,
                "at most one identity column is allowed",
            ));
        }
        let identity = identities.first().copied();

        let field_exists = |name: &str| columns.iter().any(|c| c.field == name);

        let mut conditions = BTreeMap::new();
        let key_condition = primary_key.iter().fold(
            WhereCondition::new(PRIMARY_KEY_CONDITION),
            |cond, &i| cond.compare(columns[i].field, Comparison::Eq),
        );
        conditions.insert(PRIMARY_KEY_CONDITION.to_string(), key_condition);
        for condition in config.conditions.into_iter().chain(overrides.conditions) {
            if condition.name.is_empty()
                || condition.name == PRIMARY_KEY_CONDITION
                || condition.name.starts_with(MATCHING_CONDITION_PREFIX)
            {
                return Err(self.error(
                    MappingErrorKind::InvalidField,
                    format!("'{}' cannot name a condition", condition.name),
                ));
            }
            if let Some(p) = condition.predicates.iter().find(|p| !field_exists(&p.field)) {
                return Err(self.unknown_field(&p.field));
            }
            conditions.insert(condition.name.clone(), condition);
        }

        let mut orders = BTreeMap::new();
        for order in config.orders.into_iter().chain(overrides.orders) {
            if let Some(k) = order.keys.iter().find(|k| !field_exists(&k.field)) {
                return Err(self.unknown_field(&k.field));
            }
            orders.insert(order.name.clone(), order);
        }

        let mut expressions = BTreeMap::new();
        for (name, sql) in config.expressions.into_iter().chain(overrides.expressions) {
            let expression = self.parse_expression(&columns, name, &sql)?;
            expressions.insert(expression.name.clone(), expression);
        }

        let descriptor = RecordType {
            type_name: self.type_name,
            table,
            columns,
            primary_key,
            identity,
            conditions,
            orders,
            expressions,
            relationships: config.relationships,
        };

        for (i, rel) in descriptor.relationships.iter().enumerate() {
            if descriptor.relationships[..i]
                .iter()
                .any(|r| r.name() == rel.name())
            {
                return Err(self.error(
                    MappingErrorKind::InvalidRelationship,
                    format!("relationship '{}' is declared twice", rel.name()),
                ));
            }
            rel.validate(&descriptor)?;
        }
        Ok(descriptor)
    }

    fn parse_expression<R>(
        &self,
        columns: &[ColumnBinding<R>],
        name: String,
        sql: &str,
    ) -> Result<Expression> {
        self.identifier("expression name", &name)?;
        if sql.contains(';') || sql.contains("--") || sql.trim().is_empty() {
            return Err(self.error(
                MappingErrorKind::InvalidIdentifier,
                format!("expression '{}' is not a single SQL expression", name),
            ));
        }
        let mut parts = Vec::new();
        let mut rest = sql;
        while let Some(open) = rest.find('{') {
            let close = rest[open..].find('}').map(|c| open + c).ok_or_else(|| {
                self.error(
                    MappingErrorKind::InvalidIdentifier,
                    format!("expression '{}' has an unclosed '{{'", name),
                )
            })?;
            if open > 0 {
                parts.push(ExpressionPart::Text(rest[..open].to_string()));
            }
            let field = rest[open + 1..close].trim();
            let index = columns
                .iter()
                .position(|c| c.field == field)
                .ok_or_else(|| self.unknown_field(field))?;
            parts.push(ExpressionPart::Column(index));
            rest = &rest[close + 1..];
        }
        if !rest.is_empty() {
            parts.push(ExpressionPart::Text(rest.to_string()));
        }
        Ok(Expression { name, parts })
    }

    fn unknown_field(&self, field: &str) -> Error {
        self.error(
            MappingErrorKind::UnknownField,
            format!("{} has no field '{}'", self.type_name, field),
        )
    }
}
