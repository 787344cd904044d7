//! The `Record` trait and its mapping configuration builder.

use crate::descriptor::{OrderSpec, RecordType, WhereCondition};
use crate::error::Result;
use crate::field::FieldDef;
use crate::overrides::MappingOverrides;
use crate::relationship::RelationshipBinding;
use crate::translate::{TranslatorRegistry, TypeTranslator};
use crate::types::FieldType;
use std::sync::Arc;

/// A plain data type mapped to a table.
///
/// `mapping()` is called once per process, the first time the record type is
/// used, and the result is resolved into a [`RecordType`] descriptor. It is
/// never re-read per operation.
///
/// ```
/// use rowbind_core::{field, FieldType, Record, RecordConfig, RecordType};
///
/// #[derive(Debug, Default, Clone)]
/// struct Part {
///     part_number: i32,
///     qty: i32,
/// }
///
/// impl Record for Part {
///     fn mapping() -> RecordConfig<Self> {
///         RecordConfig::new()
///             .field(field!(Part, part_number, "partNumber", FieldType::Int32))
///             .field(field!(Part, qty, FieldType::Int32))
///     }
/// }
///
/// let part = RecordType::<Part>::get().unwrap();
/// assert_eq!(part.table(), "Part");
/// assert_eq!(part.primary_key_fields(), vec!["partNumber"]);
/// ```
pub trait Record: Clone + Default + Send + Sync + 'static {
    fn mapping() -> RecordConfig<Self>;
}

/// Chainable mapping configuration for one record type.
///
/// Anything left unset falls back to the zero-configuration defaults: the
/// table is named after the type, each column after its field, and the first
/// declared field is the sole primary key.
pub struct RecordConfig<R> {
    pub(crate) table: Option<String>,
    pub(crate) fields: Vec<FieldDef<R>>,
    pub(crate) primary_key: Option<Vec<String>>,
    pub(crate) conditions: Vec<WhereCondition>,
    pub(crate) orders: Vec<OrderSpec>,
    pub(crate) expressions: Vec<(String, String)>,
    pub(crate) translators: TranslatorRegistry,
    pub(crate) relationships: Vec<Arc<dyn RelationshipBinding<R>>>,
    pub(crate) overrides: Option<MappingOverrides>,
}

impl<R> Default for RecordConfig<R> {
    fn default() -> Self {
        Self {
            table: None,
            fields: Vec::new(),
            primary_key: None,
            conditions: Vec::new(),
            orders: Vec::new(),
            expressions: Vec::new(),
            translators: TranslatorRegistry::new(),
            relationships: Vec::new(),
            overrides: None,
        }
    }
}

impl<R> RecordConfig<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Declare the next field. Declaration order is column order.
    pub fn field(mut self, field: FieldDef<R>) -> Self {
        self.fields.push(field);
        self
    }

    /// Primary key fields, in key order. Overrides per-field flags.
    pub fn primary_key(mut self, fields: &[&str]) -> Self {
        self.primary_key = Some(fields.iter().map(ToString::to_string).collect());
        self
    }

    /// Declare a named condition.
    pub fn condition(mut self, condition: WhereCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Declare a named order.
    pub fn order(mut self, order: OrderSpec) -> Self {
        self.orders.push(order);
        self
    }

    /// Declare a named aggregate expression.
    ///
    /// Fields are referenced in braces, e.g. `"{qty} * {unitPrice}"`, and
    /// replaced by their quoted column names when the descriptor is built.
    pub fn expression(mut self, name: impl Into<String>, sql: impl Into<String>) -> Self {
        self.expressions.push((name.into(), sql.into()));
        self
    }

    /// Translator for every field of `field_type` on this record type.
    pub fn translator(mut self, field_type: FieldType, translator: Arc<dyn TypeTranslator>) -> Self {
        self.translators.register(field_type, translator);
        self
    }

    pub fn relationship(mut self, relationship: impl RelationshipBinding<R> + 'static) -> Self {
        self.relationships.push(Arc::new(relationship));
        self
    }

    /// Declarative overrides applied on top of everything above.
    pub fn overrides(mut self, overrides: MappingOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }
}

impl<R: Record> RecordConfig<R> {
    /// Resolve into a descriptor without touching the process-wide registry.
    pub fn build(self) -> Result<RecordType<R>> {
        RecordType::resolve(self)
    }
}
