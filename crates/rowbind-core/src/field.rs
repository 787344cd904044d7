//! Field declarations and their accessor/mutator pairs.

use crate::error::Result;
use crate::translate::TypeTranslator;
use crate::types::FieldType;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Reads a field out of a record as a `Value`.
pub type Getter<R> = fn(&R) -> Value;

/// Writes a decoded `Value` into a record field.
pub type Setter<R> = fn(&mut R, Value) -> Result<()>;

/// Declaration of one record field.
///
/// Unless overridden, the column name equals the field name. Use the
/// [`field!`](crate::field) macro to generate the accessor pair from a struct
/// field.
pub struct FieldDef<R> {
    pub(crate) name: &'static str,
    pub(crate) field_type: FieldType,
    pub(crate) column: Option<String>,
    pub(crate) primary_key: bool,
    pub(crate) identity: bool,
    pub(crate) read_only: bool,
    pub(crate) write_only: bool,
    pub(crate) nullable: bool,
    pub(crate) translator: Option<Arc<dyn TypeTranslator>>,
    pub(crate) get: Getter<R>,
    pub(crate) set: Setter<R>,
}

impl<R> FieldDef<R> {
    pub fn new(name: &'static str, field_type: FieldType, get: Getter<R>, set: Setter<R>) -> Self {
        Self {
            name,
            field_type,
            column: None,
            primary_key: false,
            identity: false,
            read_only: false,
            write_only: false,
            nullable: false,
            translator: None,
            get,
            set,
        }
    }

    /// Map the field to a differently named column.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Mark the field as (part of) the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// The database generates this column's value on insert.
    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    /// Never written by updates.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Written but never selected.
    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Use this translator for the field, whatever its type.
    pub fn translator(mut self, translator: Arc<dyn TypeTranslator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<R> fmt::Debug for FieldDef<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("column", &self.column)
            .field("primary_key", &self.primary_key)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Declare a field whose accessor and mutator go straight to a struct field.
///
/// The struct field's type needs `Into<Value>` (via `Clone`) and
/// `TryFrom<Value>`; all the primitive, string and `Option` types qualify.
///
/// ```
/// use rowbind_core::{field, FieldType};
///
/// #[derive(Debug, Default, Clone)]
/// struct Part {
///     part_number: i32,
///     qty: i32,
/// }
///
/// let pk = field!(Part, part_number, "partNumber", FieldType::Int32);
/// let qty = field!(Part, qty, FieldType::Int32);
/// assert_eq!(pk.name(), "partNumber");
/// assert_eq!(qty.name(), "qty");
/// ```
#[macro_export]
macro_rules! field {
    ($record:ty, $field:ident, $field_type:expr) => {
        $crate::field!($record, $field, stringify!($field), $field_type)
    };
    ($record:ty, $field:ident, $name:expr, $field_type:expr) => {
        $crate::FieldDef::<$record>::new(
            $name,
            $field_type,
            |record: &$record| $crate::Value::from(record.$field.clone()),
            |record: &mut $record, value: $crate::Value| {
                record.$field = $crate::FromValue::from_value(&value)?;
                Ok(())
            },
        )
    };
}
