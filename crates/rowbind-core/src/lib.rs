//! Core types and traits for rowbind.
//!
//! This crate provides the foundations the other rowbind crates build on:
//!
//! - `Value` and `Row` for dynamically typed column data
//! - `Record`, `RecordConfig` and `field!` for declaring mappings
//! - `RecordType`, the resolved and process-wide cached mapping descriptor
//! - `TypeTranslator` and the translator registries
//! - `Connection` and `ConnectionProvider`, the synchronous driver contract
//! - `RelationshipBinding`, `CascadeContext` and `Lazy` for related records
//! - the `Error` taxonomy shared by every layer

pub mod connection;
pub mod descriptor;
pub mod error;
pub mod field;
pub mod identifiers;
pub mod overrides;
pub mod record;
pub mod registry;
pub mod relationship;
pub mod row;
pub mod temporal;
pub mod translate;
pub mod types;
pub mod value;

pub use connection::{
    Connection, ConnectionProvider, Dialect, IsolationLevel, NoProvider, RowCursor,
    SharedConnection,
};
pub use descriptor::{
    ColumnBinding, Comparison, Expression, ExpressionPart, MATCHING_CONDITION_PREFIX, OrderKey,
    OrderSpec, PRIMARY_KEY_CONDITION, Predicate, RecordType, WhereCondition, short_type_name,
};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, DuplicateCacheError, Error,
    LazyCascadeError, MappingError, MappingErrorKind, OperationError, OperationKind, QueryError,
    QueryErrorKind, Result, TransactionError, TransactionErrorKind, TranslationError,
};
pub use field::FieldDef;
pub use identifiers::{is_valid_identifier, quote_ident, quote_ident_mysql, quote_qualified};
pub use overrides::MappingOverrides;
pub use record::{Record, RecordConfig};
pub use relationship::{
    Cardinality, CascadeContext, CascadeOps, FetchState, Fetcher, Lazy, LazyHandle,
    RelationshipBinding,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use translate::{
    BuiltinTranslator, FnTranslator, ParamBuffer, TranslatorRegistry, TypeTranslator,
};
pub use types::FieldType;
pub use value::Value;
