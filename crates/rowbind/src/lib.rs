//! rowbind - bind plain Rust records to relational tables.
//!
//! A record type describes its table once, in [`Record::mapping`]. From that
//! description rowbind builds the SQL for selects, inserts, updates, deletes
//! and aggregates, converts field values through pluggable translators, and
//! walks declared relationships so that writes and reads cascade to related
//! tables.
//!
//! On top of that, a [`Session`] adds:
//!
//! - an optional per-type row cache, either read-only or read-write with
//!   writes staged until commit
//! - lazy relationships that fetch on first access, even after the session
//!   that loaded the owner is gone
//! - paged selects with `LIMIT`/`OFFSET` or cursor scrolling
//!
//! # Quick Start
//!
//! ```ignore
//! use rowbind::prelude::*;
//! use std::sync::Arc;
//!
//! #[derive(Debug, Default, Clone)]
//! struct Part {
//!     part_number: i32,
//!     qty: i32,
//! }
//!
//! impl Record for Part {
//!     fn mapping() -> RecordConfig<Self> {
//!         RecordConfig::new()
//!             .field(field!(Part, part_number, "partNumber", FieldType::Int32))
//!             .field(field!(Part, qty, FieldType::Int32))
//!             .condition(WhereCondition::new("lowStock").compare("qty", Comparison::Lt))
//!     }
//! }
//!
//! let conn = Arc::new(SqliteConnection::open_memory()?);
//! conn.execute_raw(&CreateTable::new(&*RecordType::<Part>::get()?).build(conn.dialect()))?;
//!
//! let mut session = Session::open(conn);
//! session.insert(&mut Part { part_number: 1234, qty: 99 })?;
//! let low = session.select_all::<Part>(Some("lowStock"), &[Value::Int(10)])?;
//! ```
//!
//! Mappings default to zero configuration: the table is named after the
//! type, columns after the fields, and the first field is the primary key.

pub use rowbind_core::{
    Cardinality, CascadeContext, CascadeOps, ColumnBinding, Comparison, Connection,
    ConnectionProvider, Dialect, DuplicateCacheError, Error, FetchState, FieldDef, FieldType,
    FnTranslator, IsolationLevel, Lazy, LazyCascadeError, LazyHandle, MATCHING_CONDITION_PREFIX,
    MappingError, MappingErrorKind, MappingOverrides, NoProvider, OperationError, OperationKind,
    OrderSpec, PRIMARY_KEY_CONDITION, Record, RecordConfig, RecordType, RelationshipBinding,
    Result, Row, RowCursor, SharedConnection, TransactionError, TransactionErrorKind,
    TranslationError, TypeTranslator, Value, WhereCondition, field,
};
pub use rowbind_core::{registry, translate};

pub use rowbind_query::{Aggregate, CreateTable, StatementBuilder, drop_table};

pub use rowbind_session::{
    CachePolicy, ChildSlot, FlushSummary, PageStrategy, Pages, PaginatedSelect, RecordCursor,
    Relation, Session, SessionConfig, slot,
};

#[cfg(feature = "sqlite")]
pub use rowbind_sqlite::{OpenFlags, SqliteConfig, SqliteConnection};

/// Everything a typical mapping and session needs.
///
/// ```ignore
/// use rowbind::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        CachePolicy, Comparison, Connection, CreateTable, Error, FieldType, IsolationLevel, Lazy,
        OrderSpec, PageStrategy, Record, RecordConfig, RecordType, Relation, Result, Session,
        SessionConfig, Value, WhereCondition, field, slot,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::SqliteConnection;
}
