//! Error types for rowbind operations.

use crate::value::Value;
use std::fmt;

/// The primary error type for all rowbind operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (open, close)
    Connection(ConnectionError),
    /// Driver-level statement failures
    Query(QueryError),
    /// Bad or missing mapping metadata
    Mapping(MappingError),
    /// Type mismatch while encoding or decoding a value
    Translation(TranslationError),
    /// Statement execution failure with operation context
    Operation(OperationError),
    /// Write conflicts with the row cache
    DuplicateCache(DuplicateCacheError),
    /// A deferred relationship fetch failed
    LazyCascade(LazyCascadeError),
    /// Transaction errors
    Transaction(TransactionError),
    /// Configuration errors
    Config(ConfigError),
    /// Serialization/deserialization errors
    Serde(String),
    /// I/O errors
    Io(std::io::Error),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to open the database
    Connect,
    /// Connection was closed or is unusable
    Disconnected,
    /// A connection provider could not hand out a connection
    Unavailable,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Data too large for column
    DataTruncation,
    /// Database busy or locked
    Deadlock,
    /// Parameter count or type rejected by the driver
    Binding,
    /// Other database error
    Database,
}

/// Mapping metadata could not be resolved.
///
/// Raised while building a record descriptor or a statement. Fatal for the
/// record type: retrying will fail the same way.
#[derive(Debug, Clone)]
pub struct MappingError {
    pub kind: MappingErrorKind,
    /// Record type (or table) the problem was found on
    pub record: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingErrorKind {
    /// No primary key column could be determined
    NoPrimaryKey,
    /// A field name does not exist on the record
    UnknownField,
    /// Two bindings share a column name
    DuplicateColumn,
    /// No translator is registered for a field type
    UnsupportedType,
    /// A named where condition is not declared
    UnknownCondition,
    /// A named order is not declared
    UnknownOrder,
    /// A named aggregate expression is not declared
    UnknownExpression,
    /// A table or column name is not a valid identifier
    InvalidIdentifier,
    /// Field flags contradict each other
    InvalidField,
    /// A relationship declaration is inconsistent
    InvalidRelationship,
    /// A cache policy cannot apply to the record type
    InvalidPolicy,
}

/// A value could not be translated between its field and column forms.
#[derive(Debug, Clone)]
pub struct TranslationError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
    pub translator: Option<String>,
}

/// A statement failed during execution.
///
/// Carries enough context to find the offending row: the table, the
/// operation, and the key values when they are known.
#[derive(Debug)]
pub struct OperationError {
    pub kind: OperationKind,
    pub table: String,
    pub key: Option<Vec<Value>>,
    /// Rows completed before the failure (bulk inserts, cache flushes)
    pub completed: u64,
    /// Keys whose staged writes were applied before the failure
    pub applied: Vec<Vec<Value>>,
    pub message: String,
    pub source: Option<Box<Error>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Insert,
    InsertAll,
    Update,
    Delete,
    Select,
    SelectAll,
    Aggregate,
    Cascade,
    Flush,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::InsertAll => "insert_all",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Select => "select",
            OperationKind::SelectAll => "select_all",
            OperationKind::Aggregate => "aggregate",
            OperationKind::Cascade => "cascade",
            OperationKind::Flush => "flush",
        }
    }
}

/// A write conflicts with what the row cache already holds for a key.
#[derive(Debug, Clone)]
pub struct DuplicateCacheError {
    pub table: String,
    pub key: Vec<Value>,
    /// Cache state of the key when the write arrived
    pub state: &'static str,
}

/// A lazy relationship could not be resolved.
#[derive(Debug)]
pub struct LazyCascadeError {
    pub relationship: String,
    /// Owner record, as `Type[key, ...]`
    pub owner: String,
    pub message: String,
    pub source: Option<Box<Error>>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// No transaction is open
    NotActive,
    /// A transaction is already open
    AlreadyActive,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl MappingError {
    pub fn new(
        kind: MappingErrorKind,
        record: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            record: record.into(),
            message: message.into(),
        }
    }
}

impl TranslationError {
    pub fn new(expected: &'static str, actual: impl Into<String>) -> Self {
        Self {
            expected,
            actual: actual.into(),
            column: None,
            translator: None,
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_translator(mut self, translator: impl Into<String>) -> Self {
        self.translator = Some(translator.into());
        self
    }
}

impl OperationError {
    pub fn new(kind: OperationKind, table: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            key: None,
            completed: 0,
            applied: Vec::new(),
            message: message.into(),
            source: None,
        }
    }

    pub fn with_key(mut self, key: Vec<Value>) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_completed(mut self, completed: u64) -> Self {
        self.completed = completed;
        self
    }

    pub fn with_applied(mut self, applied: Vec<Vec<Value>>) -> Self {
        self.applied = applied;
        self
    }

    pub fn with_source(mut self, source: Error) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The innermost error that is not an `OperationError`, if any.
    pub fn root_cause(&self) -> Option<&Error> {
        let mut current = self.source.as_deref()?;
        while let Error::Operation(op) = current {
            match op.source.as_deref() {
                Some(next) => current = next,
                None => return Some(current),
            }
        }
        Some(current)
    }
}

impl Error {
    /// Wrap `self` as the cause of an operation failure.
    ///
    /// Mapping and translation errors pass through untouched so callers can
    /// still match on them directly.
    pub fn into_operation(
        self,
        kind: OperationKind,
        table: &str,
        key: Option<&[Value]>,
    ) -> Error {
        match self {
            Error::Mapping(_) | Error::Translation(_) | Error::Operation(_) => self,
            other => {
                let mut op = OperationError::new(kind, table, other.to_string());
                op.key = key.map(<[Value]>::to_vec);
                Error::Operation(op.with_source(other))
            }
        }
    }

    /// Is this a retryable error (busy/locked database)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(q.kind, QueryErrorKind::Deadlock),
            Error::Operation(op) => op.source.as_deref().is_some_and(Error::is_retryable),
            _ => false,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            Error::Operation(op) => op.source.as_deref().and_then(Error::sql),
            _ => None,
        }
    }

    /// Is this a constraint violation reported by the database?
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Error::Query(q) => q.kind == QueryErrorKind::Constraint,
            Error::Operation(op) => op
                .source
                .as_deref()
                .is_some_and(Error::is_constraint_violation),
            _ => false,
        }
    }
}

fn format_key(key: &[Value]) -> String {
    let parts: Vec<String> = key.iter().map(|v| format!("{v:?}")).collect();
    format!("[{}]", parts.join(", "))
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Mapping(e) => write!(f, "Mapping error: {}", e),
            Error::Translation(e) => write!(f, "Translation error: {}", e),
            Error::Operation(e) => write!(f, "Operation error: {}", e),
            Error::DuplicateCache(e) => write!(f, "Duplicate cache entry: {}", e),
            Error::LazyCascade(e) => write!(f, "Lazy cascade error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Operation(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::LazyCascade(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.record, self.message)
    }
}

impl fmt::Display for TranslationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on '{}'", self.kind.as_str(), self.table)?;
        if let Some(key) = &self.key {
            write!(f, " key {}", format_key(key))?;
        }
        write!(f, ": {}", self.message)?;
        if self.completed > 0 {
            write!(f, " ({} completed)", self.completed)?;
        }
        Ok(())
    }
}

impl fmt::Display for DuplicateCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' key {} is already cached as {}",
            self.table,
            format_key(&self.key),
            self.state
        )
    }
}

impl fmt::Display for LazyCascadeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "relationship '{}' of {}: {}",
            self.relationship, self.owner, self.message
        )
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<TranslationError> for Error {
    fn from(err: TranslationError) -> Self {
        Error::Translation(err)
    }
}

impl From<OperationError> for Error {
    fn from(err: OperationError) -> Self {
        Error::Operation(err)
    }
}

impl From<DuplicateCacheError> for Error {
    fn from(err: DuplicateCacheError) -> Self {
        Error::DuplicateCache(err)
    }
}

impl From<LazyCascadeError> for Error {
    fn from(err: LazyCascadeError) -> Self {
        Error::LazyCascade(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for rowbind operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn constraint() -> Error {
        Error::Query(QueryError {
            kind: QueryErrorKind::Constraint,
            sql: Some("INSERT INTO \"Part\" VALUES (?1)".to_string()),
            message: "UNIQUE constraint failed: Part.partNumber".to_string(),
            source: None,
        })
    }

    #[test]
    fn operation_error_keeps_context() {
        let err = constraint().into_operation(
            OperationKind::Insert,
            "Part",
            Some(&[Value::Int(1234)]),
        );
        let Error::Operation(op) = &err else {
            panic!("expected operation error, got {err:?}");
        };
        assert_eq!(op.kind, OperationKind::Insert);
        assert_eq!(op.table, "Part");
        assert_eq!(op.key.as_deref(), Some(&[Value::Int(1234)][..]));
        assert!(err.is_constraint_violation());
        assert_eq!(err.sql(), Some("INSERT INTO \"Part\" VALUES (?1)"));
        assert!(err.to_string().contains("insert on 'Part' key [Int(1234)]"));
    }

    #[test]
    fn mapping_errors_pass_through_operation_wrapping() {
        let err = Error::Mapping(MappingError::new(
            MappingErrorKind::UnknownCondition,
            "Part",
            "no condition named 'byColour'",
        ));
        let wrapped = err.into_operation(OperationKind::SelectAll, "Part", None);
        assert!(matches!(
            wrapped,
            Error::Mapping(MappingError {
                kind: MappingErrorKind::UnknownCondition,
                ..
            })
        ));
    }

    #[test]
    fn root_cause_walks_nested_operations() {
        let inner = constraint().into_operation(OperationKind::Insert, "Line", None);
        let outer = OperationError::new(OperationKind::Cascade, "Order", "child insert failed")
            .with_source(inner);
        assert!(matches!(outer.root_cause(), Some(Error::Query(_))));
        assert!(std::error::Error::source(&Error::Operation(outer)).is_some());
    }

    #[test]
    fn retryable_flags() {
        let busy = Error::Query(QueryError {
            kind: QueryErrorKind::Deadlock,
            sql: None,
            message: "database is locked".to_string(),
            source: None,
        });
        assert!(busy.is_retryable());
        assert!(!constraint().is_retryable());
    }

    #[test]
    fn duplicate_cache_display() {
        let err = DuplicateCacheError {
            table: "Part".to_string(),
            key: vec![Value::Int(7)],
            state: "clean",
        };
        assert_eq!(
            err.to_string(),
            "'Part' key [Int(7)] is already cached as clean"
        );
    }
}
