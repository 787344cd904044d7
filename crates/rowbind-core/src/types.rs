//! Semantic field types.

use crate::connection::Dialect;
use std::fmt;

/// The semantic type of a record field.
///
/// Translators are looked up by field type. `Custom` types have no built-in
/// translator and must be registered per field, per record type, or
/// process-wide before the first descriptor that uses them is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Arbitrary precision decimal carried as text
    Decimal,
    Text,
    Bytes,
    /// Days since 1970-01-01
    Date,
    /// Microseconds since midnight
    Time,
    /// Microseconds since the Unix epoch, UTC
    Timestamp,
    Uuid,
    Json,
    Custom(&'static str),
}

impl FieldType {
    pub const fn name(&self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::Int8 => "int8",
            FieldType::Int16 => "int16",
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::Float32 => "float32",
            FieldType::Float64 => "float64",
            FieldType::Decimal => "decimal",
            FieldType::Text => "text",
            FieldType::Bytes => "bytes",
            FieldType::Date => "date",
            FieldType::Time => "time",
            FieldType::Timestamp => "timestamp",
            FieldType::Uuid => "uuid",
            FieldType::Json => "json",
            FieldType::Custom(name) => name,
        }
    }

    /// Is this one of the integer types?
    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            FieldType::Int8 | FieldType::Int16 | FieldType::Int32 | FieldType::Int64
        )
    }

    /// Column type used when generating DDL.
    pub fn sql_type(&self, dialect: Dialect) -> &'static str {
        match (self, dialect) {
            (FieldType::Bool, Dialect::Sqlite) => "INTEGER",
            (FieldType::Bool, _) => "BOOLEAN",
            (FieldType::Int8 | FieldType::Int16, Dialect::Sqlite) => "INTEGER",
            (FieldType::Int8, _) => "SMALLINT",
            (FieldType::Int16, _) => "SMALLINT",
            (FieldType::Int32, _) => "INTEGER",
            (FieldType::Int64, Dialect::Sqlite) => "INTEGER",
            (FieldType::Int64, _) => "BIGINT",
            (FieldType::Float32, _) => "REAL",
            (FieldType::Float64, Dialect::Postgres) => "DOUBLE PRECISION",
            (FieldType::Float64, _) => "DOUBLE",
            // NUMERIC affinity would turn "12.50" into a REAL
            (FieldType::Decimal, Dialect::Sqlite) => "TEXT",
            (FieldType::Decimal, _) => "DECIMAL",
            (FieldType::Text, _) => "TEXT",
            (FieldType::Bytes, Dialect::Postgres) => "BYTEA",
            (FieldType::Bytes, _) => "BLOB",
            (FieldType::Date, _) => "DATE",
            (FieldType::Time, _) => "TIME",
            (FieldType::Timestamp, _) => "TIMESTAMP",
            (FieldType::Uuid, Dialect::Postgres) => "UUID",
            (FieldType::Uuid, _) => "BLOB",
            (FieldType::Json, Dialect::Postgres) => "JSONB",
            (FieldType::Json, _) => "TEXT",
            (FieldType::Custom(_), _) => "TEXT",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_collapses_integers() {
        assert_eq!(FieldType::Int8.sql_type(Dialect::Sqlite), "INTEGER");
        assert_eq!(FieldType::Int64.sql_type(Dialect::Sqlite), "INTEGER");
        assert_eq!(FieldType::Int64.sql_type(Dialect::Postgres), "BIGINT");
        assert_eq!(FieldType::Bool.sql_type(Dialect::Sqlite), "INTEGER");
    }

    #[test]
    fn custom_names() {
        assert_eq!(FieldType::Custom("money").name(), "money");
        assert_eq!(FieldType::Custom("money").to_string(), "money");
        assert!(FieldType::Int16.is_integer());
        assert!(!FieldType::Decimal.is_integer());
    }
}
