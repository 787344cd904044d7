//! Database row representation.

use crate::Result;
use crate::error::{Error, TranslationError};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column names of a result set, shared by every row it yields.
#[derive(Debug, Clone, Default)]
pub struct ColumnInfo {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl ColumnInfo {
    pub fn new(names: Vec<String>) -> Self {
        let positions = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { names, positions }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One result row: column values in select-list order.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// A row with its own column list. Cursors share one list across rows
    /// with [`Row::with_columns`].
    pub fn new(names: Vec<String>, values: Vec<Value>) -> Self {
        Self::with_columns(Arc::new(ColumnInfo::new(names)), values)
    }

    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn columns(&self) -> &Arc<ColumnInfo> {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.position(name).and_then(|i| self.values.get(i))
    }

    /// The value at `index`, converted to `T`.
    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T> {
        match self.get(index) {
            Some(value) => T::from_value(value),
            None => Err(Error::Translation(TranslationError::new(
                std::any::type_name::<T>(),
                format!("column {} of a {}-column row", index, self.len()),
            ))),
        }
    }

    /// The value of column `name`, converted to `T`. Errors name the column.
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let converted = match self.get_by_name(name) {
            Some(value) => T::from_value(value),
            None => Err(Error::Translation(TranslationError::new(
                std::any::type_name::<T>(),
                "no such column",
            ))),
        };
        converted.map_err(|e| match e {
            Error::Translation(t) if t.column.is_none() => Error::Translation(t.with_column(name)),
            other => other,
        })
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// `(column, value)` pairs in select-list order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(&self.values)
    }
}

/// Conversion from a borrowed `Value` into a typed value.
///
/// Every type with a `TryFrom<Value>` conversion gets this for free; field
/// mutators generated by [`field!`](crate::field) go through it.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

impl<T> FromValue for T
where
    T: TryFrom<Value, Error = Error>,
{
    fn from_value(value: &Value) -> Result<Self> {
        T::try_from(value.clone())
    }
}
