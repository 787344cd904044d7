//! Type translators: field values to column values and back.
//!
//! Lookup order for a column's translator is
//! per-field override, then the record type's registry, then the
//! process-wide registry, then the built-in for the field type.
//!
//! The process-wide registry is read when descriptors are built and never
//! consulted again, so register custom translators before the first use of
//! any record type that needs them.

use crate::error::{Error, MappingError, MappingErrorKind, Result, TranslationError};
use crate::row::Row;
use crate::temporal;
use crate::types::FieldType;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Bidirectional conversion between a field value and its column form.
pub trait TypeTranslator: Send + Sync {
    /// Name used in error messages.
    fn name(&self) -> &str;

    /// Convert a non-null field value to the value bound as a parameter.
    fn to_column(&self, value: &Value) -> Result<Value>;

    /// Convert a non-null column value to the field's canonical value.
    fn from_column(&self, value: &Value) -> Result<Value>;

    /// Write `value` into parameter slot `index` (0-based).
    ///
    /// A null field value binds an explicit SQL NULL.
    fn encode(&self, params: &mut ParamBuffer, index: usize, value: &Value) -> Result<()> {
        let column = if value.is_null() {
            Value::Null
        } else {
            self.to_column(value)?
        };
        params.set(index, column)
    }

    /// Read column `index` (0-based) of `row`.
    fn decode(&self, row: &Row, index: usize) -> Result<Value> {
        match row.get(index) {
            None => Err(Error::Translation(
                TranslationError::new(
                    "column in range",
                    format!("index {} of {}", index, row.len()),
                )
                .with_translator(self.name()),
            )),
            Some(Value::Null) => Ok(Value::Null),
            Some(v) => self.from_column(v),
        }
    }
}

impl fmt::Debug for dyn TypeTranslator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTranslator({})", self.name())
    }
}

/// Positional parameters for one statement execution.
#[derive(Debug, Clone)]
pub struct ParamBuffer {
    slots: Vec<Option<Value>>,
}

impl ParamBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn set(&mut self, index: usize, value: Value) -> Result<()> {
        let len = self.slots.len();
        let slot = self.slots.get_mut(index).ok_or_else(|| {
            Error::Translation(TranslationError::new(
                "parameter index in range",
                format!("index {} of {}", index, len),
            ))
        })?;
        *slot = Some(value);
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Finish binding. Every slot must have been written.
    pub fn into_values(self) -> Result<Vec<Value>> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| {
                    Error::Translation(TranslationError::new(
                        "bound parameter",
                        format!("parameter {} was never bound", i + 1),
                    ))
                })
            })
            .collect()
    }
}

/// Translator for the non-custom field types.
///
/// Encoding normalizes to the type's canonical `Value` variant; decoding also
/// accepts the representations drivers hand back, such as integers for
/// booleans and ISO text for dates.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinTranslator {
    field_type: FieldType,
}

impl BuiltinTranslator {
    /// `None` for `FieldType::Custom`.
    pub fn for_type(field_type: FieldType) -> Option<Self> {
        match field_type {
            FieldType::Custom(_) => None,
            _ => Some(Self { field_type }),
        }
    }

    fn mismatch(&self, value: &Value) -> Error {
        Error::Translation(
            TranslationError::new(self.field_type.name(), value.type_name())
                .with_translator(self.field_type.name()),
        )
    }

    fn integer(&self, value: &Value, lenient: bool) -> Result<i64> {
        match value {
            Value::Bool(_) if !lenient => Err(self.mismatch(value)),
            Value::Text(s) if lenient => s.trim().parse().map_err(|_| self.mismatch(value)),
            v => v.as_i64().ok_or_else(|| self.mismatch(v)),
        }
    }

    fn convert(&self, value: &Value, lenient: bool) -> Result<Value> {
        let out_of_range = |v: i64| {
            Error::Translation(
                TranslationError::new(self.field_type.name(), format!("{} out of range", v))
                    .with_translator(self.field_type.name()),
            )
        };
        let converted = match (self.field_type, value) {
            (FieldType::Bool, Value::Bool(b)) => Value::Bool(*b),
            (FieldType::Bool, Value::Text(s)) if lenient => match s.as_str() {
                "true" | "t" | "1" => Value::Bool(true),
                "false" | "f" | "0" => Value::Bool(false),
                _ => return Err(self.mismatch(value)),
            },
            (FieldType::Bool, v) if lenient => {
                Value::Bool(v.as_bool().ok_or_else(|| self.mismatch(v))?)
            }
            (FieldType::Int8, v) => {
                let n = self.integer(v, lenient)?;
                Value::TinyInt(i8::try_from(n).map_err(|_| out_of_range(n))?)
            }
            (FieldType::Int16, v) => {
                let n = self.integer(v, lenient)?;
                Value::SmallInt(i16::try_from(n).map_err(|_| out_of_range(n))?)
            }
            (FieldType::Int32, v) => {
                let n = self.integer(v, lenient)?;
                Value::Int(i32::try_from(n).map_err(|_| out_of_range(n))?)
            }
            (FieldType::Int64, v) => Value::BigInt(self.integer(v, lenient)?),
            (FieldType::Float32, Value::Float(f)) => Value::Float(*f),
            (FieldType::Float32, Value::Double(d)) if (*d as f32).is_finite() || !d.is_finite() => {
                Value::Float(*d as f32)
            }
            (FieldType::Float32, v @ (Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_))) => {
                Value::Float(v.as_f64().ok_or_else(|| self.mismatch(v))? as f32)
            }
            (FieldType::Float64, Value::Float(f)) => Value::Double(f64::from(*f)),
            (FieldType::Float64, Value::Double(d)) => Value::Double(*d),
            (FieldType::Float64, v @ (Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_))) => {
                Value::Double(v.as_f64().ok_or_else(|| self.mismatch(v))?)
            }
            (FieldType::Decimal, Value::Decimal(s)) => Value::Decimal(s.clone()),
            (FieldType::Decimal, Value::Text(s)) if s.trim().parse::<f64>().is_ok() => {
                Value::Decimal(s.trim().to_string())
            }
            (FieldType::Decimal, v @ (Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_))) => {
                Value::Decimal(self.integer(v, lenient)?.to_string())
            }
            (FieldType::Decimal, Value::Double(d)) if lenient => Value::Decimal(d.to_string()),
            (FieldType::Text, Value::Text(s)) => Value::Text(s.clone()),
            (FieldType::Text, Value::Decimal(s)) => Value::Text(s.clone()),
            (FieldType::Bytes, Value::Bytes(b)) => Value::Bytes(b.clone()),
            (FieldType::Bytes, Value::Text(s)) if lenient => Value::Bytes(s.as_bytes().to_vec()),
            (FieldType::Date, Value::Date(d)) => Value::Date(*d),
            (FieldType::Date, Value::Text(s)) if lenient => {
                Value::Date(temporal::parse_date(s).ok_or_else(|| self.mismatch(value))?)
            }
            (FieldType::Date, v @ (Value::Int(_) | Value::BigInt(_))) if lenient => {
                let n = self.integer(v, lenient)?;
                Value::Date(i32::try_from(n).map_err(|_| out_of_range(n))?)
            }
            (FieldType::Time, Value::Time(t)) => Value::Time(*t),
            (FieldType::Time, Value::Text(s)) if lenient => {
                Value::Time(temporal::parse_time(s).ok_or_else(|| self.mismatch(value))?)
            }
            (FieldType::Time, v @ (Value::Int(_) | Value::BigInt(_))) if lenient => {
                Value::Time(self.integer(v, lenient)?)
            }
            (FieldType::Timestamp, Value::Timestamp(t)) => Value::Timestamp(*t),
            (FieldType::Timestamp, Value::Text(s)) if lenient => Value::Timestamp(
                temporal::parse_timestamp(s).ok_or_else(|| self.mismatch(value))?,
            ),
            (FieldType::Timestamp, v @ (Value::Int(_) | Value::BigInt(_))) if lenient => {
                Value::Timestamp(self.integer(v, lenient)?)
            }
            (FieldType::Uuid, Value::Uuid(u)) => Value::Uuid(*u),
            (FieldType::Uuid, Value::Bytes(b)) if b.len() == 16 => {
                let mut arr = [0u8; 16];
                arr.copy_from_slice(b);
                Value::Uuid(arr)
            }
            (FieldType::Uuid, Value::Text(s)) => {
                Value::Uuid(parse_uuid(s).ok_or_else(|| self.mismatch(value))?)
            }
            (FieldType::Json, Value::Json(j)) => Value::Json(j.clone()),
            (FieldType::Json, Value::Text(s)) if lenient => {
                Value::Json(serde_json::Value::try_from(Value::Text(s.clone()))?)
            }
            _ => return Err(self.mismatch(value)),
        };
        Ok(converted)
    }
}

impl TypeTranslator for BuiltinTranslator {
    fn name(&self) -> &str {
        self.field_type.name()
    }

    fn to_column(&self, value: &Value) -> Result<Value> {
        self.convert(value, false)
    }

    fn from_column(&self, value: &Value) -> Result<Value> {
        self.convert(value, true)
    }
}

fn parse_uuid(s: &str) -> Option<[u8; 16]> {
    let hex: Vec<u8> = s.bytes().filter(|b| *b != b'-').collect();
    if hex.len() != 32 {
        return None;
    }
    let mut out = [0u8; 16];
    for (i, pair) in hex.chunks(2).enumerate() {
        let text = std::str::from_utf8(pair).ok()?;
        out[i] = u8::from_str_radix(text, 16).ok()?;
    }
    Some(out)
}

type ConvertFn = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// Translator assembled from a pair of closures, for custom field types.
///
/// ```
/// use rowbind_core::{FnTranslator, TypeTranslator, Value};
///
/// // Money held as a decimal string, stored as integer cents.
/// let money = FnTranslator::new(
///     "money",
///     |v| {
///         let units: f64 = v.as_f64().unwrap_or_default();
///         Ok(Value::BigInt((units * 100.0).round() as i64))
///     },
///     |v| Ok(Value::Decimal(format!("{:.2}", v.as_i64().unwrap_or_default() as f64 / 100.0))),
/// );
/// assert_eq!(money.to_column(&Value::Decimal("12.34".into())).unwrap(), Value::BigInt(1234));
/// ```
#[derive(Clone)]
pub struct FnTranslator {
    name: String,
    to_column: ConvertFn,
    from_column: ConvertFn,
}

impl FnTranslator {
    pub fn new<E, D>(name: impl Into<String>, to_column: E, from_column: D) -> Self
    where
        E: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
        D: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            to_column: Arc::new(to_column),
            from_column: Arc::new(from_column),
        }
    }
}

impl fmt::Debug for FnTranslator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTranslator")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl TypeTranslator for FnTranslator {
    fn name(&self) -> &str {
        &self.name
    }

    fn to_column(&self, value: &Value) -> Result<Value> {
        (self.to_column)(value)
    }

    fn from_column(&self, value: &Value) -> Result<Value> {
        (self.from_column)(value)
    }
}

/// A set of translators keyed by field type.
///
/// One lives on each record configuration; one more is process-wide.
#[derive(Clone, Default)]
pub struct TranslatorRegistry {
    translators: HashMap<FieldType, Arc<dyn TypeTranslator>>,
}

impl TranslatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a translator, returning the one it replaced.
    pub fn register(
        &mut self,
        field_type: FieldType,
        translator: Arc<dyn TypeTranslator>,
    ) -> Option<Arc<dyn TypeTranslator>> {
        self.translators.insert(field_type, translator)
    }

    pub fn get(&self, field_type: FieldType) -> Option<Arc<dyn TypeTranslator>> {
        self.translators.get(&field_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.translators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.translators.is_empty()
    }

    /// Resolve a translator: this registry, then process-wide, then built-in.
    pub fn resolve(&self, field_type: FieldType) -> Result<Arc<dyn TypeTranslator>> {
        if let Some(t) = self.get(field_type) {
            return Ok(t);
        }
        if let Some(t) = global_translator(field_type) {
            return Ok(t);
        }
        builtin(field_type).ok_or_else(|| {
            Error::Mapping(MappingError::new(
                MappingErrorKind::UnsupportedType,
                field_type.name(),
                format!("no translator registered for field type '{}'", field_type),
            ))
        })
    }
}

impl fmt::Debug for TranslatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.translators.keys()).finish()
    }
}

fn global() -> &'static RwLock<TranslatorRegistry> {
    static GLOBAL: OnceLock<RwLock<TranslatorRegistry>> = OnceLock::new();
    GLOBAL.get_or_init(|| RwLock::new(TranslatorRegistry::new()))
}

/// Register a process-wide translator.
///
/// Only descriptors built after this call see it.
pub fn register_global(field_type: FieldType, translator: Arc<dyn TypeTranslator>) {
    tracing::debug!(
        field_type = %field_type,
        translator = translator.name(),
        "Registering process-wide translator"
    );
    global()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .register(field_type, translator);
}

/// The process-wide translator for a field type, if one was registered.
pub fn global_translator(field_type: FieldType) -> Option<Arc<dyn TypeTranslator>> {
    global()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(field_type)
}

/// The built-in translator for a field type. `None` for custom types.
pub fn builtin(field_type: FieldType) -> Option<Arc<dyn TypeTranslator>> {
    BuiltinTranslator::for_type(field_type).map(|t| Arc::new(t) as Arc<dyn TypeTranslator>)
}
