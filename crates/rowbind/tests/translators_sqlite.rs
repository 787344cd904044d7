//! Field values survive a trip through SQLite storage.

use rowbind::prelude::*;
use rowbind::{FieldDef, FnTranslator, MappingError, MappingErrorKind, TranslationError, translate};
use std::sync::Arc;

#[derive(Debug, Default, Clone, PartialEq)]
struct Sample {
    id: i64,
    flag: bool,
    small: i16,
    ratio: f64,
    price: String,
    note: Option<String>,
    blob: Vec<u8>,
    token: [u8; 16],
    meta: serde_json::Value,
}

impl Record for Sample {
    fn mapping() -> RecordConfig<Self> {
        RecordConfig::new()
            .field(field!(Sample, id, FieldType::Int64).identity())
            .field(field!(Sample, flag, FieldType::Bool))
            .field(field!(Sample, small, FieldType::Int16))
            .field(field!(Sample, ratio, FieldType::Float64))
            .field(field!(Sample, price, FieldType::Decimal))
            .field(field!(Sample, note, FieldType::Text).nullable(true))
            .field(field!(Sample, blob, FieldType::Bytes))
            .field(field!(Sample, token, FieldType::Uuid))
            .field(field!(Sample, meta, FieldType::Json))
    }
}

fn session_for<R: Record>() -> Session<SqliteConnection> {
    let conn = SqliteConnection::open_memory().unwrap();
    let descriptor = RecordType::<R>::get().unwrap();
    conn.execute_raw(&CreateTable::new(&descriptor).build(conn.dialect()))
        .unwrap();
    Session::open(Arc::new(conn))
}

#[test]
fn builtin_types_round_trip() {
    let mut session = session_for::<Sample>();
    let samples = [
        Sample {
            flag: true,
            small: -300,
            ratio: 0.125,
            price: "19.99".into(),
            note: Some("fragile".into()),
            blob: vec![0, 1, 2, 255],
            token: [7; 16],
            meta: serde_json::json!({ "tags": ["a", "b"], "n": 3 }),
            ..Sample::default()
        },
        Sample {
            price: "0".into(),
            note: None,
            meta: serde_json::Value::Null,
            ..Sample::default()
        },
    ];
    for original in samples {
        let mut inserted = original.clone();
        session.insert(&mut inserted).unwrap();
        assert!(inserted.id > 0);

        let loaded = session
            .select::<Sample>(&[Value::BigInt(inserted.id)])
            .unwrap()
            .unwrap();
        assert_eq!(*loaded, inserted);
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Reading {
    id: i32,
    tiny: i8,
    wide: i64,
    single: f32,
    day: i32,
    clock: i64,
    instant: i64,
    maybe_tiny: Option<i8>,
    maybe_single: Option<f32>,
    maybe_day: Option<i32>,
    maybe_instant: Option<i64>,
}

fn temporal(expected: &'static str, v: &Value) -> Error {
    Error::Translation(TranslationError::new(expected, v.type_name()))
}

impl Record for Reading {
    fn mapping() -> RecordConfig<Self> {
        RecordConfig::new()
            .field(field!(Reading, id, FieldType::Int32))
            .field(field!(Reading, tiny, FieldType::Int8))
            .field(field!(Reading, wide, FieldType::Int64))
            .field(field!(Reading, single, FieldType::Float32))
            .field(FieldDef::new(
                "day",
                FieldType::Date,
                |r: &Reading| Value::Date(r.day),
                |r: &mut Reading, v: Value| match v {
                    Value::Date(d) => {
                        r.day = d;
                        Ok(())
                    }
                    other => Err(temporal("date", &other)),
                },
            ))
            .field(FieldDef::new(
                "clock",
                FieldType::Time,
                |r: &Reading| Value::Time(r.clock),
                |r: &mut Reading, v: Value| match v {
                    Value::Time(t) => {
                        r.clock = t;
                        Ok(())
                    }
                    other => Err(temporal("time", &other)),
                },
            ))
            .field(FieldDef::new(
                "instant",
                FieldType::Timestamp,
                |r: &Reading| Value::Timestamp(r.instant),
                |r: &mut Reading, v: Value| match v {
                    Value::Timestamp(t) => {
                        r.instant = t;
                        Ok(())
                    }
                    other => Err(temporal("timestamp", &other)),
                },
            ))
            .field(field!(Reading, maybe_tiny, FieldType::Int8).nullable(true))
            .field(field!(Reading, maybe_single, FieldType::Float32).nullable(true))
            .field(
                FieldDef::new(
                    "maybe_day",
                    FieldType::Date,
                    |r: &Reading| r.maybe_day.map_or(Value::Null, Value::Date),
                    |r: &mut Reading, v: Value| {
                        r.maybe_day = match v {
                            Value::Null => None,
                            Value::Date(d) => Some(d),
                            other => return Err(temporal("date", &other)),
                        };
                        Ok(())
                    },
                )
                .nullable(true),
            )
            .field(
                FieldDef::new(
                    "maybe_instant",
                    FieldType::Timestamp,
                    |r: &Reading| r.maybe_instant.map_or(Value::Null, Value::Timestamp),
                    |r: &mut Reading, v: Value| {
                        r.maybe_instant = match v {
                            Value::Null => None,
                            Value::Timestamp(t) => Some(t),
                            other => return Err(temporal("timestamp", &other)),
                        };
                        Ok(())
                    },
                )
                .nullable(true),
            )
    }
}

#[test]
fn narrow_numeric_and_temporal_types_round_trip() {
    let mut session = session_for::<Reading>();
    let readings = [
        Reading {
            id: 1,
            tiny: i8::MIN,
            wide: i64::MIN,
            single: -2.5,
            day: -800_000,
            clock: 0,
            instant: -69_120_000_000_000_001,
            maybe_tiny: Some(i8::MAX),
            maybe_single: Some(f32::MAX),
            maybe_day: Some(-719_529),
            maybe_instant: Some(-1),
        },
        Reading {
            id: i32::MIN,
            tiny: 0,
            wide: i64::MAX,
            single: 0.125,
            day: 0,
            clock: 86_399_999_999,
            instant: 1_700_000_000_123_456,
            ..Reading::default()
        },
        Reading {
            id: i32::MAX,
            day: -1,
            clock: 1,
            instant: -86_400_000_000,
            maybe_day: Some(2_932_896),
            ..Reading::default()
        },
    ];
    for original in readings {
        let mut inserted = original.clone();
        session.insert(&mut inserted).unwrap();
        let loaded = session
            .select::<Reading>(&[Value::Int(original.id)])
            .unwrap()
            .unwrap();
        assert_eq!(*loaded, original, "reading {}", original.id);
    }
}

#[test]
fn decimal_rejects_non_numeric_text() {
    let mut session = session_for::<Sample>();
    let mut bad = Sample {
        price: "cheap".into(),
        ..Sample::default()
    };
    assert!(matches!(
        session.insert(&mut bad),
        Err(Error::Translation(TranslationError { .. }))
    ));
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Tagged {
    id: i32,
    tags: Vec<String>,
}

/// Stores the comma-joined field form with `;` separators.
fn tags_translator() -> Arc<FnTranslator> {
    fn swap(from: char, to: char) -> impl Fn(&Value) -> Result<Value> + Send + Sync {
        move |v| match v {
            Value::Text(s) => Ok(Value::Text(s.replace(from, &to.to_string()))),
            other => Ok(other.clone()),
        }
    }
    Arc::new(FnTranslator::new("csv", swap(',', ';'), swap(';', ',')))
}

impl Record for Tagged {
    fn mapping() -> RecordConfig<Self> {
        RecordConfig::new()
            .field(field!(Tagged, id, FieldType::Int32))
            .field(FieldDef::new(
                "tags",
                FieldType::Custom("csv"),
                |t: &Tagged| Value::Text(t.tags.join(",")),
                |t: &mut Tagged, v: Value| {
                    let text: Option<String> = v.try_into()?;
                    t.tags = text
                        .filter(|s| !s.is_empty())
                        .map(|s| s.split(',').map(str::to_string).collect())
                        .unwrap_or_default();
                    Ok(())
                },
            ))
            .translator(FieldType::Custom("csv"), tags_translator())
    }
}

#[test]
fn custom_translator_round_trips() {
    let conn = SqliteConnection::open_memory().unwrap();
    conn.execute_raw("CREATE TABLE \"Tagged\" (\"id\" INTEGER PRIMARY KEY, \"tags\" TEXT)")
        .unwrap();
    let conn = Arc::new(conn);
    let mut session = Session::open(Arc::clone(&conn));

    let mut tagged = Tagged {
        id: 1,
        tags: vec!["red".into(), "round".into()],
    };
    session.insert(&mut tagged).unwrap();
    let loaded = session.select::<Tagged>(&[Value::Int(1)]).unwrap().unwrap();
    assert_eq!(loaded.tags, vec!["red", "round"]);

    let stored = conn.query("SELECT \"tags\" FROM \"Tagged\"", &[]).unwrap();
    assert_eq!(stored[0].get_as::<String>(0).unwrap(), "red;round");
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Unregistered {
    id: i32,
    shape: String,
}

impl Record for Unregistered {
    fn mapping() -> RecordConfig<Self> {
        RecordConfig::new()
            .field(field!(Unregistered, id, FieldType::Int32))
            .field(field!(Unregistered, shape, FieldType::Custom("polygon")))
    }
}

#[test]
fn unregistered_custom_type_is_a_mapping_error() {
    assert!(translate::global_translator(FieldType::Custom("polygon")).is_none());
    assert!(matches!(
        RecordType::<Unregistered>::get(),
        Err(Error::Mapping(MappingError {
            kind: MappingErrorKind::UnsupportedType,
            ..
        }))
    ));
}
