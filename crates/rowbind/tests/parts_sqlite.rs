//! End-to-end use of a simple mapped table through the facade.

use rowbind::prelude::*;
use rowbind::{MappingOverrides, OperationError, OperationKind};
use std::sync::Arc;

#[derive(Debug, Default, Clone, PartialEq)]
struct Part {
    part_number: i32,
    qty: i32,
}

impl Record for Part {
    fn mapping() -> RecordConfig<Self> {
        RecordConfig::new()
            .field(field!(Part, part_number, "partNumber", FieldType::Int32))
            .field(field!(Part, qty, FieldType::Int32))
            .condition(WhereCondition::new("atLeast").compare("qty", Comparison::GtEq))
            .order(OrderSpec::new("byQty").desc("qty"))
            .expression("doubled", "{qty} * 2")
    }
}

fn part(part_number: i32, qty: i32) -> Part {
    Part { part_number, qty }
}

fn parts_db() -> Arc<SqliteConnection> {
    let conn = SqliteConnection::open_memory().unwrap();
    let descriptor = RecordType::<Part>::get().unwrap();
    conn.execute_raw(&CreateTable::new(&descriptor).build(conn.dialect()))
        .unwrap();
    Arc::new(conn)
}

fn remaining(session: &mut Session<SqliteConnection>) -> Vec<(i32, i32)> {
    session
        .select_all::<Part>(None, &[])
        .unwrap()
        .iter()
        .map(|p| (p.part_number, p.qty))
        .collect()
}

fn run_scenario(session: &mut Session<SqliteConnection>) {
    session.begin().unwrap();
    for number in [1234, 5555, 1111] {
        assert_eq!(session.insert(&mut part(number, 99)).unwrap(), 1);
    }
    assert_eq!(session.update(&part(5555, 1000)).unwrap(), 1);
    assert_eq!(session.delete(&part(1111, 99)).unwrap(), 1);
    session.commit().unwrap();
}

#[test]
fn insert_update_delete_then_select_all() {
    let conn = parts_db();
    let mut session = Session::open(Arc::clone(&conn));
    run_scenario(&mut session);
    assert_eq!(remaining(&mut session), vec![(1234, 99), (5555, 1000)]);
}

#[test]
fn same_scenario_through_a_read_write_cache() {
    let conn = parts_db();
    let config = SessionConfig::new().cache::<Part>(CachePolicy::ReadWrite);
    let mut session = Session::new(Arc::clone(&conn), config).unwrap();
    run_scenario(&mut session);
    assert_eq!(remaining(&mut session), vec![(1234, 99), (5555, 1000)]);

    // A fresh session sees what the first one committed.
    let mut fresh = Session::open(conn);
    assert_eq!(remaining(&mut fresh), vec![(1234, 99), (5555, 1000)]);
}

#[test]
fn update_and_delete_of_missing_rows_report_zero() {
    let conn = parts_db();
    let mut session = Session::open(conn);
    assert_eq!(session.update(&part(1, 1)).unwrap(), 0);
    assert_eq!(session.delete(&part(1, 1)).unwrap(), 0);
}

#[test]
fn insert_all_reports_progress_on_failure() {
    let conn = parts_db();
    let mut session = Session::open(conn);
    let mut batch = vec![part(1, 10), part(2, 20), part(1, 30), part(4, 40)];
    let err = session.insert_all(batch.iter_mut()).unwrap_err();
    match err {
        Error::Operation(OperationError {
            kind: OperationKind::InsertAll,
            completed,
            ref key,
            ..
        }) => {
            assert_eq!(completed, 2);
            assert_eq!(key.as_deref(), Some(&[Value::Int(1)][..]));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(session.count::<Part>(None, &[]).unwrap(), 2);
}

#[test]
fn aggregates_over_fields_and_expressions() {
    let conn = parts_db();
    let mut session = Session::open(conn);
    let mut batch = vec![part(1, 10), part(2, 20), part(3, 30)];
    assert_eq!(session.insert_all(batch.iter_mut()).unwrap(), 3);

    assert_eq!(session.count::<Part>(Some("atLeast"), &[Value::Int(20)]).unwrap(), 2);
    assert_eq!(session.sum::<Part>("qty", None, &[]).unwrap().as_i64(), Some(60));
    assert_eq!(session.max::<Part>("qty", None, &[]).unwrap(), Value::Int(30));
    assert_eq!(session.min::<Part>("partNumber", None, &[]).unwrap(), Value::Int(1));
    assert_eq!(
        session
            .sum::<Part>("doubled", Some("atLeast"), &[Value::Int(20)])
            .unwrap()
            .as_i64(),
        Some(100)
    );
    assert!(session.avg::<Part>("nope", None, &[]).is_err());
}

#[test]
fn pages_concatenate_to_the_unpaged_select() {
    let conn = parts_db();
    let mut session = Session::open(conn);
    let mut rows: Vec<Part> = (1..=11).map(|n| part(n, n * 7 % 13 + 1)).collect();
    session.insert_all(rows.iter_mut()).unwrap();

    let params = vec![Value::Int(3)];
    let expected: Vec<Part> = session
        .select_all_ordered::<Part>(Some("atLeast"), Some("byQty"), &params)
        .unwrap()
        .iter()
        .map(|p| Part::clone(p))
        .collect();
    assert!(expected.len() > 5);

    for strategy in [PageStrategy::OffsetLimit, PageStrategy::Scroll] {
        for size in [1, 3, 4, 50] {
            let pages = session
                .paginate::<Part>(Some("atLeast"), Some("byQty"), params.clone(), size)
                .unwrap()
                .strategy(strategy);
            let all: Vec<Part> = pages
                .pages()
                .unwrap()
                .collect::<Result<Vec<_>>>()
                .unwrap()
                .into_iter()
                .flatten()
                .collect();
            assert_eq!(all, expected, "{strategy:?} with page size {size}");
            assert_eq!(
                pages.page_count().unwrap(),
                (expected.len() as u64).div_ceil(size)
            );
            let past_end = pages.page_count().unwrap() + 1;
            assert!(pages.select_page(past_end).unwrap().is_empty());
        }
    }
}

#[test]
fn page_zero_is_rejected() {
    let conn = parts_db();
    let session = Session::open(conn);
    let pages = session.paginate::<Part>(None, None, Vec::new(), 5).unwrap();
    assert!(matches!(
        pages.select_page(0),
        Err(Error::Operation(OperationError {
            kind: OperationKind::SelectAll,
            ..
        }))
    ));
    let empty = session.paginate::<Part>(None, None, Vec::new(), 0).unwrap();
    assert!(empty.select_page(1).is_err());
}

#[test]
fn cursor_can_be_dropped_early() {
    let conn = parts_db();
    let mut session = Session::open(Arc::clone(&conn));
    let mut rows: Vec<Part> = (1..=5).map(|n| part(n, n)).collect();
    session.insert_all(rows.iter_mut()).unwrap();

    {
        let mut cursor = session.cursor::<Part>(None, Some("byQty"), &[]).unwrap();
        assert_eq!(cursor.next().unwrap().unwrap(), part(5, 5));
    }
    assert_eq!(session.delete(&part(5, 5)).unwrap(), 1);
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Gadget {
    serial: String,
    weight: f64,
    label: Option<String>,
}

impl Record for Gadget {
    fn mapping() -> RecordConfig<Self> {
        RecordConfig::new()
            .field(field!(Gadget, serial, FieldType::Text))
            .field(field!(Gadget, weight, FieldType::Float64))
            .field(field!(Gadget, label, FieldType::Text).nullable(true))
    }
}

#[test]
fn zero_configuration_uses_type_and_field_names() {
    let descriptor = RecordType::<Gadget>::get().unwrap();
    assert_eq!(descriptor.table(), "Gadget");
    let columns: Vec<&str> = descriptor.columns().iter().map(|c| c.column()).collect();
    assert_eq!(columns, vec!["serial", "weight", "label"]);
    assert_eq!(descriptor.primary_key_fields(), vec!["serial"]);

    let conn = SqliteConnection::open_memory().unwrap();
    conn.execute_raw(&CreateTable::new(&descriptor).build(conn.dialect()))
        .unwrap();
    let mut session = Session::open(Arc::new(conn));
    let mut gadget = Gadget {
        serial: "G-1".into(),
        weight: 2.5,
        label: None,
    };
    session.insert(&mut gadget).unwrap();
    let loaded = session
        .select::<Gadget>(&[Value::Text("G-1".into())])
        .unwrap()
        .unwrap();
    assert_eq!(*loaded, gadget);
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Widget {
    code: String,
    qty: i32,
}

const WIDGET_OVERRIDES: &str = r#"{
    "table": "widgets",
    "columns": { "qty": "quantity" },
    "conditions": [
        { "name": "lowStock", "predicates": [ { "field": "qty", "op": "lt" } ] }
    ],
    "orders": [ { "name": "byQty", "keys": [ { "field": "qty" } ] } ]
}"#;

impl Record for Widget {
    fn mapping() -> RecordConfig<Self> {
        RecordConfig::new()
            .field(field!(Widget, code, FieldType::Text))
            .field(field!(Widget, qty, FieldType::Int32))
            .overrides(MappingOverrides::from_json(WIDGET_OVERRIDES).unwrap())
    }
}

#[test]
fn json_overrides_rename_and_add_conditions() {
    let descriptor = RecordType::<Widget>::get().unwrap();
    assert_eq!(descriptor.table(), "widgets");
    assert_eq!(descriptor.field("qty").unwrap().column(), "quantity");

    let conn = SqliteConnection::open_memory().unwrap();
    conn.execute_raw(&CreateTable::new(&descriptor).build(conn.dialect()))
        .unwrap();
    conn.execute_raw(
        "INSERT INTO \"widgets\" (\"code\", \"quantity\") VALUES ('a', 9), ('b', 2), ('c', 5)",
    )
    .unwrap();
    let mut session = Session::open(Arc::new(conn));
    let low: Vec<String> = session
        .select_all_ordered::<Widget>(Some("lowStock"), Some("byQty"), &[Value::Int(6)])
        .unwrap()
        .iter()
        .map(|w| w.code.clone())
        .collect();
    assert_eq!(low, vec!["b", "c"]);
}

#[test]
fn unknown_condition_fails_before_execution() {
    let conn = parts_db();
    let mut session = Session::open(conn);
    assert!(matches!(
        session.select_all::<Part>(Some("missing"), &[]),
        Err(Error::Mapping(_))
    ));
    assert!(matches!(
        session.select_all::<Part>(Some("atLeast"), &[]),
        Err(Error::Operation(_))
    ));
}
