//! Cascaded insert, update, delete and select against SQLite.

use rowbind_core::{
    CascadeOps, Connection, Error, FetchState, FieldType, Lazy, OperationError, OperationKind,
    OrderSpec, Record, RecordConfig, RecordType, Value, WhereCondition, field,
};
use rowbind_query::CreateTable;
use rowbind_session::{Relation, Session, slot};
use rowbind_sqlite::SqliteConnection;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default, Clone, PartialEq)]
struct Order {
    id: i64,
    customer: String,
    lines: Vec<OrderLine>,
    invoice: Option<Invoice>,
}

impl Record for Order {
    fn mapping() -> RecordConfig<Self> {
        RecordConfig::new()
            .table("orders")
            .field(field!(Order, id, FieldType::Int64).primary_key().identity())
            .field(field!(Order, customer, FieldType::Text))
            .relationship(
                Relation::many("lines", slot!(Order, lines))
                    .key("id", "order_id")
                    .propagate_foreign_key()
                    .children_first()
                    .order_by("bySku"),
            )
            .relationship(
                Relation::one("invoice", slot!(Order, invoice))
                    .key("id", "order_id")
                    .propagate_foreign_key(),
            )
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct OrderLine {
    id: i64,
    order_id: i64,
    sku: String,
}

impl Record for OrderLine {
    fn mapping() -> RecordConfig<Self> {
        RecordConfig::new()
            .table("order_lines")
            .field(field!(OrderLine, id, FieldType::Int64).primary_key().identity())
            .field(field!(OrderLine, order_id, FieldType::Int64))
            .field(field!(OrderLine, sku, FieldType::Text))
            .order(OrderSpec::new("bySku").asc("sku"))
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Invoice {
    order_id: i64,
    total: i64,
}

impl Record for Invoice {
    fn mapping() -> RecordConfig<Self> {
        RecordConfig::new()
            .field(field!(Invoice, order_id, FieldType::Int64))
            .field(field!(Invoice, total, FieldType::Int64))
    }
}

fn create<R: Record>(conn: &SqliteConnection) {
    let descriptor = RecordType::<R>::get().unwrap();
    conn.execute_raw(&CreateTable::new(&descriptor).build(conn.dialect()))
        .unwrap();
}

fn count(conn: &SqliteConnection, table: &str) -> i64 {
    let rows = conn
        .query(&format!("SELECT COUNT(*) FROM \"{}\"", table), &[])
        .unwrap();
    rows[0].get_as::<i64>(0).unwrap()
}

fn line(sku: &str) -> OrderLine {
    OrderLine {
        sku: sku.to_string(),
        ..OrderLine::default()
    }
}

fn orders_db() -> Arc<SqliteConnection> {
    let conn = SqliteConnection::open_memory().unwrap();
    create::<Order>(&conn);
    create::<OrderLine>(&conn);
    create::<Invoice>(&conn);
    Arc::new(conn)
}

#[test]
fn insert_propagates_generated_key_to_children() {
    let conn = orders_db();
    let mut session = Session::open(Arc::clone(&conn));

    let mut order = Order {
        customer: "ACME".into(),
        lines: vec![line("bolt"), line("nut"), line("washer")],
        invoice: Some(Invoice {
            order_id: 0,
            total: 40,
        }),
        ..Order::default()
    };
    assert_eq!(session.insert(&mut order).unwrap(), 1);

    assert!(order.id > 0);
    assert!(order.lines.iter().all(|l| l.order_id == order.id));
    assert!(order.lines.iter().all(|l| l.id > 0));
    assert_eq!(order.invoice.as_ref().unwrap().order_id, order.id);
    assert_eq!(count(&conn, "order_lines"), 3);
    assert_eq!(count(&conn, "Invoice"), 1);
}

#[test]
fn select_loads_children_in_declared_order() {
    let conn = orders_db();
    let mut session = Session::open(Arc::clone(&conn));
    let mut order = Order {
        customer: "Globex".into(),
        lines: vec![line("washer"), line("bolt")],
        ..Order::default()
    };
    session.insert(&mut order).unwrap();

    let loaded = session
        .select::<Order>(&[Value::BigInt(order.id)])
        .unwrap()
        .unwrap();
    let skus: Vec<&str> = loaded.lines.iter().map(|l| l.sku.as_str()).collect();
    assert_eq!(skus, vec!["bolt", "washer"]);
    assert!(loaded.invoice.is_none());
}

#[test]
fn delete_removes_children_first() {
    let conn = orders_db();
    let mut session = Session::open(Arc::clone(&conn));
    let mut order = Order {
        customer: "Initech".into(),
        lines: vec![line("a"), line("b")],
        invoice: Some(Invoice::default()),
        ..Order::default()
    };
    session.insert(&mut order).unwrap();

    assert_eq!(session.delete(&order).unwrap(), 1);
    assert_eq!(count(&conn, "orders"), 0);
    assert_eq!(count(&conn, "order_lines"), 0);
    // Invoice is keyed by its first field, order_id.
    assert_eq!(count(&conn, "Invoice"), 0);
}

#[test]
fn update_cascades_to_held_children() {
    let conn = orders_db();
    let mut session = Session::open(Arc::clone(&conn));
    let mut order = Order {
        customer: "Umbrella".into(),
        lines: vec![line("x")],
        ..Order::default()
    };
    session.insert(&mut order).unwrap();

    order.customer = "Umbrella Corp".into();
    order.lines[0].sku = "y".into();
    session.update(&order).unwrap();

    let rows = conn
        .query("SELECT \"sku\" FROM \"order_lines\"", &[])
        .unwrap();
    assert_eq!(rows[0].get_as::<String>(0).unwrap(), "y");
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Locker {
    code: String,
    items: Vec<Item>,
}

impl Record for Locker {
    fn mapping() -> RecordConfig<Self> {
        RecordConfig::new()
            .field(field!(Locker, code, FieldType::Text))
            .relationship(
                Relation::many("items", slot!(Locker, items))
                    .key("code", "locker")
                    .propagate_foreign_key(),
            )
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Item {
    id: i32,
    locker: String,
    qty: i32,
}

impl Record for Item {
    fn mapping() -> RecordConfig<Self> {
        RecordConfig::new()
            .field(field!(Item, id, FieldType::Int32))
            .field(field!(Item, locker, FieldType::Text))
            .field(field!(Item, qty, FieldType::Int32))
    }
}

#[test]
fn key_only_parent_still_updates_children() {
    let conn = SqliteConnection::open_memory().unwrap();
    create::<Locker>(&conn);
    create::<Item>(&conn);
    let conn = Arc::new(conn);
    let mut session = Session::open(Arc::clone(&conn));

    let mut locker = Locker {
        code: "L1".into(),
        items: vec![
            Item {
                id: 1,
                qty: 3,
                ..Item::default()
            },
            Item {
                id: 2,
                qty: 4,
                ..Item::default()
            },
        ],
    };
    session.insert(&mut locker).unwrap();

    locker.items[1].qty = 40;
    // The locker row has nothing outside its key to set.
    assert_eq!(session.update(&locker).unwrap(), 0);

    let rows = conn
        .query("SELECT \"qty\" FROM \"Item\" ORDER BY \"id\"", &[])
        .unwrap();
    let qtys: Vec<i32> = rows.iter().map(|r| r.get_as::<i32>(0).unwrap()).collect();
    assert_eq!(qtys, vec![3, 40]);

    assert_eq!(session.delete(&locker).unwrap(), 1);
    assert_eq!(count(&conn, "Item"), 0);
}

#[test]
fn failing_child_reports_cascade_error() {
    let conn = orders_db();
    conn.execute_raw("DROP TABLE \"order_lines\"").unwrap();
    let mut session = Session::open(Arc::clone(&conn));
    let mut order = Order {
        customer: "Hooli".into(),
        lines: vec![line("z")],
        ..Order::default()
    };
    let err = session.insert(&mut order).unwrap_err();
    match err {
        Error::Operation(OperationError {
            kind: OperationKind::Cascade,
            ref table,
            ref message,
            ..
        }) => {
            assert_eq!(table, "orders");
            assert!(message.contains("'lines'"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // The parent row went in before the failure and stays.
    assert_eq!(count(&conn, "orders"), 1);
}

// ============================================================================
// Cycles
// ============================================================================

#[derive(Debug, Default, Clone, PartialEq)]
struct Category {
    id: i32,
    parent_id: Option<i32>,
    name: String,
    children: Vec<Category>,
}

impl Record for Category {
    fn mapping() -> RecordConfig<Self> {
        RecordConfig::new()
            .field(field!(Category, id, FieldType::Int32))
            .field(field!(Category, parent_id, FieldType::Int32).nullable(true))
            .field(field!(Category, name, FieldType::Text))
            .relationship(Relation::many("children", slot!(Category, children)).key("id", "parent_id"))
    }
}

#[test]
fn self_reference_is_not_followed() {
    let conn = SqliteConnection::open_memory().unwrap();
    create::<Category>(&conn);
    conn.execute_raw("INSERT INTO \"Category\" VALUES (1, NULL, 'root'), (2, 1, 'leaf')")
        .unwrap();
    let mut session = Session::open(Arc::new(conn));

    let root = session
        .select::<Category>(&[Value::Int(1)])
        .unwrap()
        .unwrap();
    assert_eq!(root.name, "root");
    assert!(root.children.is_empty());
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Team {
    id: i32,
    players: Vec<Player>,
}

impl Record for Team {
    fn mapping() -> RecordConfig<Self> {
        RecordConfig::new()
            .field(field!(Team, id, FieldType::Int32))
            .relationship(Relation::many("players", slot!(Team, players)).key("id", "team_id"))
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Player {
    id: i32,
    team_id: i32,
    team: Option<Team>,
}

impl Record for Player {
    fn mapping() -> RecordConfig<Self> {
        RecordConfig::new()
            .field(field!(Player, id, FieldType::Int32))
            .field(field!(Player, team_id, FieldType::Int32))
            .relationship(Relation::one("team", slot!(Player, team)).key("team_id", "id"))
    }
}

#[test]
fn mutual_references_stop_at_the_first_repeat() {
    let conn = SqliteConnection::open_memory().unwrap();
    create::<Team>(&conn);
    create::<Player>(&conn);
    conn.execute_raw("INSERT INTO \"Team\" VALUES (7)").unwrap();
    conn.execute_raw("INSERT INTO \"Player\" VALUES (1, 7), (2, 7)").unwrap();
    let mut session = Session::open(Arc::new(conn));

    let team = session.select::<Team>(&[Value::Int(7)]).unwrap().unwrap();
    assert_eq!(team.players.len(), 2);
    assert!(team.players.iter().all(|p| p.team.is_none()));

    let player = session.select::<Player>(&[Value::Int(1)]).unwrap().unwrap();
    let own_team = player.team.as_ref().unwrap();
    assert_eq!(own_team.id, 7);
    assert!(own_team.players.is_empty());
}

// ============================================================================
// Keyed, lazy and restricted relationships
// ============================================================================

#[derive(Debug, Default, Clone, PartialEq)]
struct Shelf {
    code: String,
    bins: BTreeMap<String, Bin>,
    audits: Lazy<Vec<Audit>>,
}

impl Record for Shelf {
    fn mapping() -> RecordConfig<Self> {
        RecordConfig::new()
            .field(field!(Shelf, code, FieldType::Text))
            .relationship(
                Relation::keyed("bins", slot!(Shelf, bins), |b: &Bin| b.label.clone())
                    .key("code", "shelf")
                    .propagate_foreign_key(),
            )
            .relationship(
                Relation::lazy_many("audits", slot!(Shelf, audits))
                    .key("code", "shelf")
                    .condition("forShelf")
                    .only(CascadeOps::SELECT),
            )
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Bin {
    shelf: String,
    label: String,
}

impl Record for Bin {
    fn mapping() -> RecordConfig<Self> {
        RecordConfig::new()
            .field(field!(Bin, shelf, FieldType::Text))
            .field(field!(Bin, label, FieldType::Text))
            .primary_key(&["shelf", "label"])
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Audit {
    id: i32,
    shelf: String,
}

impl Record for Audit {
    fn mapping() -> RecordConfig<Self> {
        RecordConfig::new()
            .field(field!(Audit, id, FieldType::Int32))
            .field(field!(Audit, shelf, FieldType::Text))
            .condition(WhereCondition::fields("forShelf", &["shelf"]))
    }
}

fn shelves_db() -> Arc<SqliteConnection> {
    let conn = SqliteConnection::open_memory().unwrap();
    create::<Shelf>(&conn);
    create::<Bin>(&conn);
    create::<Audit>(&conn);
    conn.execute_raw("INSERT INTO \"Audit\" VALUES (1, 'S1'), (2, 'S1'), (3, 'S2')")
        .unwrap();
    Arc::new(conn)
}

#[test]
fn keyed_children_are_mapped_by_accessor() {
    let conn = shelves_db();
    let mut session = Session::open(Arc::clone(&conn));
    let mut shelf = Shelf {
        code: "S1".into(),
        ..Shelf::default()
    };
    for label in ["top", "bottom"] {
        shelf.bins.insert(
            label.to_string(),
            Bin {
                shelf: String::new(),
                label: label.to_string(),
            },
        );
    }
    session.insert(&mut shelf).unwrap();
    assert!(shelf.bins.values().all(|b| b.shelf == "S1"));

    let loaded = session
        .select::<Shelf>(&[Value::Text("S1".into())])
        .unwrap()
        .unwrap();
    let labels: Vec<&String> = loaded.bins.keys().collect();
    assert_eq!(labels, vec!["bottom", "top"]);
}

#[test]
fn lazy_children_load_on_first_access() {
    let conn = shelves_db();
    conn.execute_raw("INSERT INTO \"Shelf\" VALUES ('S1')").unwrap();
    let loaded = {
        let mut session = Session::open(Arc::clone(&conn));
        session
            .select::<Shelf>(&[Value::Text("S1".into())])
            .unwrap()
            .unwrap()
    };
    // The session is gone; the handle still reaches the connection.
    assert_eq!(loaded.audits.state(), FetchState::NotFetched);
    assert_eq!(loaded.audits.owner().as_deref(), Some(r#"Shelf[Text("S1")]"#));

    let first = loaded.audits.get().unwrap();
    let ids: Vec<i32> = first.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![1, 2]);
    let second = loaded.audits.get().unwrap();
    assert!(std::ptr::eq(first, second));
    assert_eq!(loaded.audits.state(), FetchState::Fetched);
}

#[test]
fn lazy_loading_can_be_switched_off() {
    let conn = shelves_db();
    conn.execute_raw("INSERT INTO \"Shelf\" VALUES ('S2')").unwrap();
    let config = rowbind_session::SessionConfig::new().lazy_loading(false);
    let mut session = Session::new(Arc::clone(&conn), config).unwrap();
    let loaded = session
        .select::<Shelf>(&[Value::Text("S2".into())])
        .unwrap()
        .unwrap();
    assert!(loaded.audits.is_fetched());
    assert_eq!(loaded.audits.peek().unwrap().len(), 1);
}

#[test]
fn select_only_relationship_is_not_written() {
    let conn = shelves_db();
    let mut session = Session::open(Arc::clone(&conn));
    let mut shelf = Shelf {
        code: "S9".into(),
        audits: Lazy::resolved(vec![Audit {
            id: 99,
            shelf: "S9".into(),
        }]),
        ..Shelf::default()
    };
    session.insert(&mut shelf).unwrap();
    assert_eq!(count(&conn, "Audit"), 3);
}
