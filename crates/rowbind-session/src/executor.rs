//! Single-table statement execution.
//!
//! Every function here runs exactly one statement for one record type and
//! never looks at relationships; the cascade module layers child operations
//! on top. Statements come from a process-wide [`StatementCache`].

use crate::cascade;
use rowbind_core::{
    Connection, Error, OperationError, OperationKind, Record, RecordType, Result, Row, RowCursor,
    Value, WhereCondition,
    relationship::CascadeContext,
};
use rowbind_query::{
    Aggregate, Limit, Offset, Statement, StatementBuilder, StatementCache, StatementKey,
    StatementKind,
};
use std::any::TypeId;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

fn statements() -> &'static Mutex<StatementCache> {
    static STATEMENTS: OnceLock<Mutex<StatementCache>> = OnceLock::new();
    STATEMENTS.get_or_init(|| Mutex::new(StatementCache::default()))
}

/// Fetch a built statement from the shared cache, building it on a miss.
pub(crate) fn statement<R: Record>(
    descriptor: &RecordType<R>,
    connection: &dyn Connection,
    kind: StatementKind,
    build: impl FnOnce(&StatementBuilder<'_, R>) -> Result<Statement>,
) -> Result<Arc<Statement>> {
    let dialect = connection.dialect();
    let key = StatementKey {
        record: TypeId::of::<R>(),
        dialect,
        kind,
    };
    let builder = StatementBuilder::new(descriptor, dialect);
    statements()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get_or_build(key, || build(&builder))
}

fn check_arguments<R>(
    descriptor: &RecordType<R>,
    statement: &Statement,
    kind: OperationKind,
    args: &[Value],
) -> Result<()> {
    if statement.arguments == args.len() {
        return Ok(());
    }
    Err(Error::Operation(OperationError::new(
        kind,
        descriptor.table(),
        format!(
            "expected {} parameter(s), got {}",
            statement.arguments,
            args.len()
        ),
    )))
}

/// Insert one row. When the type has an identity column, the generated key is
/// written back into `record`.
#[tracing::instrument(level = "debug", skip(connection, descriptor, record), fields(table = descriptor.table()))]
pub fn insert<R: Record>(
    connection: &dyn Connection,
    descriptor: &RecordType<R>,
    record: &mut R,
) -> Result<u64> {
    let fail = |e: Error, record: &R| {
        e.into_operation(
            OperationKind::Insert,
            descriptor.table(),
            Some(&descriptor.key_of(record)),
        )
    };
    let statement = statement(descriptor, connection, StatementKind::Insert, |b| b.insert())?;
    let params = statement.bind(descriptor, Some(&*record), &[])?;

    if descriptor.identity().is_some() {
        let id = connection
            .insert(&statement.sql, &params)
            .map_err(|e| fail(e, record))?;
        descriptor.set_identity(record, id)?;
        tracing::trace!(id, "Identity written back");
        return Ok(1);
    }
    connection
        .execute(&statement.sql, &params)
        .map_err(|e| fail(e, record))
}

fn write<R: Record>(
    connection: &dyn Connection,
    descriptor: &RecordType<R>,
    record: &R,
    kind: OperationKind,
) -> Result<u64> {
    let updating = kind == OperationKind::Update;
    if updating && !descriptor.columns().iter().any(|c| c.is_updatable()) {
        tracing::debug!(
            record = %descriptor.describe_key(&descriptor.key_of(record)),
            "Nothing to update outside the key"
        );
        return Ok(0);
    }
    let shape = if updating {
        StatementKind::Update
    } else {
        StatementKind::Delete
    };
    let statement = statement(descriptor, connection, shape, |b| {
        if updating { b.update() } else { b.delete() }
    })?;
    let params = statement.bind(descriptor, Some(record), &[])?;
    let key = descriptor.key_of(record);
    let rows = connection
        .execute(&statement.sql, &params)
        .map_err(|e| e.into_operation(kind, descriptor.table(), Some(&key)))?;
    if rows == 0 {
        tracing::warn!(
            operation = kind.as_str(),
            record = %descriptor.describe_key(&key),
            "No row matched"
        );
    }
    Ok(rows)
}

/// Update the row with `record`'s key. 0 means no row matched, or the type
/// has no columns outside its key.
#[tracing::instrument(level = "debug", skip(connection, descriptor, record), fields(table = descriptor.table()))]
pub fn update<R: Record>(
    connection: &dyn Connection,
    descriptor: &RecordType<R>,
    record: &R,
) -> Result<u64> {
    write(connection, descriptor, record, OperationKind::Update)
}

/// Delete the row with `record`'s key. 0 means no row matched.
#[tracing::instrument(level = "debug", skip(connection, descriptor, record), fields(table = descriptor.table()))]
pub fn delete<R: Record>(
    connection: &dyn Connection,
    descriptor: &RecordType<R>,
    record: &R,
) -> Result<u64> {
    write(connection, descriptor, record, OperationKind::Delete)
}

/// Select one row by primary key, without cascades.
///
/// More than one matching row is an `OperationError`.
#[tracing::instrument(level = "debug", skip(connection, descriptor), fields(table = descriptor.table()))]
pub fn select_by_key<R: Record>(
    connection: &dyn Connection,
    descriptor: &RecordType<R>,
    key: &[Value],
) -> Result<Option<R>> {
    let statement = statement(
        descriptor,
        connection,
        StatementKind::Select {
            condition: Some(rowbind_core::PRIMARY_KEY_CONDITION.to_string()),
            order: None,
        },
        |b| b.select_by_key(),
    )?;
    check_arguments(descriptor, &statement, OperationKind::Select, key)?;
    let params = statement.bind(descriptor, None, key)?;

    let fail = |e: Error| e.into_operation(OperationKind::Select, descriptor.table(), Some(key));
    let mut cursor = connection
        .query_cursor(&statement.sql, &params)
        .map_err(fail)?;
    let Some(row) = cursor.next_row().map_err(fail)? else {
        return Ok(None);
    };
    if cursor.next_row().map_err(fail)?.is_some() {
        return Err(Error::Operation(
            OperationError::new(
                OperationKind::Select,
                descriptor.table(),
                format!(
                    "more than one row matches {}",
                    descriptor.describe_key(key)
                ),
            )
            .with_key(key.to_vec()),
        ));
    }
    descriptor.materialize(&row, &statement.columns).map(Some)
}

/// Prepared select of many rows: a named condition and order, or an ad-hoc
/// condition built by a cascade.
#[derive(Debug, Clone)]
pub(crate) enum Selection<'a> {
    Named {
        condition: Option<&'a str>,
        order: Option<&'a str>,
    },
    Matching {
        condition: &'a WhereCondition,
        order: Option<&'a str>,
    },
    Page {
        condition: Option<&'a str>,
        order: Option<&'a str>,
        limit: u64,
        offset: u64,
    },
}

impl Selection<'_> {
    fn build<R: Record>(
        &self,
        descriptor: &RecordType<R>,
        connection: &dyn Connection,
    ) -> Result<Arc<Statement>> {
        let owned = |s: Option<&str>| s.filter(|n| !n.is_empty()).map(str::to_string);
        match *self {
            Selection::Named { condition, order } => statement(
                descriptor,
                connection,
                StatementKind::Select {
                    condition: owned(condition),
                    order: owned(order),
                },
                |b| b.select(condition, order),
            ),
            Selection::Matching { condition, order } => statement(
                descriptor,
                connection,
                StatementKind::Select {
                    condition: Some(condition.name.clone()),
                    order: owned(order),
                },
                |b| b.select_matching(condition, order),
            ),
            Selection::Page {
                condition,
                order,
                limit,
                offset,
            } => statement(
                descriptor,
                connection,
                StatementKind::Page {
                    condition: owned(condition),
                    order: owned(order),
                    limit,
                    offset,
                },
                |b| b.select_page(condition, order, Limit(limit), Offset(offset)),
            ),
        }
    }
}

/// Open a cursor over the rows of a selection.
///
/// Each row is materialized and its relationships are loaded through `ctx`
/// as the cursor advances.
pub(crate) fn open_cursor<'c, R: Record>(
    ctx: CascadeContext<'c>,
    descriptor: Arc<RecordType<R>>,
    selection: &Selection<'_>,
    params: &[Value],
) -> Result<RecordCursor<'c, R>> {
    open(ctx, descriptor, selection, params, true)
}

/// Like [`open_cursor`], but rows are only materialized; relationships are
/// left to the caller.
pub(crate) fn open_rows<'c, R: Record>(
    connection: &'c dyn Connection,
    descriptor: Arc<RecordType<R>>,
    selection: &Selection<'_>,
    params: &[Value],
) -> Result<RecordCursor<'c, R>> {
    open(CascadeContext::new(connection), descriptor, selection, params, false)
}

fn open<'c, R: Record>(
    mut ctx: CascadeContext<'c>,
    descriptor: Arc<RecordType<R>>,
    selection: &Selection<'_>,
    params: &[Value],
    cascade: bool,
) -> Result<RecordCursor<'c, R>> {
    let connection = ctx.connection();
    let statement = selection.build(&descriptor, connection)?;
    check_arguments(&descriptor, &statement, OperationKind::SelectAll, params)?;
    let bound = statement.bind(&descriptor, None, params)?;
    let rows = connection
        .query_cursor(&statement.sql, &bound)
        .map_err(|e| e.into_operation(OperationKind::SelectAll, descriptor.table(), None))?;

    ctx.enter(TypeId::of::<R>(), descriptor.type_name());
    Ok(RecordCursor {
        rows,
        descriptor,
        statement,
        ctx,
        cascade,
        done: false,
    })
}

/// A lazy, forward-only sequence of records.
///
/// Dropping the cursor releases the underlying result set whether or not it
/// was read to the end. After an error or exhaustion it only yields `None`.
pub struct RecordCursor<'c, R> {
    rows: Box<dyn RowCursor + 'c>,
    descriptor: Arc<RecordType<R>>,
    statement: Arc<Statement>,
    ctx: CascadeContext<'c>,
    cascade: bool,
    done: bool,
}

impl<'c, R: Record> RecordCursor<'c, R> {
    fn materialize(&mut self, row: &Row) -> Result<R> {
        let mut record = self.descriptor.materialize(row, &self.statement.columns)?;
        if self.cascade {
            cascade::load(&mut self.ctx, &self.descriptor, &mut record)?;
        }
        Ok(record)
    }

    /// Skip `n` rows without materializing them. Returns how many were
    /// skipped.
    pub fn skip_rows(&mut self, n: u64) -> Result<u64> {
        if self.done {
            return Ok(0);
        }
        match self.rows.skip_rows(n) {
            Ok(skipped) => {
                if skipped < n {
                    self.done = true;
                }
                Ok(skipped)
            }
            Err(e) => {
                self.done = true;
                Err(e.into_operation(OperationKind::SelectAll, self.descriptor.table(), None))
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl<R: Record> Iterator for RecordCursor<'_, R> {
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let row = match self.rows.next_row() {
            Ok(Some(row)) => row,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e.into_operation(
                    OperationKind::SelectAll,
                    self.descriptor.table(),
                    None,
                )));
            }
        };
        let record = self.materialize(&row);
        if record.is_err() {
            self.done = true;
        }
        Some(record)
    }
}

impl<R> std::fmt::Debug for RecordCursor<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCursor")
            .field("sql", &self.statement.sql)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

/// Run an aggregate and return its single scalar.
///
/// MIN and MAX over a plain field are decoded back into the field's form;
/// everything else is returned as the database produced it.
#[tracing::instrument(level = "debug", skip(connection, descriptor, params), fields(table = descriptor.table()))]
pub fn aggregate<R: Record>(
    connection: &dyn Connection,
    descriptor: &RecordType<R>,
    function: Aggregate,
    target: &str,
    condition: Option<&str>,
    params: &[Value],
) -> Result<Value> {
    let statement = statement(
        descriptor,
        connection,
        StatementKind::Aggregate {
            function,
            target: target.to_string(),
            condition: condition.filter(|c| !c.is_empty()).map(str::to_string),
        },
        |b| b.aggregate(function, target, condition),
    )?;
    check_arguments(descriptor, &statement, OperationKind::Aggregate, params)?;
    let bound = statement.bind(descriptor, None, params)?;
    let row = connection
        .query_one(&statement.sql, &bound)
        .map_err(|e| e.into_operation(OperationKind::Aggregate, descriptor.table(), None))?;
    let value = row
        .and_then(|r| r.into_values().into_iter().next())
        .unwrap_or(Value::Null);

    match statement.columns.first().and_then(|&i| descriptor.column(i)) {
        Some(binding) if value != Value::Null => binding.translator().from_column(&value),
        _ => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowbind_core::{
        Comparison, Dialect, FieldType, IsolationLevel, OrderSpec, RecordConfig, field,
    };
    use rowbind_core::row::ColumnInfo;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Gauge {
        id: i32,
        reading: i32,
    }

    impl Record for Gauge {
        fn mapping() -> RecordConfig<Self> {
            RecordConfig::new()
                .field(field!(Gauge, id, FieldType::Int32))
                .field(field!(Gauge, reading, FieldType::Int32))
                .condition(WhereCondition::new("above").compare("reading", Comparison::Gt))
                .order(OrderSpec::new("byReading").desc("reading"))
        }
    }

    /// Replays canned rows and records every statement.
    #[derive(Default)]
    struct Scripted {
        rows: Vec<Vec<Value>>,
        log: StdMutex<Vec<(String, Vec<Value>)>>,
    }

    struct Replay {
        columns: Arc<ColumnInfo>,
        rows: std::vec::IntoIter<Vec<Value>>,
    }

    impl RowCursor for Replay {
        fn columns(&self) -> Arc<ColumnInfo> {
            Arc::clone(&self.columns)
        }

        fn next_row(&mut self) -> Result<Option<Row>> {
            Ok(self
                .rows
                .next()
                .map(|v| Row::with_columns(Arc::clone(&self.columns), v)))
        }
    }

    impl Connection for Scripted {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }
        fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
            let mut cursor = self.query_cursor(sql, params)?;
            let mut out = Vec::new();
            while let Some(row) = cursor.next_row()? {
                out.push(row);
            }
            Ok(out)
        }
        fn query_cursor<'c>(
            &'c self,
            sql: &str,
            params: &[Value],
        ) -> Result<Box<dyn RowCursor + 'c>> {
            self.log.lock().unwrap().push((sql.to_string(), params.to_vec()));
            Ok(Box::new(Replay {
                columns: Arc::new(ColumnInfo::new(vec!["id".into(), "reading".into()])),
                rows: self.rows.clone().into_iter(),
            }))
        }
        fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
            self.log.lock().unwrap().push((sql.to_string(), params.to_vec()));
            Ok(0)
        }
        fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
            self.execute(sql, params).map(|_| 0)
        }
        fn begin(&self, _: IsolationLevel) -> Result<()> {
            Ok(())
        }
        fn commit(&self) -> Result<()> {
            Ok(())
        }
        fn rollback(&self) -> Result<()> {
            Ok(())
        }
        fn in_transaction(&self) -> bool {
            false
        }
    }

    #[test]
    fn select_by_key_rejects_duplicates() {
        let desc = RecordType::<Gauge>::get().unwrap();
        let conn = Scripted {
            rows: vec![
                vec![Value::Int(1), Value::Int(5)],
                vec![Value::Int(1), Value::Int(6)],
            ],
            ..Scripted::default()
        };
        let err = select_by_key(&conn, &desc, &[Value::Int(1)]).unwrap_err();
        match err {
            Error::Operation(op) => {
                assert_eq!(op.kind, OperationKind::Select);
                assert_eq!(op.key, Some(vec![Value::Int(1)]));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn select_by_key_checks_arity_before_running() {
        let desc = RecordType::<Gauge>::get().unwrap();
        let conn = Scripted::default();
        let err = select_by_key(&conn, &desc, &[]).unwrap_err();
        assert!(matches!(err, Error::Operation(_)));
        assert!(conn.log.lock().unwrap().is_empty());
    }

    #[test]
    fn zero_rows_updated_is_not_an_error() {
        let desc = RecordType::<Gauge>::get().unwrap();
        let conn = Scripted::default();
        let rows = update(&conn, &desc, &Gauge { id: 9, reading: 1 }).unwrap();
        assert_eq!(rows, 0);
        let log = conn.log.lock().unwrap();
        assert_eq!(log[0].1, vec![Value::Int(1), Value::Int(9)]);
    }

    #[test]
    fn cursor_fuses_after_exhaustion() {
        let desc = RecordType::<Gauge>::get().unwrap();
        let conn = Scripted {
            rows: vec![vec![Value::Int(1), Value::Int(50)]],
            ..Scripted::default()
        };
        let selection = Selection::Named {
            condition: Some("above"),
            order: Some("byReading"),
        };
        let mut cursor = open_cursor(
            CascadeContext::new(&conn),
            Arc::clone(&desc),
            &selection,
            &[Value::Int(10)],
        )
        .unwrap();
        assert_eq!(cursor.next().unwrap().unwrap(), Gauge { id: 1, reading: 50 });
        assert!(cursor.next().is_none());
        assert!(cursor.is_done());
        assert!(cursor.next().is_none());

        let log = conn.log.lock().unwrap();
        assert_eq!(
            log[0].0,
            r#"SELECT "id", "reading" FROM "Gauge" WHERE "reading" > ?1 ORDER BY "reading" DESC"#
        );
    }

    #[test]
    fn cursor_checks_parameter_count() {
        let desc = RecordType::<Gauge>::get().unwrap();
        let conn = Scripted::default();
        let selection = Selection::Named {
            condition: Some("above"),
            order: None,
        };
        let err = open_cursor(CascadeContext::new(&conn), desc, &selection, &[]).unwrap_err();
        assert!(matches!(
            err,
            Error::Operation(OperationError {
                kind: OperationKind::SelectAll,
                ..
            })
        ));
    }
}
