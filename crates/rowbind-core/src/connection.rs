//! Database connection traits.
//!
//! - [`Connection`] - synchronous statement execution and transaction control
//! - [`RowCursor`] - forward-only result cursor
//! - [`ConnectionProvider`] - hands out connections after a unit of work ends
//! - [`Dialect`] - placeholder and quoting rules
//! - [`IsolationLevel`] - SQL transaction isolation levels
//!
//! Every call blocks until the database answers. Timeouts, if any, are the
//! driver's business.

use crate::error::{ConnectionError, ConnectionErrorKind, Error, Result};
use crate::identifiers::quote_qualified;
use crate::row::{ColumnInfo, Row};
use crate::value::Value;
use std::sync::Arc;

/// SQL dialect for placeholder and identifier rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dialect {
    /// SQLite dialect (uses ?1, ?2 placeholders)
    #[default]
    Sqlite,
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    Postgres,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote a possibly schema-qualified identifier for this dialect.
    pub fn quote_identifier(self, name: &str) -> String {
        quote_qualified(name, self == Dialect::Mysql)
    }
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Dirty reads allowed.
    ReadUncommitted,
    /// Only committed changes from others are visible.
    #[default]
    ReadCommitted,
    /// A consistent snapshot for the whole transaction.
    RepeatableRead,
    /// Transactions appear to execute one after another.
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL syntax for this isolation level.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// A forward-only cursor over a result set.
///
/// Dropping the cursor releases the underlying statement, whether or not it
/// was read to the end.
pub trait RowCursor {
    /// Column metadata for every row this cursor yields.
    fn columns(&self) -> Arc<ColumnInfo>;

    /// Advance to the next row. `Ok(None)` once the result set is exhausted.
    fn next_row(&mut self) -> Result<Option<Row>>;

    /// Step past `n` rows without materializing them, returning how many
    /// were actually skipped.
    fn skip_rows(&mut self, n: u64) -> Result<u64> {
        let mut skipped = 0;
        while skipped < n {
            if self.next_row()?.is_none() {
                break;
            }
            skipped += 1;
        }
        Ok(skipped)
    }
}

/// A database connection capable of executing parameterized SQL.
///
/// Implementations must be `Send + Sync` so a connection can be shared with
/// lazy relationship handles that outlive the session that loaded them.
///
/// # Example
///
/// ```rust,ignore
/// let rows = conn.query("SELECT * FROM \"Part\" WHERE \"qty\" > ?1", &[Value::Int(10)])?;
///
/// conn.begin(IsolationLevel::default())?;
/// conn.execute("DELETE FROM \"Part\" WHERE \"partNumber\" = ?1", &[Value::Int(1111)])?;
/// conn.commit()?;
/// ```
pub trait Connection: Send + Sync {
    /// Placeholder and quoting rules for this connection.
    fn dialect(&self) -> Dialect;

    /// Execute a query and return all rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a query and return a cursor over its rows.
    fn query_cursor<'c>(
        &'c self,
        sql: &str,
        params: &[Value],
    ) -> Result<Box<dyn RowCursor + 'c>>;

    /// Execute a query and return the first row, if any.
    fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let mut cursor = self.query_cursor(sql, params)?;
        cursor.next_row()
    }

    /// Execute a statement (INSERT, UPDATE, DELETE) and return rows affected.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute an INSERT and return the database-generated row id.
    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64>;

    /// Start a transaction.
    fn begin(&self, isolation: IsolationLevel) -> Result<()>;

    /// Commit the open transaction.
    fn commit(&self) -> Result<()>;

    /// Roll back the open transaction.
    fn rollback(&self) -> Result<()>;

    /// Whether a transaction is currently open.
    fn in_transaction(&self) -> bool;
}

/// Source of connections for work that happens after a session is gone.
///
/// Lazy relationship handles capture a provider rather than a borrowed
/// connection, so they can resolve long after the loading session dropped.
pub trait ConnectionProvider: Send + Sync {
    fn acquire(&self) -> Result<Arc<dyn Connection>>;
}

/// A provider that always hands out the same shared connection.
#[derive(Debug)]
pub struct SharedConnection<C> {
    connection: Arc<C>,
}

impl<C: Connection + 'static> SharedConnection<C> {
    pub fn new(connection: Arc<C>) -> Self {
        Self { connection }
    }
}

impl<C: Connection + 'static> ConnectionProvider for SharedConnection<C> {
    fn acquire(&self) -> Result<Arc<dyn Connection>> {
        let conn: Arc<dyn Connection> = self.connection.clone();
        Ok(conn)
    }
}

impl<F> ConnectionProvider for F
where
    F: Fn() -> Result<Arc<dyn Connection>> + Send + Sync,
{
    fn acquire(&self) -> Result<Arc<dyn Connection>> {
        self()
    }
}

/// Provider used by records that were never attached to a session.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProvider;

impl ConnectionProvider for NoProvider {
    fn acquire(&self) -> Result<Arc<dyn Connection>> {
        Err(Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Unavailable,
            message: "no connection provider attached".to_string(),
            source: None,
        }))
    }
}
