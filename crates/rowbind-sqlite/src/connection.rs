//! SQLite connection implementation.
//!
//! Safe wrappers around SQLite's C API implementing the synchronous
//! [`Connection`] trait from rowbind-core. Every call takes the connection's
//! mutex for the duration of one SQLite call, so a connection can be shared
//! across threads and between a session and the lazy handles it creates.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::borrow_as_ptr)]

use crate::ffi;
use crate::types;
use rowbind_core::{
    Connection, Dialect, Error, IsolationLevel, Result, Row, RowCursor, Value,
    error::{
        ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind, TransactionError,
        TransactionErrorKind,
    },
    row::ColumnInfo,
};
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Where and how to open a database.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// File path, `:memory:`, or a `file:` URI when [`OpenFlags::with_uri`]
    /// is set
    pub path: String,
    pub flags: OpenFlags,
    /// How long a statement waits on a locked database; 0 fails at once
    pub busy_timeout_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    ReadOnly,
    ReadWrite,
    ReadWriteCreate,
}

/// Access mode passed to `sqlite3_open_v2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    access: Access,
    uri: bool,
}

impl OpenFlags {
    pub const fn read_only() -> Self {
        Self {
            access: Access::ReadOnly,
            uri: false,
        }
    }

    /// Read-write; the file must already exist.
    pub const fn read_write() -> Self {
        Self {
            access: Access::ReadWrite,
            uri: false,
        }
    }

    pub const fn create_read_write() -> Self {
        Self {
            access: Access::ReadWriteCreate,
            uri: false,
        }
    }

    pub const fn with_uri(mut self) -> Self {
        self.uri = true;
        self
    }

    fn bits(self) -> c_int {
        let access = match self.access {
            Access::ReadOnly => ffi::SQLITE_OPEN_READONLY,
            Access::ReadWrite => ffi::SQLITE_OPEN_READWRITE,
            Access::ReadWriteCreate => ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE,
        };
        if self.uri {
            access | ffi::SQLITE_OPEN_URI
        } else {
            access
        }
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self::create_read_write()
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self::file(":memory:")
    }
}

impl SqliteConfig {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            flags: OpenFlags::default(),
            busy_timeout_ms: 5000,
        }
    }

    pub fn memory() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

struct SqliteInner {
    db: *mut ffi::sqlite3,
}

// SAFETY: the handle is only touched while the owning Mutex is held.
unsafe impl Send for SqliteInner {}

/// A connection to a SQLite database.
pub struct SqliteConnection {
    inner: Mutex<SqliteInner>,
    path: String,
    in_transaction: AtomicBool,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .field("in_transaction", &self.in_transaction())
            .finish_non_exhaustive()
    }
}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "Invalid path: contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.bits();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: db is valid until closed below
                unsafe {
                    let msg = error_message(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            tracing::error!(path = %config.path, error = %msg, "sqlite open failed");
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to open database: {}", msg),
                source: None,
            }));
        }

        if config.busy_timeout_ms > 0 {
            let ms = c_int::try_from(config.busy_timeout_ms).unwrap_or(c_int::MAX);
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, ms);
            }
        }

        tracing::debug!(path = %config.path, "sqlite connection opened");
        Ok(Self {
            inner: Mutex::new(SqliteInner { db }),
            path: config.path.clone(),
            in_transaction: AtomicBool::new(false),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, SqliteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Execute one or more statements without parameters (DDL, pragmas).
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        let inner = self.lock();
        let c_sql = to_c_sql(sql)?;
        let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

        tracing::debug!(sql, "execute_raw");
        // SAFETY: All pointers are valid
        let rc = unsafe {
            ffi::sqlite3_exec(inner.db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg)
        };

        if rc != ffi::SQLITE_OK {
            let msg = if errmsg.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: errmsg was allocated by sqlite3_exec
                unsafe {
                    let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
                    ffi::sqlite3_free(errmsg.cast());
                    msg
                }
            };
            return Err(query_error(error_code_to_kind(rc), sql, msg));
        }
        Ok(())
    }

    /// Get the last insert rowid.
    pub fn last_insert_rowid(&self) -> i64 {
        let inner = self.lock();
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_last_insert_rowid(inner.db) }
    }

    /// Get the number of rows changed by the last statement.
    pub fn changes(&self) -> u64 {
        let inner = self.lock();
        // SAFETY: db is valid
        let n = unsafe { ffi::sqlite3_changes(inner.db) };
        u64::try_from(n).unwrap_or(0)
    }

    /// Prepare a statement and bind `params`, finalizing it on failure.
    fn prepare_bound(
        db: *mut ffi::sqlite3,
        sql: &str,
        params: &[Value],
    ) -> Result<*mut ffi::sqlite3_stmt> {
        let stmt = prepare_stmt(db, sql)?;

        // SAFETY: stmt is valid
        let expected = unsafe { ffi::sqlite3_bind_parameter_count(stmt) };
        if usize::try_from(expected).unwrap_or(0) != params.len() {
            // SAFETY: stmt is valid
            unsafe { ffi::sqlite3_finalize(stmt) };
            return Err(query_error(
                QueryErrorKind::Binding,
                sql,
                format!("expected {} parameters, got {}", expected, params.len()),
            ));
        }

        for (i, param) in params.iter().enumerate() {
            // SAFETY: stmt is valid, index is 1-based and within bounds
            let rc = unsafe { types::bind_value(stmt, (i + 1) as c_int, param) };
            if rc != ffi::SQLITE_OK {
                // SAFETY: stmt is valid
                unsafe { ffi::sqlite3_finalize(stmt) };
                return Err(bind_error(db, sql, i + 1));
            }
        }
        Ok(stmt)
    }

    /// Run a statement to completion, returning rows changed and the last
    /// rowid as seen under the same lock.
    fn run(&self, sql: &str, params: &[Value]) -> Result<(u64, i64)> {
        let inner = self.lock();
        tracing::debug!(sql, params = params.len(), "execute");
        let stmt = Self::prepare_bound(inner.db, sql, params)?;

        // SAFETY: stmt is valid
        let rc = unsafe { ffi::sqlite3_step(stmt) };
        let result = match rc {
            ffi::SQLITE_DONE | ffi::SQLITE_ROW => {
                // SAFETY: db is valid
                let (changes, rowid) = unsafe {
                    (
                        ffi::sqlite3_changes(inner.db),
                        ffi::sqlite3_last_insert_rowid(inner.db),
                    )
                };
                Ok((u64::try_from(changes).unwrap_or(0), rowid))
            }
            _ => Err(step_error(inner.db, sql)),
        };
        // SAFETY: stmt is valid and not used afterwards
        unsafe { ffi::sqlite3_finalize(stmt) };
        if let Ok((changes, _)) = &result {
            tracing::trace!(sql, changes, "execute done");
        }
        result
    }

    fn transaction_sql(&self, sql: &'static str, opening: bool) -> Result<()> {
        let active = self.in_transaction.load(Ordering::SeqCst);
        if opening && active {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::AlreadyActive,
                message: "a transaction is already open".to_string(),
            }));
        }
        if !opening && !active {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::NotActive,
                message: format!("{} without an open transaction", sql),
            }));
        }
        self.execute_raw(sql)?;
        self.in_transaction.store(opening, Ordering::SeqCst);
        tracing::debug!(statement = sql, "transaction state changed");
        Ok(())
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !inner.db.is_null() {
            // SAFETY: db is valid and no statement outlives the connection
            unsafe {
                ffi::sqlite3_close(inner.db);
            }
            inner.db = ptr::null_mut();
        }
    }
}

/// A forward-only cursor over a prepared statement.
///
/// The statement stays prepared between rows; each step takes the
/// connection lock, so other statements may run on the same connection while
/// the cursor is open.
pub struct SqliteCursor<'c> {
    conn: &'c SqliteConnection,
    stmt: *mut ffi::sqlite3_stmt,
    columns: Arc<ColumnInfo>,
    sql: String,
    done: bool,
}

impl<'c> SqliteCursor<'c> {
    fn open(conn: &'c SqliteConnection, sql: &str, params: &[Value]) -> Result<Self> {
        let inner = conn.lock();
        tracing::debug!(sql, params = params.len(), "query");
        let stmt = SqliteConnection::prepare_bound(inner.db, sql, params)?;

        // SAFETY: stmt is valid
        let count = unsafe { ffi::sqlite3_column_count(stmt) };
        let names = (0..count)
            .map(|i| {
                // SAFETY: stmt is valid and i is in range
                unsafe { types::column_name(stmt, i) }.unwrap_or_else(|| format!("col{}", i))
            })
            .collect();
        drop(inner);

        Ok(Self {
            conn,
            stmt,
            columns: Arc::new(ColumnInfo::new(names)),
            sql: sql.to_string(),
            done: false,
        })
    }

    fn step(&mut self) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        let inner = self.conn.lock();
        // SAFETY: stmt is valid until Drop
        let rc = unsafe { ffi::sqlite3_step(self.stmt) };
        match rc {
            ffi::SQLITE_ROW => Ok(true),
            ffi::SQLITE_DONE => {
                self.done = true;
                Ok(false)
            }
            _ => {
                self.done = true;
                Err(step_error(inner.db, &self.sql))
            }
        }
    }
}

impl RowCursor for SqliteCursor<'_> {
    fn columns(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        if !self.step()? {
            return Ok(None);
        }
        let _guard = self.conn.lock();
        let count = self.columns.len() as c_int;
        let values = (0..count)
            // SAFETY: the last step returned SQLITE_ROW
            .map(|i| unsafe { types::read_column(self.stmt, i) })
            .collect();
        Ok(Some(Row::with_columns(Arc::clone(&self.columns), values)))
    }

    fn skip_rows(&mut self, n: u64) -> Result<u64> {
        let mut skipped = 0;
        while skipped < n && self.step()? {
            skipped += 1;
        }
        Ok(skipped)
    }
}

impl Drop for SqliteCursor<'_> {
    fn drop(&mut self) {
        let _guard = self.conn.lock();
        // SAFETY: stmt is valid and finalized exactly once
        unsafe { ffi::sqlite3_finalize(self.stmt) };
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut cursor = SqliteCursor::open(self, sql, params)?;
        let mut rows = Vec::new();
        while let Some(row) = cursor.next_row()? {
            rows.push(row);
        }
        tracing::trace!(sql, rows = rows.len(), "query done");
        Ok(rows)
    }

    fn query_cursor<'c>(
        &'c self,
        sql: &str,
        params: &[Value],
    ) -> Result<Box<dyn RowCursor + 'c>> {
        Ok(Box::new(SqliteCursor::open(self, sql, params)?))
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.run(sql, params).map(|(changes, _)| changes)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        self.run(sql, params).map(|(_, rowid)| rowid)
    }

    fn begin(&self, isolation: IsolationLevel) -> Result<()> {
        // SQLite has no per-transaction isolation levels; the lock mode is
        // the closest knob.
        let sql = match isolation {
            IsolationLevel::Serializable => "BEGIN EXCLUSIVE",
            IsolationLevel::RepeatableRead | IsolationLevel::ReadCommitted => "BEGIN IMMEDIATE",
            IsolationLevel::ReadUncommitted => "BEGIN DEFERRED",
        };
        self.transaction_sql(sql, true)
    }

    fn commit(&self) -> Result<()> {
        self.transaction_sql("COMMIT", false)
    }

    fn rollback(&self) -> Result<()> {
        self.transaction_sql("ROLLBACK", false)
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }
}

// Helper functions

fn to_c_sql(sql: &str) -> Result<CString> {
    CString::new(sql)
        .map_err(|_| query_error(QueryErrorKind::Syntax, sql, "SQL contains null byte".into()))
}

fn prepare_stmt(db: *mut ffi::sqlite3, sql: &str) -> Result<*mut ffi::sqlite3_stmt> {
    let c_sql = to_c_sql(sql)?;
    let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();

    // SAFETY: All pointers are valid
    let rc = unsafe {
        ffi::sqlite3_prepare_v2(
            db,
            c_sql.as_ptr(),
            c_sql.as_bytes().len() as c_int,
            &mut stmt,
            ptr::null_mut(),
        )
    };

    if rc != ffi::SQLITE_OK {
        return Err(step_error(db, sql));
    }
    if stmt.is_null() {
        return Err(query_error(
            QueryErrorKind::Syntax,
            sql,
            "empty statement".to_string(),
        ));
    }
    Ok(stmt)
}

/// # Safety
/// `db` must be a valid handle.
unsafe fn error_message(db: *mut ffi::sqlite3) -> String {
    // SAFETY: forwarded from the caller
    unsafe {
        let ptr = ffi::sqlite3_errmsg(db);
        if ptr.is_null() {
            return "unknown error".to_string();
        }
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

fn query_error(kind: QueryErrorKind, sql: &str, message: String) -> Error {
    Error::Query(QueryError {
        kind,
        sql: Some(sql.to_string()),
        message,
        source: None,
    })
}

fn bind_error(db: *mut ffi::sqlite3, sql: &str, param_index: usize) -> Error {
    // SAFETY: db is valid
    let msg = unsafe { error_message(db) };
    query_error(
        QueryErrorKind::Binding,
        sql,
        format!("Failed to bind parameter {}: {}", param_index, msg),
    )
}

fn step_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (msg, code) = unsafe { (error_message(db), ffi::sqlite3_errcode(db)) };
    query_error(error_code_to_kind(code), sql, msg)
}

fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    match code {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Deadlock,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH | ffi::SQLITE_READONLY => QueryErrorKind::Permission,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_TOOBIG => QueryErrorKind::DataTruncation,
        ffi::SQLITE_RANGE | ffi::SQLITE_MISMATCH => QueryErrorKind::Binding,
        _ => QueryErrorKind::Database,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> SqliteConnection {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)")
            .unwrap();
        conn
    }

    #[test]
    fn test_open_memory() {
        let conn = SqliteConnection::open_memory().unwrap();
        assert_eq!(conn.path(), ":memory:");
        assert_eq!(conn.dialect(), Dialect::Sqlite);
        assert!(!conn.in_transaction());
    }

    #[test]
    fn test_execute_raw() {
        let conn = people();
        conn.execute_raw("INSERT INTO test (name) VALUES ('Alice')")
            .unwrap();
        assert_eq!(conn.changes(), 1);
        assert_eq!(conn.last_insert_rowid(), 1);
    }

    #[test]
    fn test_query() {
        let conn = people();
        conn.execute_raw("INSERT INTO test (name) VALUES ('Alice'), ('Bob')")
            .unwrap();

        let rows = conn.query("SELECT id, name FROM test ORDER BY id", &[]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_named::<i32>("id").unwrap(), 1);
        assert_eq!(rows[0].get_named::<String>("name").unwrap(), "Alice");
        assert_eq!(rows[1].get_named::<String>("name").unwrap(), "Bob");
    }

    #[test]
    fn test_parameterized_query() {
        let conn = people();
        let changed = conn
            .execute(
                "INSERT INTO test (name, age) VALUES (?1, ?2)",
                &[Value::Text("Alice".to_string()), Value::Int(30)],
            )
            .unwrap();
        assert_eq!(changed, 1);

        let row = conn
            .query_one(
                "SELECT name, age FROM test WHERE name = ?1",
                &[Value::Text("Alice".to_string())],
            )
            .unwrap()
            .unwrap();
        assert_eq!(row.get_named::<i32>("age").unwrap(), 30);
    }

    #[test]
    fn test_parameter_count_mismatch() {
        let conn = people();
        let err = conn
            .execute("INSERT INTO test (name, age) VALUES (?1, ?2)", &[Value::Int(1)])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Query(QueryError {
                kind: QueryErrorKind::Binding,
                ..
            })
        ));
    }

    #[test]
    fn test_null_handling() {
        let conn = people();
        conn.execute("INSERT INTO test (name) VALUES (?1)", &[Value::Null])
            .unwrap();
        let rows = conn.query("SELECT name FROM test", &[]).unwrap();
        assert_eq!(rows[0].get_named::<Option<String>>("name").unwrap(), None);
    }

    #[test]
    fn test_transaction() {
        let conn = people();

        conn.begin(IsolationLevel::default()).unwrap();
        assert!(conn.in_transaction());
        conn.execute("INSERT INTO test (name) VALUES (?1)", &[Value::from("Alice")])
            .unwrap();
        conn.rollback().unwrap();
        assert!(conn.query("SELECT * FROM test", &[]).unwrap().is_empty());

        conn.begin(IsolationLevel::Serializable).unwrap();
        conn.execute("INSERT INTO test (name) VALUES (?1)", &[Value::from("Bob")])
            .unwrap();
        conn.commit().unwrap();
        assert!(!conn.in_transaction());
        assert_eq!(conn.query("SELECT * FROM test", &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_transaction_state_errors() {
        let conn = people();
        assert!(matches!(
            conn.commit(),
            Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::NotActive,
                ..
            }))
        ));
        conn.begin(IsolationLevel::default()).unwrap();
        assert!(matches!(
            conn.begin(IsolationLevel::default()),
            Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::AlreadyActive,
                ..
            }))
        ));
        conn.rollback().unwrap();
    }

    #[test]
    fn test_insert_rowid() {
        let conn = people();
        let first = conn
            .insert("INSERT INTO test (name) VALUES (?1)", &[Value::from("Alice")])
            .unwrap();
        let second = conn
            .insert("INSERT INTO test (name) VALUES (?1)", &[Value::from("Bob")])
            .unwrap();
        assert_eq!((first, second), (1, 2));
    }

    #[test]
    fn test_constraint_violation() {
        let conn = people();
        conn.execute("INSERT INTO test (id, name) VALUES (?1, ?2)", &[Value::Int(1), Value::from("a")])
            .unwrap();
        let err = conn
            .execute("INSERT INTO test (id, name) VALUES (?1, ?2)", &[Value::Int(1), Value::from("b")])
            .unwrap_err();
        assert!(err.is_constraint_violation());
        assert!(err.sql().is_some());
    }

    #[test]
    fn test_cursor_is_incremental() {
        let conn = people();
        for i in 0..10 {
            conn.execute("INSERT INTO test (age) VALUES (?1)", &[Value::Int(i)])
                .unwrap();
        }
        let mut cursor = conn
            .query_cursor("SELECT age FROM test ORDER BY age", &[])
            .unwrap();
        assert_eq!(cursor.columns().names(), &["age".to_string()]);
        assert_eq!(cursor.skip_rows(7).unwrap(), 7);
        let row = cursor.next_row().unwrap().unwrap();
        assert_eq!(row.get_as::<i32>(0).unwrap(), 7);

        // Other statements may run while the cursor is open.
        conn.execute("UPDATE test SET name = 'x' WHERE age = 0", &[]).unwrap();

        assert_eq!(cursor.skip_rows(5).unwrap(), 2);
        assert!(cursor.next_row().unwrap().is_none());
        assert!(cursor.next_row().unwrap().is_none());
    }

    #[test]
    #[allow(clippy::approx_constant)]
    fn test_type_conversions() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE types (b BOOLEAN, i INTEGER, big INTEGER, f REAL, t TEXT, bl BLOB, u BLOB, d TEXT)")
            .unwrap();
        conn.execute(
            "INSERT INTO types VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            &[
                Value::Bool(true),
                Value::BigInt(42),
                Value::BigInt(i64::from(i32::MAX) + 1),
                Value::Double(3.14),
                Value::Text("hello".to_string()),
                Value::Bytes(vec![1, 2, 3]),
                Value::Uuid([9; 16]),
                Value::Date(0),
            ],
        )
        .unwrap();

        let rows = conn.query("SELECT * FROM types", &[]).unwrap();
        let row = &rows[0];
        assert_eq!(row.get_by_name("b"), Some(&Value::Int(1)));
        assert_eq!(row.get_by_name("i"), Some(&Value::Int(42)));
        assert_eq!(
            row.get_by_name("big"),
            Some(&Value::BigInt(i64::from(i32::MAX) + 1))
        );
        let f: f64 = row.get_named("f").unwrap();
        assert!((f - 3.14).abs() < 0.001);
        assert_eq!(row.get_named::<Vec<u8>>("bl").unwrap(), vec![1, 2, 3]);
        assert_eq!(row.get_by_name("u"), Some(&Value::Bytes(vec![9; 16])));
        assert_eq!(row.get_by_name("d"), Some(&Value::Text("1970-01-01".into())));
    }

    #[test]
    fn test_open_flags() {
        let tmp = std::env::temp_dir().join(format!("rowbind_flags_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&tmp);

        let config = SqliteConfig::file(tmp.to_string_lossy().to_string())
            .flags(OpenFlags::create_read_write())
            .busy_timeout(100);
        let conn = SqliteConnection::open(&config).unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER)").unwrap();
        drop(conn);

        let config =
            SqliteConfig::file(tmp.to_string_lossy().to_string()).flags(OpenFlags::read_only());
        let conn = SqliteConnection::open(&config).unwrap();
        assert!(conn.query("SELECT * FROM test", &[]).unwrap().is_empty());
        assert!(conn.execute_raw("INSERT INTO test VALUES (1)").is_err());

        drop(conn);
        let _ = std::fs::remove_file(&tmp);
    }

    #[test]
    fn test_open_missing_read_write_fails() {
        let tmp = std::env::temp_dir().join("rowbind_definitely_missing_dir/none.db");
        let config =
            SqliteConfig::file(tmp.to_string_lossy().to_string()).flags(OpenFlags::read_write());
        assert!(matches!(
            SqliteConnection::open(&config),
            Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                ..
            }))
        ));
    }
}
