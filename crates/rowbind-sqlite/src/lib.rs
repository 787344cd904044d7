//! SQLite driver for rowbind.
//!
// FFI bindings require unsafe code
#![allow(unsafe_code)]
//!
//! Implements the synchronous `Connection` trait from rowbind-core on top of
//! the bundled libsqlite3 from `libsqlite3-sys`.
//!
//! # Example
//!
//! ```
//! use rowbind_core::{Connection, Value};
//! use rowbind_sqlite::SqliteConnection;
//!
//! let conn = SqliteConnection::open_memory().unwrap();
//! conn.execute_raw("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)").unwrap();
//! let id = conn
//!     .insert("INSERT INTO users (name) VALUES (?1)", &[Value::from("Alice")])
//!     .unwrap();
//! assert_eq!(id, 1);
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite storage |
//! |-------|----------------|
//! | `Bool`, `TinyInt`..`BigInt` | INTEGER |
//! | `Float`, `Double` | REAL |
//! | `Text`, `Decimal`, `Json` | TEXT |
//! | `Bytes`, `Uuid` | BLOB |
//! | `Date`, `Time`, `Timestamp` | TEXT (ISO-8601) |
//! | `Null` | NULL |
//!
//! # Thread Safety
//!
//! `SqliteConnection` is `Send + Sync`; a mutex guards the handle for the
//! length of each SQLite call.

pub mod connection;
pub mod ffi;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection, SqliteCursor};

/// The SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

/// The SQLite library version number.
pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}
