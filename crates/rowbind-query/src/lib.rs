//! SQL statement construction for rowbind.
//!
//! `rowbind-query` is the **statement layer**. It turns a resolved
//! `RecordType` descriptor into parameterized SQL plus the parameter plan that
//! says which binding encodes each placeholder.
//!
//! # Role In The Architecture
//!
//! - **Statement builder**: select (by key, by named condition, paged),
//!   insert, update, delete and aggregates.
//! - **Parameter plan**: `Statement::bind` encodes record fields, caller
//!   arguments and declared literals through each column's translator.
//! - **DDL**: `CreateTable` renders a table definition from a descriptor.
//! - **Statement cache**: built statements are reused per record type,
//!   dialect and shape.
//!
//! Statements run through the `Connection` trait from `rowbind-core`; the
//! session crate drives them.

pub mod builder;
pub mod cache;
pub mod clause;
pub mod ddl;
pub mod statement;

pub use builder::{Aggregate, StatementBuilder};
pub use cache::{StatementCache, StatementKey, StatementKind};
pub use clause::{Limit, Offset};
pub use ddl::{CreateTable, drop_table};
pub use statement::{ParamSource, Statement, StatementParam};
