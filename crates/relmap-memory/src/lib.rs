//! In-memory SQL database for relmap.
//!
//! This crate implements the `Connection` trait from relmap-core over a set
//! of in-memory tables. It understands the SQL relmap generates and nothing
//! more, which makes it a strict partner for tests: unknown tables, columns
//! or aliases are errors, and every statement is logged.
//!
//! # Features
//!
//! - Alias-qualified `SELECT` with `WHERE`, `ORDER BY`, `LIMIT` and `OFFSET`
//! - `SUM`, `COUNT`, `MIN`, `MAX` and `AVG`
//! - Sequences read with `select nextval('seq')`
//! - SQL three-valued logic for `NULL`
//! - Transactions, isolation tracking and failure injection
//!
//! # Example
//!
//! ```rust,ignore
//! use relmap_core::Connection;
//! use relmap_memory::MemoryDatabase;
//!
//! let db = MemoryDatabase::new();
//! db.execute_raw("CREATE TABLE users (ID, NAME)")?;
//!
//! let mut conn = db.connect();
//! conn.connect()?;
//! conn.begin()?;
//! conn.execute("INSERT INTO users (ID,NAME) values (1,'Alice')")?;
//! conn.commit()?;
//!
//! assert_eq!(db.statements().last().map(String::as_str), Some("COMMIT"));
//! ```
//!
//! # Type Mapping
//!
//! | Literal | Stored as |
//! |---------|-----------|
//! | `42` | `Value::BigInt` |
//! | `4.2`, `1e3` | `Value::Double` |
//! | `'text'` | `Value::Text` |
//! | `true` / `false` | `Value::Bool` |
//! | `X'0aff'` | `Value::Bytes` |
//! | `NULL` | `Value::Null` |
//!
//! Dates arrive as text literals and are stored as text; relmap's field
//! coercion parses them back on fetch.

pub mod connection;
mod eval;
mod sql;
mod store;

pub use connection::{MemoryConfig, MemoryConnection, MemoryDatabase};
