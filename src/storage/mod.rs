//! Storage Layer - SQLite connection wrapper
//!
//! Execution, transactions and query planning are left to SQLite itself.
//! This layer adds:
//! - opening (and creating) database files, optional SpatiaLite loading
//! - running rendered SQL and collecting rows
//! - schema introspection (tables, columns, primary and foreign keys)
//! - filtered record fetches and key-aware inserts

pub mod introspect;
pub mod sqlite;
pub mod value;

pub use introspect::{ForeignKey, TableInfo};
pub use sqlite::{Database, Filter, InsertSummary, QueryResult, Record};
pub use value::{quote_ident, value_to_json, value_to_string};
