//! # dbflow - SQL templating over SQLite/SpatiaLite
//!
//! dbflow provides:
//! - Config-driven resolution of the custom SQL directory, schema script and audit directory
//! - SQL templates rendered by placeholder substitution, with an audit copy on disk
//! - A thin connection wrapper for executing, querying and introspecting a database
//! - Optional custom schema scripts applied to a live database
//! - Schema relationship reports (Graphviz) and table diffs between two database files

pub mod config;
pub mod template;
pub mod storage;
pub mod schema;
pub mod report;
pub mod diff;
pub mod ui;

// Re-exports for convenient access
pub use config::{DbflowConfig, PathConfig};
pub use template::{Replacements, RenderedSql, SqlTemplates, render};
pub use storage::{Database, QueryResult};
pub use schema::{SchemaScript, SqlSchemaScript};
pub use report::SchemaReport;
pub use diff::TableDiff;

/// Result type alias for dbflow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for dbflow operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("SQL file '{name}' not found in directory: {}. Available files: {available:?}", dir.display())]
    TemplateNotFound {
        name: String,
        dir: std::path::PathBuf,
        available: Vec<String>,
    },

    #[error("Invalid replacement: {0}")]
    InvalidReplacement(String),

    #[error("Table '{0}' does not exist in the database")]
    TableNotFound(String),

    #[error("Table '{0}' has no primary key; pass the key columns explicitly")]
    MissingPrimaryKey(String),

    #[error("Database file not found: {}", .0.display())]
    DatabaseNotFound(std::path::PathBuf),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
