//! SQLite connection wrapper

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::types::Value;
use rusqlite::{Batch, Connection, OpenFlags, params_from_iter};

use super::value::{quote_ident, value_to_json};
use crate::{Error, Result};

/// A row keyed by column name, used for inserts
pub type Record = BTreeMap<String, Value>;

/// Thin wrapper over a SQLite (optionally SpatiaLite-enabled) connection
pub struct Database {
    pub(crate) conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Open a database file (creates it and its parent directories if missing)
    pub fn open(path: &Path) -> Result<Self> {
        crate::config::ensure_parent_dir(path)?;
        let conn = Connection::open(path)?;
        tracing::debug!("Opened database {}", path.display());
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a database file that must already exist; never creates one.
    pub fn open_existing(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::DatabaseNotFound(path.to_path_buf()));
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        tracing::debug!("Opened existing database {}", path.display());
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Human-readable location for log lines
    pub fn location(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ========== SpatiaLite ==========

    /// Load the SpatiaLite extension and make sure spatial metadata exists.
    pub fn load_spatialite(&self, library: &str) -> Result<()> {
        // SAFETY: the extension is a library the user configured explicitly;
        // extension loading is switched off again when the guard drops.
        unsafe {
            let _guard = rusqlite::LoadExtensionGuard::new(&self.conn)?;
            self.conn.load_extension(library, None::<&str>)?;
        }
        tracing::info!("SpatiaLite extension loaded from {}", library);

        if !self.table_exists("geometry_columns")? {
            tracing::info!("Spatial metadata missing. Initializing...");
            self.conn
                .query_row("SELECT InitSpatialMetaData(1)", [], |row| row.get::<_, Value>(0))?;
            tracing::info!("SpatiaLite metadata initialized successfully.");
        }
        Ok(())
    }

    /// Version string reported by the loaded SpatiaLite extension
    pub fn spatialite_version(&self) -> Result<String> {
        let version = self
            .conn
            .query_row("SELECT spatialite_version()", [], |row| row.get(0))
            .inspect_err(|e| {
                if e.to_string().contains("no such function") {
                    tracing::error!("SpatiaLite extension is not loaded or recognized.");
                }
            })?;
        Ok(version)
    }

    // ========== Execution ==========

    /// Execute one or more statements that return no rows
    pub fn execute_sql(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Run a single query and collect all rows
    pub fn query(&self, sql: &str) -> Result<QueryResult> {
        let mut stmt = self.conn.prepare(sql)?;
        let result = collect_rows(&mut stmt, &[])?;
        if result.is_empty() {
            tracing::warn!("Query returned empty! Table is empty or SQL query is incorrect.");
        }
        Ok(result)
    }

    /// Run a script statement by statement.
    ///
    /// Statements that produce rows are collected; the last such result is returned.
    pub fn run(&self, sql: &str) -> Result<Option<QueryResult>> {
        let mut batch = Batch::new(&self.conn, sql);
        let mut last = None;
        let mut executed = 0usize;

        while let Some(mut stmt) = batch.next()? {
            if stmt.column_count() > 0 {
                last = Some(collect_rows(&mut stmt, &[])?);
            } else {
                let changed = stmt.execute([])?;
                tracing::debug!("Statement affected {} rows", changed);
            }
            executed += 1;
        }

        tracing::info!("Executed {} statement(s) against {}", executed, self.location());
        Ok(last)
    }

    /// Execute a CREATE TABLE statement unless the table already exists.
    ///
    /// Returns `true` when the table was created.
    pub fn create_table_from_sql(&self, sql: &str, table: &str) -> Result<bool> {
        if self.table_exists(table)? {
            tracing::info!("Table '{}' already exists. Skipping creation.", table);
            return Ok(false);
        }

        self.conn.execute_batch(sql)?;
        tracing::info!("Table '{}' created successfully.", table);
        Ok(true)
    }

    // ========== Records ==========

    /// Select rows from a table with optional column selection and filters.
    ///
    /// Unknown columns and filters are ignored. A missing or empty table
    /// yields an empty result.
    pub fn fetch_records(
        &self,
        table: &str,
        columns: Option<&[&str]>,
        filters: &[(&str, Filter)],
    ) -> Result<QueryResult> {
        if !self.table_exists(table)? || self.table_is_empty(table)? {
            tracing::info!("The table '{}' is missing or empty.", table);
            return Ok(QueryResult::default());
        }

        let col_names = self.column_names(table)?;
        let selected: Vec<String> = match columns {
            None => col_names.clone(),
            Some(requested) => {
                let invalid: Vec<&str> = requested
                    .iter()
                    .copied()
                    .filter(|c| !col_names.iter().any(|n| n == c))
                    .collect();
                if !invalid.is_empty() {
                    tracing::info!(
                        "Ignoring invalid columns not found in '{}': {}",
                        table,
                        invalid.join(", ")
                    );
                }
                requested
                    .iter()
                    .filter(|c| col_names.iter().any(|n| n == *c))
                    .map(|c| c.to_string())
                    .collect()
            }
        };
        if selected.is_empty() {
            return Ok(QueryResult::default());
        }

        let geom_cols = self.geometry_columns(table)?;
        if geom_cols.len() > 1 {
            tracing::warn!("Table '{}' contains more than one geometry column.", table);
        }
        let select_list: Vec<String> = selected
            .iter()
            .map(|c| {
                let ident = quote_ident(c);
                if geom_cols.iter().any(|g| g.eq_ignore_ascii_case(c)) {
                    format!("AsText({ident}) AS {ident}")
                } else {
                    ident
                }
            })
            .collect();

        let mut conditions = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        for (column, filter) in filters {
            if !col_names.iter().any(|n| n == column) {
                tracing::warn!(
                    "Ignoring invalid filter for '{}' as it is not in '{}' columns.",
                    column,
                    table
                );
                continue;
            }
            let ident = quote_ident(column);
            match filter {
                Filter::Eq(v) => {
                    conditions.push(format!("{ident} = ?"));
                    values.push(v.clone());
                }
                Filter::In(vs) if vs.is_empty() => conditions.push("0".to_string()),
                Filter::In(vs) => {
                    let placeholders = vec!["?"; vs.len()].join(", ");
                    conditions.push(format!("{ident} IN ({placeholders})"));
                    values.extend(vs.iter().cloned());
                }
                Filter::Between(lo, hi) => {
                    conditions.push(format!("{ident} >= ? AND {ident} <= ?"));
                    values.push(lo.clone());
                    values.push(hi.clone());
                }
            }
        }

        let mut sql = format!("SELECT {} FROM {}", select_list.join(", "), quote_ident(table));
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        tracing::debug!("Executing query: {}", sql);

        let mut stmt = self.conn.prepare(&sql)?;
        collect_rows(&mut stmt, &values)
    }

    /// Insert rows in one transaction.
    ///
    /// With `update` rows are upserted on the primary key. Without it rows whose
    /// key already exists are left alone and counted as rejected. An empty
    /// `primary_key` means the table's declared primary key.
    pub fn insert(
        &self,
        table: &str,
        primary_key: &[&str],
        rows: &[Record],
        update: bool,
    ) -> Result<InsertSummary> {
        if !self.table_exists(table)? {
            return Err(Error::TableNotFound(table.to_string()));
        }

        let declared;
        let primary_key: Vec<&str> = if primary_key.is_empty() {
            declared = self.primary_keys(table)?;
            declared.iter().map(String::as_str).collect()
        } else {
            primary_key.to_vec()
        };
        if primary_key.is_empty() {
            return Err(Error::MissingPrimaryKey(table.to_string()));
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut summary = InsertSummary::default();

        for row in rows {
            let columns: Vec<&String> = row.keys().collect();
            let values: Vec<&Value> = row.values().collect();
            let insert = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(table),
                columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
                vec!["?"; columns.len()].join(", ")
            );

            if update {
                let sql = format!("{} {}", insert, upsert_clause(&primary_key, &columns));
                tx.execute(&sql, params_from_iter(values))?;
                summary.inserted += 1;
                continue;
            }

            if self.key_exists(table, &primary_key, row)? {
                tracing::debug!("Rejected entry with already existing primary key in {}", table);
                summary.rejected += 1;
            } else {
                tx.execute(&insert, params_from_iter(values))?;
                summary.inserted += 1;
            }
        }

        tx.commit()?;
        tracing::info!("{} to table {}", summary, table);
        Ok(summary)
    }

    fn key_exists(&self, table: &str, primary_key: &[&str], row: &Record) -> Result<bool> {
        let conditions: Vec<String> = primary_key
            .iter()
            .map(|k| format!("{} IS ?", quote_ident(k)))
            .collect();
        let values: Vec<Value> = primary_key
            .iter()
            .map(|k| row.get(*k).cloned().unwrap_or(Value::Null))
            .collect();
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {})",
            quote_ident(table),
            conditions.join(" AND ")
        );
        let exists: bool = self
            .conn
            .query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(exists)
    }
}

fn upsert_clause(primary_key: &[&str], columns: &[&String]) -> String {
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !primary_key.contains(&c.as_str()))
        .map(|c| {
            let ident = quote_ident(c);
            format!("{ident}=excluded.{ident}")
        })
        .collect();
    let conflict = primary_key.iter().map(|k| quote_ident(k)).collect::<Vec<_>>().join(", ");

    if updates.is_empty() {
        format!("ON CONFLICT ({conflict}) DO NOTHING")
    } else {
        format!("ON CONFLICT ({conflict}) DO UPDATE SET {}", updates.join(", "))
    }
}

fn collect_rows(stmt: &mut rusqlite::Statement<'_>, values: &[Value]) -> Result<QueryResult> {
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();

    let rows = stmt
        .query_map(params_from_iter(values), |row| {
            (0..width).map(|i| row.get::<_, Value>(i)).collect::<rusqlite::Result<Vec<Value>>>()
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(QueryResult { columns, rows })
}

/// Filter applied to a column in [`Database::fetch_records`]
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(Value),
    In(Vec<Value>),
    /// Inclusive range, e.g. a date window
    Between(Value, Value),
}

/// Column names plus rows of a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Index of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Rows as JSON objects keyed by column name
    pub fn to_json(&self) -> serde_json::Value {
        let rows: Vec<serde_json::Value> = self
            .rows
            .iter()
            .map(|row| {
                let object: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().map(value_to_json))
                    .collect();
                serde_json::Value::Object(object)
            })
            .collect();
        serde_json::Value::Array(rows)
    }
}

/// Outcome of [`Database::insert`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertSummary {
    pub inserted: usize,
    pub rejected: usize,
}

impl std::fmt::Display for InsertSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ingested {} entries", self.inserted)?;
        if self.rejected > 0 {
            write!(f, ", rejected {} (already existing)", self.rejected)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.execute_sql(
            r#"
            CREATE TABLE croplegend (crop_type_code TEXT PRIMARY KEY, crop_type TEXT);
            CREATE TABLE areaofinterest (
                fid INTEGER,
                year INTEGER,
                aoi TEXT,
                crop_type_code TEXT REFERENCES croplegend(crop_type_code),
                area REAL,
                PRIMARY KEY (fid, year, aoi)
            );
            INSERT INTO croplegend VALUES ('WW', 'winter wheat'), ('WG', 'winter barley');
            INSERT INTO areaofinterest VALUES
                (1, 2020, 'FRIEN', 'WW', 10.5),
                (2, 2020, 'FRIEN', 'WG', 3.0),
                (3, 2021, 'MRKN', 'WW', 7.25);
            "#,
        )
        .unwrap();
        db
    }

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("archive.db");

        let db = Database::open(&path).unwrap();
        db.execute_sql("CREATE TABLE t (x INTEGER)").unwrap();

        assert!(path.exists());
        assert_eq!(db.path(), Some(path.as_path()));
    }

    #[test]
    fn test_query_collects_rows() {
        let db = sample_db();
        let result = db
            .query("SELECT fid, area FROM areaofinterest WHERE aoi = 'FRIEN' ORDER BY fid")
            .unwrap();

        assert_eq!(result.columns, vec!["fid", "area"]);
        assert_eq!(result.len(), 2);
        assert_eq!(result.rows[0], vec![Value::Integer(1), Value::Real(10.5)]);
    }

    #[test]
    fn test_run_returns_last_result_set() {
        let db = Database::open_in_memory().unwrap();
        let result = db
            .run("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1), (2); SELECT COUNT(*) AS n FROM t;")
            .unwrap()
            .unwrap();

        assert_eq!(result.columns, vec!["n"]);
        assert_eq!(result.rows, vec![vec![Value::Integer(2)]]);

        assert!(db.run("DELETE FROM t;").unwrap().is_none());
    }

    #[test]
    fn test_driver_errors_propagate() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.execute_sql("SELEC nonsense"), Err(Error::Storage(_))));
        assert!(matches!(db.query("SELECT * FROM missing"), Err(Error::Storage(_))));
    }

    #[test]
    fn test_create_table_from_sql_skips_existing() {
        let db = sample_db();
        let sql = "CREATE TABLE ml_transferability (model TEXT, score REAL)";

        assert!(db.create_table_from_sql(sql, "ml_transferability").unwrap());
        assert!(!db.create_table_from_sql(sql, "ml_transferability").unwrap());
    }

    #[test]
    fn test_fetch_records_with_filters() {
        let db = sample_db();

        let result = db
            .fetch_records(
                "areaofinterest",
                Some(&["fid", "aoi", "not_a_column"]),
                &[
                    ("year", Filter::Eq(Value::Integer(2020))),
                    ("crop_type_code", Filter::In(vec![Value::Text("WW".into())])),
                    ("bogus", Filter::Eq(Value::Null)),
                ],
            )
            .unwrap();

        assert_eq!(result.columns, vec!["fid", "aoi"]);
        assert_eq!(result.rows, vec![vec![Value::Integer(1), Value::Text("FRIEN".into())]]);
    }

    #[test]
    fn test_fetch_records_range_and_missing_table() {
        let db = sample_db();

        let result = db
            .fetch_records(
                "areaofinterest",
                None,
                &[("year", Filter::Between(Value::Integer(2021), Value::Integer(2022)))],
            )
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.columns.len(), 5);

        assert!(db.fetch_records("nope", None, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_insert_rejects_existing_keys() {
        let db = sample_db();
        let rows = vec![
            record(&[("crop_type_code", Value::Text("WW".into())), ("crop_type", Value::Text("dup".into()))]),
            record(&[("crop_type_code", Value::Text("SM".into())), ("crop_type", Value::Text("silage maize".into()))]),
        ];

        let summary = db.insert("croplegend", &["crop_type_code"], &rows, false).unwrap();
        assert_eq!(summary, InsertSummary { inserted: 1, rejected: 1 });

        let kept = db.query("SELECT crop_type FROM croplegend WHERE crop_type_code = 'WW'").unwrap();
        assert_eq!(kept.rows[0][0], Value::Text("winter wheat".into()));
    }

    #[test]
    fn test_insert_upserts_on_update() {
        let db = sample_db();
        let rows = vec![record(&[
            ("crop_type_code", Value::Text("WW".into())),
            ("crop_type", Value::Text("wheat".into())),
        ])];

        let summary = db.insert("croplegend", &["crop_type_code"], &rows, true).unwrap();
        assert_eq!(summary.inserted, 1);

        let updated = db.query("SELECT crop_type FROM croplegend WHERE crop_type_code = 'WW'").unwrap();
        assert_eq!(updated.rows[0][0], Value::Text("wheat".into()));
    }

    #[test]
    fn test_insert_rolls_back_on_error() {
        let db = sample_db();
        let rows = vec![
            record(&[("crop_type_code", Value::Text("SM".into()))]),
            record(&[("no_such_column", Value::Integer(1))]),
        ];

        assert!(db.insert("croplegend", &["crop_type_code"], &rows, false).is_err());
        let count = db.query("SELECT COUNT(*) FROM croplegend").unwrap();
        assert_eq!(count.rows[0][0], Value::Integer(2));
    }

    #[test]
    fn test_query_result_json() {
        let db = sample_db();
        let result = db.query("SELECT fid, aoi FROM areaofinterest WHERE fid = 3").unwrap();
        assert_eq!(result.to_json(), serde_json::json!([{ "fid": 3, "aoi": "MRKN" }]));
    }

    #[test]
    fn test_open_existing_never_creates() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("typo.db");

        assert!(matches!(Database::open_existing(&missing), Err(Error::DatabaseNotFound(_))));
        assert!(!missing.exists());

        let path = dir.path().join("archive.db");
        Database::open(&path).unwrap().execute_sql("CREATE TABLE t (id INTEGER);").unwrap();
        let db = Database::open_existing(&path).unwrap();
        assert_eq!(db.table_names().unwrap(), vec!["t"]);
    }

    #[test]
    fn test_insert_defaults_to_declared_primary_key() {
        let db = sample_db();
        let rows = vec![
            record(&[("crop_type_code", Value::Text("WW".into())), ("crop_type", Value::Text("wheat".into()))]),
            record(&[("crop_type_code", Value::Text("SM".into())), ("crop_type", Value::Text("silage maize".into()))]),
        ];

        let summary = db.insert("croplegend", &[], &rows, false).unwrap();
        assert_eq!(summary, InsertSummary { inserted: 1, rejected: 1 });

        db.insert("croplegend", &[], &rows, true).unwrap();
        let updated = db.query("SELECT crop_type FROM croplegend WHERE crop_type_code = 'WW'").unwrap();
        assert_eq!(updated.rows[0][0], Value::Text("wheat".into()));
    }

    #[test]
    fn test_insert_without_any_key_fails() {
        let db = Database::open_in_memory().unwrap();
        db.execute_sql("CREATE TABLE log (msg TEXT); INSERT INTO log VALUES ('x');").unwrap();
        let rows = vec![record(&[("msg", Value::Text("x".into()))])];

        for update in [true, false] {
            assert!(matches!(
                db.insert("log", &[], &rows, update),
                Err(Error::MissingPrimaryKey(t)) if t == "log"
            ));
        }
        assert_eq!(db.row_count("log").unwrap(), 1);
    }
}
