//! Custom schema scripts
//!
//! A project can ship a schema script that defines its tables. The script is
//! optional: when the configured file is absent dbflow carries on with the
//! database as it is.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::PathConfig;
use crate::storage::Database;
use crate::Result;

/// Something that can define tables against a live database
pub trait SchemaScript {
    /// Where the definition came from
    fn source(&self) -> &Path;

    /// Names of the tables the script defines
    fn tables(&self) -> Vec<String>;

    /// Create the tables; tables that already exist are left untouched
    fn apply(&self, db: &Database) -> Result<ApplySummary>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ApplySummary {
    pub created: Vec<String>,
    pub skipped: Vec<String>,
}

/// A schema script written as plain SQL (`CREATE TABLE ...; CREATE INDEX ...;`)
#[derive(Debug, Clone)]
pub struct SqlSchemaScript {
    path: PathBuf,
    sql: String,
}

impl SqlSchemaScript {
    pub fn from_file(path: &Path) -> Result<Self> {
        let sql = std::fs::read_to_string(path)?;
        Ok(Self::from_sql(path, sql))
    }

    pub fn from_sql(path: impl Into<PathBuf>, sql: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sql: sql.into(),
        }
    }

    /// The script with every CREATE made idempotent
    fn idempotent_sql(&self) -> String {
        create_regex()
            .replace_all(&self.sql, "CREATE ${temp}${kind} IF NOT EXISTS ")
            .into_owned()
    }
}

impl SchemaScript for SqlSchemaScript {
    fn source(&self) -> &Path {
        &self.path
    }

    fn tables(&self) -> Vec<String> {
        let stripped = comment_regex().replace_all(&self.sql, " ");
        let mut tables: Vec<String> = Vec::new();
        for caps in table_regex().captures_iter(&stripped) {
            let Some(raw) = caps.iter().skip(1).flatten().next() else {
                continue;
            };
            let name = raw.as_str().rsplit('.').next().unwrap_or(raw.as_str()).to_string();
            if !tables.contains(&name) {
                tables.push(name);
            }
        }
        tables
    }

    fn apply(&self, db: &Database) -> Result<ApplySummary> {
        let declared = self.tables();
        if declared.is_empty() {
            tracing::warn!("No tables found to create in {}", self.path.display());
        }

        let mut summary = ApplySummary::default();
        let mut existing_before = Vec::new();
        for table in &declared {
            if db.table_exists(table)? {
                tracing::info!("Table '{}' already exists.", table);
                existing_before.push(table.clone());
            }
        }

        // All or nothing: a failing statement leaves no partial schema behind
        let tx = db.connection().unchecked_transaction()?;
        tx.execute_batch(&self.idempotent_sql())?;
        tx.commit()?;

        for table in declared {
            if existing_before.contains(&table) {
                summary.skipped.push(table);
            } else if db.table_exists(&table)? {
                tracing::info!("Table '{}' created successfully.", table);
                summary.created.push(table);
            }
        }
        Ok(summary)
    }
}

/// Load the configured schema script if it exists.
///
/// A missing file is not an error; read failures are.
pub fn load_custom_schema(paths: &PathConfig) -> Result<Option<SqlSchemaScript>> {
    let path = &paths.custom_schema;
    if !path.is_file() {
        tracing::info!(
            "Custom schema script not found at {}. Using default behavior.",
            path.display()
        );
        return Ok(None);
    }

    let script = SqlSchemaScript::from_file(path)?;
    tracing::info!("Loaded custom schema script from {}", path.display());
    Ok(Some(script))
}

/// Apply a schema script when one is present; otherwise do nothing.
pub fn apply_optional(db: &Database, script: Option<&dyn SchemaScript>) -> Result<ApplySummary> {
    match script {
        Some(script) => script.apply(db),
        None => Ok(ApplySummary::default()),
    }
}

/// Ready a freshly opened connection: apply the configured schema script when
/// the file exists, otherwise leave the database as it is.
pub fn prepare_database(db: &Database, paths: &PathConfig) -> Result<ApplySummary> {
    let script = load_custom_schema(paths)?;
    if let Some(script) = &script {
        tracing::info!("Applying schema from {}", script.source().display());
    }
    apply_optional(db, script.as_ref().map(|s| s as &dyn SchemaScript))
}

fn create_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\bCREATE\s+(?P<temp>(?:TEMP|TEMPORARY)\s+)?(?P<kind>(?:UNIQUE\s+)?INDEX|(?:VIRTUAL\s+)?TABLE|VIEW|TRIGGER)\s+(?:IF\s+NOT\s+EXISTS\s+)?",
        )
        .expect("valid regex")
    })
}

fn table_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)\bCREATE\s+(?:(?:TEMP|TEMPORARY)\s+)?(?:VIRTUAL\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?(?:"([^"]+)"|`([^`]+)`|\[([^\]]+)\]|([A-Za-z_][\w$]*(?:\.[A-Za-z_][\w$]*)?))"#,
        )
        .expect("valid regex")
    })
}

fn comment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)--[^\n]*|/\*.*?\*/").expect("valid regex"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"
        -- Study area
        CREATE TABLE aoilegend (aoi TEXT PRIMARY KEY, label TEXT);
        CREATE TABLE IF NOT EXISTS "croplegend" (crop_type_code TEXT PRIMARY KEY);
        CREATE TABLE areaofinterest (
            fid INTEGER,
            year INTEGER,
            aoi TEXT REFERENCES aoilegend(aoi),
            PRIMARY KEY (fid, year)
        );
        CREATE INDEX idx_aoi_year ON areaofinterest(year);
        /* CREATE TABLE plantheight (id INTEGER); */
        -- CREATE TABLE phenobservations (fid TEXT);
    "#;

    #[test]
    fn test_tables_ignores_comments() {
        let script = SqlSchemaScript::from_sql("db_structure.sql", SCHEMA);
        assert_eq!(script.tables(), vec!["aoilegend", "croplegend", "areaofinterest"]);
    }

    #[test]
    fn test_apply_creates_then_skips() {
        let db = Database::open_in_memory().unwrap();
        let script = SqlSchemaScript::from_sql("db_structure.sql", SCHEMA);

        let first = script.apply(&db).unwrap();
        assert_eq!(first.created, vec!["aoilegend", "croplegend", "areaofinterest"]);
        assert!(first.skipped.is_empty());

        let second = script.apply(&db).unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.skipped.len(), 3);
    }

    #[test]
    fn test_apply_keeps_existing_table_data() {
        let db = Database::open_in_memory().unwrap();
        db.execute_sql("CREATE TABLE aoilegend (aoi TEXT PRIMARY KEY, label TEXT); INSERT INTO aoilegend VALUES ('MRKN', 'x');")
            .unwrap();

        let summary = SqlSchemaScript::from_sql("s.sql", SCHEMA).apply(&db).unwrap();
        assert_eq!(summary.skipped, vec!["aoilegend"]);
        assert_eq!(db.row_count("aoilegend").unwrap(), 1);
    }

    #[test]
    fn test_missing_script_is_soft() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathConfig::defaults(dir.path());

        assert!(load_custom_schema(&paths).unwrap().is_none());
        let db = Database::open_in_memory().unwrap();
        assert_eq!(apply_optional(&db, None).unwrap(), ApplySummary::default());
    }

    #[test]
    fn test_load_present_script() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathConfig::defaults(dir.path());
        std::fs::create_dir_all(paths.custom_schema.parent().unwrap()).unwrap();
        std::fs::write(&paths.custom_schema, SCHEMA).unwrap();

        let script = load_custom_schema(&paths).unwrap().unwrap();
        assert_eq!(script.source(), paths.custom_schema.as_path());

        let db = Database::open_in_memory().unwrap();
        let summary = apply_optional(&db, Some(&script)).unwrap();
        assert_eq!(summary.created.len(), 3);
    }

    #[test]
    fn test_prepare_database_applies_present_script() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathConfig::defaults(dir.path());
        std::fs::create_dir_all(paths.custom_schema.parent().unwrap()).unwrap();
        std::fs::write(&paths.custom_schema, SCHEMA).unwrap();

        let db = Database::open(&dir.path().join("fresh.db")).unwrap();
        let summary = prepare_database(&db, &paths).unwrap();
        assert_eq!(summary.created, vec!["aoilegend", "croplegend", "areaofinterest"]);

        let result = db.run("SELECT COUNT(*) FROM areaofinterest").unwrap().unwrap();
        assert_eq!(result.rows[0][0], rusqlite::types::Value::Integer(0));

        // Reopening the same file finds everything in place
        let reopened = Database::open(&dir.path().join("fresh.db")).unwrap();
        assert_eq!(prepare_database(&reopened, &paths).unwrap().skipped.len(), 3);
    }

    #[test]
    fn test_prepare_database_without_script_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathConfig::defaults(dir.path());
        let db = Database::open_in_memory().unwrap();

        assert_eq!(prepare_database(&db, &paths).unwrap(), ApplySummary::default());
        assert!(db.table_names().unwrap().is_empty());
    }

    #[test]
    fn test_broken_script_propagates_error() {
        let db = Database::open_in_memory().unwrap();
        let script = SqlSchemaScript::from_sql("bad.sql", "CREATE TABLE t (x INTEGER;");
        assert!(script.apply(&db).is_err());
    }

    #[test]
    fn test_failed_apply_leaves_nothing_behind() {
        let db = Database::open_in_memory().unwrap();
        let script = SqlSchemaScript::from_sql(
            "half.sql",
            "CREATE TABLE aoilegend (aoi TEXT PRIMARY KEY);\nCREATE TABLE croplegend (code TEXT;",
        );

        assert!(script.apply(&db).is_err());
        assert!(!db.table_exists("aoilegend").unwrap());
        assert!(db.table_names().unwrap().is_empty());
    }
}
