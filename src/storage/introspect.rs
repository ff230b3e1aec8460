//! Schema introspection through `sqlite_master` and the table-valued pragmas

use serde::Serialize;

use super::sqlite::Database;
use super::value::quote_ident;
use crate::{Error, Result};

/// One foreign-key column mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub table: String,
    pub from: String,
    pub to_table: String,
    /// Referenced column; `None` when the key targets the parent's primary key implicitly
    pub to: Option<String>,
}

/// Summary of a single table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub exists: bool,
    pub is_empty: Option<bool>,
    pub has_geometry: Option<bool>,
    pub primary_keys: Vec<String>,
    pub columns: Vec<String>,
}

impl TableInfo {
    pub fn missing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            exists: false,
            is_empty: None,
            has_geometry: None,
            primary_keys: Vec::new(),
            columns: Vec::new(),
        }
    }
}

impl Database {
    /// All user tables, sorted by name
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [table],
            |row| row.get(0),
        )?;
        if !exists {
            tracing::debug!("Table {} does not exist in the database {}.", table, self.location());
        }
        Ok(exists)
    }

    /// Whether the table has no rows. Errors if the table does not exist.
    pub fn table_is_empty(&self, table: &str) -> Result<bool> {
        if !self.table_exists(table)? {
            return Err(Error::TableNotFound(table.to_string()));
        }
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {} LIMIT 1)", quote_ident(table));
        let has_rows: bool = self.conn.query_row(&sql, [], |row| row.get(0))?;
        if !has_rows {
            tracing::debug!("Table {} is empty!", table);
        }
        Ok(!has_rows)
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Column names in declaration order. Errors if the table does not exist.
    pub fn column_names(&self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
        let columns = stmt
            .query_map([table], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        if columns.is_empty() {
            return Err(Error::TableNotFound(table.to_string()));
        }
        Ok(columns)
    }

    /// Primary-key columns ordered by their position in the key
    pub fn primary_keys(&self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk")?;
        let keys = stmt
            .query_map([table], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }

    pub fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKey>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT "table", "from", "to" FROM pragma_foreign_key_list(?1) ORDER BY id, seq"#,
        )?;
        let keys = stmt
            .query_map([table], |row| {
                Ok(ForeignKey {
                    table: table.to_string(),
                    to_table: row.get(0)?,
                    from: row.get(1)?,
                    to: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    /// Geometry columns registered in SpatiaLite metadata; empty without SpatiaLite
    pub fn geometry_columns(&self, table: &str) -> Result<Vec<String>> {
        if !self.table_exists("geometry_columns")? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "SELECT f_geometry_column FROM geometry_columns WHERE lower(f_table_name) = lower(?1)",
        )?;
        let cols = stmt
            .query_map([table], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(cols)
    }

    pub fn table_info(&self, table: &str) -> Result<TableInfo> {
        if !self.table_exists(table)? {
            tracing::warn!("Table {} does not exist in {}.", table, self.location());
            return Ok(TableInfo::missing(table));
        }

        Ok(TableInfo {
            name: table.to_string(),
            exists: true,
            is_empty: Some(self.table_is_empty(table)?),
            has_geometry: Some(!self.geometry_columns(table)?.is_empty()),
            primary_keys: self.primary_keys(table)?,
            columns: self.column_names(table)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.execute_sql(
            r#"
            CREATE TABLE aoilegend (aoi TEXT PRIMARY KEY, label TEXT);
            CREATE TABLE croplegend (crop_type_code TEXT PRIMARY KEY);
            CREATE TABLE areaofinterest (
                fid INTEGER,
                year INTEGER,
                aoi TEXT,
                crop_type_code TEXT,
                PRIMARY KEY (year, fid),
                FOREIGN KEY (aoi) REFERENCES aoilegend(aoi),
                FOREIGN KEY (crop_type_code) REFERENCES croplegend
            );
            INSERT INTO aoilegend VALUES ('FRIEN', 'Frienstedt');
            "#,
        )
        .unwrap();
        db
    }

    #[test]
    fn test_table_names_sorted() {
        let db = sample_db();
        assert_eq!(db.table_names().unwrap(), vec!["aoilegend", "areaofinterest", "croplegend"]);
    }

    #[test]
    fn test_primary_keys_in_key_order() {
        let db = sample_db();
        assert_eq!(db.primary_keys("areaofinterest").unwrap(), vec!["year", "fid"]);
        assert_eq!(db.primary_keys("aoilegend").unwrap(), vec!["aoi"]);
    }

    #[test]
    fn test_foreign_keys() {
        let db = sample_db();
        let fks = db.foreign_keys("areaofinterest").unwrap();

        assert_eq!(fks.len(), 2);
        assert!(fks.contains(&ForeignKey {
            table: "areaofinterest".into(),
            from: "aoi".into(),
            to_table: "aoilegend".into(),
            to: Some("aoi".into()),
        }));
        let implicit = fks.iter().find(|fk| fk.to_table == "croplegend").unwrap();
        assert_eq!(implicit.to, None);
    }

    #[test]
    fn test_empty_and_missing_tables() {
        let db = sample_db();
        assert!(!db.table_is_empty("aoilegend").unwrap());
        assert!(db.table_is_empty("croplegend").unwrap());
        assert!(matches!(db.table_is_empty("nope"), Err(Error::TableNotFound(_))));
        assert!(matches!(db.column_names("nope"), Err(Error::TableNotFound(_))));
    }

    #[test]
    fn test_table_info() {
        let db = sample_db();

        let info = db.table_info("areaofinterest").unwrap();
        assert!(info.exists);
        assert_eq!(info.is_empty, Some(true));
        assert_eq!(info.has_geometry, Some(false));
        assert_eq!(info.columns, vec!["fid", "year", "aoi", "crop_type_code"]);

        assert_eq!(db.table_info("nope").unwrap(), TableInfo::missing("nope"));
    }

    #[test]
    fn test_geometry_columns_from_metadata() {
        let db = sample_db();
        assert!(db.geometry_columns("areaofinterest").unwrap().is_empty());

        // Stand-in for SpatiaLite's metadata table
        db.execute_sql(
            "CREATE TABLE geometry_columns (f_table_name TEXT, f_geometry_column TEXT);
             INSERT INTO geometry_columns VALUES ('areaofinterest', 'field_geom');",
        )
        .unwrap();
        assert_eq!(db.geometry_columns("AreaOfInterest").unwrap(), vec!["field_geom"]);
    }
}
