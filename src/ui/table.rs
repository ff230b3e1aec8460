use tabled::{builder::Builder, settings::Style, Table, Tabled};

use crate::storage::{value_to_string, QueryResult, TableInfo};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

/// Two-column metric/value table
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }

        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Tabled)]
struct TableInfoRow {
    #[tabled(rename = "Table")]
    name: String,
    #[tabled(rename = "Exists")]
    exists: String,
    #[tabled(rename = "Empty")]
    is_empty: String,
    #[tabled(rename = "Geometry")]
    has_geometry: String,
    #[tabled(rename = "Primary Keys")]
    primary_keys: String,
    #[tabled(rename = "Columns")]
    columns: usize,
}

fn flag(value: Option<bool>) -> String {
    match value {
        Some(true) => "yes".to_string(),
        Some(false) => "no".to_string(),
        None => "-".to_string(),
    }
}

pub fn table_info_table(infos: &[TableInfo]) -> String {
    if infos.is_empty() {
        return String::new();
    }

    let rows: Vec<TableInfoRow> = infos
        .iter()
        .map(|info| TableInfoRow {
            name: info.name.clone(),
            exists: flag(Some(info.exists)),
            is_empty: flag(info.is_empty),
            has_geometry: flag(info.has_geometry),
            primary_keys: info.primary_keys.join(", "),
            columns: info.columns.len(),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Render query rows with their column names as the header
pub fn query_table(result: &QueryResult) -> String {
    let mut builder = Builder::default();
    builder.push_record(result.columns.iter().cloned());
    for row in &result.rows {
        builder.push_record(row.iter().map(value_to_string));
    }
    builder.build().with(Style::rounded()).to_string()
}
