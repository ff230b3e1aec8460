//! Table diffs between two database files
//!
//! Rows are compared as multisets after aligning both tables on the union of
//! their columns. Differences are reported by primary-key values when the table has
//! a primary key, otherwise by row position.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::types::Value;
use serde::Serialize;

use crate::report::is_excluded;
use crate::storage::{value_to_string, Database, QueryResult};
use crate::Result;

/// SpatiaLite bookkeeping tables skipped when comparing databases
pub const DEFAULT_DIFF_EXCLUDED_PREFIXES: &[&str] = &["geometry", "idx", "virts", "views"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Equal,
    Different,
    MissingInFirst,
    MissingInSecond,
}

/// Identifies a differing row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowRef {
    /// Primary-key column -> value
    Key(Vec<(String, String)>),
    /// Position of the row in the table scan
    Index(usize),
}

impl std::fmt::Display for RowRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Key(pairs) => {
                let parts: Vec<String> = pairs.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "{}", parts.join(", "))
            }
            Self::Index(i) => write!(f, "row #{i}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDiff {
    pub table: String,
    pub status: TableStatus,
    pub only_in_first: Vec<RowRef>,
    pub only_in_second: Vec<RowRef>,
}

impl TableDiff {
    fn missing(table: &str, status: TableStatus) -> Self {
        Self {
            table: table.to_string(),
            status,
            only_in_first: Vec::new(),
            only_in_second: Vec::new(),
        }
    }

    pub fn is_equal(&self) -> bool {
        self.status == TableStatus::Equal
    }
}

impl std::fmt::Display for TableDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            TableStatus::Equal => write!(f, "No differences found in table {}.", self.table),
            TableStatus::MissingInFirst => {
                write!(f, "Table {} does not exist in the first database.", self.table)
            }
            TableStatus::MissingInSecond => {
                write!(f, "Table {} does not exist in the second database.", self.table)
            }
            TableStatus::Different => {
                write!(
                    f,
                    "Table {}: {} row(s) only in first, {} row(s) only in second",
                    self.table,
                    self.only_in_first.len(),
                    self.only_in_second.len()
                )?;
                for row in &self.only_in_first {
                    write!(f, "\n  < {row}")?;
                }
                for row in &self.only_in_second {
                    write!(f, "\n  > {row}")?;
                }
                Ok(())
            }
        }
    }
}

/// Compare every table present in either database, skipping excluded prefixes.
pub fn compare_databases<S: AsRef<str>>(
    first: &Database,
    second: &Database,
    excluded_prefixes: &[S],
) -> Result<Vec<TableDiff>> {
    let first_tables = first.table_names()?;
    let second_tables = second.table_names()?;

    let all: BTreeSet<&String> = first_tables.iter().chain(second_tables.iter()).collect();
    let mut diffs = Vec::new();

    for table in all {
        if is_excluded(table, excluded_prefixes) {
            continue;
        }
        let diff = match (first_tables.contains(table), second_tables.contains(table)) {
            (true, true) => compare_table(table, first, second)?,
            (false, _) => TableDiff::missing(table, TableStatus::MissingInFirst),
            (_, false) => TableDiff::missing(table, TableStatus::MissingInSecond),
        };
        tracing::info!("{}", diff);
        diffs.push(diff);
    }
    Ok(diffs)
}

/// Compare one table that exists in both databases.
pub fn compare_table(table: &str, first: &Database, second: &Database) -> Result<TableDiff> {
    let mut columns = first.column_names(table)?;
    for column in second.column_names(table)? {
        if !columns.contains(&column) {
            columns.push(column);
        }
    }

    let mut primary_keys = second.primary_keys(table)?;
    if primary_keys.is_empty() {
        primary_keys = first.primary_keys(table)?;
    }

    let rows_first = align(&first.fetch_records(table, None, &[])?, &columns);
    let rows_second = align(&second.fetch_records(table, None, &[])?, &columns);

    let only_in_first = difference(&rows_first, &rows_second, &columns, &primary_keys);
    let only_in_second = difference(&rows_second, &rows_first, &columns, &primary_keys);

    let status = if only_in_first.is_empty() && only_in_second.is_empty() {
        TableStatus::Equal
    } else {
        TableStatus::Different
    };

    Ok(TableDiff {
        table: table.to_string(),
        status,
        only_in_first,
        only_in_second,
    })
}

/// Reorder each row onto `columns`; columns the result lacks become NULL.
fn align(result: &QueryResult, columns: &[String]) -> Vec<Vec<Value>> {
    let positions: Vec<Option<usize>> = columns.iter().map(|c| result.column_index(c)).collect();
    result
        .rows
        .iter()
        .map(|row| {
            positions
                .iter()
                .map(|pos| pos.and_then(|i| row.get(i).cloned()).unwrap_or(Value::Null))
                .collect()
        })
        .collect()
}

fn row_key(row: &[Value]) -> String {
    format!("{:?}", row)
}

/// Rows of `left` not matched by a row of `right`.
///
/// Rows are counted, so a row present twice on the left and once on the right
/// reports its second copy.
fn difference(
    left: &[Vec<Value>],
    right: &[Vec<Value>],
    columns: &[String],
    primary_keys: &[String],
) -> Vec<RowRef> {
    let mut remaining: BTreeMap<String, usize> = BTreeMap::new();
    for row in right {
        *remaining.entry(row_key(row)).or_default() += 1;
    }

    let mut refs = Vec::new();
    for (index, row) in left.iter().enumerate() {
        if let Some(count) = remaining.get_mut(&row_key(row)) {
            if *count > 0 {
                *count -= 1;
                continue;
            }
        }

        let row_ref = if primary_keys.is_empty() {
            RowRef::Index(index)
        } else {
            RowRef::Key(
                primary_keys
                    .iter()
                    .filter_map(|pk| {
                        let i = columns.iter().position(|c| c == pk)?;
                        Some((pk.clone(), value_to_string(&row[i])))
                    })
                    .collect(),
            )
        };
        refs.push(row_ref);
    }
    refs
}
