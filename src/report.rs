//! Schema reports
//!
//! Reads primary and foreign keys from the database and renders the table
//! relationships as a Graphviz digraph. Each table becomes a node labelled with
//! its name and `PK:` lines; each foreign-key column becomes an edge.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;

use crate::config::TableGroup;
use crate::storage::{Database, TableInfo};
use crate::Result;

/// Prefixes of SpatiaLite and bookkeeping tables left out of reports
pub const DEFAULT_EXCLUDED_PREFIXES: &[&str] =
    &["geometry", "idx", "virts", "views", "spatial", "report", "sql", "lost"];

pub const DEFAULT_NODE_COLOR: &str = "#D3D3D3";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relationship {
    pub source_table: String,
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableNode {
    pub name: String,
    pub primary_keys: Vec<String>,
}

/// Tables with their keys plus the foreign-key relationships between them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    pub tables: Vec<TableNode>,
    pub relationships: Vec<Relationship>,
}

pub fn is_excluded<S: AsRef<str>>(table: &str, excluded_prefixes: &[S]) -> bool {
    excluded_prefixes
        .iter()
        .any(|prefix| table.starts_with(prefix.as_ref()))
}

impl SchemaReport {
    /// Collect keys and relationships of every non-empty, non-excluded table.
    pub fn collect<S: AsRef<str>>(db: &Database, excluded_prefixes: &[S]) -> Result<Self> {
        let mut report = Self::default();

        for table in db.table_names()? {
            if is_excluded(&table, excluded_prefixes) {
                continue;
            }
            if db.table_is_empty(&table)? {
                tracing::debug!("Skipping empty table {}", table);
                continue;
            }

            report.tables.push(TableNode {
                name: table.clone(),
                primary_keys: db.primary_keys(&table)?,
            });

            for fk in db.foreign_keys(&table)? {
                // An implicit reference points at the parent's primary key
                let target_column = match fk.to {
                    Some(column) => column,
                    None => db.primary_keys(&fk.to_table)?.join(", "),
                };
                report.relationships.push(Relationship {
                    source_table: table.clone(),
                    source_column: fk.from,
                    target_table: fk.to_table,
                    target_column,
                });
            }
        }

        tracing::info!(
            "Collected {} tables and {} relationships",
            report.tables.len(),
            report.relationships.len()
        );
        Ok(report)
    }

    fn primary_keys_of(&self, table: &str) -> Option<&[String]> {
        self.tables
            .iter()
            .find(|t| t.name == table)
            .map(|t| t.primary_keys.as_slice())
    }

    /// Node order: grouped tables first (group order), then the rest sorted,
    /// then relationship endpoints that were not collected themselves.
    fn node_order(&self, colors: &GroupColors) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        let mut push = |name: &str| {
            if !order.iter().any(|n| n == name) {
                order.push(name.to_string());
            }
        };

        for group in &colors.groups {
            for table in &group.tables {
                if self.primary_keys_of(table).is_some() {
                    push(table);
                }
            }
        }
        let mut rest: Vec<&str> = self.tables.iter().map(|t| t.name.as_str()).collect();
        rest.sort_unstable();
        for table in rest {
            push(table);
        }
        for rel in &self.relationships {
            push(&rel.source_table);
            push(&rel.target_table);
        }
        order
    }

    /// Render the report as a Graphviz DOT digraph.
    pub fn to_dot(&self, colors: &GroupColors, options: &RenderOptions) -> String {
        let mut dot = String::new();
        let nodes = self.node_order(colors);

        let _ = writeln!(dot, "digraph schema {{");
        let _ = writeln!(dot, "    layout={};", options.layout.engine());
        let _ = writeln!(dot, "    size=\"{},{}\";", options.width, options.height);
        let _ = writeln!(dot, "    overlap=false;");
        let _ = writeln!(
            dot,
            "    node [shape=ellipse, style=filled, fontsize={}];",
            options.label_font_size
        );
        let _ = writeln!(dot, "    edge [fontsize={}];", options.pk_font_size);

        let node_line = |name: &str| {
            format!(
                "{} [label={}, fillcolor=\"{}\"];",
                quote_id(name),
                self.node_label(name, options),
                escape_dot(colors.color_of(name))
            )
        };

        if options.layout == Layout::Shell && !colors.groups.is_empty() {
            let mut clustered: Vec<&str> = Vec::new();
            for (i, group) in colors.groups.iter().enumerate() {
                let members: Vec<&String> =
                    group.tables.iter().filter(|t| nodes.contains(*t)).collect();
                if members.is_empty() {
                    continue;
                }
                let _ = writeln!(dot, "    subgraph cluster_{} {{", i);
                let _ = writeln!(dot, "        label={};", quote_id(&group.name));
                for table in members {
                    let _ = writeln!(dot, "        {}", node_line(table));
                    clustered.push(table.as_str());
                }
                let _ = writeln!(dot, "    }}");
            }
            for name in nodes.iter().filter(|n| !clustered.contains(&n.as_str())) {
                let _ = writeln!(dot, "    {}", node_line(name));
            }
        } else {
            for name in &nodes {
                let _ = writeln!(dot, "    {}", node_line(name));
            }
        }

        for rel in &self.relationships {
            let _ = writeln!(
                dot,
                "    {} -> {} [label={}];",
                quote_id(&rel.source_table),
                quote_id(&rel.target_table),
                quote_id(&format!("{} -> {}", rel.source_column, rel.target_column))
            );
        }

        let _ = writeln!(dot, "}}");
        dot
    }

    fn node_label(&self, name: &str, options: &RenderOptions) -> String {
        let mut label = format!("<<B>{}</B>", escape_html(name));
        if let Some(keys) = self.primary_keys_of(name).filter(|k| !k.is_empty()) {
            let lines: Vec<String> = keys
                .iter()
                .map(|k| format!("PK: {}", escape_html(k)))
                .collect();
            let _ = write!(
                label,
                "<BR/><FONT POINT-SIZE=\"{}\">{}</FONT>",
                options.pk_font_size,
                lines.join("<BR/>")
            );
        }
        label.push('>');
        label
    }
}

/// Table -> fill color mapping built from configured groups
#[derive(Debug, Clone, Default)]
pub struct GroupColors {
    groups: Vec<TableGroup>,
    colors: BTreeMap<String, String>,
}

impl GroupColors {
    pub fn new(groups: &[TableGroup]) -> Self {
        let mut colors = BTreeMap::new();
        for group in groups {
            for table in &group.tables {
                colors.insert(table.clone(), group.color.clone());
            }
        }
        Self {
            groups: groups.to_vec(),
            colors,
        }
    }

    pub fn color_of(&self, table: &str) -> &str {
        self.colors
            .get(table)
            .map(String::as_str)
            .unwrap_or(DEFAULT_NODE_COLOR)
    }
}

/// Graph arrangement, mapped onto a Graphviz layout engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// Concentric arrangement with groups kept together
    #[default]
    Shell,
    Circular,
    Spring,
    KamadaKawai,
    Dot,
}

impl Layout {
    /// Parse a layout name; unknown names fall back to a force-directed layout.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "shell" => Self::Shell,
            "circular" => Self::Circular,
            "spring" => Self::Spring,
            "kamada_kawai" | "kamada-kawai" => Self::KamadaKawai,
            "dot" | "hierarchical" => Self::Dot,
            other => {
                tracing::warn!("Unknown layout '{}', using spring", other);
                Self::Spring
            }
        }
    }

    pub fn engine(&self) -> &'static str {
        match self {
            Self::Shell => "twopi",
            Self::Circular => "circo",
            Self::Spring => "fdp",
            Self::KamadaKawai => "neato",
            Self::Dot => "dot",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub layout: Layout,
    pub label_font_size: u32,
    pub pk_font_size: u32,
    /// Drawing size in inches
    pub width: u32,
    pub height: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            layout: Layout::Shell,
            label_font_size: 14,
            pk_font_size: 10,
            width: 14,
            height: 14,
        }
    }
}

/// Per-table summary (existence, emptiness, geometry, keys, columns)
pub fn table_summary<S: AsRef<str>>(
    db: &Database,
    tables: &[String],
    excluded_prefixes: &[S],
) -> Result<Vec<TableInfo>> {
    let mut infos = Vec::new();
    for table in tables {
        if is_excluded(table, excluded_prefixes) {
            continue;
        }
        tracing::debug!("Processing table: {}", table);
        infos.push(db.table_info(table)?);
    }
    Ok(infos)
}

fn quote_id(text: &str) -> String {
    format!("\"{}\"", escape_dot(text))
}

fn escape_dot(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
