use std::path::Path;

use crate::diff::{TableDiff, TableStatus};
use crate::ui::{theme, Icons};
use owo_colors::OwoColorize;

/// Width of the label column in `summary_row` and `path_row`
const LABEL_WIDTH: usize = 16;

pub fn header(text: &str) {
    println!("{} {}", Icons::ROCKET, text.style(theme().header.clone()));
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, label.style(theme().success.clone()));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, label.style(theme().error.clone()));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, label.style(theme().warn.clone()));
}

/// Title underlined to its own width
pub fn section(title: &str) {
    println!();
    println!("{}", title.style(theme().header.clone()));
    println!("{}", "─".repeat(title.chars().count()).style(theme().dim.clone()));
}

pub fn dim(text: &str) -> String {
    text.style(theme().dim.clone()).to_string()
}

pub fn summary_row(label: &str, value: &str) {
    println!("  {:<LABEL_WIDTH$} {}", label.style(theme().dim.clone()), value);
}

/// A resolved location, flagged when nothing exists there yet.
pub fn path_row(label: &str, path: Option<&Path>) {
    let icon = match path {
        Some(p) if p.is_dir() => Icons::FOLDER,
        _ => Icons::FILE,
    };
    let value = match path {
        Some(p) if p.exists() => p.display().to_string(),
        Some(p) => format!("{} {}", p.display(), dim("(missing)")),
        None => dim("(none)"),
    };
    println!("{} {:<LABEL_WIDTH$} {}", icon, label.style(theme().dim.clone()), value);
}

/// One line per compared table; differing tables go to stderr as warnings.
pub fn diff_line(diff: &TableDiff) {
    match diff.status {
        TableStatus::Equal => success(&diff.to_string()),
        _ => warn(&diff.to_string()),
    }
}
