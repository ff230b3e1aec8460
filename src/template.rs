//! SQL templates
//!
//! A template is a plain `.sql` file with named placeholders such as `:user_id`
//! or `{{aoi}}`. Rendering is literal text substitution; nothing is escaped or
//! bound as a parameter. Every rendered statement can be written to the audit
//! directory so the exact executed text is kept on disk.

use std::path::{Component, Path, PathBuf};

use crate::config::PathConfig;
use crate::{Error, Result};

/// Ordered placeholder -> value pairs. Substitution follows insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replacements {
    pairs: Vec<(String, String)>,
}

impl Replacements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite a placeholder. Empty placeholders are rejected.
    pub fn insert(&mut self, placeholder: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let placeholder = placeholder.into();
        if placeholder.is_empty() {
            return Err(Error::InvalidReplacement("placeholder must not be empty".to_string()));
        }
        let value = value.into();

        match self.pairs.iter_mut().find(|(key, _)| *key == placeholder) {
            Some((_, existing)) => *existing = value,
            None => self.pairs.push((placeholder, value)),
        }
        Ok(())
    }

    pub fn with(mut self, placeholder: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        self.insert(placeholder, value)?;
        Ok(self)
    }

    /// Parse a `placeholder=value` assignment as given on the command line.
    pub fn parse_assignment(assignment: &str) -> Result<(String, String)> {
        match assignment.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(Error::InvalidReplacement(format!(
                "expected PLACEHOLDER=VALUE, got '{}'",
                assignment
            ))),
        }
    }

    pub fn from_assignments<I, S>(assignments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut replacements = Self::new();
        for assignment in assignments {
            let (key, value) = Self::parse_assignment(assignment.as_ref())?;
            replacements.insert(key, value)?;
        }
        Ok(replacements)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Replace every occurrence of each placeholder with its literal value.
pub fn render(text: &str, replacements: &Replacements) -> String {
    let mut sql = text.to_string();
    for (placeholder, value) in replacements.iter() {
        sql = sql.replace(placeholder, value);
    }
    sql
}

/// Result of rendering a template
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RenderedSql {
    pub name: String,
    pub sql: String,
    /// Where the audit copy was written, if it was
    pub audit_path: Option<PathBuf>,
}

/// Template renderer bound to a SQL directory and an audit directory
#[derive(Debug, Clone)]
pub struct SqlTemplates {
    sql_dir: PathBuf,
    audit_dir: PathBuf,
}

impl SqlTemplates {
    pub fn new(sql_dir: impl Into<PathBuf>, audit_dir: impl Into<PathBuf>) -> Self {
        Self {
            sql_dir: sql_dir.into(),
            audit_dir: audit_dir.into(),
        }
    }

    pub fn from_paths(paths: &PathConfig) -> Self {
        Self::new(&paths.custom_sql_dir, &paths.executed_sql_dir)
    }

    pub fn sql_dir(&self) -> &Path {
        &self.sql_dir
    }

    pub fn audit_dir(&self) -> &Path {
        &self.audit_dir
    }

    /// Names of the `*.sql` files in the template directory, sorted
    pub fn available(&self) -> Result<Vec<String>> {
        if !self.sql_dir.is_dir() {
            return Ok(Vec::new());
        }

        let pattern = self.sql_dir.join("*.sql");
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern).map_err(|e| Error::Config(e.to_string()))?;

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().to_string()))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Read a template without rendering it.
    pub fn load(&self, name: &str) -> Result<String> {
        let path = self.sql_dir.join(relative_name(name)?);
        if !path.is_file() {
            return Err(Error::TemplateNotFound {
                name: name.to_string(),
                dir: self.sql_dir.clone(),
                available: self.available()?,
            });
        }

        tracing::debug!("Loading SQL template {}", path.display());
        Ok(std::fs::read_to_string(&path)?)
    }

    /// Load and render a template, optionally writing the result to the audit directory.
    pub fn create_sql(
        &self,
        name: &str,
        replacements: &Replacements,
        write_audit: bool,
    ) -> Result<RenderedSql> {
        let template = self.load(name)?;
        let sql = render(&template, replacements);

        let audit_path = if write_audit {
            Some(self.write_audit(name, &sql)?)
        } else {
            None
        };

        Ok(RenderedSql {
            name: name.to_string(),
            sql,
            audit_path,
        })
    }

    /// Write rendered SQL under the audit directory, mirroring the template's
    /// path relative to the SQL directory.
    pub fn write_audit(&self, name: &str, sql: &str) -> Result<PathBuf> {
        let relative = relative_name(name)?;
        let path = self.audit_dir.join(relative);
        crate::config::ensure_parent_dir(&path)?;
        std::fs::write(&path, sql)?;

        tracing::info!("Rendered SQL written to {}", path.display());
        Ok(path)
    }
}

/// Template names are paths below the SQL directory; no roots, no `..`.
fn relative_name(name: &str) -> Result<&Path> {
    let relative = Path::new(name);
    let nested_only = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !nested_only || relative.file_name().is_none() {
        return Err(Error::Config(format!(
            "template name '{name}' must be a relative path inside the SQL directory"
        )));
    }
    Ok(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn templates_with(name: &str, body: &str) -> (tempfile::TempDir, SqlTemplates) {
        let dir = tempfile::tempdir().unwrap();
        let sql_dir = dir.path().join("sql");
        std::fs::create_dir_all(&sql_dir).unwrap();
        std::fs::write(sql_dir.join(name), body).unwrap();
        let templates = SqlTemplates::new(sql_dir, dir.path().join("_sql_executed"));
        (dir, templates)
    }

    #[test]
    fn test_render_replaces_every_occurrence() {
        let replacements = Replacements::new().with(":aoi", "'FRIEN'").unwrap();
        let sql = render(
            "SELECT * FROM fields WHERE aoi = :aoi OR parent_aoi = :aoi;",
            &replacements,
        );
        assert_eq!(sql, "SELECT * FROM fields WHERE aoi = 'FRIEN' OR parent_aoi = 'FRIEN';");
    }

    #[test]
    fn test_render_leaves_unrelated_text() {
        let replacements = Replacements::new().with("{{year}}", "2024").unwrap();
        let text = "-- keep :aoi as is\nSELECT year FROM t WHERE year = {{year}}";
        assert_eq!(
            render(text, &replacements),
            "-- keep :aoi as is\nSELECT year FROM t WHERE year = 2024"
        );
    }

    #[test]
    fn test_render_without_replacements_is_identity() {
        let text = "SELECT * FROM users WHERE id = :user_id;";
        assert_eq!(render(text, &Replacements::new()), text);
    }

    #[test]
    fn test_insert_overwrites_and_keeps_order() {
        let mut replacements = Replacements::new();
        replacements.insert(":a", "1").unwrap();
        replacements.insert(":b", "2").unwrap();
        replacements.insert(":a", "3").unwrap();

        let pairs: Vec<_> = replacements.iter().collect();
        assert_eq!(pairs, vec![(":a", "3"), (":b", "2")]);
        assert!(replacements.insert("", "x").is_err());
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            Replacements::parse_assignment(":date=2024-01-01").unwrap(),
            (":date".to_string(), "2024-01-01".to_string())
        );
        // Only the first '=' splits
        assert_eq!(
            Replacements::parse_assignment(":cond=a=b").unwrap(),
            (":cond".to_string(), "a=b".to_string())
        );
        assert!(Replacements::parse_assignment("no_equals").is_err());
        assert!(Replacements::parse_assignment("=value").is_err());
    }

    #[test]
    fn test_create_sql_happy_path() {
        let (_dir, templates) =
            templates_with("_mock_query.sql", "SELECT * FROM users WHERE id = :user_id;");
        let replacements = Replacements::new().with(":user_id", "42").unwrap();

        let rendered = templates.create_sql("_mock_query.sql", &replacements, false).unwrap();
        assert_eq!(rendered.sql, "SELECT * FROM users WHERE id = 42;");
        assert!(rendered.audit_path.is_none());
    }

    #[test]
    fn test_audit_file_matches_rendered_sql() {
        let (dir, templates) =
            templates_with("yield.sql", "SELECT * FROM yieldinfo WHERE year = :year;\n");
        let replacements = Replacements::new().with(":year", "2021").unwrap();

        let rendered = templates.create_sql("yield.sql", &replacements, true).unwrap();
        let audit_path = rendered.audit_path.clone().unwrap();

        assert_eq!(audit_path, dir.path().join("_sql_executed").join("yield.sql"));
        assert_eq!(std::fs::read_to_string(audit_path).unwrap(), rendered.sql);
    }

    #[test]
    fn test_missing_template_lists_available() {
        let (_dir, templates) = templates_with("present.sql", "SELECT 1;");
        std::fs::write(templates.sql_dir().join("notes.txt"), "ignored").unwrap();

        match templates.create_sql("absent.sql", &Replacements::new(), true) {
            Err(Error::TemplateNotFound { name, available, .. }) => {
                assert_eq!(name, "absent.sql");
                assert_eq!(available, vec!["present.sql".to_string()]);
            }
            other => panic!("expected TemplateNotFound, got {:?}", other),
        }
        assert!(!templates.audit_dir().exists());
    }

    #[test]
    fn test_nested_templates_keep_separate_audit_files() {
        let (dir, templates) = templates_with("top.sql", "SELECT 0;");
        for (sub, body) in [("a", "SELECT 1;"), ("b", "SELECT 2;")] {
            std::fs::create_dir_all(templates.sql_dir().join(sub)).unwrap();
            std::fs::write(templates.sql_dir().join(sub).join("q.sql"), body).unwrap();
        }

        let first = templates.create_sql("a/q.sql", &Replacements::new(), true).unwrap();
        let second = templates.create_sql("b/q.sql", &Replacements::new(), true).unwrap();

        let audit = dir.path().join("_sql_executed");
        assert_eq!(first.audit_path, Some(audit.join("a").join("q.sql")));
        assert_eq!(second.audit_path, Some(audit.join("b").join("q.sql")));
        assert_eq!(std::fs::read_to_string(audit.join("a/q.sql")).unwrap(), first.sql);
        assert_eq!(std::fs::read_to_string(audit.join("b/q.sql")).unwrap(), second.sql);
    }

    #[test]
    fn test_template_names_cannot_escape_sql_dir() {
        let (_dir, templates) = templates_with("q.sql", "SELECT 1;");
        for name in ["../q.sql", "/etc/q.sql", "a/../../q.sql"] {
            assert!(matches!(
                templates.create_sql(name, &Replacements::new(), true),
                Err(Error::Config(_))
            ));
        }
        assert!(!templates.audit_dir().exists());
    }
}
