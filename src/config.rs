use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "dbflow.toml";

/// How many directories (start included) are searched for a config file.
const CONFIG_SEARCH_DEPTH: usize = 6;

pub const DEFAULT_SQL_DIR: &str = "custom_template/sql";
pub const DEFAULT_SCHEMA_FILE: &str = "custom_template/db_structure.sql";
pub const DEFAULT_EXECUTED_SQL_DIR: &str = "_sql_executed";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DbflowConfig {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub report: ReportSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathsSection {
    pub custom_sql_dir: Option<String>,
    pub custom_schema: Option<String>,
    pub executed_sql_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseSection {
    pub path: Option<String>,
    /// SpatiaLite extension library, e.g. `mod_spatialite`
    pub spatialite: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingSection {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReportSection {
    pub exclude_prefixes: Option<Vec<String>>,
    pub layout: Option<String>,
    #[serde(default)]
    pub groups: Vec<TableGroup>,
}

/// A named set of tables drawn with the same fill color in schema reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableGroup {
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub tables: Vec<String>,
}

/// Resolved, absolute locations used by the template renderer and schema loader.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathConfig {
    pub custom_sql_dir: PathBuf,
    pub custom_schema: PathBuf,
    pub executed_sql_dir: PathBuf,
    /// Default database file from `[database] path`
    pub database: Option<PathBuf>,
    /// The config file the paths came from, if one was found
    pub config_file: Option<PathBuf>,
}

impl PathConfig {
    /// Discover `dbflow.toml` from `start` upwards and resolve paths against it.
    ///
    /// Falls back to the default layout under `start` when no config exists.
    pub fn resolve(start: &Path) -> anyhow::Result<(Self, Option<DbflowConfig>)> {
        match find_config(start) {
            Some(config_path) => {
                tracing::info!("Found {} at: {}", CONFIG_FILE_NAME, config_path.display());
                let config = load_config(Some(&config_path))?.unwrap_or_default();
                let config_dir = config_path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| start.to_path_buf());
                let mut paths = Self::from_config(&config_dir, &config);
                paths.config_file = Some(config_path);
                Ok((paths, Some(config)))
            }
            None => {
                tracing::warn!("Config file not found. Using default paths.");
                Ok((Self::defaults(start), None))
            }
        }
    }

    /// Resolve paths from an explicitly named config file.
    pub fn from_file(config_path: &Path) -> anyhow::Result<(Self, DbflowConfig)> {
        let Some(config) = load_config(Some(config_path))? else {
            anyhow::bail!("config file not found: {}", config_path.display());
        };
        let config_path = absolutize(config_path);
        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let mut paths = Self::from_config(&config_dir, &config);
        paths.config_file = Some(config_path);
        Ok((paths, config))
    }

    /// Resolve every configured path relative to `config_dir`; unset keys use the defaults.
    pub fn from_config(config_dir: &Path, config: &DbflowConfig) -> Self {
        let pick = |value: &Option<String>, default: &str| {
            absolutize(&config_dir.join(value.as_deref().unwrap_or(default)))
        };

        Self {
            custom_sql_dir: pick(&config.paths.custom_sql_dir, DEFAULT_SQL_DIR),
            custom_schema: pick(&config.paths.custom_schema, DEFAULT_SCHEMA_FILE),
            executed_sql_dir: pick(&config.paths.executed_sql_dir, DEFAULT_EXECUTED_SQL_DIR),
            database: config.database.path.as_ref().map(|p| absolutize(&config_dir.join(p))),
            config_file: None,
        }
    }

    pub fn defaults(base: &Path) -> Self {
        Self::from_config(base, &DbflowConfig::default())
    }
}

/// Look for the config file in `start` and its parents.
pub fn find_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .take(CONFIG_SEARCH_DEPTH)
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from(CONFIG_FILE_NAME)
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<DbflowConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: DbflowConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &DbflowConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

/// Starter config written by `dbflow init`.
pub fn starter_config() -> DbflowConfig {
    DbflowConfig {
        paths: PathsSection {
            custom_sql_dir: Some(DEFAULT_SQL_DIR.to_string()),
            custom_schema: Some(DEFAULT_SCHEMA_FILE.to_string()),
            executed_sql_dir: Some(DEFAULT_EXECUTED_SQL_DIR.to_string()),
        },
        database: DatabaseSection {
            path: Some("dbflow.db".to_string()),
            spatialite: None,
        },
        logging: LoggingSection {
            level: Some("info".to_string()),
        },
        report: ReportSection::default(),
    }
}

pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Make a path absolute and drop `.`/`..` components without touching the filesystem.
fn absolutize(path: &Path) -> PathBuf {
    use std::path::Component;

    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
