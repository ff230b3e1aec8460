//! dbflow CLI - SQL templating, auditing and schema reports for SQLite/SpatiaLite

use clap::{Parser, Subcommand};
use dbflow::config::{self, DbflowConfig, PathConfig};
use dbflow::diff;
use dbflow::report::{self, GroupColors, Layout, RenderOptions, SchemaReport};
use dbflow::schema::{self, ApplySummary};
use dbflow::ui::{self, Icons};
use dbflow::{Database, Replacements, SqlTemplates};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "dbflow")]
#[command(version)]
#[command(about = "Render SQL templates, run them against SQLite/SpatiaLite and report on schemas")]
#[command(long_about = r#"
dbflow renders parameterized SQL templates and runs them against a SQLite
(optionally SpatiaLite) database. Every rendered statement is written to the
audit directory so the executed SQL can be traced later.

Paths come from dbflow.toml, searched in the current directory and up to five
parent directories.

Example usage:
  dbflow init
  dbflow render yield.sql --set :year=2021
  dbflow run yield.sql --database archive.db --set :year=2021
  dbflow report --database archive.db --output schema.dot
  dbflow diff old.db new.db
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit machine-readable JSON instead of human output
    #[arg(long, global = true)]
    json: bool,

    /// Use this config file instead of searching for dbflow.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter dbflow.toml and create the template directory
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Show the resolved SQL, schema and audit locations
    Paths,

    /// List the SQL templates available in the custom SQL directory
    Templates,

    /// Render a template and print the SQL
    Render {
        /// Template file name inside the custom SQL directory
        template: String,

        /// Placeholder substitution, PLACEHOLDER=VALUE (repeatable)
        #[arg(short, long = "set", value_name = "PLACEHOLDER=VALUE")]
        set: Vec<String>,

        /// Do not write the rendered SQL to the audit directory
        #[arg(long)]
        no_audit: bool,
    },

    /// Render a template and execute it
    Run {
        template: String,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        #[arg(short, long = "set", value_name = "PLACEHOLDER=VALUE")]
        set: Vec<String>,

        #[arg(long)]
        no_audit: bool,
    },

    /// Execute SQL given on the command line
    Query {
        sql: String,

        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Create the tables defined in the custom schema script
    InitSchema {
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Summarize tables: emptiness, geometry, primary keys, columns
    Tables {
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Include SpatiaLite and bookkeeping tables
        #[arg(long)]
        all: bool,

        /// Also write the summary as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render the table relationship graph as Graphviz DOT
    Report {
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Write the DOT graph here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// shell, circular, spring, kamada_kawai or dot
        #[arg(short, long)]
        layout: Option<String>,

        /// Table name prefix to leave out (repeatable; replaces the defaults)
        #[arg(short, long)]
        exclude: Vec<String>,

        #[arg(long, default_value = "14")]
        label_font_size: u32,

        #[arg(long, default_value = "10")]
        pk_font_size: u32,
    },

    /// Compare the rows of every table in two database files
    Diff {
        first: PathBuf,
        second: PathBuf,

        /// Table name prefix to leave out (repeatable; replaces the defaults)
        #[arg(short, long)]
        exclude: Vec<String>,
    },

    /// Show version information
    Version,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    pub fn is_human(&self) -> bool {
        *self == Self::Human
    }
}

pub fn emit_success(
    output_mode: OutputMode,
    command: &str,
    data: serde_json::Value,
) -> anyhow::Result<()> {
    if output_mode == OutputMode::Json {
        let envelope = serde_json::json!({
            "ok": true,
            "command": command,
            "data": data,
        });
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    }
    Ok(())
}

/// Everything a command needs from configuration
struct Context {
    paths: PathConfig,
    config: DbflowConfig,
}

impl Context {
    fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let (paths, config) = match explicit {
            Some(path) => {
                let (paths, config) = PathConfig::from_file(path)?;
                (paths, Some(config))
            }
            None => PathConfig::resolve(&std::env::current_dir()?)?,
        };
        Ok(Self {
            paths,
            config: config.unwrap_or_default(),
        })
    }

    fn templates(&self) -> SqlTemplates {
        SqlTemplates::from_paths(&self.paths)
    }

    /// Open the database given on the command line, else the configured one,
    /// and apply the custom schema script if present.
    ///
    /// With `create` a missing file is created; otherwise it is an error.
    fn open_database(
        &self,
        cli_path: Option<PathBuf>,
        create: bool,
    ) -> anyhow::Result<(Database, ApplySummary)> {
        let Some(path) = cli_path.or_else(|| self.paths.database.clone()) else {
            anyhow::bail!("no database given (use --database or set [database] path in dbflow.toml)");
        };
        let db = if create {
            Database::open(&path)?
        } else {
            Database::open_existing(&path)?
        };
        self.load_extensions(&db)?;
        let summary = schema::prepare_database(&db, &self.paths)?;
        Ok((db, summary))
    }

    fn load_extensions(&self, db: &Database) -> anyhow::Result<()> {
        if let Some(library) = &self.config.database.spatialite {
            db.load_spatialite(library)?;
            tracing::debug!("SpatiaLite version {}", db.spatialite_version()?);
        }
        Ok(())
    }
}

/// Peek at the config before logging is set up, to pick the log level.
fn configured_log_level(explicit: Option<&Path>) -> Option<String> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => config::find_config(&std::env::current_dir().ok()?)?,
    };
    config::load_config(Some(&path)).ok()??.logging.level
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(configured_log_level(cli.config.as_deref()).unwrap_or_else(|| "info".into()))
        })
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let output_mode = if cli.json { OutputMode::Json } else { OutputMode::Human };

    if let Err(e) = run(cli, output_mode) {
        if output_mode.is_human() {
            ui::error(&format!("{:#}", e));
        } else {
            let envelope = serde_json::json!({ "ok": false, "error": format!("{:#}", e) });
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run(cli: Cli, output_mode: OutputMode) -> anyhow::Result<()> {
    match cli.command {
        Commands::Version => {
            if output_mode.is_human() {
                ui::header(&format!("dbflow {}", env!("CARGO_PKG_VERSION").bold()));
            } else {
                emit_success(output_mode, "version", serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }))?;
            }
        }

        Commands::Init { force } => {
            let path = cli.config.clone().unwrap_or_else(config::default_config_path);
            config::write_config(&path, &config::starter_config(), force)?;
            let (paths, _) = PathConfig::from_file(&path)?;
            std::fs::create_dir_all(&paths.custom_sql_dir)?;

            if output_mode.is_human() {
                ui::success(&format!("Wrote {}", path.display()));
                ui::path_row("SQL templates", Some(&paths.custom_sql_dir));
            } else {
                emit_success(output_mode, "init", serde_json::to_value(&paths)?)?;
            }
        }

        Commands::Paths => {
            let ctx = Context::load(cli.config.as_deref())?;
            if output_mode.is_human() {
                ui::section("Resolved paths");
                ui::path_row("Config", ctx.paths.config_file.as_deref());
                ui::path_row("SQL templates", Some(&ctx.paths.custom_sql_dir));
                ui::path_row("Schema script", Some(&ctx.paths.custom_schema));
                ui::path_row("Audit directory", Some(&ctx.paths.executed_sql_dir));
                ui::path_row("Database", ctx.paths.database.as_deref());
            } else {
                emit_success(output_mode, "paths", serde_json::to_value(&ctx.paths)?)?;
            }
        }

        Commands::Templates => {
            let ctx = Context::load(cli.config.as_deref())?;
            let templates = ctx.templates();
            let available = templates.available()?;

            if output_mode.is_human() {
                println!("{} {}", Icons::FOLDER, templates.sql_dir().display());
                if available.is_empty() {
                    ui::warn("No .sql templates found");
                }
                for name in &available {
                    println!("  {} {}", Icons::FILE, name);
                }
            } else {
                emit_success(output_mode, "templates", serde_json::json!(available))?;
            }
        }

        Commands::Render { template, set, no_audit } => {
            let ctx = Context::load(cli.config.as_deref())?;
            let replacements = Replacements::from_assignments(&set)?;
            let rendered = ctx.templates().create_sql(&template, &replacements, !no_audit)?;

            if output_mode.is_human() {
                println!("{}", rendered.sql);
                if let Some(path) = &rendered.audit_path {
                    eprintln!("{}", ui::dim(&format!("audit copy: {}", path.display())));
                }
            } else {
                emit_success(output_mode, "render", serde_json::to_value(&rendered)?)?;
            }
        }

        Commands::Run { template, database, set, no_audit } => {
            let ctx = Context::load(cli.config.as_deref())?;
            let replacements = Replacements::from_assignments(&set)?;
            let rendered = ctx.templates().create_sql(&template, &replacements, !no_audit)?;
            let (db, _) = ctx.open_database(database, true)?;

            tracing::info!("Executing {} against {}", rendered.name, db.location());
            let result = db.run(&rendered.sql)?;
            print_result(output_mode, "run", result)?;
        }

        Commands::Query { sql, database } => {
            let ctx = Context::load(cli.config.as_deref())?;
            let (db, _) = ctx.open_database(database, true)?;
            let result = db.run(&sql)?;
            print_result(output_mode, "query", result)?;
        }

        Commands::InitSchema { database } => {
            let ctx = Context::load(cli.config.as_deref())?;
            let (_db, summary) = ctx.open_database(database, true)?;

            if output_mode.is_human() {
                if !ctx.paths.custom_schema.is_file() {
                    ui::warn(&format!(
                        "No schema script at {}; nothing to create",
                        ctx.paths.custom_schema.display()
                    ));
                }
                for table in &summary.created {
                    ui::success(&format!("Created {}", table));
                }
                for table in &summary.skipped {
                    ui::summary_row("exists", table);
                }
            } else {
                emit_success(output_mode, "init-schema", serde_json::to_value(&summary)?)?;
            }
        }

        Commands::Tables { database, all, output } => {
            let ctx = Context::load(cli.config.as_deref())?;
            let (db, _) = ctx.open_database(database, false)?;
            let excluded: Vec<String> = if all {
                Vec::new()
            } else {
                excluded_prefixes(&ctx.config, &[], report::DEFAULT_EXCLUDED_PREFIXES)
            };
            let infos = report::table_summary(&db, &db.table_names()?, &excluded)?;

            if let Some(path) = &output {
                config::ensure_parent_dir(path)?;
                std::fs::write(path, serde_json::to_string_pretty(&infos)?)?;
                tracing::info!("Table information for DB saved to {}", path.display());
            }

            if output_mode.is_human() {
                println!("{} {}", Icons::DATABASE, db.location());
                println!("{}", ui::table_info_table(&infos));
            } else {
                emit_success(output_mode, "tables", serde_json::to_value(&infos)?)?;
            }
        }

        Commands::Report { database, output, layout, exclude, label_font_size, pk_font_size } => {
            let ctx = Context::load(cli.config.as_deref())?;
            let (db, _) = ctx.open_database(database, false)?;
            let excluded = excluded_prefixes(&ctx.config, &exclude, report::DEFAULT_EXCLUDED_PREFIXES);

            let spinner = Spinner::start(output_mode, "Collecting schema metadata");
            let report = SchemaReport::collect(&db, &excluded)?;
            spinner.finish();

            let layout = layout
                .or_else(|| ctx.config.report.layout.clone())
                .map(|name| Layout::parse(&name))
                .unwrap_or_default();
            let options = RenderOptions {
                layout,
                label_font_size,
                pk_font_size,
                ..RenderOptions::default()
            };
            let colors = GroupColors::new(&ctx.config.report.groups);
            let dot = report.to_dot(&colors, &options);

            match &output {
                Some(path) => {
                    config::ensure_parent_dir(path)?;
                    std::fs::write(path, &dot)?;
                }
                None if output_mode.is_human() => print!("{}", dot),
                None => {}
            }

            if output_mode.is_human() {
                if let Some(path) = &output {
                    ui::success(&format!("Relationship graph written to {}", path.display()));
                    for table in &report.tables {
                        println!(
                            "  {} {} {}",
                            Icons::KEY,
                            table.name,
                            table.primary_keys.join(", ").style(ui::theme().key.clone())
                        );
                    }
                    ui::summary_row("tables", &report.tables.len().to_string());
                    ui::summary_row("relationships", &report.relationships.len().to_string());
                    ui::summary_row("render with", &format!("dot -Tpng {} -o schema.png", path.display()));
                }
            } else {
                let mut data = serde_json::to_value(&report)?;
                data["dot"] = serde_json::Value::String(dot);
                emit_success(output_mode, "report", data)?;
            }
        }

        Commands::Diff { first, second, exclude } => {
            let ctx = Context::load(cli.config.as_deref())?;
            let first_db = Database::open_existing(&first)?;
            let second_db = Database::open_existing(&second)?;
            ctx.load_extensions(&first_db)?;
            ctx.load_extensions(&second_db)?;
            let excluded: Vec<String> = if exclude.is_empty() {
                diff::DEFAULT_DIFF_EXCLUDED_PREFIXES.iter().map(|p| p.to_string()).collect()
            } else {
                exclude
            };

            let spinner = Spinner::start(output_mode, "Comparing tables");
            let diffs = diff::compare_databases(&first_db, &second_db, &excluded)?;
            spinner.finish();

            if output_mode.is_human() {
                ui::section(&format!("{} {} vs {}", Icons::DIFF, first.display(), second.display()));
                for table_diff in &diffs {
                    ui::diff_line(table_diff);
                }
                let differing = diffs.iter().filter(|d| !d.is_equal()).count();
                let mut table = ui::TableBuilder::new();
                table.add_row("Tables compared", &diffs.len().to_string());
                table.add_row("Tables with differences", &differing.to_string());
                println!("{}", table.build());
            } else {
                emit_success(output_mode, "diff", serde_json::to_value(&diffs)?)?;
            }
        }
    }

    Ok(())
}

/// CLI prefixes win, then the config, then the built-in defaults.
fn excluded_prefixes(config: &DbflowConfig, cli: &[String], defaults: &[&str]) -> Vec<String> {
    if !cli.is_empty() {
        return cli.to_vec();
    }
    config
        .report
        .exclude_prefixes
        .clone()
        .unwrap_or_else(|| defaults.iter().map(|p| p.to_string()).collect())
}

fn print_result(
    output_mode: OutputMode,
    command: &str,
    result: Option<dbflow::QueryResult>,
) -> anyhow::Result<()> {
    match (output_mode, result) {
        (OutputMode::Human, Some(result)) => {
            println!("{}", ui::query_table(&result));
            ui::summary_row("rows", &result.len().to_string());
        }
        (OutputMode::Human, None) => ui::success("Statements executed"),
        (OutputMode::Json, Some(result)) => emit_success(output_mode, command, result.to_json())?,
        (OutputMode::Json, None) => emit_success(output_mode, command, serde_json::Value::Null)?,
    }
    Ok(())
}

/// Spinner that stays silent in JSON mode
struct Spinner(Option<ui::Spinner>);

impl Spinner {
    fn start(output_mode: OutputMode, message: &str) -> Self {
        Self(output_mode.is_human().then(|| ui::Spinner::new(message)))
    }

    fn finish(&self) {
        if let Some(spinner) = &self.0 {
            spinner.finish_and_clear();
        }
    }
}
