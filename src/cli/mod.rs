//! Command-line runner for test-case files, for CI pipelines.
//!
//! `restcase run cases.json --config harness.toml` exits non-zero when any
//! case fails.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{DbSection, HarnessConfig};
use crate::testing::{Harness, RunReport, load_cases};

#[derive(Debug, Parser)]
#[command(name = "restcase")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every test case in a JSON file
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Test case file (one case object or an array of them)
    pub cases: PathBuf,

    /// Harness configuration file (TOML)
    #[arg(long, env = "RESTCASE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Base URL prefixed to every case url
    #[arg(long, env = "RESTCASE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Directory the API under test writes uploads to
    #[arg(long, env = "RESTCASE_UPLOAD_DIR")]
    pub upload_dir: Option<PathBuf>,

    /// Directory for upload-mismatch diagnostics
    #[arg(long, env = "RESTCASE_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "RESTCASE_DB_HOST")]
    pub db_host: Option<String>,

    /// Database name; the SQLite file path
    #[arg(long, env = "RESTCASE_DB_NAME")]
    pub db_name: Option<String>,

    #[arg(long, env = "RESTCASE_DB_USER")]
    pub db_user: Option<String>,

    #[arg(long, env = "RESTCASE_DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Also write a JSON report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Output format for run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl RunArgs {
    /// Configuration file values with command-line overrides applied.
    pub fn harness_config(&self) -> Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::from_toml_file(path)?,
            None => HarnessConfig::default(),
        };

        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(dir) = &self.upload_dir {
            config.upload_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = Some(dir.clone());
        }

        let overrides = [&self.db_host, &self.db_name, &self.db_user, &self.db_password];
        if overrides.iter().any(|value| value.is_some()) {
            let db = config.db.get_or_insert_with(DbSection::default);
            merge(&mut db.host, &self.db_host);
            merge(&mut db.name, &self.db_name);
            merge(&mut db.user, &self.db_user);
            merge(&mut db.password, &self.db_password);
        }
        Ok(config)
    }
}

fn merge(slot: &mut Option<String>, value: &Option<String>) {
    if let Some(value) = value {
        *slot = Some(value.clone());
    }
}

/// Runs the parsed command. `Ok(false)` means some case failed.
pub async fn execute(cli: Cli) -> Result<bool> {
    match cli.command {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> Result<bool> {
    let config = args.harness_config()?;
    let cases = load_cases(&args.cases)?;
    tracing::info!(file = %args.cases.display(), cases = cases.len(), "loaded test cases");

    let harness = Harness::new(config)?;
    let report = harness.test(cases).await;

    print!("{}", render(&report, args.format)?);
    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report.record())?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
    }
    Ok(report.is_success())
}

pub fn render(report: &RunReport, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Text => report.render_text(),
        OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(&report.record())?),
    })
}
