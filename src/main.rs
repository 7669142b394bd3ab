mod app;
mod azdo;
mod config;
mod error;
mod prs_section;
mod section;
mod task;
mod tui;

use anyhow::{Context, Result};
use clap::Parser;
use config::{ConfigProvider, JsonConfigProvider};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Live dashboard of Azure DevOps pull requests
#[derive(Parser, Debug)]
#[command(name = "azdash", version = env!("AZDASH_VERSION_STRING"), about)]
struct Cli {
    /// Path to the config file (defaults to $AZDASH_CONFIG or ~/.config/azdash/config.json)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// File to write logs to; the terminal is owned by the dashboard
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;
    let filter = EnvFilter::try_from_env("AZDASH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match config::resolve_config_path(cli.config) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    let provider = JsonConfigProvider::new(config_path, config::validate);
    let cfg = match provider.load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!("Edit {} to configure azdash.", provider.path().display());
            std::process::exit(1);
        }
    };

    let log_path = match cli.log_file {
        Some(path) => path,
        None => config::config_dir()?.join("azdash.log"),
    };
    init_logging(&log_path)?;
    info!(config = %provider.path().display(), org = %cfg.org_name, "azdash starting");

    let source = Arc::new(azdo::AzureDevOpsSource::new(&cfg));
    tui::run(cfg, source)?;

    Ok(())
}
