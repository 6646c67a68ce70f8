//! Ferrysh
//!
//! Interactive file-management shell with remote sessions and file
//! transfer.

use std::path::PathBuf;

use clap::Parser;
use shell::config::Config;
use shell::shell::Shell;

/// Ferrysh - interactive file-management shell with remote sessions.
#[derive(Parser, Debug)]
#[command(name = "ferrysh")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    // The console belongs to the interactive session, so logs go to a
    // file under the data directory instead of stdout.
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.shell.log_level.clone()
    };
    let log_dir = config.shell.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let appender = tracing_appender::rolling::daily(&log_dir, "ferrysh.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    tracing::info!("ferrysh starting");

    let mut shell = Shell::new(config)?;
    shell.run().await?;

    tracing::info!("ferrysh exiting");
    Ok(())
}
