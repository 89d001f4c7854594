//! Stormfeed Ingest - storm report ingestion service

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use stormfeed_common::logging::{init_logging, LogConfig, LogLevel};
use stormfeed_common::SourceType;
use stormfeed_ingest::fetcher::source_url;
use stormfeed_ingest::{IngestConfig, IngestOrchestrator};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "stormfeed-ingest")]
#[command(author, version, about = "Storm report ingestion service")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Environment file to load instead of ./.env
    #[arg(long, global = true, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an ingest cycle now and then on the configured schedule
    Run,

    /// Run a single ingest cycle and exit
    Once,

    /// Print the upstream URL for a source type
    Url {
        /// Source type (torn, hail, wind)
        source: SourceType,

        /// Report date, YYYY-MM-DD (defaults to today, UTC)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Before logging is configured, so LOG_* values from the file apply
    load_env_file(cli.env_file.as_deref())?;

    let _guard = init_logging(&log_config(cli.verbose))?;

    let config = IngestConfig::from_env()?;

    match cli.command {
        Command::Run => run(config).await,
        Command::Once => once(config).await,
        Command::Url { source, date } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            println!("{}", source_url(&config.source.base_url, source, date));
            Ok(())
        },
    }
}

/// Load `path`, or `./.env` when present
fn load_env_file(path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => dotenvy::from_path(path)
            .with_context(|| format!("Failed to load environment file {}", path.display())),
        None => {
            dotenvy::dotenv().ok();
            Ok(())
        },
    }
}

fn log_config(verbose: bool) -> LogConfig {
    let log_level = if verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("stormfeed-ingest")
        .build();

    // Environment variables take precedence
    log_config.clone().merge_env().unwrap_or(log_config)
}

async fn run(config: IngestConfig) -> Result<()> {
    let orchestrator = IngestOrchestrator::from_config(&config)?;
    let shutdown = CancellationToken::new();
    let mut handle = orchestrator.start(shutdown.clone());

    tokio::select! {
        _ = shutdown_signal() => {},
        result = &mut handle => {
            if let Err(e) = result {
                error!("Scheduler task ended unexpectedly: {}", e);
            }
            return Ok(());
        },
    }

    shutdown.cancel();
    let grace = config.shutdown_timeout();
    info!(timeout_secs = grace.as_secs(), "Waiting for in-flight cycle to finish");

    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(())) => info!("Shut down gracefully"),
        Ok(Err(e)) => error!("Scheduler task failed during shutdown: {}", e),
        Err(_) => warn!("Shutdown timeout elapsed, exiting with cycle still running"),
    }

    Ok(())
}

async fn once(config: IngestConfig) -> Result<()> {
    let orchestrator = IngestOrchestrator::from_config(&config)?;
    let summary = orchestrator.run_cycle().await;

    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.has_failures() {
        anyhow::bail!("{} of {} sources failed", summary.failed, summary.reports.len());
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use stormfeed_common::logging::LogFormat;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_env_file_values_reach_log_config() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ingest.env");
        std::fs::write(
            &path,
            "LOG_FORMAT=json\nLOG_FILE_PREFIX=stormfeed-ingest-from-file\n",
        )
        .unwrap();

        load_env_file(Some(&path)).unwrap();
        let config = log_config(true);

        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.log_file_prefix, "stormfeed-ingest-from-file");
    }

    #[test]
    fn test_missing_env_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = load_env_file(Some(&tmp.path().join("absent.env"))).unwrap_err();
        assert!(err.to_string().contains("absent.env"));
    }
}
