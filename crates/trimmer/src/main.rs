//! memndisk-trimmer
//!
//! Scans every started Cloud Foundry app, shrinks the memory and disk of
//! web processes that have stayed well below their allocation, and
//! restarts them with the new sizing. One scan per invocation.

mod config;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::process;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use trimmer_lib::{platform, RunMetrics, Scanner, StdoutSink, StructuredLogger, TrimError};

const TRIMMER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit code for invalid or missing configuration
const EXIT_CONFIG: i32 = 8;
/// Exit code for login or inventory failures
const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

/// Right-size over-provisioned Cloud Foundry apps
#[derive(Parser)]
#[command(name = "memndisk-trimmer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Decide and report without resizing or restarting anything
    #[arg(long)]
    dry_run: bool,

    /// Log output format
    #[arg(long, value_enum, env = "LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!(version = TRIMMER_VERSION, "Starting memndisk-trimmer");

    let mut settings = match config::load() {
        Ok(settings) => settings,
        Err(TrimError::Configuration(problems)) => {
            for problem in &problems {
                error!(problem = %problem, "Invalid configuration");
            }
            process::exit(EXIT_CONFIG);
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            process::exit(EXIT_CONFIG);
        }
    };
    settings.run.dry_run |= cli.dry_run;

    let logger = StructuredLogger::new(settings.run.dry_run);
    logger.log_run_config(
        &settings.api.api_address,
        &settings.api.client_id,
        &settings.run,
    );

    let (client, refresher) = match platform::connect(&settings.api).await {
        Ok(connected) => connected,
        Err(e) => {
            error!(api = %settings.api.api_address, error = %e, "Failed to log in to the platform");
            process::exit(EXIT_FAILURE);
        }
    };

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let refresher_handle = tokio::spawn(refresher.run(shutdown_rx));

    let scanner = Scanner::new(Arc::new(client), settings.run.clone());
    let result = scanner.run(&mut StdoutSink).await;

    let _ = shutdown_tx.send(());
    let _ = refresher_handle.await;

    if let Some(path) = &settings.metrics_textfile {
        if let Err(e) = RunMetrics::new().write_textfile(path) {
            warn!(path = ?path, error = %e, "Failed to write metrics textfile");
        }
    }

    match result {
        Ok(report) => {
            info!(
                units_evaluated = report.totals.units_evaluated,
                restarts = report.totals.restarts,
                "Shutting down"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Scan aborted");
            process::exit(EXIT_FAILURE);
        }
    }
}
