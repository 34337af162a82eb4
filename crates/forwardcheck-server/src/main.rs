//! forwardcheck - Email forwarding checker entry point

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use forwardcheck_common::config::{Config, LoggingConfig};
use forwardcheck_common::DeletionPolicy;
use forwardcheck_core::{build_reporter, JobSpec, VerificationEngine, VerificationScheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Verify that mail sent to forwarding addresses arrives in a mailbox
#[derive(Parser, Debug)]
#[command(name = "forwardcheck", version, about)]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config-file", default_value = "config.toml")]
    config_file: PathBuf,

    /// Keep running and verify on the configured interval
    #[arg(short, long)]
    daemon: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config_file)
        .with_context(|| format!("Failed to load {}", cli.config_file.display()))?;
    config.validate()?;

    init_logging(&config.logging, cli.verbose);

    info!(
        "Starting forwardcheck (addresses: {}, timeout: {}s, poll interval: {}s)",
        config.check.emails.len(),
        config.check.timeout_secs,
        config.check.poll_interval_secs
    );

    match config.check.cleanup() {
        Some(DeletionPolicy::AllInspected) => warn!(
            "Cleanup deletes every inspected message matching the search filter; \
             set check.deletion_policy = \"matched_only\" to keep unrelated mail"
        ),
        Some(DeletionPolicy::MatchedOnly) => info!("Cleanup deletes matched probes only"),
        None => info!("Cleanup disabled"),
    }

    let engine = Arc::new(VerificationEngine::from_config(&config)?);
    let reporter = build_reporter(&config.report)?;
    let scheduler = VerificationScheduler::new(engine, reporter, JobSpec::from_config(&config.check))
        .with_interval(config.daemon.interval())
        .with_run_now(config.daemon.run_now);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    if cli.daemon {
        scheduler.run(cancel).await;
    } else {
        let report = scheduler.run_once(&cancel).await;
        info!(
            "Run finished: {}/{} confirmed, {} errors",
            report.confirmed_count(),
            report.len(),
            report.error_count()
        );
    }

    Ok(())
}

/// Directive used when RUST_LOG is not set
fn default_directive(level: &str, verbose: u8) -> String {
    match verbose {
        0 => level.to_string(),
        1 => "info,forwardcheck=debug,forwardcheck_core=debug".to_string(),
        _ => "debug,forwardcheck=trace,forwardcheck_core=trace".to_string(),
    }
}

fn init_logging(config: &LoggingConfig, verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.level, verbose)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
