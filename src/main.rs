//! Submitter - Resilient Ledger Submission Client
//!
//! Main entry point: loads configuration, wires the components together
//! and runs the cycle loop. A cycle runs to completion before shutdown is
//! honored, so no outcome is ever left unrecorded.

#![deny(unused_imports)]
#![deny(unused_mut)]
#![warn(dead_code)]
#![warn(unused_must_use)]

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use submitter::config::Config;
use submitter::metrics::{metrics, serve_metrics};
use submitter::submit_engine::EngineConfig;
use submitter::{AuditLog, EndpointRegistry, HttpLedgerClient, SubmitEngine, WalletManager};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Prediction value override (skips the prediction file)
    #[arg(long)]
    value: Option<f64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Shape of the file the model step writes
#[derive(Debug, Deserialize)]
struct PredictionFile {
    value: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose)?;

    info!("Starting submitter");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    info!("Loading configuration from: {}", args.config);
    let config = Config::from_file_with_env(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    info!(
        "Initializing wallet from: {}",
        config.wallet.keypair_path
    );
    let wallet =
        WalletManager::from_file(&config.wallet.keypair_path).context("Failed to load wallet")?;
    info!("Submitting account: {}", wallet.account());

    info!(
        "Initializing endpoint registry with {} endpoints",
        config.ledger.endpoints.len()
    );
    let registry = Arc::new(EndpointRegistry::from_entries(
        &config.ledger.endpoints,
        config.ledger.failure_ceiling,
    ));
    metrics().endpoints_total.set(registry.len() as i64);

    let ledger = Arc::new(HttpLedgerClient::new(
        Duration::from_secs(config.ledger.query_timeout_secs),
        Duration::from_secs(config.ledger.submit_timeout_secs),
    ));

    info!("Opening audit store at: {}", config.cycle.audit_path);
    let audit = Arc::new(AuditLog::open(&config.cycle.audit_path)?);

    if config.monitoring.enable_metrics {
        let port = config.monitoring.metrics_port;
        info!("Starting metrics server on port {}", port);
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let engine = SubmitEngine::new(
        registry,
        ledger,
        wallet,
        Arc::clone(&audit),
        EngineConfig {
            max_attempts: config.cycle.max_attempts,
            soft_value_bound: config.limits.soft_value_bound,
            hard_value_bound: config.limits.hard_value_bound,
            retry: config.retry.clone(),
        },
    );

    run_cycle_loop(&args, &config, &engine).await?;

    audit.flush()?;
    info!("Shutting down");
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        "submitter=debug,info"
    } else {
        "submitter=info,warn,error"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    Ok(())
}

/// Run cycles until shutdown (or once, with --once)
///
/// Shutdown is honored between cycles only: an in-flight cycle completes
/// so its outcome lands in the audit log.
async fn run_cycle_loop(args: &Args, config: &Config, engine: &SubmitEngine) -> Result<()> {
    let interval_secs = config.cycle.interval_secs.max(1);

    loop {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let cycle_id = now / interval_secs;

        let value = resolve_prediction(args, config);
        let record = engine
            .run_cycle(cycle_id, config.cycle.topic_id, value)
            .await?;
        info!(
            cycle_id,
            outcome = %record.outcome,
            attempts = record.attempts,
            "Cycle complete"
        );

        if args.once {
            return Ok(());
        }

        // Sleep to the next tick boundary, waking early on ctrl-c
        let wait = interval_secs - (chrono::Utc::now().timestamp().max(0) as u64 % interval_secs);
        info!(next_cycle_in_secs = wait, "Waiting for next cycle");
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(wait)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                return Ok(());
            }
        }
    }
}

/// Read the prediction value for this cycle
///
/// A missing or unreadable prediction file yields NaN, which the engine
/// rejects at its precondition gate and records as a fatal outcome -- the
/// cycle is closed either way.
fn resolve_prediction(args: &Args, config: &Config) -> f64 {
    if let Some(value) = args.value {
        return value;
    }

    let path = &config.cycle.prediction_path;
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<PredictionFile>(&raw) {
            Ok(prediction) => prediction.value,
            Err(e) => {
                warn!(path = %path, error = %e, "Prediction file unparseable");
                f64::NAN
            }
        },
        Err(e) => {
            warn!(path = %path, error = %e, "Prediction file unreadable");
            f64::NAN
        }
    }
}
