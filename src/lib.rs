//! Media Ingestion Core — a durable, concurrent pipeline that turns files
//! deposited into an intake directory into encrypted, streamable web
//! assets, exactly once.
//!
//! This library wires together intake discovery, the persistent queue
//! worker pool, and the database health monitor described in the design
//! documents alongside this crate.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod hash;
pub mod health;
pub mod queue;
pub mod tools;
pub mod transform;
pub mod watcher;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::queue::QueueWorker;
use crate::watcher::{EventWatcher, Reconciler};

/// Runs the ingestion core with the provided CLI arguments.
pub async fn run(cli: Cli) -> Result<()> {
    setup_logging(cli.log_level())?;

    match cli.command {
        Commands::Run => run_pipeline().await,
        Commands::ShowConfig => show_config().await,
        Commands::Reconcile => reconcile_once_and_report().await,
    }
}

/// Initializes the tracing subscriber for structured JSON logging.
fn setup_logging(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .json()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

/// Runs the main pipeline: watcher, reconciler, health monitor, and the
/// configured number of queue workers, until a shutdown signal arrives.
async fn run_pipeline() -> Result<()> {
    info!("starting media ingestion core");

    let config = Arc::new(AppConfig::from_env()?);
    let catalog = Arc::new(catalog::Catalog::connect(config.db.clone()).await?);

    let reaped = catalog.reap_stranded_processing_rows().await?;
    if reaped > 0 {
        info!(reaped, "reset stranded processing rows to queued on startup");
    }

    let reconciler = Reconciler::new(catalog.clone(), config.clone());
    let startup_enqueued = reconciler.reconcile_once().await?;
    info!(startup_enqueued, "startup reconcile pass complete");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = Vec::new();

    let watcher = EventWatcher::new(config.intake_dir.clone(), catalog.clone());
    let watcher_shutdown = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = watcher.run(watcher_shutdown).await {
            tracing::error!(error = %e, "event watcher failed");
        }
    }));

    let reconciler_shutdown = shutdown_rx.clone();
    tasks.push(tokio::spawn(
        async move { reconciler.run(reconciler_shutdown).await },
    ));

    let health_catalog = catalog.clone();
    let health_shutdown = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move {
        health::run(health_catalog, health_shutdown).await;
    }));

    for worker_id in 0..config.worker_count.max(1) {
        let worker = QueueWorker::new(catalog.clone(), config.clone());
        let worker_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            info!(worker_id, "queue worker starting");
            worker.run(worker_shutdown).await;
        }));
    }

    info!("media ingestion core is running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }

    info!("media ingestion core shut down cleanly");
    Ok(())
}

/// Loads configuration from the environment and prints it.
async fn show_config() -> Result<()> {
    let config = AppConfig::from_env()?;
    println!("{config:#?}");
    Ok(())
}

/// Runs a single reconcile pass and reports how many files were enqueued.
async fn reconcile_once_and_report() -> Result<()> {
    let config = Arc::new(AppConfig::from_env()?);
    let catalog = Arc::new(catalog::Catalog::connect(config.db.clone()).await?);
    let reconciler = Reconciler::new(catalog, config);

    let enqueued = reconciler.reconcile_once().await?;
    println!("Enqueued {enqueued} file(s).");
    Ok(())
}
