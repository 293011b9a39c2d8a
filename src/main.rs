//! JobHub daemon — runs the worker pool against the PostgreSQL job store.
//!
//! Main entry point that wires the crates together and keeps the pool
//! topped up until Ctrl-C.

use std::sync::Arc;

use tokio::time::{self, MissedTickBehavior};
use tracing;
use tracing_subscriber::{EnvFilter, fmt};

use jobhub_core::config::AppConfig;
use jobhub_core::error::AppError;
use jobhub_database::{DatabasePool, JobRepository, migration};
use jobhub_worker::{HandlerRegistry, JobQueue, WorkerPool};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Daemon error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from file and environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let config_path =
        std::env::var("JOBHUB_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());
    AppConfig::load(&config_path)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main daemon run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting JobHub v{}", env!("CARGO_PKG_VERSION"));

    tracing::info!("Connecting to database...");
    let db = DatabasePool::connect(&config.database).await?;

    tracing::info!("Running database migrations...");
    migration::run_migrations(db.pool()).await?;

    let store = JobRepository::new(db.pool().clone());
    let queue = Arc::new(JobQueue::new(Arc::new(store), &config.queue));
    let registry = Arc::new(HandlerRegistry::new());
    let pool = WorkerPool::new(Arc::clone(&queue), Arc::clone(&registry), config.worker.clone());

    if !config.worker.enabled {
        tracing::info!("Worker pool disabled; waiting for shutdown signal");
        shutdown_signal().await;
        db.close().await;
        return Ok(());
    }

    tracing::info!(
        max_workers = config.worker.max_workers,
        batch_size = config.worker.batch_size,
        restart_interval_seconds = config.worker.restart_interval_seconds,
        "Starting worker pool"
    );

    // Workers exit once the queue is drained; each tick replaces them.
    let mut ticker = time::interval(config.worker.restart_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let signal = shutdown_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            _ = &mut signal => break,
            _ = ticker.tick() => {
                pool.start().await;
            }
        }
    }

    tracing::info!("Shutdown signal received, draining workers...");
    pool.shutdown().await;
    db.close().await;
    tracing::info!("JobHub stopped");
    Ok(())
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
