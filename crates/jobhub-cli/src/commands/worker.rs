//! Worker management CLI commands.

use clap::{Args, Subcommand};
use serde::Serialize;

use crate::output::{self, OutputFormat};
use jobhub_core::error::AppError;

/// Arguments for worker commands
#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// Worker subcommand
    #[command(subcommand)]
    pub command: WorkerCommand,
}

/// Worker subcommands
#[derive(Debug, Subcommand)]
pub enum WorkerCommand {
    /// Show effective worker settings and store health
    Status,
}

/// Worker status report
#[derive(Debug, Serialize)]
struct WorkerStatus {
    enabled: bool,
    batch_size: i64,
    max_workers: usize,
    batch_pause_ms: u64,
    error_backoff_ms: u64,
    restart_interval_seconds: u64,
    visibility_timeout_seconds: u64,
    default_max_retries: i32,
    store_healthy: bool,
}

/// Execute worker commands
pub async fn execute(args: &WorkerArgs, config_path: &str, format: OutputFormat) -> Result<(), AppError> {
    let (config, db, queue) = super::open_queue(config_path).await?;

    match &args.command {
        WorkerCommand::Status => {
            let healthy = queue.health_check().await.unwrap_or(false);
            let status = WorkerStatus {
                enabled: config.worker.enabled,
                batch_size: config.worker.batch_size,
                max_workers: config.worker.max_workers,
                batch_pause_ms: config.worker.batch_pause_ms,
                error_backoff_ms: config.worker.error_backoff_ms,
                restart_interval_seconds: config.worker.restart_interval_seconds,
                visibility_timeout_seconds: config.queue.visibility_timeout_seconds,
                default_max_retries: config.queue.default_max_retries,
                store_healthy: healthy,
            };

            match format {
                OutputFormat::Table => {
                    println!("Worker Status:");
                    output::print_kv("Worker Enabled", &status.enabled.to_string());
                    output::print_kv("Batch Size", &status.batch_size.to_string());
                    output::print_kv("Max Workers", &status.max_workers.to_string());
                    output::print_kv("Batch Pause (ms)", &status.batch_pause_ms.to_string());
                    output::print_kv("Error Backoff (ms)", &status.error_backoff_ms.to_string());
                    output::print_kv(
                        "Restart Interval (s)",
                        &status.restart_interval_seconds.to_string(),
                    );
                    output::print_kv(
                        "Visibility Timeout (s)",
                        &status.visibility_timeout_seconds.to_string(),
                    );
                    output::print_kv("Default Max Retries", &status.default_max_retries.to_string());
                    output::print_kv("Store Healthy", &status.store_healthy.to_string());
                    if !healthy {
                        output::print_warning("Job store did not answer the health check");
                    }
                }
                OutputFormat::Json => output::print_json(&status),
            }
        }
    }

    db.close().await;
    Ok(())
}
