//! CLI command definitions and dispatch.

pub mod job;
pub mod migrate;
pub mod queue;
pub mod worker;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;
use jobhub_core::config::AppConfig;
use jobhub_core::error::AppError;
use jobhub_database::{DatabasePool, JobRepository};
use jobhub_worker::JobQueue;

/// JobHub — durable multi-tenant job queue
#[derive(Debug, Parser)]
#[command(name = "jobhub", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml", env = "JOBHUB_CONFIG")]
    pub config: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Database migration management
    Migrate(migrate::MigrateArgs),
    /// Single job operations
    Job(job::JobArgs),
    /// Queue-wide operations
    Queue(queue::QueueArgs),
    /// Worker configuration and queue health
    Worker(worker::WorkerArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<(), AppError> {
        match &self.command {
            Commands::Migrate(args) => migrate::execute(args, &self.config).await,
            Commands::Job(args) => job::execute(args, &self.config, self.format).await,
            Commands::Queue(args) => queue::execute(args, &self.config, self.format).await,
            Commands::Worker(args) => worker::execute(args, &self.config, self.format).await,
        }
    }
}

/// Helper: load configuration from file
pub fn load_config(config_path: &str) -> Result<AppConfig, AppError> {
    AppConfig::load(config_path)
}

/// Helper: create database pool from config
pub async fn create_db_pool(config: &AppConfig) -> Result<DatabasePool, AppError> {
    DatabasePool::connect(&config.database).await
}

/// Helper: build the queue service over PostgreSQL
pub async fn open_queue(config_path: &str) -> Result<(AppConfig, DatabasePool, JobQueue), AppError> {
    let config = load_config(config_path)?;
    let db = create_db_pool(&config).await?;
    let store = JobRepository::new(db.pool().clone());
    let queue = JobQueue::new(Arc::new(store), &config.queue);
    Ok((config, db, queue))
}
