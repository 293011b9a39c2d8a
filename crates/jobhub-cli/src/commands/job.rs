//! Single-job CLI commands.

use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use jobhub_core::error::AppError;
use jobhub_entity::job::{Job, NewJob};
use jobhub_worker::JobQueue;

/// Arguments for job commands
#[derive(Debug, Args)]
pub struct JobArgs {
    /// Job subcommand
    #[command(subcommand)]
    pub command: JobCommand,
}

/// Job subcommands
#[derive(Debug, Subcommand)]
pub enum JobCommand {
    /// Enqueue a new pending job
    Enqueue {
        /// Owning tenant
        #[arg(short, long)]
        user: String,
        /// Job type selecting the handler
        #[arg(short = 't', long = "type")]
        job_type: String,
        /// JSON payload
        #[arg(short, long)]
        payload: Option<String>,
        /// Retry ceiling (defaults to queue.default_max_retries)
        #[arg(long)]
        max_retries: Option<i32>,
    },
    /// Enqueue every job of a JSON array file in one transaction
    EnqueueBatch {
        /// Path to a JSON array of `{user_id, job_type, payload?, max_retries?}`
        file: String,
    },
    /// Show one job
    Get {
        /// Job ID
        id: String,
    },
    /// Mark jobs done
    Ack {
        /// Job IDs; all must exist or none is acknowledged
        #[arg(required = true)]
        ids: Vec<String>,
        /// Delete the rows instead of keeping them as done
        #[arg(long)]
        delete: bool,
    },
    /// Mark a job failed
    Nack {
        /// Job ID
        id: String,
        /// Error message to record
        #[arg(short, long)]
        error: Option<String>,
    },
}

/// Job display row for table output
#[derive(Debug, Serialize, Tabled)]
pub struct JobRow {
    /// Job ID
    pub id: String,
    /// Tenant
    pub user_id: String,
    /// Job type
    pub job_type: String,
    /// Status
    pub status: String,
    /// Claims used over the ceiling
    pub retries: String,
    /// Visible at
    pub visible_at: String,
    /// Last error
    pub error: String,
    /// Created at
    pub created_at: String,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            user_id: job.user_id.clone(),
            job_type: job.job_type.clone(),
            status: job.status.to_string(),
            retries: format!("{}/{}", job.retry_count, job.max_retries),
            visible_at: job.visible_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            error: job.error.clone().unwrap_or_default(),
            created_at: job.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Execute job commands
pub async fn execute(args: &JobArgs, config_path: &str, format: OutputFormat) -> Result<(), AppError> {
    let (_, db, queue) = super::open_queue(config_path).await?;
    let result = run(&args.command, &queue, format).await;
    db.close().await;
    result
}

async fn run(command: &JobCommand, queue: &JobQueue, format: OutputFormat) -> Result<(), AppError> {
    match command {
        JobCommand::Enqueue {
            user,
            job_type,
            payload,
            max_retries,
        } => {
            let mut new_job = NewJob::new(user.as_str(), job_type.as_str());
            if let Some(raw) = payload {
                new_job = new_job.with_payload(parse_payload(raw)?);
            }
            if let Some(max_retries) = max_retries {
                new_job = new_job.with_max_retries(*max_retries);
            }

            let job = queue.enqueue(new_job).await?;
            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Job '{}' enqueued (id: {})", job_type, job.id))
                }
                OutputFormat::Json => output::print_json(&job),
            }
        }
        JobCommand::EnqueueBatch { file } => {
            let raw = std::fs::read_to_string(file)
                .map_err(|e| AppError::validation(format!("Cannot read '{file}': {e}")))?;
            let jobs: Vec<NewJob> = serde_json::from_str(&raw)
                .map_err(|e| AppError::validation(format!("Invalid job list in '{file}': {e}")))?;

            let inserted = queue.enqueue_batch(jobs).await?;
            output::print_success(&format!("{inserted} jobs enqueued"));
        }
        JobCommand::Get { id } => {
            let id = JobQueue::parse_job_id(id)?;
            let job = queue
                .get(id)
                .await?
                .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;

            match format {
                OutputFormat::Table => {
                    output::print_item(&JobRow::from(&job), format);
                    if let Some(payload) = &job.payload {
                        output::print_kv("Payload", &payload.to_string());
                    }
                }
                OutputFormat::Json => output::print_json(&job),
            }
        }
        JobCommand::Ack { ids, delete } => {
            let ids = ids
                .iter()
                .map(|raw| JobQueue::parse_job_id(raw))
                .collect::<Result<Vec<_>, _>>()?;
            queue.ack_batch(&ids, *delete).await?;

            let verb = if *delete { "deleted" } else { "marked done" };
            output::print_success(&format!("{} job(s) {verb}", ids.len()));
        }
        JobCommand::Nack { id, error } => {
            let id = JobQueue::parse_job_id(id)?;
            queue.nack(id, error.as_deref()).await?;
            output::print_success(&format!("Job {id} marked failed"));
        }
    }

    Ok(())
}

/// Parse a JSON payload argument.
pub fn parse_payload(raw: &str) -> Result<serde_json::Value, AppError> {
    serde_json::from_str(raw)
        .map_err(|e| AppError::validation(format!("Invalid JSON payload: {e}")))
}
