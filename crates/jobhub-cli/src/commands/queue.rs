//! Queue-wide CLI commands: stats, cleanup, and manual dequeue.

use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use super::job::JobRow;
use crate::output::{self, OutputFormat};
use jobhub_core::error::AppError;
use jobhub_entity::job::{
    CleanupOptions, DequeueOptions, FairScheduling, JobStats, JobStatus, StatusCounts,
};
use jobhub_worker::JobQueue;

/// Arguments for queue commands
#[derive(Debug, Args)]
pub struct QueueArgs {
    /// Queue subcommand
    #[command(subcommand)]
    pub command: QueueCommand,
}

/// Queue subcommands
#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// Per-status job counts for one tenant
    Stats {
        /// Tenant to report on
        #[arg(short, long)]
        user: String,
        /// Also break counts down by job type
        #[arg(long)]
        by_type: bool,
    },
    /// Delete old terminal jobs
    Cleanup {
        /// Minimum age in days (defaults to queue.cleanup_older_than_days)
        #[arg(long)]
        older_than_days: Option<i64>,
        /// Statuses to delete; repeatable (default: done, failed)
        #[arg(long = "status")]
        statuses: Vec<JobStatus>,
        /// Maximum rows to delete (defaults to queue.cleanup_limit)
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Claim jobs by hand; they become invisible for the visibility timeout
    Dequeue {
        /// Maximum jobs to claim
        #[arg(short, long, default_value_t = 10)]
        batch_size: i64,
        /// Only claim jobs of this tenant
        #[arg(short, long)]
        user: Option<String>,
        /// Only claim jobs of this type
        #[arg(short = 't', long = "type")]
        job_type: Option<String>,
        /// Candidate ordering: fifo or random
        #[arg(long, default_value = "fifo")]
        scheduling: FairScheduling,
        /// Skip jobs already claimed more than this many times
        #[arg(long)]
        max_retries: Option<i32>,
    },
}

/// Status count row for table output
#[derive(Debug, Serialize, Tabled)]
struct CountsRow {
    /// Job type, or `*` for the tenant total
    job_type: String,
    /// Pending
    pending: i64,
    /// In progress
    in_progress: i64,
    /// Done
    done: i64,
    /// Failed
    failed: i64,
    /// Total
    total: i64,
}

impl CountsRow {
    fn new(job_type: &str, counts: &StatusCounts) -> Self {
        Self {
            job_type: job_type.to_string(),
            pending: counts.pending,
            in_progress: counts.in_progress,
            done: counts.done,
            failed: counts.failed,
            total: counts.total(),
        }
    }
}

/// Execute queue commands
pub async fn execute(args: &QueueArgs, config_path: &str, format: OutputFormat) -> Result<(), AppError> {
    let (_, db, queue) = super::open_queue(config_path).await?;
    let result = run(&args.command, &queue, format).await;
    db.close().await;
    result
}

async fn run(command: &QueueCommand, queue: &JobQueue, format: OutputFormat) -> Result<(), AppError> {
    match command {
        QueueCommand::Stats { user, by_type } => {
            let stats = queue.stats(user, *by_type).await?;
            match format {
                OutputFormat::Table => output::print_list(&stats_rows(&stats), format),
                OutputFormat::Json => output::print_json(&stats),
            }
        }
        QueueCommand::Cleanup {
            older_than_days,
            statuses,
            limit,
        } => {
            let options = cleanup_options(queue.cleanup_defaults(), *older_than_days, statuses, *limit);
            let removed = queue.cleanup(&options).await?;
            if removed == 0 {
                output::print_warning("No jobs matched the cleanup criteria");
            } else {
                output::print_success(&format!("{removed} job(s) deleted"));
            }
        }
        QueueCommand::Dequeue {
            batch_size,
            user,
            job_type,
            scheduling,
            max_retries,
        } => {
            let mut options = DequeueOptions::batch(*batch_size).with_scheduling(*scheduling);
            if let Some(user) = user {
                options = options.for_user(user.as_str());
            }
            if let Some(job_type) = job_type {
                options = options.of_type(job_type.as_str());
            }
            if let Some(max_retries) = max_retries {
                options = options.with_max_retries(*max_retries);
            }

            let jobs = queue.dequeue(&options).await?;
            match format {
                OutputFormat::Table => {
                    let rows: Vec<JobRow> = jobs.iter().map(JobRow::from).collect();
                    output::print_list(&rows, format);
                }
                OutputFormat::Json => output::print_json(&jobs),
            }
        }
    }

    Ok(())
}

/// Merge command-line overrides into the queue's cleanup defaults.
fn cleanup_options(
    defaults: &CleanupOptions,
    older_than_days: Option<i64>,
    statuses: &[JobStatus],
    limit: Option<i64>,
) -> CleanupOptions {
    CleanupOptions {
        older_than_days: older_than_days.unwrap_or(defaults.older_than_days),
        statuses: if statuses.is_empty() {
            defaults.statuses.clone()
        } else {
            statuses.to_vec()
        },
        limit: limit.unwrap_or(defaults.limit),
    }
}

fn stats_rows(stats: &JobStats) -> Vec<CountsRow> {
    let mut rows = vec![CountsRow::new("*", &stats.counts)];
    if let Some(by_type) = &stats.by_type {
        rows.extend(by_type.iter().map(|(job_type, counts)| CountsRow::new(job_type, counts)));
    }
    rows
}
