//! Job queue service: the API producers and workers use over the job store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing;
use uuid::Uuid;
use validator::Validate;

use jobhub_core::config::QueueConfig;
use jobhub_core::error::AppError;
use jobhub_core::result::AppResult;
use jobhub_database::store::JobStore;
use jobhub_entity::job::{CleanupOptions, DequeueOptions, Job, JobStats, NewJob};

/// Job queue for enqueuing, claiming, and settling work.
///
/// Every operation validates its input before the store is touched.
#[derive(Debug, Clone)]
pub struct JobQueue {
    /// Durable job storage.
    store: Arc<dyn JobStore>,
    /// How long a claimed job stays hidden from other claimants.
    visibility_timeout: Duration,
    /// Retry ceiling for jobs that do not set one.
    default_max_retries: i32,
    /// Defaults for cleanup requests that omit fields.
    cleanup_defaults: CleanupOptions,
}

impl JobQueue {
    /// Create a queue over `store` using the configured defaults.
    pub fn new(store: Arc<dyn JobStore>, config: &QueueConfig) -> Self {
        Self {
            store,
            visibility_timeout: config.visibility_timeout(),
            default_max_retries: config.default_max_retries,
            cleanup_defaults: CleanupOptions {
                older_than_days: config.cleanup_older_than_days,
                limit: config.cleanup_limit,
                ..CleanupOptions::default()
            },
        }
    }

    /// Override the visibility timeout.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Current visibility timeout.
    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    /// Cleanup options used when a request leaves fields unset.
    pub fn cleanup_defaults(&self) -> &CleanupOptions {
        &self.cleanup_defaults
    }

    /// Parse a job identifier, rejecting malformed input as a validation error.
    pub fn parse_job_id(raw: &str) -> AppResult<Uuid> {
        let id = Uuid::parse_str(raw.trim())
            .map_err(|e| AppError::validation(format!("Malformed job id '{raw}': {e}")))?;
        ensure_job_id(id)?;
        Ok(id)
    }

    /// Enqueue a single pending job.
    pub async fn enqueue(&self, new_job: NewJob) -> AppResult<Job> {
        new_job.validate()?;
        let job = Job::from_new(new_job, self.default_max_retries, Utc::now());
        let job = self.store.insert(&job).await?;

        tracing::debug!(
            job_id = %job.id,
            user_id = %job.user_id,
            job_type = %job.job_type,
            max_retries = job.max_retries,
            "Enqueued job"
        );
        Ok(job)
    }

    /// Enqueue many jobs in one atomic insert. Returns the number inserted.
    pub async fn enqueue_batch(&self, new_jobs: Vec<NewJob>) -> AppResult<u64> {
        if new_jobs.is_empty() {
            return Err(AppError::validation("Cannot enqueue an empty batch"));
        }
        for new_job in &new_jobs {
            new_job.validate()?;
        }

        let now = Utc::now();
        let jobs: Vec<Job> = new_jobs
            .into_iter()
            .map(|new_job| Job::from_new(new_job, self.default_max_retries, now))
            .collect();
        let inserted = self.store.insert_batch(&jobs).await?;

        tracing::debug!(count = inserted, "Enqueued job batch");
        Ok(inserted)
    }

    /// Atomically claim up to `options.batch_size` jobs.
    ///
    /// An empty result means nothing is claimable right now.
    pub async fn dequeue(&self, options: &DequeueOptions) -> AppResult<Vec<Job>> {
        options.validate()?;
        let jobs = self.store.claim(options, self.visibility_timeout).await?;

        if !jobs.is_empty() {
            tracing::debug!(
                count = jobs.len(),
                user_id = options.user_id.as_deref().unwrap_or("*"),
                job_type = options.job_type.as_deref().unwrap_or("*"),
                scheduling = %options.fair_scheduling,
                "Dequeued jobs"
            );
        }
        Ok(jobs)
    }

    /// Mark a job done, or delete it when `delete_on_complete` is set.
    pub async fn ack(&self, job_id: Uuid, delete_on_complete: bool) -> AppResult<()> {
        self.ack_batch(&[job_id], delete_on_complete).await
    }

    /// Acknowledge several jobs at once; unknown ids leave every job untouched.
    pub async fn ack_batch(&self, job_ids: &[Uuid], delete_on_complete: bool) -> AppResult<()> {
        if job_ids.is_empty() {
            return Err(AppError::validation("Cannot acknowledge an empty id list"));
        }
        let mut seen = HashSet::with_capacity(job_ids.len());
        let mut ids = Vec::with_capacity(job_ids.len());
        for &id in job_ids {
            ensure_job_id(id)?;
            if seen.insert(id) {
                ids.push(id);
            }
        }

        self.store.complete(&ids, delete_on_complete).await?;
        tracing::debug!(count = ids.len(), deleted = delete_on_complete, "Acknowledged jobs");
        Ok(())
    }

    /// Mark a job failed (terminal) and record `error`.
    pub async fn nack(&self, job_id: Uuid, error: Option<&str>) -> AppResult<()> {
        ensure_job_id(job_id)?;
        self.store.fail(job_id, error).await?;
        tracing::debug!(job_id = %job_id, error = error.unwrap_or(""), "Job failed");
        Ok(())
    }

    /// Delete old terminal jobs. Returns the number of rows removed.
    pub async fn cleanup(&self, options: &CleanupOptions) -> AppResult<u64> {
        options.validate()?;
        let before = chrono::Duration::try_days(options.older_than_days)
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .ok_or_else(|| {
                AppError::validation(format!(
                    "older_than_days {} is out of range",
                    options.older_than_days
                ))
            })?;
        let removed = self
            .store
            .delete_terminal(before, &options.statuses, options.limit)
            .await?;

        tracing::info!(
            removed,
            older_than_days = options.older_than_days,
            limit = options.limit,
            "Cleaned up terminal jobs"
        );
        Ok(removed)
    }

    /// Per-status counts for one tenant, optionally split by job type.
    pub async fn stats(&self, user_id: &str, group_by_type: bool) -> AppResult<JobStats> {
        if user_id.trim().is_empty() {
            return Err(AppError::validation("user_id must not be empty"));
        }
        let rows = self.store.count_by_type_and_status(user_id).await?;
        Ok(JobStats::from_rows(user_id, rows, group_by_type))
    }

    /// Look up a job, e.g. to read its terminal `error`.
    pub async fn get(&self, job_id: Uuid) -> AppResult<Option<Job>> {
        ensure_job_id(job_id)?;
        self.store.find_by_id(job_id).await
    }

    /// Check that the backing store is reachable.
    pub async fn health_check(&self) -> AppResult<bool> {
        self.store.health_check().await
    }
}

fn ensure_job_id(id: Uuid) -> AppResult<()> {
    if id.is_nil() {
        return Err(AppError::validation("Job id must not be the nil UUID"));
    }
    Ok(())
}
