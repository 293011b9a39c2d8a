//! Queue cleanup as a job, so hosts can trigger it by enqueueing.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing;

use jobhub_entity::job::{CleanupOptions, Job, JobStatus};

use crate::queue::JobQueue;
use crate::registry::{HandlerError, JobHandler};

/// Job type handled by [`CleanupJobHandler`].
pub const CLEANUP_JOB_TYPE: &str = "cleanup-jobs";

/// Optional overrides carried in a cleanup job's payload.
#[derive(Debug, Default, Deserialize)]
struct CleanupPayload {
    older_than_days: Option<i64>,
    statuses: Option<Vec<JobStatus>>,
    limit: Option<i64>,
}

/// Deletes old terminal jobs through [`JobQueue::cleanup`].
#[derive(Debug)]
pub struct CleanupJobHandler {
    queue: Arc<JobQueue>,
}

impl CleanupJobHandler {
    /// Create a new cleanup job handler
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }

    /// Merge payload overrides into the queue's cleanup defaults.
    fn options(&self, job: &Job) -> Result<CleanupOptions, HandlerError> {
        let payload: CleanupPayload = match &job.payload {
            Some(value) if !value.is_null() => serde_json::from_value(value.clone())
                .map_err(|e| HandlerError::permanent(format!("Invalid cleanup payload: {e}")))?,
            _ => CleanupPayload::default(),
        };

        let defaults = self.queue.cleanup_defaults();
        Ok(CleanupOptions {
            older_than_days: payload.older_than_days.unwrap_or(defaults.older_than_days),
            statuses: payload.statuses.unwrap_or_else(|| defaults.statuses.clone()),
            limit: payload.limit.unwrap_or(defaults.limit),
        })
    }
}

#[async_trait]
impl JobHandler for CleanupJobHandler {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        let options = self.options(job)?;
        let removed = self.queue.cleanup(&options).await.map_err(|e| {
            if e.is_validation() {
                HandlerError::permanent(e.to_string())
            } else {
                HandlerError::from(e)
            }
        })?;

        tracing::info!(job_id = %job.id, removed, "Cleanup job finished");
        Ok(())
    }
}
