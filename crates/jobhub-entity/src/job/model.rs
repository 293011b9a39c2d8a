//! Job entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use super::status::JobStatus;

/// A background job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Job {
    /// Unique job identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub user_id: String,
    /// Handler selector (e.g., `"fetch-bookmark-metadata"`).
    pub job_type: String,
    /// Handler-specific payload, opaque to the queue.
    pub payload: Option<serde_json::Value>,
    /// Current job status.
    pub status: JobStatus,
    /// Number of times the job has been claimed.
    pub retry_count: i32,
    /// Claim ceiling; the job is claimable while `retry_count <= max_retries`.
    pub max_retries: i32,
    /// While in progress, the job is hidden from dequeue until this instant.
    pub visible_at: DateTime<Utc>,
    /// Last failure message.
    pub error: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a fresh pending job from producer input.
    ///
    /// Ids are time-ordered v7 UUIDs, so `id` breaks `created_at` ties in
    /// creation order.
    pub fn from_new(new: NewJob, default_max_retries: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: new.user_id,
            job_type: new.job_type,
            payload: new.payload,
            status: JobStatus::Pending,
            retry_count: 0,
            max_retries: new.max_retries.unwrap_or(default_max_retries),
            visible_at: now,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a dequeue at `now` may claim this job.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        if self.retry_count > self.max_retries {
            return false;
        }
        match self.status {
            JobStatus::Pending => true,
            JobStatus::InProgress => self.visible_at <= now,
            JobStatus::Done | JobStatus::Failed => false,
        }
    }

    /// Whether the claim that produced this record used up the retry budget.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count > self.max_retries
    }
}

/// Data required to enqueue a new job.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewJob {
    /// Owning tenant.
    #[validate(length(min = 1, max = 255))]
    pub user_id: String,
    /// Handler selector.
    #[validate(length(min = 1, max = 255))]
    pub job_type: String,
    /// Handler-specific payload.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    /// Claim ceiling; `None` uses the queue default.
    #[serde(default)]
    #[validate(range(min = 0))]
    pub max_retries: Option<i32>,
}

impl NewJob {
    /// Create a job request without a payload.
    pub fn new(user_id: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            job_type: job_type.into(),
            payload: None,
            max_retries: None,
        }
    }

    /// Attach a payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Override the retry ceiling.
    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}
