//! Storage abstraction behind the job queue.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use jobhub_core::result::AppResult;
use jobhub_entity::job::{DequeueOptions, Job, JobStatus};

/// Durable home of job rows.
///
/// Implementations receive already-validated input. The one hard
/// requirement is [`JobStore::claim`]: selecting and updating the claimed
/// rows must be a single atomic step so concurrent callers never receive
/// the same row inside its visibility window.
#[async_trait]
pub trait JobStore: Send + Sync + std::fmt::Debug + 'static {
    /// Insert one pending job and return the stored row.
    async fn insert(&self, job: &Job) -> AppResult<Job>;

    /// Insert all jobs or none of them. Returns the number inserted.
    async fn insert_batch(&self, jobs: &[Job]) -> AppResult<u64>;

    /// Atomically claim up to `options.batch_size` claimable jobs.
    ///
    /// Each returned job is `in_progress`, has `retry_count` incremented,
    /// and is hidden until `now + visibility_timeout`. FIFO claims are
    /// returned oldest first.
    async fn claim(
        &self,
        options: &DequeueOptions,
        visibility_timeout: Duration,
    ) -> AppResult<Vec<Job>>;

    /// Find a job by ID.
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Job>>;

    /// Mark every listed job `done`, or delete them when `delete` is set.
    ///
    /// All-or-nothing: if any id is unknown nothing changes and a
    /// `NotFound` error is returned. `ids` contains no duplicates.
    async fn complete(&self, ids: &[Uuid], delete: bool) -> AppResult<()>;

    /// Mark a job `failed` and record `error`. `NotFound` if unknown.
    async fn fail(&self, id: Uuid, error: Option<&str>) -> AppResult<()>;

    /// Delete at most `limit` jobs in `statuses` last updated before `before`.
    async fn delete_terminal(
        &self,
        before: DateTime<Utc>,
        statuses: &[JobStatus],
        limit: i64,
    ) -> AppResult<u64>;

    /// `(job_type, status, count)` rows for one tenant.
    async fn count_by_type_and_status(&self, user_id: &str)
    -> AppResult<Vec<(String, JobStatus, i64)>>;

    /// Check that the store is reachable.
    async fn health_check(&self) -> AppResult<bool>;
}
