//! In-memory job store guarded by a single async mutex.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use jobhub_core::error::AppError;
use jobhub_core::result::AppResult;
use jobhub_entity::job::{DequeueOptions, FairScheduling, Job, JobStatus};

use crate::store::JobStore;

/// In-memory job store.
///
/// Rows are kept in insertion order so FIFO ties on `created_at` resolve
/// the way they were enqueued. Every operation runs inside one critical
/// section, which is what makes [`JobStore::claim`] atomic here.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<Mutex<Vec<Job>>>,
    /// Number of upcoming claims that should fail with a database error.
    failing_claims: Arc<AtomicUsize>,
    /// Number of upcoming inserts, completions, or failures that should fail.
    failing_writes: Arc<AtomicUsize>,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` claims fail as if the database were down.
    pub fn fail_next_claims(&self, count: usize) {
        self.failing_claims.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` writes (insert, complete, fail) fail as if the
    /// database were down. Nothing is written by a failed call.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Snapshot of every stored row.
    pub async fn all(&self) -> Vec<Job> {
        self.jobs.lock().await.clone()
    }

    /// Overwrite `visible_at` of a job, e.g. to expire a claim early.
    pub async fn set_visible_at(&self, id: Uuid, visible_at: DateTime<Utc>) -> AppResult<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;
        job.visible_at = visible_at;
        Ok(())
    }

    fn take_injected_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_write(&self) -> AppResult<()> {
        if Self::take_injected_failure(&self.failing_writes) {
            return Err(AppError::database("Injected write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> AppResult<Job> {
        self.check_write()?;
        let mut jobs = self.jobs.lock().await;
        if jobs.iter().any(|j| j.id == job.id) {
            return Err(AppError::database(format!("Duplicate job id {}", job.id)));
        }
        jobs.push(job.clone());
        Ok(job.clone())
    }

    async fn insert_batch(&self, batch: &[Job]) -> AppResult<u64> {
        self.check_write()?;
        let mut jobs = self.jobs.lock().await;

        let mut seen: HashSet<Uuid> = jobs.iter().map(|j| j.id).collect();
        if let Some(dup) = batch.iter().find(|j| !seen.insert(j.id)) {
            return Err(AppError::database(format!("Duplicate job id {}", dup.id)));
        }

        jobs.extend(batch.iter().cloned());
        Ok(batch.len() as u64)
    }

    async fn claim(
        &self,
        options: &DequeueOptions,
        visibility_timeout: Duration,
    ) -> AppResult<Vec<Job>> {
        if Self::take_injected_failure(&self.failing_claims) {
            return Err(AppError::database("Injected claim failure"));
        }

        let mut jobs = self.jobs.lock().await;
        let now = Utc::now();
        let visible_at = now
            + chrono::Duration::from_std(visibility_timeout)
                .map_err(|e| AppError::internal(format!("Invalid visibility timeout: {e}")))?;

        let mut candidates: Vec<usize> = jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| {
                job.is_claimable(now)
                    && options.max_retries.is_none_or(|cap| job.retry_count <= cap)
                    && options.user_id.as_deref().is_none_or(|u| job.user_id == u)
                    && options.job_type.as_deref().is_none_or(|t| job.job_type == t)
            })
            .map(|(idx, _)| idx)
            .collect();

        match options.fair_scheduling {
            FairScheduling::Fifo => {
                candidates.sort_by_key(|&idx| (jobs[idx].created_at, jobs[idx].id))
            }
            FairScheduling::Random => candidates.shuffle(&mut rand::rng()),
        }
        candidates.truncate(options.batch_size.max(0) as usize);

        let claimed: Vec<Job> = candidates
            .into_iter()
            .map(|idx| {
                let job = &mut jobs[idx];
                job.status = JobStatus::InProgress;
                job.visible_at = visible_at;
                job.retry_count += 1;
                job.updated_at = now;
                job.clone()
            })
            .collect();

        debug!(claimed = claimed.len(), "Claimed jobs from memory store");
        Ok(claimed)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Job>> {
        Ok(self.jobs.lock().await.iter().find(|j| j.id == id).cloned())
    }

    async fn complete(&self, ids: &[Uuid], delete: bool) -> AppResult<()> {
        self.check_write()?;
        let mut jobs = self.jobs.lock().await;

        let missing = ids
            .iter()
            .filter(|id| !jobs.iter().any(|j| j.id == **id))
            .count();
        if missing > 0 {
            return Err(AppError::not_found(format!(
                "{missing} of {} jobs not found",
                ids.len()
            )));
        }

        if delete {
            jobs.retain(|j| !ids.contains(&j.id));
        } else {
            let now = Utc::now();
            for job in jobs.iter_mut().filter(|j| ids.contains(&j.id)) {
                job.status = JobStatus::Done;
                job.updated_at = now;
            }
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: Option<&str>) -> AppResult<()> {
        self.check_write()?;
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;
        job.status = JobStatus::Failed;
        job.error = error.map(str::to_string);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_terminal(
        &self,
        before: DateTime<Utc>,
        statuses: &[JobStatus],
        limit: i64,
    ) -> AppResult<u64> {
        let mut jobs = self.jobs.lock().await;

        let mut expired: Vec<(DateTime<Utc>, Uuid)> = jobs
            .iter()
            .filter(|j| statuses.contains(&j.status) && j.updated_at < before)
            .map(|j| (j.updated_at, j.id))
            .collect();
        expired.sort();
        expired.truncate(limit.max(0) as usize);

        let doomed: HashSet<Uuid> = expired.into_iter().map(|(_, id)| id).collect();
        jobs.retain(|j| !doomed.contains(&j.id));
        Ok(doomed.len() as u64)
    }

    async fn count_by_type_and_status(
        &self,
        user_id: &str,
    ) -> AppResult<Vec<(String, JobStatus, i64)>> {
        let jobs = self.jobs.lock().await;
        let mut rows: Vec<(String, JobStatus, i64)> = Vec::new();
        for job in jobs.iter().filter(|j| j.user_id == user_id) {
            match rows
                .iter_mut()
                .find(|(t, s, _)| *t == job.job_type && *s == job.status)
            {
                Some(row) => row.2 += 1,
                None => rows.push((job.job_type.clone(), job.status, 1)),
            }
        }
        Ok(rows)
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobhub_entity::job::NewJob;

    const VISIBILITY: Duration = Duration::from_secs(60);

    async fn seed(store: &MemoryJobStore, user: &str, job_type: &str) -> Job {
        let job = Job::from_new(NewJob::new(user, job_type), 3, Utc::now());
        store.insert(&job).await.unwrap()
    }

    #[tokio::test]
    async fn test_claim_marks_in_progress() {
        let store = MemoryJobStore::new();
        let job = seed(&store, "u1", "a").await;

        let claimed = store
            .claim(&DequeueOptions::batch(10), VISIBILITY)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, job.id);
        assert_eq!(claimed[0].status, JobStatus::InProgress);
        assert_eq!(claimed[0].retry_count, 1);
        assert!(claimed[0].visible_at > Utc::now());

        let again = store
            .claim(&DequeueOptions::batch(10), VISIBILITY)
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_claim_fifo_follows_insertion() {
        let store = MemoryJobStore::new();
        let first = seed(&store, "u1", "a").await;
        let second = seed(&store, "u2", "a").await;
        let third = seed(&store, "u1", "a").await;

        let claimed = store
            .claim(&DequeueOptions::batch(2), VISIBILITY)
            .await
            .unwrap();
        let ids: Vec<Uuid> = claimed.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);

        let rest = store
            .claim(&DequeueOptions::batch(2), VISIBILITY)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, third.id);
    }

    #[tokio::test]
    async fn test_claim_fifo_within_one_batch() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let batch: Vec<Job> = (0..10)
            .map(|i| Job::from_new(NewJob::new("u1", format!("t{i}")), 3, now))
            .collect();
        store.insert_batch(&batch).await.unwrap();

        let claimed = store
            .claim(&DequeueOptions::batch(4), VISIBILITY)
            .await
            .unwrap();
        let types: Vec<&str> = claimed.iter().map(|j| j.job_type.as_str()).collect();
        assert_eq!(types, vec!["t0", "t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn test_insert_batch_is_all_or_nothing() {
        let store = MemoryJobStore::new();
        let existing = seed(&store, "u1", "a").await;
        let now = Utc::now();
        let mut batch: Vec<Job> = (0..3)
            .map(|_| Job::from_new(NewJob::new("u1", "b"), 3, now))
            .collect();
        batch[2].id = existing.id;

        let err = store.insert_batch(&batch).await.unwrap_err();
        assert_eq!(err.kind, jobhub_core::error::ErrorKind::Database);
        assert_eq!(store.all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_claim_filters() {
        let store = MemoryJobStore::new();
        seed(&store, "u1", "a").await;
        let target = seed(&store, "u2", "b").await;
        seed(&store, "u2", "a").await;

        let claimed = store
            .claim(&DequeueOptions::batch(10).for_user("u2").of_type("b"), VISIBILITY)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, target.id);
    }

    #[tokio::test]
    async fn test_caller_retry_ceiling() {
        let store = MemoryJobStore::new();
        let job = seed(&store, "u1", "a").await;
        store.claim(&DequeueOptions::batch(1), VISIBILITY).await.unwrap();
        store.set_visible_at(job.id, Utc::now()).await.unwrap();

        let capped = store
            .claim(&DequeueOptions::batch(1).with_max_retries(0), VISIBILITY)
            .await
            .unwrap();
        assert!(capped.is_empty());

        let uncapped = store
            .claim(&DequeueOptions::batch(1), VISIBILITY)
            .await
            .unwrap();
        assert_eq!(uncapped.len(), 1);
        assert_eq!(uncapped[0].retry_count, 2);
    }

    #[tokio::test]
    async fn test_complete_is_all_or_nothing() {
        let store = MemoryJobStore::new();
        let job = seed(&store, "u1", "a").await;

        let err = store
            .complete(&[job.id, Uuid::new_v4()], false)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        let unchanged = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, JobStatus::Pending);

        store.complete(&[job.id], true).await.unwrap();
        assert!(store.find_by_id(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_terminal_respects_limit() {
        let store = MemoryJobStore::new();
        for _ in 0..3 {
            let job = seed(&store, "u1", "a").await;
            store.fail(job.id, Some("boom")).await.unwrap();
        }
        seed(&store, "u1", "a").await;

        let later = Utc::now() + chrono::Duration::seconds(1);
        let removed = store
            .delete_terminal(later, &[JobStatus::Failed], 2)
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.all().await.len(), 2);
    }

    #[tokio::test]
    async fn test_injected_write_failure_leaves_rows_untouched() {
        let store = MemoryJobStore::new();
        let job = seed(&store, "u1", "a").await;
        store.fail_next_writes(1);

        assert!(store.complete(&[job.id], true).await.is_err());
        assert!(store.find_by_id(job.id).await.unwrap().is_some());
        store.complete(&[job.id], true).await.unwrap();
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_injected_claim_failure() {
        let store = MemoryJobStore::new();
        seed(&store, "u1", "a").await;
        store.fail_next_claims(1);

        assert!(store.claim(&DequeueOptions::batch(1), VISIBILITY).await.is_err());
        assert_eq!(
            store
                .claim(&DequeueOptions::batch(1), VISIBILITY)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
