//! PostgreSQL job store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use jobhub_core::error::{AppError, ErrorKind};
use jobhub_core::result::AppResult;
use jobhub_entity::job::{DequeueOptions, FairScheduling, Job, JobStatus};

use crate::store::JobStore;

/// Repository for job rows and the queue claim protocol.
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    /// Create a new job repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Claim query for the requested ordering.
    ///
    /// The inner select locks the chosen rows and skips rows another
    /// transaction already holds, so concurrent claimants partition the
    /// candidates instead of blocking on or double-claiming them.
    fn claim_sql(order: FairScheduling) -> String {
        let order_by = match order {
            FairScheduling::Fifo => "created_at ASC, id ASC",
            FairScheduling::Random => "random()",
        };
        format!(
            "WITH claimable AS ( \
                SELECT id FROM jobs \
                WHERE retry_count <= max_retries \
                AND ($2::INTEGER IS NULL OR retry_count <= $2) \
                AND ($3::TEXT IS NULL OR user_id = $3) \
                AND ($4::TEXT IS NULL OR job_type = $4) \
                AND (status = 'pending' OR (status = 'in_progress' AND visible_at <= NOW())) \
                ORDER BY {order_by} \
                LIMIT $1 \
                FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE jobs AS j SET status = 'in_progress', \
                visible_at = NOW() + make_interval(secs => $5), \
                retry_count = j.retry_count + 1, \
                updated_at = NOW() \
             FROM claimable \
             WHERE j.id = claimable.id \
             RETURNING j.*"
        )
    }
}

fn db_err(message: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| AppError::with_source(ErrorKind::Database, message, e)
}

#[async_trait]
impl JobStore for JobRepository {
    async fn insert(&self, job: &Job) -> AppResult<Job> {
        sqlx::query_as::<_, Job>(
            "INSERT INTO jobs (id, user_id, job_type, payload, max_retries, \
                visible_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
        )
        .bind(job.id)
        .bind(&job.user_id)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.max_retries)
        .bind(job.visible_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("Failed to insert job"))
    }

    async fn insert_batch(&self, jobs: &[Job]) -> AppResult<u64> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO jobs (id, user_id, job_type, payload, max_retries, \
                visible_at, created_at, updated_at) ",
        );
        builder.push_values(jobs, |mut row, job| {
            row.push_bind(job.id)
                .push_bind(&job.user_id)
                .push_bind(&job.job_type)
                .push_bind(&job.payload)
                .push_bind(job.max_retries)
                .push_bind(job.visible_at)
                .push_bind(job.created_at)
                .push_bind(job.updated_at);
        });

        // A single multi-row INSERT is atomic on its own.
        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(db_err("Failed to insert job batch"))?;
        Ok(result.rows_affected())
    }

    async fn claim(
        &self,
        options: &DequeueOptions,
        visibility_timeout: Duration,
    ) -> AppResult<Vec<Job>> {
        let sql = Self::claim_sql(options.fair_scheduling);
        let mut jobs = sqlx::query_as::<_, Job>(&sql)
            .bind(options.batch_size)
            .bind(options.max_retries)
            .bind(options.user_id.as_deref())
            .bind(options.job_type.as_deref())
            .bind(visibility_timeout.as_secs_f64())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Failed to claim jobs"))?;

        // UPDATE .. RETURNING does not preserve the CTE order.
        if options.fair_scheduling == FairScheduling::Fifo {
            jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        }
        Ok(jobs)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to find job"))
    }

    async fn complete(&self, ids: &[Uuid], delete: bool) -> AppResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("Failed to begin ack transaction"))?;

        let sql = if delete {
            "DELETE FROM jobs WHERE id = ANY($1)"
        } else {
            "UPDATE jobs SET status = 'done', updated_at = NOW() WHERE id = ANY($1)"
        };
        let result = sqlx::query(sql)
            .bind(ids)
            .execute(&mut *tx)
            .await
            .map_err(db_err("Failed to acknowledge jobs"))?;

        let missing = (ids.len() as u64).saturating_sub(result.rows_affected());
        if missing > 0 {
            tx.rollback()
                .await
                .map_err(db_err("Failed to roll back ack transaction"))?;
            return Err(AppError::not_found(format!(
                "{missing} of {} jobs not found",
                ids.len()
            )));
        }

        tx.commit()
            .await
            .map_err(db_err("Failed to commit ack transaction"))
    }

    async fn fail(&self, id: Uuid, error: Option<&str>) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', error = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to mark job as failed"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Job {id} not found")));
        }
        Ok(())
    }

    async fn delete_terminal(
        &self,
        before: DateTime<Utc>,
        statuses: &[JobStatus],
        limit: i64,
    ) -> AppResult<u64> {
        let statuses: Vec<&str> = statuses.iter().map(JobStatus::as_str).collect();
        let result = sqlx::query(
            "DELETE FROM jobs WHERE id IN ( \
                SELECT id FROM jobs \
                WHERE status::TEXT = ANY($1) AND updated_at < $2 \
                ORDER BY updated_at ASC \
                LIMIT $3 \
                FOR UPDATE SKIP LOCKED \
             )",
        )
        .bind(&statuses)
        .bind(before)
        .bind(limit)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to clean up jobs"))?;
        Ok(result.rows_affected())
    }

    async fn count_by_type_and_status(
        &self,
        user_id: &str,
    ) -> AppResult<Vec<(String, JobStatus, i64)>> {
        sqlx::query_as::<_, (String, JobStatus, i64)>(
            "SELECT job_type, status, COUNT(*) FROM jobs \
             WHERE user_id = $1 GROUP BY job_type, status",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to count jobs"))
    }

    async fn health_check(&self) -> AppResult<bool> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|v| v == 1)
            .map_err(db_err("Job store health check failed"))
    }
}
