//! Per-tenant job statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::status::JobStatus;

/// Job counts broken down by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Pending jobs.
    pub pending: i64,
    /// Claimed jobs (including ones whose visibility window has lapsed).
    pub in_progress: i64,
    /// Completed jobs still kept in the store.
    pub done: i64,
    /// Failed jobs.
    pub failed: i64,
}

impl StatusCounts {
    /// Add `count` jobs of `status`.
    pub fn add(&mut self, status: JobStatus, count: i64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::InProgress => self.in_progress += count,
            JobStatus::Done => self.done += count,
            JobStatus::Failed => self.failed += count,
        }
    }

    /// Count for one status.
    pub fn get(&self, status: JobStatus) -> i64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::InProgress => self.in_progress,
            JobStatus::Done => self.done,
            JobStatus::Failed => self.failed,
        }
    }

    /// Sum over all statuses.
    pub fn total(&self) -> i64 {
        self.pending + self.in_progress + self.done + self.failed
    }
}

/// Statistics for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    /// Tenant the counts belong to.
    pub user_id: String,
    /// Counts over every job type.
    pub counts: StatusCounts,
    /// Counts per job type, when grouping was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_type: Option<BTreeMap<String, StatusCounts>>,
}

impl JobStats {
    /// Fold `(job_type, status, count)` rows into stats.
    pub fn from_rows(
        user_id: impl Into<String>,
        rows: impl IntoIterator<Item = (String, JobStatus, i64)>,
        group_by_type: bool,
    ) -> Self {
        let mut counts = StatusCounts::default();
        let mut by_type: BTreeMap<String, StatusCounts> = BTreeMap::new();

        for (job_type, status, count) in rows {
            counts.add(status, count);
            if group_by_type {
                by_type.entry(job_type).or_default().add(status, count);
            }
        }

        Self {
            user_id: user_id.into(),
            counts,
            by_type: group_by_type.then_some(by_type),
        }
    }
}
