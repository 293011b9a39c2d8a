//! Option types accepted by dequeue and cleanup.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::{Validate, ValidationError};

use super::status::JobStatus;

/// Ordering policy applied when selecting claimable jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FairScheduling {
    /// Oldest jobs first.
    #[default]
    Fifo,
    /// Pseudo-random order, so one tenant's backlog cannot starve others.
    Random,
}

impl fmt::Display for FairScheduling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fifo => write!(f, "fifo"),
            Self::Random => write!(f, "random"),
        }
    }
}

impl FromStr for FairScheduling {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fifo" => Ok(Self::Fifo),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown scheduling policy '{other}' (expected fifo or random)")),
        }
    }
}

/// Parameters for a single atomic claim.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DequeueOptions {
    /// Maximum number of jobs to claim.
    #[validate(range(min = 1, max = 1000))]
    pub batch_size: i64,
    /// Extra caller-side ceiling on `retry_count`, applied on top of the
    /// job's own `max_retries`.
    ///
    /// Defaults to `None` rather than a fixed ceiling of 3, so jobs enqueued
    /// with a larger `max_retries` stay claimable through their whole budget.
    #[validate(range(min = 0))]
    pub max_retries: Option<i32>,
    /// Only claim jobs of this tenant.
    #[validate(length(min = 1))]
    pub user_id: Option<String>,
    /// Only claim jobs of this type.
    #[validate(length(min = 1))]
    pub job_type: Option<String>,
    /// Selection order.
    pub fair_scheduling: FairScheduling,
}

impl Default for DequeueOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_retries: None,
            user_id: None,
            job_type: None,
            fair_scheduling: FairScheduling::Fifo,
        }
    }
}

impl DequeueOptions {
    /// Claim up to `batch_size` jobs.
    pub fn batch(batch_size: i64) -> Self {
        Self {
            batch_size,
            ..Self::default()
        }
    }

    /// Restrict the claim to one tenant.
    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Restrict the claim to one job type.
    pub fn of_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    /// Select the ordering policy.
    pub fn with_scheduling(mut self, fair_scheduling: FairScheduling) -> Self {
        self.fair_scheduling = fair_scheduling;
        self
    }

    /// Apply an extra retry ceiling.
    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Parameters for deleting old terminal jobs.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CleanupOptions {
    /// Only delete jobs last updated more than this many days ago.
    #[validate(range(min = 0, max = 36500))]
    pub older_than_days: i64,
    /// Statuses eligible for deletion; terminal statuses only.
    #[validate(custom(function = "validate_terminal_statuses"))]
    pub statuses: Vec<JobStatus>,
    /// Maximum rows deleted per call.
    #[validate(range(min = 1))]
    pub limit: i64,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            older_than_days: 7,
            statuses: vec![JobStatus::Done, JobStatus::Failed],
            limit: 1000,
        }
    }
}

fn validate_terminal_statuses(statuses: &[JobStatus]) -> Result<(), ValidationError> {
    if statuses.is_empty() {
        return Err(ValidationError::new("empty_statuses"));
    }
    if statuses.iter().any(|s| !s.is_terminal()) {
        return Err(ValidationError::new("non_terminal_status"));
    }
    Ok(())
}
