//! Job queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Queue-level defaults shared by producers and workers.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QueueConfig {
    /// How long a claimed job stays invisible to other claimants.
    #[serde(default = "default_visibility_timeout")]
    #[validate(range(min = 1))]
    pub visibility_timeout_seconds: u64,
    /// Retry ceiling applied when a producer does not set one.
    #[serde(default = "default_max_retries")]
    #[validate(range(min = 0))]
    pub default_max_retries: i32,
    /// Age threshold for the `cleanup-jobs` handler.
    #[serde(default = "default_cleanup_days")]
    #[validate(range(min = 0))]
    pub cleanup_older_than_days: i64,
    /// Rows removed per cleanup call.
    #[serde(default = "default_cleanup_limit")]
    #[validate(range(min = 1))]
    pub cleanup_limit: i64,
}

impl QueueConfig {
    /// Visibility timeout as a [`Duration`].
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_seconds: default_visibility_timeout(),
            default_max_retries: default_max_retries(),
            cleanup_older_than_days: default_cleanup_days(),
            cleanup_limit: default_cleanup_limit(),
        }
    }
}

fn default_visibility_timeout() -> u64 {
    60
}

fn default_max_retries() -> i32 {
    3
}

fn default_cleanup_days() -> i64 {
    7
}

fn default_cleanup_limit() -> i64 {
    1000
}
