//! Background worker pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Worker pool configuration.
///
/// `batch_size` and `max_workers` can also be set through the bare
/// `BATCH_SIZE` and `MAX_WORKERS` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WorkerConfig {
    /// Whether the daemon launches workers at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Jobs claimed per loop iteration.
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 1000))]
    pub batch_size: i64,
    /// Ceiling on concurrently running worker loops in this process.
    #[serde(default = "default_max_workers")]
    #[validate(range(min = 1, max = 256))]
    pub max_workers: usize,
    /// Pause between two batches of the same worker, in milliseconds.
    #[serde(default = "default_batch_pause")]
    pub batch_pause_ms: u64,
    /// Delay after a storage error before the worker retries, in milliseconds.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_ms: u64,
    /// Interval at which the daemon re-triggers drained workers, in seconds.
    #[serde(default = "default_restart_interval")]
    #[validate(range(min = 1))]
    pub restart_interval_seconds: u64,
}

impl WorkerConfig {
    /// Pause between batches as a [`Duration`].
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    /// Storage error backoff as a [`Duration`].
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// Daemon restart interval as a [`Duration`].
    pub fn restart_interval(&self) -> Duration {
        Duration::from_secs(self.restart_interval_seconds)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            batch_size: default_batch_size(),
            max_workers: default_max_workers(),
            batch_pause_ms: default_batch_pause(),
            error_backoff_ms: default_error_backoff(),
            restart_interval_seconds: default_restart_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> i64 {
    5
}

fn default_max_workers() -> usize {
    2
}

fn default_batch_pause() -> u64 {
    1000
}

fn default_error_backoff() -> u64 {
    5000
}

fn default_restart_interval() -> u64 {
    30
}
