//! Worker pool: a bounded set of polling loops that drain the job queue.
//!
//! Each worker repeatedly claims a batch, runs every job of the batch
//! concurrently, and settles it. A worker that finds the queue empty
//! exits; [`WorkerPool::start`] tops the pool back up.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing;

use jobhub_core::config::WorkerConfig;
use jobhub_entity::job::{DequeueOptions, FairScheduling, Job};

use crate::jobs;
use crate::queue::JobQueue;
use crate::registry::{HandlerError, HandlerRegistry};

/// Lifecycle of a single worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Launched, not yet polling.
    Idle,
    /// Claiming and processing batches.
    Running,
    /// Stop requested; finishing the in-flight batch.
    Draining,
    /// Loop has exited.
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Mutable pool bookkeeping guarded by one lock.
#[derive(Debug)]
struct PoolInner {
    /// Stop flag shared by the loops launched since the last restart.
    cancel: CancellationToken,
    /// Handles of launched loops.
    tasks: JoinSet<()>,
}

/// Bounded pool of worker loops over one [`JobQueue`].
#[derive(Debug)]
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
    /// Loops that have been launched and not yet exited.
    active: Arc<AtomicUsize>,
    /// Last known state per worker id.
    states: Arc<DashMap<usize, WorkerState>>,
    next_worker_id: AtomicUsize,
    inner: Mutex<PoolInner>,
}

impl WorkerPool {
    /// Create a pool. No worker runs until [`WorkerPool::start`].
    pub fn new(queue: Arc<JobQueue>, registry: Arc<HandlerRegistry>, config: WorkerConfig) -> Self {
        Self {
            queue,
            registry,
            config,
            active: Arc::new(AtomicUsize::new(0)),
            states: Arc::new(DashMap::new()),
            next_worker_id: AtomicUsize::new(1),
            inner: Mutex::new(PoolInner {
                cancel: CancellationToken::new(),
                tasks: JoinSet::new(),
            }),
        }
    }

    /// Queue the pool works on.
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Registry the pool dispatches through.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Number of loops currently alive.
    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Snapshot of every tracked worker's state, ordered by worker id.
    pub fn worker_states(&self) -> Vec<(usize, WorkerState)> {
        let mut states: Vec<(usize, WorkerState)> =
            self.states.iter().map(|e| (*e.key(), *e.value())).collect();
        states.sort_by_key(|(id, _)| *id);
        states
    }

    /// Register the built-in handlers and launch workers up to `max_workers`.
    ///
    /// Returns how many new loops were launched; calling it while the pool
    /// is full launches none. Loops still draining after [`WorkerPool::stop`]
    /// do not count toward the limit, since they claim no further batches,
    /// so [`WorkerPool::active_workers`] may briefly exceed `max_workers`.
    pub async fn start(&self) -> usize {
        jobs::register_defaults(&self.registry, &self.queue);

        let mut inner = self.inner.lock().await;
        if inner.cancel.is_cancelled() {
            inner.cancel = CancellationToken::new();
        }

        while let Some(result) = inner.tasks.try_join_next() {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker task ended abnormally");
            }
        }
        self.states.retain(|_, state| *state != WorkerState::Stopped);

        let running = self
            .states
            .iter()
            .filter(|e| matches!(*e.value(), WorkerState::Idle | WorkerState::Running))
            .count();
        let to_launch = self.config.max_workers.saturating_sub(running);

        for _ in 0..to_launch {
            let worker_id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
            self.active.fetch_add(1, Ordering::SeqCst);
            self.states.insert(worker_id, WorkerState::Idle);

            let worker = Worker {
                id: worker_id,
                queue: Arc::clone(&self.queue),
                registry: Arc::clone(&self.registry),
                config: self.config.clone(),
                cancel: inner.cancel.clone(),
                states: Arc::clone(&self.states),
                _active: ActiveGuard(Arc::clone(&self.active)),
            };
            inner.tasks.spawn(worker.run());
        }

        if to_launch > 0 {
            tracing::info!(
                launched = to_launch,
                active = self.active_workers(),
                max_workers = self.config.max_workers,
                batch_size = self.config.batch_size,
                "Started workers"
            );
        }
        to_launch
    }

    /// Ask every worker to stop after its in-flight batch.
    pub async fn stop(&self) {
        let inner = self.inner.lock().await;
        inner.cancel.cancel();
        for mut entry in self.states.iter_mut() {
            if matches!(*entry.value(), WorkerState::Idle | WorkerState::Running) {
                *entry.value_mut() = WorkerState::Draining;
            }
        }
        tracing::info!(active = self.active_workers(), "Stopping workers");
    }

    /// Wait until every launched loop has exited, without stopping them.
    pub async fn wait_idle(&self) {
        let mut tasks = {
            let mut inner = self.inner.lock().await;
            std::mem::take(&mut inner.tasks)
        };
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker task ended abnormally");
            }
        }
    }

    /// Stop every worker and wait for in-flight batches to finish.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.wait_idle().await;
        tracing::info!("Worker pool shut down");
    }
}

/// Decrements the pool's live-loop counter when a worker exits, even by panic.
#[derive(Debug)]
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One polling loop.
struct Worker {
    id: usize,
    queue: Arc<JobQueue>,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
    cancel: CancellationToken,
    states: Arc<DashMap<usize, WorkerState>>,
    _active: ActiveGuard,
}

impl Worker {
    fn set_state(&self, state: WorkerState) {
        self.states.insert(self.id, state);
    }

    /// Idle -> Running, unless a stop already moved this worker to Draining.
    fn mark_running(&self) {
        if let Some(mut state) = self.states.get_mut(&self.id) {
            if *state == WorkerState::Idle {
                *state = WorkerState::Running;
            }
        }
    }

    async fn run(self) {
        let options = DequeueOptions::batch(self.config.batch_size)
            .with_scheduling(FairScheduling::Random);
        let mut processed = 0usize;

        self.mark_running();
        tracing::debug!(worker_id = self.id, "Worker started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let batch = match self.queue.dequeue(&options).await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(
                        worker_id = self.id,
                        error = %e,
                        backoff_ms = self.config.error_backoff_ms,
                        "Failed to dequeue jobs"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = time::sleep(self.config.error_backoff()) => continue,
                    }
                }
            };

            if batch.is_empty() {
                tracing::debug!(worker_id = self.id, "Queue drained");
                break;
            }

            processed += batch.len();
            let settled = join_all(batch.into_iter().map(|job| self.process(job))).await;

            let pause = if settled.iter().all(|ok| *ok) {
                self.config.batch_pause()
            } else {
                tracing::warn!(
                    worker_id = self.id,
                    backoff_ms = self.config.error_backoff_ms,
                    "Failed to settle jobs, backing off"
                );
                self.config.error_backoff()
            };
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = time::sleep(pause) => {}
            }
        }

        self.set_state(WorkerState::Stopped);
        tracing::info!(worker_id = self.id, processed, "Worker stopped");
    }

    /// Run one job's handler and settle the job.
    ///
    /// Returns `false` when writing the outcome to the store failed; the job
    /// is then left for visibility recovery.
    async fn process(&self, job: Job) -> bool {
        let Some(handler) = self.registry.get(&job.job_type) else {
            let message = format!("No handler registered for job type '{}'", job.job_type);
            tracing::warn!(worker_id = self.id, job_id = %job.id, "{}", message);
            return self.fail(&job, &message).await;
        };

        tracing::debug!(
            worker_id = self.id,
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.retry_count,
            max_retries = job.max_retries,
            "Processing job"
        );

        // Each handler runs in its own task so a panic stays with its job.
        let task_job = job.clone();
        let outcome = tokio::spawn(async move { handler.handle(&task_job).await })
            .await
            .unwrap_or_else(|e| Err(HandlerError::Panicked(e.to_string())));

        match outcome {
            Ok(()) => match self.queue.ack(job.id, true).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to acknowledge job");
                    false
                }
            },
            Err(e) if e.is_permanent() || job.retries_exhausted() => {
                tracing::error!(
                    worker_id = self.id,
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempt = job.retry_count,
                    error = %e,
                    "Job failed permanently"
                );
                self.fail(&job, &e.to_string()).await
            }
            Err(e) => {
                tracing::warn!(
                    worker_id = self.id,
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempt = job.retry_count,
                    max_retries = job.max_retries,
                    error = %e,
                    "Job failed, will retry after visibility timeout"
                );
                true
            }
        }
    }

    async fn fail(&self, job: &Job, message: &str) -> bool {
        match self.queue.nack(job.id, Some(message)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to mark job as failed");
                false
            }
        }
    }
}
