//! Worker pool behaviour over the in-memory job store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tokio::time::{Instant, timeout};

use jobhub_core::config::{QueueConfig, WorkerConfig};
use jobhub_database::MemoryJobStore;
use jobhub_entity::job::{JobStatus, NewJob};
use jobhub_worker::jobs::CLEANUP_JOB_TYPE;
use jobhub_worker::{HandlerError, HandlerRegistry, JobQueue, WorkerPool, WorkerState};

const DRAIN_LIMIT: Duration = Duration::from_secs(10);

struct Harness {
    store: MemoryJobStore,
    queue: Arc<JobQueue>,
    registry: Arc<HandlerRegistry>,
}

impl Harness {
    /// Claims stay hidden for the default visibility timeout.
    fn new() -> Self {
        Self::with_visibility(QueueConfig::default().visibility_timeout())
    }

    /// Claims expire immediately, so an unsettled job is reclaimed on the next batch.
    fn retrying() -> Self {
        Self::with_visibility(Duration::ZERO)
    }

    fn with_visibility(visibility: Duration) -> Self {
        let store = MemoryJobStore::new();
        let queue = JobQueue::new(Arc::new(store.clone()), &QueueConfig::default())
            .with_visibility_timeout(visibility);
        Self {
            store,
            queue: Arc::new(queue),
            registry: Arc::new(HandlerRegistry::new()),
        }
    }

    fn pool(&self, max_workers: usize, batch_size: i64) -> WorkerPool {
        let config = WorkerConfig {
            max_workers,
            batch_size,
            batch_pause_ms: 0,
            error_backoff_ms: 10,
            ..WorkerConfig::default()
        };
        WorkerPool::new(Arc::clone(&self.queue), Arc::clone(&self.registry), config)
    }
}

fn counting_handler(
    registry: &HandlerRegistry,
    job_type: &str,
    result: fn() -> Result<(), HandlerError>,
) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    registry.register_fn(job_type, move |_job| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            result()
        }
    });
    calls
}

async fn drain(pool: &WorkerPool) {
    timeout(DRAIN_LIMIT, pool.wait_idle())
        .await
        .expect("workers did not drain in time");
}

#[tokio::test]
async fn test_successful_jobs_are_deleted() {
    let h = Harness::new();
    let calls = counting_handler(&h.registry, "fetch-bookmark-metadata", || Ok(()));
    let batch = (0..12)
        .map(|i| NewJob::new(format!("user-{}", i % 3), "fetch-bookmark-metadata"))
        .collect();
    h.queue.enqueue_batch(batch).await.unwrap();

    let pool = h.pool(3, 4);
    assert_eq!(pool.start().await, 3);
    drain(&pool).await;

    assert_eq!(calls.load(Ordering::SeqCst), 12);
    assert!(h.store.all().await.is_empty());
    assert_eq!(pool.active_workers(), 0);
}

#[tokio::test]
async fn test_zero_retry_budget_fails_after_one_attempt() {
    let h = Harness::new();
    let calls = counting_handler(&h.registry, "t", || Err(HandlerError::failed("boom")));
    let job = h
        .queue
        .enqueue(NewJob::new("u", "t").with_max_retries(0))
        .await
        .unwrap();

    let pool = h.pool(1, 1);
    pool.start().await;
    drain(&pool).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let failed = h.queue.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn test_retry_budget_allows_max_retries_plus_one_attempts() {
    let h = Harness::retrying();
    let calls = counting_handler(&h.registry, "t", || Err(HandlerError::failed("flaky")));
    let job = h.queue.enqueue(NewJob::new("u", "t")).await.unwrap();

    let pool = h.pool(1, 1);
    pool.start().await;
    drain(&pool).await;

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    let failed = h.queue.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.retry_count, 4);

    let stats = h.queue.stats("u", false).await.unwrap();
    assert_eq!(stats.counts.failed, 1);
    assert_eq!(stats.counts.total(), 1);
}

#[tokio::test]
async fn test_permanent_error_skips_retries() {
    let h = Harness::new();
    let calls = counting_handler(&h.registry, "t", || {
        Err(HandlerError::permanent("invalid url"))
    });
    let job = h.queue.enqueue(NewJob::new("u", "t")).await.unwrap();

    let pool = h.pool(1, 1);
    pool.start().await;
    drain(&pool).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let failed = h.queue.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("Permanent job failure: invalid url"));
}

#[tokio::test]
async fn test_missing_handler_fails_job() {
    let h = Harness::new();
    let job = h.queue.enqueue(NewJob::new("u", "unknown-type")).await.unwrap();

    let pool = h.pool(1, 5);
    pool.start().await;
    drain(&pool).await;

    let failed = h.queue.get(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(
        failed.error.as_deref(),
        Some("No handler registered for job type 'unknown-type'")
    );
    assert_eq!(failed.retry_count, 1);
}

#[tokio::test]
async fn test_panicking_handler_does_not_stop_the_batch() {
    let h = Harness::new();
    h.registry.register_fn("explode", |job| async move {
        if job.payload.is_none() {
            panic!("handler blew up");
        }
        Ok(())
    });
    let calls = counting_handler(&h.registry, "fine", || Ok(()));

    let exploding = h
        .queue
        .enqueue(NewJob::new("u", "explode").with_max_retries(0))
        .await
        .unwrap();
    for _ in 0..3 {
        h.queue.enqueue(NewJob::new("u", "fine")).await.unwrap();
    }

    let pool = h.pool(1, 10);
    pool.start().await;
    drain(&pool).await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let failed = h.queue.get(exploding.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().starts_with("Handler panicked"));
    assert_eq!(h.store.all().await.len(), 1);
}

#[tokio::test]
async fn test_storage_errors_back_off_and_recover() {
    let h = Harness::new();
    let calls = counting_handler(&h.registry, "t", || Ok(()));
    h.queue.enqueue(NewJob::new("u", "t")).await.unwrap();
    h.store.fail_next_claims(3);

    let pool = h.pool(1, 1);
    pool.start().await;
    drain(&pool).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(h.store.all().await.is_empty());
}

#[tokio::test]
async fn test_start_tops_up_to_max_workers() {
    let h = Harness::new();
    let gate = Arc::new(Semaphore::new(0));
    let handler_gate = Arc::clone(&gate);
    h.registry.register_fn("blocking", move |_job| {
        let gate = Arc::clone(&handler_gate);
        async move {
            gate.acquire().await.map_err(|e| HandlerError::failed(e.to_string()))?.forget();
            Ok(())
        }
    });
    for _ in 0..2 {
        h.queue.enqueue(NewJob::new("u", "blocking")).await.unwrap();
    }

    let pool = h.pool(2, 1);
    assert_eq!(pool.start().await, 2);
    assert_eq!(pool.start().await, 0);
    assert_eq!(pool.active_workers(), 2);
    assert_eq!(pool.worker_states().len(), 2);

    gate.add_permits(2);
    drain(&pool).await;
    assert_eq!(pool.active_workers(), 0);
    assert!(
        pool.worker_states()
            .iter()
            .all(|(_, state)| *state == WorkerState::Stopped)
    );

    // Drained workers are replaced on the next trigger.
    assert_eq!(pool.start().await, 2);
    drain(&pool).await;
    assert_eq!(pool.worker_states().len(), 2);
}

#[tokio::test]
async fn test_shutdown_finishes_in_flight_batch() {
    let h = Harness::new();
    let started = Arc::new(Notify::new());
    let handler_started = Arc::clone(&started);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    h.registry.register_fn("slow", move |_job| {
        let started = Arc::clone(&handler_started);
        let counter = Arc::clone(&counter);
        async move {
            started.notify_one();
            tokio::time::sleep(Duration::from_millis(50)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    for _ in 0..3 {
        h.queue.enqueue(NewJob::new("u", "slow")).await.unwrap();
    }

    let pool = h.pool(1, 1);
    pool.start().await;
    timeout(DRAIN_LIMIT, started.notified()).await.unwrap();

    pool.stop().await;
    assert!(
        pool.worker_states()
            .iter()
            .all(|(_, state)| *state == WorkerState::Draining)
    );
    timeout(DRAIN_LIMIT, pool.shutdown()).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let remaining = h.store.all().await;
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|j| j.status == JobStatus::Pending));
    assert_eq!(pool.active_workers(), 0);
}

#[tokio::test]
async fn test_settle_failure_backs_off_then_recovers() {
    let h = Harness::retrying();
    let calls = counting_handler(&h.registry, "t", || Ok(()));
    h.queue.enqueue(NewJob::new("u", "t")).await.unwrap();

    let config = WorkerConfig {
        max_workers: 1,
        batch_size: 1,
        batch_pause_ms: 0,
        error_backoff_ms: 200,
        ..WorkerConfig::default()
    };
    let pool = WorkerPool::new(Arc::clone(&h.queue), Arc::clone(&h.registry), config);

    h.store.fail_next_writes(1);
    let started = Instant::now();
    pool.start().await;
    drain(&pool).await;

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(h.store.all().await.is_empty());
}

#[tokio::test]
async fn test_start_after_stop_replaces_draining_workers() {
    let h = Harness::new();
    let gate = Arc::new(Semaphore::new(0));
    let started = Arc::new(Notify::new());
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let gate = Arc::clone(&gate);
        let started = Arc::clone(&started);
        let calls = Arc::clone(&calls);
        h.registry.register_fn("gated", move |_job| {
            let gate = Arc::clone(&gate);
            let started = Arc::clone(&started);
            let calls = Arc::clone(&calls);
            async move {
                started.notify_one();
                gate.acquire().await.map_err(|e| HandlerError::failed(e.to_string()))?.forget();
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
    }
    for _ in 0..3 {
        h.queue.enqueue(NewJob::new("u", "gated")).await.unwrap();
    }

    let pool = h.pool(1, 1);
    assert_eq!(pool.start().await, 1);
    timeout(DRAIN_LIMIT, started.notified()).await.unwrap();

    pool.stop().await;
    assert_eq!(pool.start().await, 1);
    assert_eq!(pool.active_workers(), 2);

    gate.add_permits(3);
    drain(&pool).await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(h.store.all().await.is_empty());
    assert_eq!(pool.active_workers(), 0);
}

#[tokio::test]
async fn test_restart_after_shutdown() {
    let h = Harness::new();
    let calls = counting_handler(&h.registry, "t", || Ok(()));

    let pool = h.pool(2, 5);
    pool.start().await;
    pool.shutdown().await;

    h.queue.enqueue(NewJob::new("u", "t")).await.unwrap();
    assert_eq!(pool.start().await, 2);
    drain(&pool).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_start_registers_builtin_handlers_idempotently() {
    let h = Harness::new();
    let pool = h.pool(1, 1);

    pool.start().await;
    drain(&pool).await;
    pool.start().await;
    drain(&pool).await;

    assert!(h.registry.contains(CLEANUP_JOB_TYPE));
    assert_eq!(h.registry.registered_types(), vec![CLEANUP_JOB_TYPE.to_string()]);
}

#[tokio::test]
async fn test_cleanup_job_runs_through_the_pool() {
    let h = Harness::new();
    let calls = counting_handler(&h.registry, "t", || Ok(()));
    let done = h.queue.enqueue(NewJob::new("u", "t")).await.unwrap();
    h.queue.ack(done.id, false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    h.queue
        .enqueue(
            NewJob::new("system", CLEANUP_JOB_TYPE)
                .with_payload(serde_json::json!({ "older_than_days": 0 })),
        )
        .await
        .unwrap();

    let pool = h.pool(1, 5);
    pool.start().await;
    drain(&pool).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(h.store.all().await.is_empty());
}
