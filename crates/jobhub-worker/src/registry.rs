//! Handler registry mapping job types to the code that processes them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing;

use jobhub_core::error::AppError;
use jobhub_entity::job::Job;

/// Trait for job handler implementations supplied by feature modules.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Process one job. The payload is read-only input.
    async fn handle(&self, job: &Job) -> Result<(), HandlerError>;
}

/// Error returned by a handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Failure that may succeed on a later claim.
    #[error("{0}")]
    Failed(String),

    /// Failure that no retry can fix; the job is failed immediately.
    #[error("Permanent job failure: {0}")]
    Permanent(String),

    /// The handler task panicked.
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// Error from a queue or store call made by the handler.
    #[error(transparent)]
    App(#[from] AppError),
}

impl HandlerError {
    /// Retryable failure with a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Non-retryable failure with a message.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Whether the job should be failed without consulting its retry budget.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

/// Adapter that lets a plain async closure act as a [`JobHandler`].
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        (self.0)(job.clone()).await
    }
}

/// Registered job handlers, keyed by job type.
///
/// Registering a type that already has a handler replaces it, so exactly
/// one handler runs per dispatched job.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `job_type`, returning the handler it replaced.
    pub fn register(
        &self,
        job_type: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> Option<Arc<dyn JobHandler>> {
        let job_type = job_type.into();
        let previous = self.handlers.insert(job_type.clone(), handler);
        if previous.is_some() {
            tracing::debug!(job_type = %job_type, "Replaced job handler");
        } else {
            tracing::info!(job_type = %job_type, "Registered job handler");
        }
        previous
    }

    /// Register an async closure for `job_type`.
    pub fn register_fn<F, Fut>(&self, job_type: impl Into<String>, handler: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register(job_type, Arc::new(FnHandler(handler)));
    }

    /// Handler for `job_type`, if any.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).map(|entry| Arc::clone(entry.value()))
    }

    /// Check if a handler is registered for a job type.
    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.registered_types())
            .finish()
    }
}
