//! Built-in job handler implementations.

pub mod cleanup;

use std::sync::Arc;

pub use cleanup::{CLEANUP_JOB_TYPE, CleanupJobHandler};

use crate::queue::JobQueue;
use crate::registry::HandlerRegistry;

/// Register every built-in handler, replacing earlier registrations.
pub fn register_defaults(registry: &HandlerRegistry, queue: &Arc<JobQueue>) {
    registry.register(
        CLEANUP_JOB_TYPE,
        Arc::new(CleanupJobHandler::new(Arc::clone(queue))),
    );
}
