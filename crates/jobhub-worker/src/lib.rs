//! Job queue service and worker runtime for JobHub.
//!
//! This crate provides:
//! - [`JobQueue`]: enqueue, atomic batch dequeue, ack/nack, cleanup, stats
//! - [`HandlerRegistry`]: job-type to handler mapping supplied by feature modules
//! - [`WorkerPool`]: bounded set of polling loops that drain the queue
//! - Built-in handlers registered on every pool start

pub mod jobs;
pub mod pool;
pub mod queue;
pub mod registry;

pub use pool::{WorkerPool, WorkerState};
pub use queue::JobQueue;
pub use registry::{HandlerError, HandlerRegistry, JobHandler};
