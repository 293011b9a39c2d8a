//! Background job domain entities.

pub mod model;
pub mod options;
pub mod stats;
pub mod status;

pub use model::{Job, NewJob};
pub use options::{CleanupOptions, DequeueOptions, FairScheduling};
pub use stats::{JobStats, StatusCounts};
pub use status::JobStatus;
