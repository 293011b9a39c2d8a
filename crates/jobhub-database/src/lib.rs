//! # jobhub-database
//!
//! PostgreSQL connection management, schema migrations, and the job store
//! implementations behind the queue service.
//!
//! - [`repositories::JobRepository`]: PostgreSQL store, claims with
//!   `FOR UPDATE SKIP LOCKED`
//! - [`memory::MemoryJobStore`]: in-process store for tests and embedding

pub mod connection;
#[cfg(feature = "memory")]
pub mod memory;
pub mod migration;
pub mod repositories;
pub mod store;

pub use connection::DatabasePool;
#[cfg(feature = "memory")]
pub use memory::MemoryJobStore;
pub use repositories::JobRepository;
pub use store::JobStore;
