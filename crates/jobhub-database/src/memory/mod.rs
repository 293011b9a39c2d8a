//! In-process job store.

mod store;

pub use store::MemoryJobStore;
