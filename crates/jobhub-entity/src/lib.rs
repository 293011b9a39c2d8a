//! # jobhub-entity
//!
//! Domain model for the job queue: the [`job::Job`] row, its status
//! lifecycle, and the option types accepted by queue operations.

pub mod job;
