//! Live sports ingestion and wager grading.
//!
//! Provider data is fetched concurrently, classified into the
//! Upcoming → Live → Final lifecycle and written through a single-writer
//! queue; pending wagers are graded against final results and every notable
//! transition is persisted as an operational alert.

pub mod config;
pub mod db;
pub mod error;
pub mod grading;
pub mod lifecycle;
pub mod provider;
pub mod queue;
pub mod scheduler;

pub use scheduler::{Scheduler, SchedulerSettings};
