//! Background execution for Tessera imports: a bounded worker pool that
//! claims pending import journals, retries transient failures, and runs
//! periodic maintenance jobs.

pub mod context;
pub mod periodic;
pub mod queue;

pub use context::ImportHandler;
pub use periodic::{spawn_periodic, PeriodicHandle, PeriodicJob};
pub use queue::{compute_retry_backoff, ImportQueue, ImportQueueConfig};
