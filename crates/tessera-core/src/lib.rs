//! Tessera Core Library
//!
//! Domain models, error types, configuration and input validation shared by
//! every Tessera ingest component.

pub mod config;
pub mod error;
pub mod models;
pub mod storage_types;
pub mod task_error;
pub mod validation;

pub use config::{Config, IngestConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use storage_types::StorageBackend;
pub use task_error::{TaskError, TaskResultExt};
