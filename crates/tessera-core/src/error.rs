//! Error types module
//!
//! All ingest failures are unified under [`AppError`]. Each variant maps to one
//! contract-level error kind (`invalid-request`, `conflict`, `integrity`, ...)
//! which is what the HTTP layer and the import journal expose.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Expected errors like validation failures
    Debug,
    /// Recoverable issues and rejected content
    Warn,
    /// Unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error kind (e.g. "conflict")
    fn error_code(&self) -> &'static str;

    /// Whether the failing operation may succeed when retried
    fn is_recoverable(&self) -> bool;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Read-side storage failure (download, head); retried by the worker.
    #[error("Storage read error: {0}")]
    StorageRead(String),

    /// Write-side storage failure; terminal.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Extractor error: {0}")]
    Extractor(String),

    #[error("Transcode error: {0}")]
    Transcode(String),

    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Import cancelled")]
    Cancelled,

    #[error("Unknown MIME type: {0}")]
    UnknownMime(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidRequest(format!("UUID parsing error: {}", err))
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, sensitive, log_level).
fn app_error_static_metadata(err: &AppError) -> (u16, &'static str, bool, bool, LogLevel) {
    match err {
        AppError::InvalidRequest(_) => (400, "invalid-request", false, false, LogLevel::Debug),
        AppError::BadRequest(_) => (400, "bad-request", false, false, LogLevel::Debug),
        AppError::UnsupportedType(_) => (415, "unsupported-type", false, false, LogLevel::Debug),
        AppError::Conflict(_) => (409, "conflict", false, false, LogLevel::Warn),
        AppError::Integrity(_) => (422, "integrity", false, false, LogLevel::Warn),
        AppError::StorageRead(_) => (502, "storage", true, true, LogLevel::Error),
        AppError::Storage(_) => (500, "storage", false, true, LogLevel::Error),
        AppError::Extractor(_) => (500, "extractor", true, true, LogLevel::Warn),
        AppError::Transcode(_) => (500, "transcode", false, true, LogLevel::Warn),
        #[cfg(feature = "sqlx")]
        AppError::Database(_) => (500, "persistence", false, true, LogLevel::Error),
        AppError::Persistence(_) => (500, "persistence", false, true, LogLevel::Error),
        AppError::Cancelled => (409, "cancelled", false, false, LogLevel::Debug),
        AppError::UnknownMime(_) => (415, "unknown-mime", false, false, LogLevel::Warn),
        AppError::NotAuthorized(_) => (403, "not-authorized", false, false, LogLevel::Debug),
        AppError::NotFound(_) => (404, "not-found", false, false, LogLevel::Debug),
        AppError::Internal(_) => (500, "server-error", true, true, LogLevel::Error),
        AppError::InternalWithSource { .. } => (500, "server-error", true, true, LogLevel::Error),
    }
}

/// Connection-level failures that a later attempt may not hit. Anything the
/// database itself rejected is a terminal persistence failure.
#[cfg(feature = "sqlx")]
fn is_transient_database_error(err: &SqlxError) -> bool {
    matches!(
        err,
        SqlxError::PoolTimedOut | SqlxError::Io(_) | SqlxError::WorkerCrashed
    )
}

impl AppError {
    /// The variant payload without the kind prefix.
    pub fn detail(&self) -> String {
        match self {
            AppError::InvalidRequest(msg)
            | AppError::BadRequest(msg)
            | AppError::UnsupportedType(msg)
            | AppError::Conflict(msg)
            | AppError::Integrity(msg)
            | AppError::StorageRead(msg)
            | AppError::Storage(msg)
            | AppError::Extractor(msg)
            | AppError::Transcode(msg)
            | AppError::Persistence(msg)
            | AppError::UnknownMime(msg)
            | AppError::NotAuthorized(msg)
            | AppError::NotFound(msg)
            | AppError::Internal(msg) => msg.clone(),
            #[cfg(feature = "sqlx")]
            AppError::Database(e) => e.to_string(),
            AppError::Cancelled => "cancelled".to_string(),
            AppError::InternalWithSource { message, .. } => message.clone(),
        }
    }

    /// Reason line written to an import journal when this error ends it,
    /// e.g. `conflict: duplicate file`.
    pub fn journal_reason(&self) -> String {
        match self {
            AppError::Cancelled => "cancelled".to_string(),
            _ => format!("{}: {}", self.error_code(), self.detail()),
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        match self {
            #[cfg(feature = "sqlx")]
            AppError::Database(e) => is_transient_database_error(e),
            _ => app_error_static_metadata(self).2,
        }
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).3
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).4
    }

    fn client_message(&self) -> String {
        match self {
            AppError::StorageRead(_) | AppError::Storage(_) => {
                "Failed to access storage".to_string()
            }
            #[cfg(feature = "sqlx")]
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::Persistence(_) => "Failed to access database".to_string(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
            AppError::Extractor(_) => "Metadata extraction failed".to_string(),
            AppError::Transcode(_) => "Transcoding failed".to_string(),
            other => other.detail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "sqlx")]
    #[test]
    fn test_error_metadata_database() {
        let err = AppError::from(sqlx::Error::PoolClosed);
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "persistence");
        assert!(!err.is_recoverable());
        assert_eq!(err.client_message(), "Failed to access database");
        assert!(err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_database_write_failures_are_terminal() {
        let rejected = AppError::from(sqlx::Error::RowNotFound);
        assert!(!rejected.is_recoverable());
        assert!(rejected.journal_reason().starts_with("persistence"));

        let protocol = AppError::from(sqlx::Error::Protocol("bad message".into()));
        assert!(!protocol.is_recoverable());
    }

    #[test]
    fn test_connection_failures_are_transient() {
        assert!(AppError::from(sqlx::Error::PoolTimedOut).is_recoverable());
        let io = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(AppError::from(sqlx::Error::Io(io)).is_recoverable());
        assert_eq!(
            AppError::from(sqlx::Error::PoolTimedOut).error_code(),
            "persistence"
        );
    }

    #[test]
    fn test_conflict_is_terminal() {
        let err = AppError::Conflict("file already exists".to_string());
        assert_eq!(err.http_status_code(), 409);
        assert_eq!(err.error_code(), "conflict");
        assert!(!err.is_recoverable());
        assert_eq!(err.client_message(), "file already exists");
        assert_eq!(err.journal_reason(), "conflict: file already exists");
    }

    #[test]
    fn test_storage_read_retries_but_write_does_not() {
        assert!(AppError::StorageRead("timeout".into()).is_recoverable());
        assert!(!AppError::Storage("disk full".into()).is_recoverable());
        assert_eq!(AppError::Storage("x".into()).error_code(), "storage");
    }

    #[test]
    fn test_unknown_mime_reason() {
        let err = AppError::UnknownMime("no MIME type tag for a.bin".to_string());
        assert_eq!(err.http_status_code(), 415);
        assert!(err.journal_reason().starts_with("unknown-mime"));
    }

    #[test]
    fn test_cancelled_reason() {
        assert_eq!(AppError::Cancelled.journal_reason(), "cancelled");
        assert!(!AppError::Cancelled.is_recoverable());
    }
}
