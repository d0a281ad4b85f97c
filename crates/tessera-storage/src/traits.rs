//! Storage abstraction trait
//!
//! Every backend implements [`BlobStore`]; the ingest pipeline never touches
//! backend specifics.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tessera_core::AppError;
use thiserror::Error;

use crate::StorageBackend;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => AppError::NotFound(format!("object {}", key)),
            StorageError::InvalidKey(msg) => AppError::InvalidRequest(msg),
            StorageError::UploadFailed(msg)
            | StorageError::DeleteFailed(msg)
            | StorageError::ConfigError(msg) => AppError::Storage(msg),
            StorageError::DownloadFailed(msg) | StorageError::BackendError(msg) => {
                AppError::StorageRead(msg)
            }
            StorageError::IoError(e) => AppError::StorageRead(e.to_string()),
        }
    }
}

/// What `head` reports about a stored object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub name: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub e_tag: Option<String>,
}

impl ObjectInfo {
    /// Time since the object was last written, zero for clock skew.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_modified).to_std().unwrap_or_default()
    }
}

/// How a client should fetch an object.
#[derive(Debug, Clone, PartialEq)]
pub enum ServeTarget {
    /// Stream the file from local disk
    LocalPath(PathBuf),
    /// Redirect to a time-limited URL
    Presigned { url: String, expires_in: Duration },
}

/// Byte storage shared by the whole process.
///
/// Implementations must be safe for concurrent `put_*` calls on distinct names.
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn backend_type(&self) -> StorageBackend;

    /// Store the contents of `src` under `name`.
    async fn put_file(&self, src: &Path, name: &str) -> StorageResult<ObjectInfo>;

    async fn put_bytes(&self, name: &str, data: Bytes) -> StorageResult<ObjectInfo>;

    /// Copy the object into `dest`, returning the number of bytes written.
    async fn download_to_file(&self, name: &str, dest: &Path) -> StorageResult<u64>;

    async fn serve(&self, name: &str) -> StorageResult<ServeTarget>;

    /// `None` when the object does not exist.
    async fn head(&self, name: &str) -> StorageResult<Option<ObjectInfo>>;

    /// Deleting a missing object succeeds.
    async fn delete(&self, name: &str) -> StorageResult<()>;

    async fn exists(&self, name: &str) -> StorageResult<bool> {
        Ok(self.head(name).await?.is_some())
    }
}
