//! Read access to web archive buckets.
//!
//! Web captures (meta JSON, checksum manifest, media streams) live in buckets
//! that are not the core's own store. Imports only ever read from them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use crate::keys::validate_key;
use crate::traits::{ObjectInfo, StorageError, StorageResult};

#[async_trait]
pub trait ArchiveSource: Send + Sync {
    async fn get_bytes(&self, bucket: &str, key: &str) -> StorageResult<Bytes>;

    /// `None` when the object does not exist.
    async fn head(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectInfo>>;

    async fn download_to_file(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<u64>;
}

fn validate_bucket(bucket: &str) -> StorageResult<()> {
    if bucket.is_empty() || bucket.contains('/') || bucket.contains('\\') || bucket.starts_with('.')
    {
        return Err(StorageError::InvalidKey(format!(
            "bucket '{}' is not allowed",
            bucket.escape_debug()
        )));
    }
    Ok(())
}

/// Buckets as subdirectories of a local root; used with local storage and in tests.
#[cfg(feature = "storage-local")]
#[derive(Clone, Debug)]
pub struct LocalArchive {
    root: PathBuf,
}

#[cfg(feature = "storage-local")]
impl LocalArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        Ok(self.root.join(bucket).join(key))
    }
}

#[cfg(feature = "storage-local")]
#[async_trait]
impl ArchiveSource for LocalArchive {
    async fn get_bytes(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("{}/{}", bucket, key)))
            }
            Err(e) => Err(StorageError::DownloadFailed(e.to_string())),
        }
    }

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectInfo>> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(ObjectInfo {
                name: key.to_string(),
                size: meta.len(),
                last_modified: meta
                    .modified()
                    .map(chrono::DateTime::<chrono::Utc>::from)
                    .unwrap_or_else(|_| chrono::Utc::now()),
                e_tag: None,
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn download_to_file(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<u64> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::copy(&path, dest).await {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("{}/{}", bucket, key)))
            }
            Err(e) => Err(StorageError::DownloadFailed(e.to_string())),
        }
    }
}

/// S3 buckets sharing one set of connection settings. Clients are built per
/// bucket on first use and cached.
#[cfg(feature = "storage-s3")]
pub struct S3Archive {
    settings: crate::s3::S3Settings,
    clients: std::sync::Mutex<
        std::collections::HashMap<String, std::sync::Arc<object_store::aws::AmazonS3>>,
    >,
}

#[cfg(feature = "storage-s3")]
impl S3Archive {
    pub fn new(settings: crate::s3::S3Settings) -> Self {
        Self {
            settings,
            clients: Default::default(),
        }
    }

    fn client(&self, bucket: &str) -> StorageResult<std::sync::Arc<object_store::aws::AmazonS3>> {
        validate_bucket(bucket)?;
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| StorageError::BackendError("archive client cache poisoned".into()))?;
        if let Some(client) = clients.get(bucket) {
            return Ok(client.clone());
        }
        let client = std::sync::Arc::new(self.settings.build(bucket)?);
        clients.insert(bucket.to_string(), client.clone());
        Ok(client)
    }
}

#[cfg(feature = "storage-s3")]
#[async_trait]
impl ArchiveSource for S3Archive {
    async fn get_bytes(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        validate_key(key)?;
        let client = self.client(bucket)?;
        crate::s3::get_object_bytes(&client, key).await
    }

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectInfo>> {
        validate_key(key)?;
        let client = self.client(bucket)?;
        crate::s3::head_object(&client, bucket, key).await
    }

    async fn download_to_file(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<u64> {
        validate_key(key)?;
        let client = self.client(bucket)?;
        crate::s3::download_object(&client, bucket, key, dest).await
    }
}
