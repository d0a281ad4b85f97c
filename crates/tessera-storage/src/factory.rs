use std::sync::Arc;

use tessera_core::Config;

#[cfg(feature = "storage-local")]
use crate::archive::LocalArchive;
#[cfg(feature = "storage-s3")]
use crate::archive::S3Archive;
#[cfg(feature = "storage-local")]
use crate::local::LocalStorage;
#[cfg(feature = "storage-s3")]
use crate::s3::{S3Settings, S3Storage};
use crate::{ArchiveSource, BlobStore, StorageBackend, StorageError, StorageResult};

#[cfg(feature = "storage-s3")]
fn s3_settings(config: &Config) -> StorageResult<S3Settings> {
    let region = config
        .s3_region()
        .map(String::from)
        .ok_or_else(|| StorageError::ConfigError("S3_REGION or AWS_REGION not configured".into()))?;
    Ok(S3Settings {
        region,
        endpoint: config.s3_endpoint().map(String::from),
        access_key_id: config.aws_access_key_id().map(String::from),
        secret_access_key: config.aws_secret_access_key().map(String::from),
    })
}

/// Create the blob store selected by `STORAGE_BACKEND`.
pub async fn create_blob_store(config: &Config) -> StorageResult<Arc<dyn BlobStore>> {
    match config.storage_backend() {
        #[cfg(feature = "storage-s3")]
        StorageBackend::Remote => {
            let bucket = config
                .s3_bucket()
                .map(String::from)
                .ok_or_else(|| StorageError::ConfigError("S3_BUCKET not configured".into()))?;
            let storage = S3Storage::new(bucket, &s3_settings(config)?, config.presign_ttl())?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-s3"))]
        StorageBackend::Remote => Err(StorageError::ConfigError(
            "Remote storage backend not available (storage-s3 feature not enabled)".into(),
        )),

        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let base_path = config.local_storage_path().map(String::from).ok_or_else(|| {
                StorageError::ConfigError("LOCAL_STORAGE_PATH not configured".into())
            })?;
            let inline_path = config
                .local_inline_path()
                .unwrap_or_else(|| format!("{}/inline", base_path));
            let storage = LocalStorage::new(base_path, inline_path).await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".into(),
        )),
    }
}

/// Web archives are read from S3 when credentials for a region are configured,
/// otherwise from `ARCHIVE_LOCAL_ROOT`.
pub fn create_archive_source(config: &Config) -> StorageResult<Arc<dyn ArchiveSource>> {
    #[cfg(feature = "storage-local")]
    {
        if let Some(root) = config.archive_local_root() {
            return Ok(Arc::new(LocalArchive::new(root)));
        }
    }

    #[cfg(feature = "storage-s3")]
    {
        if config.s3_region().is_some() {
            return Ok(Arc::new(S3Archive::new(s3_settings(config)?)));
        }
    }

    Err(StorageError::ConfigError(
        "no web archive source configured (set ARCHIVE_LOCAL_ROOT or S3_REGION)".into(),
    ))
}
