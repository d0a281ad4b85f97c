use std::path::Path as FsPath;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectStoreExt, PutPayload, Result as ObjectResult};
use tokio::io::AsyncWriteExt;

use crate::keys::validate_key;
use crate::traits::{BlobStore, ObjectInfo, ServeTarget, StorageError, StorageResult};
use crate::StorageBackend;

/// Connection settings for an S3-compatible endpoint.
#[derive(Clone, Debug, Default)]
pub struct S3Settings {
    pub region: String,
    /// Custom endpoint for S3-compatible providers (MinIO, Spaces, ...)
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl S3Settings {
    /// Build a client for `bucket`. Credentials not given explicitly are
    /// picked up from the standard AWS environment variables.
    pub(crate) fn build(&self, bucket: &str) -> StorageResult<AmazonS3> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(self.region.clone())
            .with_bucket_name(bucket.to_string());

        if let Some(ref endpoint) = self.endpoint {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }
        if let Some(ref key) = self.access_key_id {
            builder = builder.with_access_key_id(key.clone());
        }
        if let Some(ref secret) = self.secret_access_key {
            builder = builder.with_secret_access_key(secret.clone());
        }

        builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))
    }
}

/// S3 storage implementation
#[derive(Clone)]
pub struct S3Storage {
    store: AmazonS3,
    bucket: String,
    presign_ttl: Duration,
}

impl S3Storage {
    pub fn new(bucket: String, settings: &S3Settings, presign_ttl: Duration) -> StorageResult<Self> {
        let store = settings.build(&bucket)?;
        Ok(S3Storage {
            store,
            bucket,
            presign_ttl,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_payload(&self, name: &str, bytes: Bytes) -> StorageResult<ObjectInfo> {
        validate_key(name)?;
        let size = bytes.len() as u64;
        let location = Path::from(name.to_string());
        let start = std::time::Instant::now();

        let result: ObjectResult<_> = self.store.put(&location, PutPayload::from(bytes)).await;

        let put = result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %name,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 upload failed"
            );
            StorageError::UploadFailed(e.to_string())
        })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %name,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(ObjectInfo {
            name: name.to_string(),
            size,
            last_modified: chrono::Utc::now(),
            e_tag: put.e_tag,
        })
    }
}

/// `head` on any object store, mapping 404 to `None`.
pub(crate) async fn head_object(
    store: &AmazonS3,
    bucket: &str,
    name: &str,
) -> StorageResult<Option<ObjectInfo>> {
    let location = Path::from(name.to_string());
    match store.head(&location).await {
        Ok(meta) => Ok(Some(ObjectInfo {
            name: name.to_string(),
            size: meta.size,
            last_modified: meta.last_modified,
            e_tag: meta.e_tag,
        })),
        Err(ObjectStoreError::NotFound { .. }) => Ok(None),
        Err(e) => {
            tracing::warn!(error = %e, bucket = %bucket, key = %name, "S3 head failed");
            Err(StorageError::BackendError(e.to_string()))
        }
    }
}

/// Stream an object into a local file without buffering it whole.
pub(crate) async fn download_object(
    store: &AmazonS3,
    bucket: &str,
    name: &str,
    dest: &FsPath,
) -> StorageResult<u64> {
    let start = std::time::Instant::now();
    let location = Path::from(name.to_string());

    let result: ObjectResult<_> = store.get(&location).await;
    let result = result.map_err(|e| match e {
        ObjectStoreError::NotFound { .. } => StorageError::NotFound(name.to_string()),
        other => {
            tracing::error!(
                error = %other,
                bucket = %bucket,
                key = %name,
                "S3 download failed"
            );
            StorageError::DownloadFailed(other.to_string())
        }
    })?;

    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = result.into_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.sync_all().await?;

    tracing::info!(
        bucket = %bucket,
        key = %name,
        size_bytes = written,
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "S3 download successful"
    );

    Ok(written)
}

pub(crate) async fn get_object_bytes(
    store: &AmazonS3,
    name: &str,
) -> StorageResult<Bytes> {
    let location = Path::from(name.to_string());
    let result: ObjectResult<_> = store.get(&location).await;
    let result = result.map_err(|e| match e {
        ObjectStoreError::NotFound { .. } => StorageError::NotFound(name.to_string()),
        other => StorageError::DownloadFailed(other.to_string()),
    })?;
    result
        .bytes()
        .await
        .map_err(|e| StorageError::DownloadFailed(e.to_string()))
}

#[async_trait]
impl BlobStore for S3Storage {
    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Remote
    }

    // object_store's single put needs the payload in memory.
    async fn put_file(&self, src: &FsPath, name: &str) -> StorageResult<ObjectInfo> {
        let data = tokio::fs::read(src).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to read {}: {}", src.display(), e))
        })?;
        self.put_payload(name, Bytes::from(data)).await
    }

    async fn put_bytes(&self, name: &str, data: Bytes) -> StorageResult<ObjectInfo> {
        self.put_payload(name, data).await
    }

    async fn download_to_file(&self, name: &str, dest: &FsPath) -> StorageResult<u64> {
        validate_key(name)?;
        download_object(&self.store, &self.bucket, name, dest).await
    }

    async fn serve(&self, name: &str) -> StorageResult<ServeTarget> {
        validate_key(name)?;
        let location = Path::from(name.to_string());
        let url_result: ObjectResult<_> = self
            .store
            .signed_url(Method::GET, &location, self.presign_ttl)
            .await;

        let url = url_result
            .map_err(|e| StorageError::BackendError(e.to_string()))?
            .to_string();

        Ok(ServeTarget::Presigned {
            url,
            expires_in: self.presign_ttl,
        })
    }

    async fn head(&self, name: &str) -> StorageResult<Option<ObjectInfo>> {
        validate_key(name)?;
        head_object(&self.store, &self.bucket, name).await
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        validate_key(name)?;
        let start = std::time::Instant::now();
        let location = Path::from(name.to_string());

        let result: ObjectResult<_> = self.store.delete(&location).await;

        match result {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {}
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %name,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                return Err(StorageError::DeleteFailed(e.to_string()));
            }
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %name,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }
}
