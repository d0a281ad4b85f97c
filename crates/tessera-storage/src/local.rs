use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs;

use crate::keys::{validate_key, INLINE_PREFIX};
use crate::traits::{BlobStore, ObjectInfo, ServeTarget, StorageError, StorageResult};
use crate::StorageBackend;

/// Local filesystem storage
///
/// Writes go to a temporary file in the destination directory which is synced
/// and then renamed into place, so readers never observe a partial object.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    base_path: PathBuf,
    inline_path: PathBuf,
}

impl LocalStorage {
    /// # Arguments
    /// * `base_path` - media directory (e.g. "/var/lib/tessera/media")
    /// * `inline_path` - directory for `inline/` objects
    pub async fn new(
        base_path: impl Into<PathBuf>,
        inline_path: impl Into<PathBuf>,
    ) -> StorageResult<Self> {
        let base_path = base_path.into();
        let inline_path = inline_path.into();

        for dir in [&base_path, &inline_path] {
            fs::create_dir_all(dir).await.map_err(|e| {
                StorageError::ConfigError(format!(
                    "Failed to create storage directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        Ok(LocalStorage {
            base_path,
            inline_path,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Map an object name to its file, refusing anything outside the roots.
    fn key_to_path(&self, name: &str) -> StorageResult<PathBuf> {
        validate_key(name)?;

        let (root, relative) = match name.strip_prefix(INLINE_PREFIX) {
            Some(rest) => (&self.inline_path, rest),
            None => (&self.base_path, name),
        };
        if relative.contains('/') {
            return Err(StorageError::InvalidKey(format!(
                "nested storage key '{}' is not allowed",
                name
            )));
        }

        Ok(root.join(relative))
    }

    async fn info_for(&self, name: &str, path: &Path) -> StorageResult<Option<ObjectInfo>> {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                Ok(Some(ObjectInfo {
                    name: name.to_string(),
                    size: meta.len(),
                    last_modified: DateTime::<Utc>::from(modified),
                    e_tag: None,
                }))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    /// Sync `write` into a temp file next to `path`, then rename over it.
    async fn write_atomically<F>(&self, path: PathBuf, write: F) -> StorageResult<u64>
    where
        F: FnOnce(&mut std::fs::File) -> std::io::Result<u64> + Send + 'static,
    {
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StorageError::InvalidKey(path.display().to_string()))?;

        tokio::task::spawn_blocking(move || -> StorageResult<u64> {
            let mut temp = tempfile::Builder::new()
                .prefix(".tmp-")
                .tempfile_in(&dir)
                .map_err(|e| {
                    StorageError::UploadFailed(format!(
                        "Failed to create temp file in {}: {}",
                        dir.display(),
                        e
                    ))
                })?;
            let written = write(temp.as_file_mut()).map_err(|e| {
                StorageError::UploadFailed(format!("Failed to write {}: {}", path.display(), e))
            })?;
            temp.as_file_mut().flush()?;
            temp.as_file().sync_all().map_err(|e| {
                StorageError::UploadFailed(format!("Failed to sync {}: {}", path.display(), e))
            })?;
            temp.persist(&path).map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to rename into {}: {}",
                    path.display(),
                    e.error
                ))
            })?;
            Ok(written)
        })
        .await
        .map_err(|e| StorageError::UploadFailed(format!("write task failed: {}", e)))?
    }
}

#[async_trait]
impl BlobStore for LocalStorage {
    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }

    async fn put_file(&self, src: &Path, name: &str) -> StorageResult<ObjectInfo> {
        let path = self.key_to_path(name)?;
        let start = std::time::Instant::now();
        let src_owned = src.to_path_buf();

        let size = self
            .write_atomically(path.clone(), move |dest| {
                let mut input = std::fs::File::open(&src_owned)?;
                std::io::copy(&mut input, dest)
            })
            .await?;

        tracing::info!(
            path = %path.display(),
            key = %name,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage put successful"
        );

        self.info_for(name, &path)
            .await?
            .ok_or_else(|| StorageError::UploadFailed(format!("{} vanished after write", name)))
    }

    async fn put_bytes(&self, name: &str, data: Bytes) -> StorageResult<ObjectInfo> {
        let path = self.key_to_path(name)?;
        let start = std::time::Instant::now();

        let size = self
            .write_atomically(path.clone(), move |dest| {
                dest.write_all(&data)?;
                Ok(data.len() as u64)
            })
            .await?;

        tracing::info!(
            path = %path.display(),
            key = %name,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage put successful"
        );

        self.info_for(name, &path)
            .await?
            .ok_or_else(|| StorageError::UploadFailed(format!("{} vanished after write", name)))
    }

    async fn download_to_file(&self, name: &str, dest: &Path) -> StorageResult<u64> {
        let path = self.key_to_path(name)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(name.to_string()));
        }
        fs::copy(&path, dest).await.map_err(|e| {
            StorageError::DownloadFailed(format!(
                "Failed to copy {} to {}: {}",
                path.display(),
                dest.display(),
                e
            ))
        })
    }

    async fn serve(&self, name: &str) -> StorageResult<ServeTarget> {
        let path = self.key_to_path(name)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(name.to_string()));
        }
        Ok(ServeTarget::LocalPath(path))
    }

    async fn head(&self, name: &str) -> StorageResult<Option<ObjectInfo>> {
        let path = self.key_to_path(name)?;
        self.info_for(name, &path).await
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        let path = self.key_to_path(name)?;
        let start = std::time::Instant::now();

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(StorageError::DeleteFailed(format!(
                    "Failed to delete file {}: {}",
                    path.display(),
                    e
                )))
            }
        }

        tracing::info!(
            path = %path.display(),
            key = %name,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(())
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn storage(dir: &Path) -> LocalStorage {
        LocalStorage::new(dir.join("media"), dir.join("inline"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_file_then_download() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let src = dir.path().join("src.bin");
        std::fs::write(&src, b"field recording").unwrap();

        let info = storage.put_file(&src, "abc_src.bin").await.unwrap();
        assert_eq!(info.size, 15);
        assert_eq!(info.name, "abc_src.bin");

        let dest = dir.path().join("out.bin");
        let copied = storage.download_to_file("abc_src.bin", &dest).await.unwrap();
        assert_eq!(copied, 15);
        assert_eq!(std::fs::read(dest).unwrap(), b"field recording");
    }

    #[tokio::test]
    async fn test_put_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        storage
            .put_bytes("x_one.txt", Bytes::from_static(b"1"))
            .await
            .unwrap();
        storage
            .put_bytes("x_one.txt", Bytes::from_static(b"22"))
            .await
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("media"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["x_one.txt".to_string()]);
        assert_eq!(storage.head("x_one.txt").await.unwrap().unwrap().size, 2);
    }

    #[tokio::test]
    async fn test_inline_prefix_routes_to_inline_dir() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        storage
            .put_bytes("inline/logo.png", Bytes::from_static(b"png"))
            .await
            .unwrap();
        assert!(dir.path().join("inline").join("logo.png").exists());
        match storage.serve("inline/logo.png").await.unwrap() {
            ServeTarget::LocalPath(p) => assert!(p.ends_with("inline/logo.png")),
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        let result = storage.head("../../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.delete("../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.serve("/etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.put_bytes("sub/dir.txt", Bytes::new()).await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_missing_objects() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;

        assert!(storage.head("nope.txt").await.unwrap().is_none());
        assert!(!storage.exists("nope.txt").await.unwrap());
        assert!(storage.delete("nope.txt").await.is_ok());
        assert!(matches!(
            storage.serve("nope.txt").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
