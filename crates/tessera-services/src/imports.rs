//! Import triggers and journal queries.
//!
//! Triggers only validate input and create the journal; the worker queue
//! picks it up from there.

use std::path::Path;
use std::sync::Arc;

use tessera_core::models::{
    ImportData, ImportJournal, ImportMode, ImportOptions, NewImport, WebDescriptor,
};
use tessera_core::validation::file_extension;
use tessera_core::AppError;
use tessera_db::ImportRepository;
use tessera_storage::{validate_key, BlobStore};
use uuid::Uuid;

use crate::cancel::CancelRegistry;

/// The authenticated caller, as established by the fronting auth layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Option<String>,
}

impl Principal {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

pub struct ImportService {
    imports: Arc<dyn ImportRepository>,
    blobs: Arc<dyn BlobStore>,
    cancels: CancelRegistry,
    allowed_extensions: Vec<String>,
}

fn require_batch(batch_id: &str) -> Result<String, AppError> {
    let batch_id = batch_id.trim();
    if batch_id.is_empty() {
        return Err(AppError::InvalidRequest("batch_id is required".into()));
    }
    Ok(batch_id.to_string())
}

fn is_sha256_hex(hash: &str) -> bool {
    hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit())
}

impl ImportService {
    pub fn new(
        imports: Arc<dyn ImportRepository>,
        blobs: Arc<dyn BlobStore>,
        cancels: CancelRegistry,
        allowed_extensions: Vec<String>,
    ) -> Self {
        Self {
            imports,
            blobs,
            cancels,
            allowed_extensions,
        }
    }

    fn check_extension(&self, name: &str) -> Result<Option<String>, AppError> {
        match file_extension(name) {
            Some(ext) if self.allowed_extensions.contains(&ext) => Ok(Some(ext)),
            other => Err(AppError::UnsupportedType(format!(
                "extension {:?} of {} is not allowed",
                other.unwrap_or_default(),
                name
            ))),
        }
    }

    /// Journal for a file already assembled by the upload endpoints.
    #[tracing::instrument(skip(self, options))]
    pub async fn create_upload_import(
        &self,
        principal: &Principal,
        batch_id: &str,
        stored_name: &str,
        hash: Option<&str>,
        original_filename: Option<&str>,
        options: ImportOptions,
    ) -> Result<ImportJournal, AppError> {
        let batch_id = require_batch(batch_id)?;
        validate_key(stored_name)?;
        let format = self.check_extension(stored_name)?;
        if let Some(hash) = hash {
            if !is_sha256_hex(hash) {
                return Err(AppError::InvalidRequest(format!(
                    "'{}' is not a SHA-256 hex digest",
                    hash.escape_debug()
                )));
            }
        }
        if !self.blobs.exists(stored_name).await? {
            return Err(AppError::NotFound(format!("uploaded file {}", stored_name)));
        }

        let data = ImportData {
            options,
            original_filename: original_filename.map(String::from),
            stored_name: Some(stored_name.to_string()),
            ..Default::default()
        };
        self.create(NewImport {
            user_id: principal.user_id.clone(),
            batch_id,
            mode: ImportMode::Upload,
            file: Some(stored_name.to_string()),
            file_hash: hash.map(str::to_lowercase),
            file_format: format,
            data,
        })
        .await
    }

    /// Journal for a file on the ingest host.
    #[tracing::instrument(skip(self, options))]
    pub async fn create_server_import(
        &self,
        principal: &Principal,
        batch_id: &str,
        path: &str,
        options: ImportOptions,
    ) -> Result<ImportJournal, AppError> {
        let batch_id = require_batch(batch_id)?;
        if !Path::new(path).is_absolute() || path.split('/').any(|part| part == "..") {
            return Err(AppError::InvalidRequest(format!(
                "server path '{}' must be absolute",
                path.escape_debug()
            )));
        }
        let format = self.check_extension(path)?;
        let original = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .map(String::from);

        let data = ImportData {
            options,
            original_filename: original,
            old_path: Some(path.to_string()),
            ..Default::default()
        };
        self.create(NewImport {
            user_id: principal.user_id.clone(),
            batch_id,
            mode: ImportMode::Server,
            file: Some(path.to_string()),
            file_hash: None,
            file_format: format,
            data,
        })
        .await
    }

    /// Journal for a capture in a web archive bucket.
    #[tracing::instrument(skip(self, options))]
    pub async fn create_web_import(
        &self,
        principal: &Principal,
        batch_id: &str,
        descriptor: WebDescriptor,
        options: ImportOptions,
    ) -> Result<ImportJournal, AppError> {
        let batch_id = require_batch(batch_id)?;
        if descriptor.bucket.trim().is_empty() {
            return Err(AppError::InvalidRequest("descriptor.bucket is required".into()));
        }
        for key in [
            &descriptor.meta_file,
            &descriptor.checksum_file,
            &descriptor.video_file,
        ] {
            validate_key(key)?;
        }

        let file = format!("{}/{}", descriptor.bucket, descriptor.video_file);
        let data = ImportData {
            options,
            descriptor: Some(descriptor),
            ..Default::default()
        };
        self.create(NewImport {
            user_id: principal.user_id.clone(),
            batch_id,
            mode: ImportMode::Web,
            file: Some(file),
            file_hash: None,
            file_format: None,
            data,
        })
        .await
    }

    async fn create(&self, import: NewImport) -> Result<ImportJournal, AppError> {
        let created = self.imports.create(import).await?;
        tracing::info!(
            import_id = %created.id,
            batch_id = %created.batch_id,
            mode = %created.mode,
            "Import created"
        );
        Ok(created)
    }

    pub async fn get(&self, id: Uuid) -> Result<ImportJournal, AppError> {
        self.imports
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("import {}", id)))
    }

    pub async fn list_batch(&self, batch_id: &str) -> Result<Vec<ImportJournal>, AppError> {
        let batch_id = require_batch(batch_id)?;
        self.imports.list_by_batch(&batch_id).await
    }

    /// Raise the cancel flag. `false` when the import already finished.
    pub async fn cancel(&self, id: Uuid) -> Result<bool, AppError> {
        self.get(id).await?;
        let flagged = self.imports.request_cancel(id).await?;
        if flagged {
            self.cancels.cancel(id);
            tracing::info!(import_id = %id, "Import cancel requested");
        }
        Ok(flagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tessera_core::models::ImportStatus;
    use tessera_db::MemoryDatabase;
    use tessera_storage::LocalStorage;

    async fn service(dir: &Path) -> (ImportService, Arc<MemoryDatabase>, Arc<LocalStorage>) {
        let db = Arc::new(MemoryDatabase::new());
        let blobs = Arc::new(
            LocalStorage::new(dir.join("media"), dir.join("inline"))
                .await
                .unwrap(),
        );
        let service = ImportService::new(
            db.clone(),
            blobs.clone(),
            CancelRegistry::new(),
            vec!["jpg".into(), "avi".into()],
        );
        (service, db, blobs)
    }

    #[tokio::test]
    async fn test_upload_import_requires_stored_file() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _db, blobs) = service(dir.path()).await;
        let user = Principal::new("u1");

        let missing = service
            .create_upload_import(&user, "b1", "ff_a.jpg", None, None, ImportOptions::default())
            .await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));

        blobs
            .put_bytes("ff_a.jpg", Bytes::from_static(b"x"))
            .await
            .unwrap();
        let created = service
            .create_upload_import(&user, "b1", "ff_a.jpg", None, Some("a.jpg"), ImportOptions::default())
            .await
            .unwrap();
        assert_eq!(created.status, ImportStatus::Pending);
        assert_eq!(created.user_id.as_deref(), Some("u1"));
        assert_eq!(created.import_data().stored_name.as_deref(), Some("ff_a.jpg"));
    }

    #[tokio::test]
    async fn test_server_import_validation() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _db, _blobs) = service(dir.path()).await;
        let user = Principal::anonymous();

        let relative = service
            .create_server_import(&user, "b1", "in/a.avi", ImportOptions::default())
            .await;
        assert!(matches!(relative, Err(AppError::InvalidRequest(_))));

        let exe = service
            .create_server_import(&user, "b1", "/srv/in/a.exe", ImportOptions::default())
            .await;
        assert!(matches!(exe, Err(AppError::UnsupportedType(_))));

        let no_batch = service
            .create_server_import(&user, " ", "/srv/in/a.avi", ImportOptions::default())
            .await;
        assert!(matches!(no_batch, Err(AppError::InvalidRequest(_))));

        let ok = service
            .create_server_import(&user, "b1", "/srv/in/a.avi", ImportOptions::default())
            .await
            .unwrap();
        assert_eq!(ok.mode, ImportMode::Server);
        assert_eq!(ok.import_data().old_path.as_deref(), Some("/srv/in/a.avi"));
    }

    #[tokio::test]
    async fn test_cancel_is_noop_on_finished_import() {
        let dir = tempfile::tempdir().unwrap();
        let (service, db, _blobs) = service(dir.path()).await;
        let created = service
            .create_server_import(&Principal::anonymous(), "b1", "/srv/a.jpg", ImportOptions::default())
            .await
            .unwrap();

        assert!(db.mark_processing(created.id).await.unwrap());
        assert!(db.finish(created.id, ImportStatus::Failed, Some("x")).await.unwrap());
        assert!(!service.cancel(created.id).await.unwrap());
        assert!(matches!(
            service.cancel(Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
    }
}
