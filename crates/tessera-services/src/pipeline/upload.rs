//! UPLOAD: the assembled file is already in the blob store.

use async_trait::async_trait;
use tessera_core::models::ImportMode;
use tessera_core::AppError;
use tessera_processing::hash_file;
use tessera_storage::{validate_key, ServeTarget};

use super::context::IngestContext;
use super::strategy::{file_draft, ImportStrategy};
use super::IngestDeps;

pub struct UploadStrategy;

#[async_trait]
impl ImportStrategy for UploadStrategy {
    fn mode(&self) -> ImportMode {
        ImportMode::Upload
    }

    async fn fetch(&self, deps: &IngestDeps, ctx: &mut IngestContext) -> Result<(), AppError> {
        let stored = ctx
            .data
            .stored_name
            .clone()
            .or_else(|| ctx.import.file.clone())
            .ok_or_else(|| AppError::InvalidRequest("upload import has no stored file".into()))?;
        validate_key(&stored)?;
        if ctx.original_filename.is_empty() {
            ctx.original_filename = stored.clone();
        }

        // Local objects are read in place; remote ones are pulled into the workdir.
        let path = match deps.blobs.serve(&stored).await? {
            ServeTarget::LocalPath(path) => path,
            ServeTarget::Presigned { .. } => {
                let dest = ctx.workdir.path().join(&stored);
                deps.blobs.download_to_file(&stored, &dest).await?;
                dest
            }
        };

        let hash = hash_file(&path).await?;
        if let Some(expected) = ctx.import.file_hash.as_deref() {
            if expected != hash {
                return Err(AppError::Integrity(format!(
                    "stored upload {} hashes to {}, journal recorded {}",
                    stored, hash, expected
                )));
            }
        }
        let size = tokio::fs::metadata(&path).await?.len();

        ctx.stored_name = Some(stored);
        ctx.set_fetched(path, hash, size).await
    }

    async fn store(&self, _deps: &IngestDeps, ctx: &mut IngestContext) -> Result<(), AppError> {
        let stored = ctx.stored_name()?.to_string();
        ctx.journal.log(&format!("stored as {}", stored)).await
    }

    async fn finalize_meta(
        &self,
        _deps: &IngestDeps,
        ctx: &mut IngestContext,
    ) -> Result<(), AppError> {
        let origin = ctx.original_filename.clone();
        file_draft(ctx, origin);
        Ok(())
    }
}
