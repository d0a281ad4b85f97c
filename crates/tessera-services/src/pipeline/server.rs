//! SERVER: an operator-supplied path on the ingest host.

use std::path::PathBuf;

use async_trait::async_trait;
use tessera_core::models::ImportMode;
use tessera_core::validation::file_extension;
use tessera_core::AppError;
use tessera_processing::hash_file;
use tessera_storage::generate_stored_name;

use super::context::IngestContext;
use super::strategy::{file_draft, ImportStrategy};
use super::IngestDeps;

pub struct ServerStrategy;

impl ServerStrategy {
    fn source_path(ctx: &IngestContext) -> Result<PathBuf, AppError> {
        let raw = ctx
            .data
            .old_path
            .clone()
            .or_else(|| ctx.import.file.clone())
            .ok_or_else(|| AppError::InvalidRequest("server import has no path".into()))?;
        let path = PathBuf::from(&raw);
        if !path.is_absolute() {
            return Err(AppError::InvalidRequest(format!(
                "server path '{}' is not absolute",
                raw
            )));
        }
        Ok(path)
    }
}

#[async_trait]
impl ImportStrategy for ServerStrategy {
    fn mode(&self) -> ImportMode {
        ImportMode::Server
    }

    async fn fetch(&self, deps: &IngestDeps, ctx: &mut IngestContext) -> Result<(), AppError> {
        let path = Self::source_path(ctx)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(String::from)
            .ok_or_else(|| {
                AppError::InvalidRequest(format!("{} has no file name", path.display()))
            })?;

        match file_extension(&name) {
            Some(ext) if deps.config.allowed_extensions.contains(&ext) => {}
            other => {
                return Err(AppError::UnsupportedType(format!(
                    "extension {:?} of {} is not allowed",
                    other.unwrap_or_default(),
                    name
                )))
            }
        }

        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::NotFound(format!("{}", path.display())))
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Err(AppError::InvalidRequest(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let hash = hash_file(&path).await?;
        ctx.original_filename = name;
        ctx.set_fetched(path, hash, meta.len()).await
    }

    async fn store(&self, deps: &IngestDeps, ctx: &mut IngestContext) -> Result<(), AppError> {
        let path = ctx.local_path()?.to_path_buf();
        let stored = generate_stored_name(&ctx.original_filename);
        deps.blobs.put_file(&path, &stored).await?;
        ctx.owned_objects.push(stored.clone());
        ctx.journal.log(&format!("stored as {}", stored)).await?;
        ctx.stored_name = Some(stored);
        Ok(())
    }

    async fn finalize_meta(
        &self,
        _deps: &IngestDeps,
        ctx: &mut IngestContext,
    ) -> Result<(), AppError> {
        let origin = Self::source_path(ctx)?.display().to_string();
        file_draft(ctx, origin);
        Ok(())
    }
}
