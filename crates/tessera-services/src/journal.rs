//! Handle over one import journal.
//!
//! Every mutation is conditional on the journal not being terminal. A refused
//! write is logged and reported as `false`; it is never an error.

use std::sync::Arc;

use tessera_core::models::{ImportJournal, ImportStatus};
use tessera_core::AppError;
use tessera_db::ImportRepository;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Clone)]
pub struct JournalHandle {
    imports: Arc<dyn ImportRepository>,
    id: Uuid,
    cancel: CancellationToken,
}

impl JournalHandle {
    pub fn new(imports: Arc<dyn ImportRepository>, id: Uuid, cancel: CancellationToken) -> Self {
        Self {
            imports,
            id,
            cancel,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn load(&self) -> Result<ImportJournal, AppError> {
        self.imports
            .get(self.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("import {}", self.id)))
    }

    /// `Pending -> Processing`.
    pub async fn processing(&self) -> Result<bool, AppError> {
        let changed = self.imports.mark_processing(self.id).await?;
        if !changed {
            tracing::warn!(import_id = %self.id, "Import is not pending, not moved to processing");
        }
        Ok(changed)
    }

    #[tracing::instrument(skip(self), fields(import_id = %self.id))]
    pub async fn log(&self, line: &str) -> Result<(), AppError> {
        if !self.imports.append_log(self.id, line).await? {
            tracing::warn!(import_id = %self.id, line, "Log line dropped, import is finished");
        }
        Ok(())
    }

    pub async fn set_file_info(
        &self,
        file_hash: Option<&str>,
        file_format: Option<&str>,
    ) -> Result<(), AppError> {
        self.imports
            .set_file_info(self.id, file_hash, file_format)
            .await?;
        Ok(())
    }

    pub async fn add_item(&self, bulletin_id: i64) -> Result<(), AppError> {
        if !self.imports.add_item(self.id, bulletin_id).await? {
            tracing::warn!(import_id = %self.id, bulletin_id, "Item not recorded, import is finished");
        }
        Ok(())
    }

    /// `Processing -> Success`.
    pub async fn success(&self) -> Result<bool, AppError> {
        self.finish(ImportStatus::Success, Some("import completed"))
            .await
    }

    /// `Processing -> Failed` with an optional reason line.
    pub async fn fail(&self, reason: Option<&str>) -> Result<bool, AppError> {
        self.finish(ImportStatus::Failed, reason).await
    }

    async fn finish(&self, status: ImportStatus, line: Option<&str>) -> Result<bool, AppError> {
        let changed = self.imports.finish(self.id, status, line).await?;
        if changed {
            tracing::info!(import_id = %self.id, status = %status, "Import finished");
        } else {
            tracing::warn!(import_id = %self.id, status = %status, "Import was not processing, status kept");
        }
        Ok(changed)
    }

    /// Fails with [`AppError::Cancelled`] once cancellation was requested,
    /// either in process or through the journal flag.
    pub async fn checkpoint(&self) -> Result<(), AppError> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        if self.imports.is_cancel_requested(self.id).await? {
            self.cancel.cancel();
            return Err(AppError::Cancelled);
        }
        Ok(())
    }
}
