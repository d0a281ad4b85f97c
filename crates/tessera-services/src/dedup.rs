use std::sync::Arc;

use tessera_core::AppError;
use tessera_db::{ImportRepository, MediaRepository};
use uuid::Uuid;

/// Content-hash lookups against committed media and in-flight imports.
#[derive(Clone)]
pub struct DedupIndex {
    media: Arc<dyn MediaRepository>,
    imports: Arc<dyn ImportRepository>,
}

impl DedupIndex {
    pub fn new(media: Arc<dyn MediaRepository>, imports: Arc<dyn ImportRepository>) -> Self {
        Self { media, imports }
    }

    /// Hash already on a media row.
    pub async fn is_committed(&self, hash: &str) -> Result<bool, AppError> {
        self.media.hash_exists(hash).await
    }

    /// Hash on media or on any pending/processing journal.
    pub async fn is_known(&self, hash: &str) -> Result<bool, AppError> {
        Ok(self.is_committed(hash).await? || self.imports.hash_in_flight(hash, None).await?)
    }

    /// Like [`Self::is_known`], but only journals created before `import_id`
    /// count, so the earliest of several identical imports wins.
    pub async fn is_known_before(&self, hash: &str, import_id: Uuid) -> Result<bool, AppError> {
        Ok(self.is_committed(hash).await?
            || self.imports.hash_in_flight(hash, Some(import_id)).await?)
    }
}
