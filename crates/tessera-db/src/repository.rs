//! Repository traits consumed by the ingest services.
//!
//! Every journal mutation is conditional on the journal not being terminal:
//! the `bool` results report whether the row changed, so a late writer can
//! tell its update was refused.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tessera_core::models::{
    Bulletin, ImportJournal, ImportStatus, Media, NewBulletin, NewImport, NewMedia, Source,
    SourceHints,
};
use tessera_core::AppError;
use uuid::Uuid;

use crate::db::{PgBulletinRepository, PgImportRepository, PgMediaRepository, PgSourceRepository};
use crate::memory::MemoryDatabase;

#[async_trait]
pub trait BulletinRepository: Send + Sync {
    /// Insert the bulletin, its source links and its media in one
    /// transaction. A media hash that already exists fails with `Conflict`
    /// and nothing is written.
    async fn commit(&self, bulletin: NewBulletin, media: Vec<NewMedia>)
        -> Result<Bulletin, AppError>;

    async fn get(&self, id: i64) -> Result<Option<Bulletin>, AppError>;

    async fn count(&self) -> Result<i64, AppError>;

    async fn source_ids(&self, bulletin_id: i64) -> Result<Vec<i64>, AppError>;
}

#[async_trait]
pub trait MediaRepository: Send + Sync {
    async fn hash_exists(&self, etag: &str) -> Result<bool, AppError>;

    /// Media row owning a stored object name.
    async fn find_by_file(&self, media_file: &str) -> Result<Option<Media>, AppError>;

    async fn list_for_bulletin(&self, bulletin_id: i64) -> Result<Vec<Media>, AppError>;

    async fn count(&self) -> Result<i64, AppError>;
}

#[async_trait]
pub trait ImportRepository: Send + Sync {
    async fn create(&self, import: NewImport) -> Result<ImportJournal, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<ImportJournal>, AppError>;

    async fn list_by_batch(&self, batch_id: &str) -> Result<Vec<ImportJournal>, AppError>;

    /// Oldest pending journals first.
    async fn list_pending(&self, limit: i64) -> Result<Vec<Uuid>, AppError>;

    /// `Pending -> Processing`. `false` when the journal was in any other state.
    async fn mark_processing(&self, id: Uuid) -> Result<bool, AppError>;

    /// Append `line`, stamped with the current time.
    async fn append_log(&self, id: Uuid, line: &str) -> Result<bool, AppError>;

    /// Set hash and/or detected format; `None` leaves a field unchanged.
    async fn set_file_info(
        &self,
        id: Uuid,
        file_hash: Option<&str>,
        file_format: Option<&str>,
    ) -> Result<bool, AppError>;

    async fn add_item(&self, id: Uuid, bulletin_id: i64) -> Result<bool, AppError>;

    /// `Processing -> status` with an optional final log line, atomically.
    async fn finish(
        &self,
        id: Uuid,
        status: ImportStatus,
        final_line: Option<&str>,
    ) -> Result<bool, AppError>;

    /// Raise the cancel flag of a non-terminal journal.
    async fn request_cancel(&self, id: Uuid) -> Result<bool, AppError>;

    async fn is_cancel_requested(&self, id: Uuid) -> Result<bool, AppError>;

    /// Whether a non-terminal journal carries `file_hash`. With `before`,
    /// only journals created ahead of that journal count, so the oldest of
    /// several identical imports proceeds.
    async fn hash_in_flight(&self, file_hash: &str, before: Option<Uuid>)
        -> Result<bool, AppError>;
}

#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Top-level source by title (case-insensitive), created when missing.
    async fn find_or_create_main(&self, title: &str) -> Result<i64, AppError>;

    /// Child of `parent_id` matching `hints`, created when missing.
    async fn find_or_create_sub(&self, parent_id: i64, hints: &SourceHints)
        -> Result<i64, AppError>;

    async fn get(&self, id: i64) -> Result<Option<Source>, AppError>;
}

/// The repositories an ingest needs, behind trait objects.
#[derive(Clone)]
pub struct Repositories {
    pub bulletins: Arc<dyn BulletinRepository>,
    pub media: Arc<dyn MediaRepository>,
    pub imports: Arc<dyn ImportRepository>,
    pub sources: Arc<dyn SourceRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            bulletins: Arc::new(PgBulletinRepository::new(pool.clone())),
            media: Arc::new(PgMediaRepository::new(pool.clone())),
            imports: Arc::new(PgImportRepository::new(pool.clone())),
            sources: Arc::new(PgSourceRepository::new(pool)),
        }
    }

    pub fn memory(db: Arc<MemoryDatabase>) -> Self {
        Self {
            bulletins: db.clone(),
            media: db.clone(),
            imports: db.clone(),
            sources: db,
        }
    }
}
