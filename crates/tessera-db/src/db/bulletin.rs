use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use tessera_core::models::{Bulletin, Media, NewBulletin, NewMedia};
use tessera_core::AppError;

use super::map_write_error;
use super::transaction::TransactionGuard;
use crate::repository::{BulletinRepository, MediaRepository};

const BULLETIN_COLUMNS: &str = "id, title, title_alt, description, status, origin_id, \
     source_link, comment, documentation_date, publish_date, tags, meta, assigned_to, \
     created_at, updated_at";

const MEDIA_COLUMNS: &str =
    "id, bulletin_id, title, media_file, media_file_type, etag, main, duration, created_at";

#[derive(Clone)]
pub struct PgBulletinRepository {
    pool: PgPool,
}

impl PgBulletinRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BulletinRepository for PgBulletinRepository {
    #[tracing::instrument(skip(self, bulletin, media), fields(title = %bulletin.title, media_count = media.len()))]
    async fn commit(
        &self,
        bulletin: NewBulletin,
        media: Vec<NewMedia>,
    ) -> Result<Bulletin, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        let created: Bulletin = sqlx::query_as::<Postgres, Bulletin>(&format!(
            r#"
            INSERT INTO bulletin (
                title, title_alt, description, status, origin_id, source_link, comment,
                documentation_date, publish_date, tags, meta, assigned_to
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {BULLETIN_COLUMNS}
            "#
        ))
        .bind(&bulletin.title)
        .bind(&bulletin.title_alt)
        .bind(&bulletin.description)
        .bind(&bulletin.status)
        .bind(&bulletin.origin_id)
        .bind(&bulletin.source_link)
        .bind(&bulletin.comment)
        .bind(bulletin.documentation_date)
        .bind(bulletin.publish_date)
        .bind(&bulletin.tags)
        .bind(&bulletin.meta)
        .bind(&bulletin.assigned_to)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_write_error(e, "bulletin conflicts with an existing record"))?;

        for source_id in &bulletin.source_ids {
            sqlx::query(
                "INSERT INTO bulletin_source (bulletin_id, source_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(created.id)
            .bind(source_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_write_error(e, "source already attached"))?;
        }

        for item in &media {
            sqlx::query(
                r#"
                INSERT INTO media (bulletin_id, title, media_file, media_file_type, etag, main, duration)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(created.id)
            .bind(&item.title)
            .bind(&item.media_file)
            .bind(&item.media_file_type)
            .bind(&item.etag)
            .bind(item.main)
            .bind(&item.duration)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, etag = %item.etag, "Media insert failed");
                map_write_error(e, "duplicate file: media hash already exists")
            })?;
        }

        tx.commit().await?;

        tracing::info!(
            bulletin_id = created.id,
            media_count = media.len(),
            "Bulletin committed"
        );

        Ok(created)
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, id: i64) -> Result<Option<Bulletin>, AppError> {
        let bulletin = sqlx::query_as::<Postgres, Bulletin>(&format!(
            "SELECT {BULLETIN_COLUMNS} FROM bulletin WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(bulletin)
    }

    async fn count(&self) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bulletin")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn source_ids(&self, bulletin_id: i64) -> Result<Vec<i64>, AppError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT source_id FROM bulletin_source WHERE bulletin_id = $1 ORDER BY source_id",
        )
        .bind(bulletin_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

#[derive(Clone)]
pub struct PgMediaRepository {
    pool: PgPool,
}

impl PgMediaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MediaRepository for PgMediaRepository {
    #[tracing::instrument(skip(self))]
    async fn hash_exists(&self, etag: &str) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM media WHERE etag = $1)")
            .bind(etag)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_file(&self, media_file: &str) -> Result<Option<Media>, AppError> {
        let media = sqlx::query_as::<Postgres, Media>(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media WHERE media_file = $1 LIMIT 1"
        ))
        .bind(media_file)
        .fetch_optional(&self.pool)
        .await?;
        Ok(media)
    }

    async fn list_for_bulletin(&self, bulletin_id: i64) -> Result<Vec<Media>, AppError> {
        let media = sqlx::query_as::<Postgres, Media>(&format!(
            "SELECT {MEDIA_COLUMNS} FROM media WHERE bulletin_id = $1 ORDER BY main DESC, id"
        ))
        .bind(bulletin_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(media)
    }

    async fn count(&self) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
