use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use tessera_core::models::{Source, SourceHints};
use tessera_core::AppError;

use super::map_write_error;
use crate::repository::SourceRepository;

const SOURCE_COLUMNS: &str = "id, title, parent_id, etl_id, comment, created_at";

#[derive(Clone)]
pub struct PgSourceRepository {
    pool: PgPool,
}

impl PgSourceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SourceRepository for PgSourceRepository {
    #[tracing::instrument(skip(self))]
    async fn find_or_create_main(&self, title: &str) -> Result<i64, AppError> {
        // Concurrent imports may race to create the same main source; the
        // partial unique index lets the loser fall through to the select.
        sqlx::query(
            "INSERT INTO source (title) VALUES ($1) \
             ON CONFLICT (lower(title)) WHERE parent_id IS NULL DO NOTHING",
        )
        .bind(title)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "source already exists"))?;

        let id: i64 = sqlx::query_scalar(
            "SELECT id FROM source WHERE parent_id IS NULL AND lower(title) = lower($1)",
        )
        .bind(title)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    #[tracing::instrument(skip(self))]
    async fn find_or_create_sub(
        &self,
        parent_id: i64,
        hints: &SourceHints,
    ) -> Result<i64, AppError> {
        let children = sqlx::query_as::<Postgres, Source>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM source WHERE parent_id = $1 ORDER BY id"
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        if let Some(existing) = children.iter().find(|s| hints.matches(s)) {
            return Ok(existing.id);
        }

        let title = hints
            .title()
            .ok_or_else(|| AppError::InvalidRequest("no uploader information".into()))?;
        let comment = (!hints.urls.is_empty()).then(|| hints.urls.join("\n"));
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO source (title, parent_id, etl_id, comment) VALUES ($1, $2, $3, $4) \
             RETURNING id",
        )
        .bind(&title)
        .bind(parent_id)
        .bind(&hints.uploader_id)
        .bind(comment)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "source already exists"))?;

        tracing::info!(source_id = id, parent_id, title = %title, "Sub-source created");
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<Source>, AppError> {
        let source = sqlx::query_as::<Postgres, Source>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM source WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(source)
    }
}
