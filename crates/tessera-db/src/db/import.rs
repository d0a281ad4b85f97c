use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres};
use tessera_core::models::{ImportJournal, ImportStatus, NewImport};
use tessera_core::AppError;
use uuid::Uuid;

use crate::repository::ImportRepository;

const IMPORT_COLUMNS: &str = "id, user_id, batch_id, mode, file, file_hash, file_format, data, \
     log, status, items, cancel_requested, created_at, updated_at";

#[derive(Clone)]
pub struct PgImportRepository {
    pool: PgPool,
}

impl PgImportRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImportRepository for PgImportRepository {
    #[tracing::instrument(skip(self, import), fields(batch_id = %import.batch_id, mode = %import.mode))]
    async fn create(&self, import: NewImport) -> Result<ImportJournal, AppError> {
        let data = serde_json::to_value(&import.data)?;
        let journal = sqlx::query_as::<Postgres, ImportJournal>(&format!(
            r#"
            INSERT INTO data_import (id, user_id, batch_id, mode, file, file_hash, file_format, data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {IMPORT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&import.user_id)
        .bind(&import.batch_id)
        .bind(import.mode)
        .bind(&import.file)
        .bind(&import.file_hash)
        .bind(&import.file_format)
        .bind(data)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to insert import journal");
            AppError::Database(e)
        })?;

        tracing::info!(import_id = %journal.id, "Import journal created");
        Ok(journal)
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, id: Uuid) -> Result<Option<ImportJournal>, AppError> {
        let journal = sqlx::query_as::<Postgres, ImportJournal>(&format!(
            "SELECT {IMPORT_COLUMNS} FROM data_import WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(journal)
    }

    #[tracing::instrument(skip(self))]
    async fn list_by_batch(&self, batch_id: &str) -> Result<Vec<ImportJournal>, AppError> {
        let journals = sqlx::query_as::<Postgres, ImportJournal>(&format!(
            "SELECT {IMPORT_COLUMNS} FROM data_import WHERE batch_id = $1 ORDER BY created_at, id"
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(journals)
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<Uuid>, AppError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM data_import WHERE status = 'pending' ORDER BY created_at, id LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    #[tracing::instrument(skip(self))]
    async fn mark_processing(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE data_import SET status = 'processing', updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn append_log(&self, id: Uuid, line: &str) -> Result<bool, AppError> {
        let entry = ImportJournal::format_log_line(Utc::now(), line);
        let result = sqlx::query(
            "UPDATE data_import SET log = log || $2, updated_at = NOW() \
             WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(id)
        .bind(entry)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_file_info(
        &self,
        id: Uuid,
        file_hash: Option<&str>,
        file_format: Option<&str>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE data_import SET file_hash = COALESCE($2, file_hash), \
             file_format = COALESCE($3, file_format), updated_at = NOW() \
             WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(id)
        .bind(file_hash)
        .bind(file_format)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn add_item(&self, id: Uuid, bulletin_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE data_import SET items = array_append(items, $2), updated_at = NOW() \
             WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(id)
        .bind(bulletin_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self, final_line))]
    async fn finish(
        &self,
        id: Uuid,
        status: ImportStatus,
        final_line: Option<&str>,
    ) -> Result<bool, AppError> {
        if !status.is_terminal() {
            return Err(AppError::Internal(format!(
                "cannot finish import {} as {}",
                id, status
            )));
        }
        let entry = final_line
            .map(|line| ImportJournal::format_log_line(Utc::now(), line))
            .unwrap_or_default();
        let result = sqlx::query(
            "UPDATE data_import SET status = $2, log = log || $3, updated_at = NOW() \
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(status)
        .bind(entry)
        .execute(&self.pool)
        .await?;

        let finished = result.rows_affected() == 1;
        if finished {
            tracing::info!(import_id = %id, status = %status, "Import finished");
        }
        Ok(finished)
    }

    async fn request_cancel(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE data_import SET cancel_requested = TRUE, updated_at = NOW() \
             WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn is_cancel_requested(&self, id: Uuid) -> Result<bool, AppError> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT cancel_requested FROM data_import WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(flag.unwrap_or(false))
    }

    #[tracing::instrument(skip(self))]
    async fn hash_in_flight(
        &self,
        file_hash: &str,
        before: Option<Uuid>,
    ) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM data_import d
                WHERE d.file_hash = $1
                  AND d.status IN ('pending', 'processing')
                  AND (
                    $2::uuid IS NULL
                    OR (d.id <> $2 AND (d.created_at, d.id) <
                        (SELECT o.created_at, o.id FROM data_import o WHERE o.id = $2))
                  )
            )
            "#,
        )
        .bind(file_hash)
        .bind(before)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
