pub mod bulletin;
pub mod import;
pub mod source;
pub mod transaction;

pub use bulletin::{PgBulletinRepository, PgMediaRepository};
pub use import::PgImportRepository;
pub use source::PgSourceRepository;

use sqlx::PgPool;
use tessera_core::AppError;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Classify a failed write: unique violations are conflicts, dangling
/// references are bad input, anything else is a database error.
pub(crate) fn map_write_error(err: sqlx::Error, conflict: &str) -> AppError {
    let code = err
        .as_database_error()
        .and_then(|db| db.code())
        .map(|c| c.into_owned());
    match code.as_deref() {
        Some(UNIQUE_VIOLATION) => AppError::Conflict(conflict.to_string()),
        Some(FOREIGN_KEY_VIOLATION) => {
            AppError::InvalidRequest(format!("referenced record does not exist: {}", err))
        }
        _ => AppError::Database(err),
    }
}

/// Round-trip to the database, used by the health endpoint.
pub async fn check_connection(pool: &PgPool) -> Result<(), AppError> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
