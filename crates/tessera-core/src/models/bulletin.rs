use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Initial workflow status of every bulletin created by an import.
pub const STATUS_MACHINE_CREATED: &str = "Machine Created";

/// A published documentation record.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Bulletin {
    pub id: i64,
    pub title: String,
    pub title_alt: Option<String>,
    pub description: String,
    pub status: String,
    pub origin_id: Option<String>,
    pub source_link: Option<String>,
    pub comment: Option<String>,
    pub documentation_date: Option<DateTime<Utc>>,
    pub publish_date: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    #[schema(value_type = Object)]
    pub meta: serde_json::Value,
    pub assigned_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewBulletin {
    pub title: String,
    pub title_alt: Option<String>,
    pub description: String,
    pub status: String,
    pub origin_id: Option<String>,
    pub source_link: Option<String>,
    pub comment: Option<String>,
    pub documentation_date: Option<DateTime<Utc>>,
    pub publish_date: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub meta: serde_json::Value,
    pub assigned_to: Option<String>,
    /// Sources linked through `bulletin_source`
    pub source_ids: Vec<i64>,
}

/// A stored file attached to a bulletin.
///
/// `etag` is the SHA-256 of the stored bytes and is unique across all media.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Media {
    pub id: i64,
    pub bulletin_id: i64,
    pub title: String,
    pub media_file: String,
    pub media_file_type: String,
    pub etag: String,
    pub main: bool,
    pub duration: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMedia {
    pub title: String,
    pub media_file: String,
    pub media_file_type: String,
    pub etag: String,
    pub main: bool,
    pub duration: Option<String>,
}
