//! Resolution of stored objects for the serve endpoint.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tessera_core::{AppError, Config};
use tessera_db::MediaRepository;
use tessera_storage::{validate_key, BlobStore, ServeTarget};

#[derive(Debug, Clone)]
pub struct ServeConfig {
    /// How long an object without a media row stays servable
    pub grace_window: Duration,
}

impl ServeConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            grace_window: config.grace_window(),
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            grace_window: Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// Where to fetch an object and, when a media row owns it, its MIME type.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedObject {
    pub target: ServeTarget,
    pub content_type: Option<String>,
}

pub struct ServeResolver {
    media: Arc<dyn MediaRepository>,
    blobs: Arc<dyn BlobStore>,
    config: ServeConfig,
}

impl ServeResolver {
    pub fn new(media: Arc<dyn MediaRepository>, blobs: Arc<dyn BlobStore>, config: ServeConfig) -> Self {
        Self {
            media,
            blobs,
            config,
        }
    }

    /// Objects owned by a media row are always served. Orphans are served
    /// while younger than the grace window and refused after.
    #[tracing::instrument(skip(self, now))]
    pub async fn resolve(&self, name: &str, now: DateTime<Utc>) -> Result<ResolvedObject, AppError> {
        validate_key(name)?;

        if let Some(media) = self.media.find_by_file(name).await? {
            return Ok(ResolvedObject {
                target: self.blobs.serve(name).await?,
                content_type: Some(media.media_file_type),
            });
        }

        let info = self
            .blobs
            .head(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("object {}", name)))?;
        let age = info.age(now);
        if age < self.config.grace_window {
            tracing::debug!(object = %name, age_secs = age.as_secs(), "Serving orphan object within grace window");
            return Ok(ResolvedObject {
                target: self.blobs.serve(name).await?,
                content_type: None,
            });
        }

        tracing::warn!(object = %name, age_secs = age.as_secs(), "Orphan object past grace window");
        Err(AppError::NotAuthorized(format!(
            "{} has no media record",
            name
        )))
    }
}
