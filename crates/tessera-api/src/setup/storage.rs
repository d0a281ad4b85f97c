//! Blob store and web archive setup

use std::sync::Arc;

use anyhow::{Context, Result};
use tessera_core::Config;
use tessera_storage::{create_archive_source, create_blob_store, ArchiveSource, BlobStore};

/// The blob store is required. Without an archive source web imports fail
/// with `invalid-request` but everything else works.
pub async fn setup_storage(
    config: &Config,
) -> Result<(Arc<dyn BlobStore>, Option<Arc<dyn ArchiveSource>>)> {
    let blobs = create_blob_store(config)
        .await
        .context("Failed to initialize blob store")?;
    tracing::info!(backend = ?blobs.backend_type(), "Blob store initialized");

    let archive = match create_archive_source(config) {
        Ok(archive) => Some(archive),
        Err(e) => {
            tracing::warn!(error = %e, "Web archive source unavailable, web imports disabled");
            None
        }
    };

    Ok((blobs, archive))
}
