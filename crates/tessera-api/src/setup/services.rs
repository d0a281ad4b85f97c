//! Service construction and background tasks

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tessera_core::Config;
use tessera_db::Repositories;
use tessera_processing::{FfmpegTranscoder, Toolchain, ToolchainConfig, Transcoder};
use tessera_services::{
    CancelRegistry, ChunkAssembler, ChunkAssemblerConfig, DedupIndex, ImportService, IngestDeps,
    IngestOrchestrator, PipelineConfig, ServeConfig, ServeResolver,
};
use tessera_storage::{ArchiveSource, BlobStore};
use tessera_worker::{spawn_periodic, ImportQueue, ImportQueueConfig, PeriodicHandle};

use crate::state::AppState;

/// Tasks that outlive individual requests.
pub struct Background {
    pub queue: ImportQueue,
    pub reaper: PeriodicHandle,
}

impl Background {
    /// Stop claiming imports and stop the session reaper.
    pub async fn shutdown(self) {
        self.queue.shutdown().await;
        self.reaper.stop().await;
        tracing::info!("Background tasks stopped");
    }
}

fn setup_transcoder(config: &Config) -> Option<Arc<dyn Transcoder>> {
    match FfmpegTranscoder::new(config.ffmpeg_path(), config.transcode_timeout()) {
        Ok(transcoder) => Some(Arc::new(transcoder)),
        Err(e) => {
            tracing::warn!(error = %e, "ffmpeg unavailable, derivatives and stream muxing disabled");
            None
        }
    }
}

/// Build repositories, the ingest orchestrator and the HTTP state, and start
/// the worker pool and the upload session reaper.
pub fn initialize_services(
    config: &Config,
    pool: PgPool,
    blobs: Arc<dyn BlobStore>,
    archive: Option<Arc<dyn ArchiveSource>>,
) -> Result<(Arc<AppState>, Background)> {
    let repos = Repositories::postgres(pool.clone());
    let dedup = DedupIndex::new(repos.media.clone(), repos.imports.clone());
    let cancels = CancelRegistry::new();

    let toolchain = Toolchain::new(ToolchainConfig::from_config(config))
        .context("Failed to initialize metadata toolchain")?;

    let orchestrator = Arc::new(IngestOrchestrator::new(IngestDeps {
        repos: repos.clone(),
        blobs: blobs.clone(),
        archive,
        extractor: Arc::new(toolchain),
        transcoder: setup_transcoder(config),
        dedup: dedup.clone(),
        cancels: cancels.clone(),
        config: PipelineConfig::from_config(config),
    }));

    let queue_config = ImportQueueConfig::from_config(config);
    tracing::info!(
        max_workers = queue_config.max_workers,
        max_retries = queue_config.max_retries,
        "Starting import queue"
    );
    let queue = ImportQueue::start(repos.imports.clone(), queue_config, orchestrator);

    let assembler = Arc::new(ChunkAssembler::new(
        ChunkAssemblerConfig::from_config(config),
        blobs.clone(),
        dedup,
    ));
    let reaper = spawn_periodic(assembler.clone(), config.upload_session_reap_interval());

    let state = Arc::new(AppState {
        pool: Some(pool),
        assembler,
        imports: ImportService::new(
            repos.imports.clone(),
            blobs.clone(),
            cancels,
            config.allowed_extensions().to_vec(),
        ),
        serve: ServeResolver::new(repos.media.clone(), blobs, ServeConfig::from_config(config)),
        queue: Some(queue.clone()),
    });

    Ok((state, Background { queue, reaper }))
}
