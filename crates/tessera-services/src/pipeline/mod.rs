//! The ingest orchestrator.
//!
//! One driver sequences every import through the same stages. The three
//! import modes plug in through [`strategy::ImportStrategy`], which covers
//! only what differs between them: getting the file, placing it in the blob
//! store, and the mode-specific bulletin fields.

mod commit;
mod context;
mod enrich;
mod server;
mod strategy;
mod upload;
mod web;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tessera_core::models::ImportStatus;
use tessera_core::{AppError, Config, TaskError};
use tessera_db::Repositories;
use tessera_processing::{MetadataExtractor, Transcoder};
use tessera_storage::{ArchiveSource, BlobStore};
use tessera_worker::ImportHandler;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::cancel::CancelRegistry;
use crate::dedup::DedupIndex;
use crate::error::{IngestError, StageResultExt};
use crate::journal::JournalHandle;

pub use context::{BulletinDraft, Derivative, IngestContext, WebCapture};
pub use strategy::{strategy_for, ImportStrategy};
pub use web::parse_checksum_manifest;

/// Where an ingest is in its lifecycle. Any stage may end in failure;
/// `Committed -> Done` is the only way to success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Hashing,
    DupCheck,
    Stored,
    Extracted,
    Derived,
    Transcribed,
    Committed,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Hashing => "hashing",
            Stage::DupCheck => "dup-check",
            Stage::Stored => "stored",
            Stage::Extracted => "extracted",
            Stage::Derived => "derived",
            Stage::Transcribed => "transcribed",
            Stage::Committed => "committed",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Coarse file class steering which extractors run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaClass {
    Image,
    Video,
    Audio,
    Document,
    Other,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Parent of the per-import scratch directories
    pub work_dir: PathBuf,
    pub allowed_extensions: Vec<String>,
    pub image_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
    pub audio_extensions: Vec<String>,
    pub document_extensions: Vec<String>,
    /// How often a running import re-reads its cancel flag
    pub cancel_poll_interval: Duration,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            work_dir: PathBuf::from(config.staging_dir()).join("work"),
            allowed_extensions: config.allowed_extensions().to_vec(),
            image_extensions: config.image_allowed_extensions().to_vec(),
            video_extensions: config.video_allowed_extensions().to_vec(),
            audio_extensions: config.audio_allowed_extensions().to_vec(),
            document_extensions: config.document_allowed_extensions().to_vec(),
            cancel_poll_interval: Duration::from_secs(2),
        }
    }

    /// Extension lists first, MIME type prefix as fallback.
    pub fn classify(&self, extension: Option<&str>, mime: Option<&str>) -> MediaClass {
        if let Some(ext) = extension {
            let ext = ext.to_string();
            if self.video_extensions.contains(&ext) {
                return MediaClass::Video;
            }
            if self.audio_extensions.contains(&ext) {
                return MediaClass::Audio;
            }
            if self.image_extensions.contains(&ext) {
                return MediaClass::Image;
            }
            if self.document_extensions.contains(&ext) {
                return MediaClass::Document;
            }
        }
        match mime.and_then(|m| m.split('/').next()) {
            Some("video") => MediaClass::Video,
            Some("audio") => MediaClass::Audio,
            Some("image") => MediaClass::Image,
            _ => match mime {
                Some("application/pdf") => MediaClass::Document,
                Some(m) if m.contains("wordprocessingml") => MediaClass::Document,
                _ => MediaClass::Other,
            },
        }
    }
}

/// Collaborators of an ingest.
pub struct IngestDeps {
    pub repos: Repositories,
    pub blobs: Arc<dyn BlobStore>,
    /// Web archive reader; WEB imports fail without one
    pub archive: Option<Arc<dyn ArchiveSource>>,
    pub extractor: Arc<dyn MetadataExtractor>,
    /// Transcoder and muxer; without one no derivatives are produced
    pub transcoder: Option<Arc<dyn Transcoder>>,
    pub dedup: DedupIndex,
    pub cancels: CancelRegistry,
    pub config: PipelineConfig,
}

pub struct IngestOrchestrator {
    deps: IngestDeps,
}

impl IngestOrchestrator {
    pub fn new(deps: IngestDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &IngestDeps {
        &self.deps
    }

    fn journal(&self, import_id: Uuid, cancel: CancellationToken) -> JournalHandle {
        JournalHandle::new(self.deps.repos.imports.clone(), import_id, cancel)
    }

    /// Run one attempt. `Ok` once the journal is terminal.
    #[tracing::instrument(skip(self), fields(import.id = %import_id))]
    pub async fn run_attempt(&self, import_id: Uuid, attempt: u32) -> Result<(), IngestError> {
        let registration = self.deps.cancels.register(import_id);
        let journal = self.journal(import_id, registration.token().clone());

        let import = journal.load().await.at(Stage::Received)?;
        match import.status {
            ImportStatus::Success | ImportStatus::Failed => {
                tracing::info!(import_id = %import_id, status = %import.status, "Import already finished");
                return Ok(());
            }
            ImportStatus::Pending => {
                journal.processing().await.at(Stage::Received)?;
            }
            ImportStatus::Processing => {}
        }

        let _watch = self.watch_cancel_flag(import_id, registration.token().clone());
        let strategy = strategy_for(import.mode);
        journal
            .log(&format!("attempt {}: {} import started", attempt, import.mode))
            .await
            .at(Stage::Received)?;

        let mut ctx = IngestContext::new(journal, import, &self.deps.config.work_dir)
            .await
            .at(Stage::Received)?;

        let result = self.drive(strategy.as_ref(), &mut ctx).await;
        if let Err(e) = &result {
            if !e.is_cancelled() {
                self.discard_owned(&mut ctx).await;
            }
        }
        result
    }

    async fn drive(
        &self,
        strategy: &dyn ImportStrategy,
        ctx: &mut IngestContext,
    ) -> Result<(), IngestError> {
        let deps = &self.deps;
        let start = std::time::Instant::now();

        self.enter(ctx, Stage::Hashing).await?;
        strategy.fetch(deps, ctx).await.at(Stage::Hashing)?;

        self.enter(ctx, Stage::DupCheck).await?;
        let hash = ctx.hash().at(Stage::DupCheck)?.to_string();
        if deps
            .dedup
            .is_known_before(&hash, ctx.journal.id())
            .await
            .at(Stage::DupCheck)?
        {
            return Err(IngestError::new(
                Stage::DupCheck,
                AppError::Conflict("duplicate file".into()),
            ));
        }

        self.enter(ctx, Stage::Stored).await?;
        strategy.store(deps, ctx).await.at(Stage::Stored)?;

        self.enter(ctx, Stage::Extracted).await?;
        enrich::extract(deps, ctx).await.at(Stage::Extracted)?;

        self.enter(ctx, Stage::Derived).await?;
        enrich::derive(deps, ctx).await.at(Stage::Derived)?;

        self.enter(ctx, Stage::Transcribed).await?;
        enrich::transcribe(deps, ctx).await.at(Stage::Transcribed)?;

        self.enter(ctx, Stage::Committed).await?;
        strategy.finalize_meta(deps, ctx).await.at(Stage::Committed)?;
        let bulletin = commit::commit(deps, ctx).await.at(Stage::Committed)?;

        // Past this point the bulletin stands; later failures are only logged.
        if let Err(e) = ctx.journal.add_item(bulletin.id).await {
            tracing::error!(import_id = %ctx.journal.id(), error = %e, "Failed to record bulletin");
        }
        ctx.journal.success().await.at(Stage::Done)?;

        tracing::info!(
            import_id = %ctx.journal.id(),
            bulletin_id = bulletin.id,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Import committed"
        );
        Ok(())
    }

    async fn enter(&self, ctx: &IngestContext, stage: Stage) -> Result<(), IngestError> {
        ctx.journal.checkpoint().await.at(stage)?;
        tracing::debug!(import_id = %ctx.journal.id(), stage = %stage, "Entering stage");
        Ok(())
    }

    /// Objects written by a failed attempt.
    async fn discard_owned(&self, ctx: &mut IngestContext) {
        for name in ctx.owned_objects.drain(..) {
            if let Err(e) = self.deps.blobs.delete(&name).await {
                tracing::warn!(object = %name, error = %e, "Failed to remove object of failed import");
            }
        }
    }

    /// Poll the journal's cancel flag while the import runs.
    fn watch_cancel_flag(&self, import_id: Uuid, token: CancellationToken) -> DropGuard {
        let stop = CancellationToken::new();
        let guard = stop.clone().drop_guard();
        let imports = self.deps.repos.imports.clone();
        let every = self.deps.config.cancel_poll_interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(every) => {
                        if let Ok(true) = imports.is_cancel_requested(import_id).await {
                            tracing::info!(import_id = %import_id, "Cancel requested");
                            token.cancel();
                            break;
                        }
                    }
                }
            }
        });

        guard
    }

    /// Record a terminal failure reason on the journal.
    async fn fail_journal(&self, import_id: Uuid, reason: &str) {
        let journal = self.journal(import_id, CancellationToken::new());
        if let Err(e) = journal.fail(Some(reason)).await {
            tracing::error!(import_id = %import_id, error = %e, "Failed to mark import failed");
        }
    }
}

#[async_trait]
impl ImportHandler for IngestOrchestrator {
    async fn run(self: Arc<Self>, import_id: Uuid, attempt: u32) -> Result<(), TaskError> {
        match self.run_attempt(import_id, attempt).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if !e.is_cancelled() {
                    let journal = self.journal(import_id, CancellationToken::new());
                    let line = format!("{} failed: {}", e.stage, e.source.detail());
                    if let Err(log_err) = journal.log(&line).await {
                        tracing::error!(import_id = %import_id, error = %log_err, "Failed to log stage failure");
                    }
                }
                Err(e.into_app_error().into())
            }
        }
    }

    async fn retrying(&self, import_id: Uuid, attempt: u32, backoff: Duration, error: &TaskError) {
        let journal = self.journal(import_id, CancellationToken::new());
        let line = format!(
            "attempt {} failed ({}), retrying in {}s",
            attempt,
            reason_for(error),
            backoff.as_secs()
        );
        if let Err(e) = journal.log(&line).await {
            tracing::error!(import_id = %import_id, error = %e, "Failed to log retry");
        }
    }

    async fn give_up(&self, import_id: Uuid, error: &TaskError) {
        self.fail_journal(import_id, &reason_for(error)).await;
    }
}

/// Journal reason line for a task failure.
fn reason_for(error: &TaskError) -> String {
    match error.app_error() {
        Some(app) => app.journal_reason(),
        None => format!("server-error: {}", error),
    }
}
