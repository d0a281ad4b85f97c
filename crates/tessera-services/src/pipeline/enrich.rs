//! Best-effort stages: extraction, derivatives and transcription.
//!
//! Extractor failures become journal lines and the ingest goes on. Only
//! cancellation aborts.

use tessera_core::validation::file_stem;
use tessera_core::AppError;
use tessera_processing::{hash_file, needs_transcode, ToolResult};
use tessera_storage::generate_stored_name;

use super::context::{Derivative, IngestContext};
use super::{IngestDeps, MediaClass};

/// `Some` on success, `None` after logging a failure.
async fn best_effort<T>(
    ctx: &IngestContext,
    what: &str,
    result: ToolResult<T>,
) -> Result<Option<T>, AppError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_cancelled() => Err(AppError::Cancelled),
        Err(e) => {
            tracing::warn!(import_id = %ctx.journal.id(), error = %e, "{} failed", what);
            ctx.journal.log(&format!("{} failed: {}", what, e)).await?;
            Ok(None)
        }
    }
}

pub(super) fn class_of(deps: &IngestDeps, ctx: &IngestContext) -> MediaClass {
    deps.config
        .classify(ctx.extension.as_deref(), ctx.tags.mime_type().as_deref())
}

pub(super) async fn extract(deps: &IngestDeps, ctx: &mut IngestContext) -> Result<(), AppError> {
    let path = ctx.local_path()?.to_path_buf();
    let extractor = deps.extractor.clone();
    let options = ctx.data.options.clone();

    let tags = extractor.extract_tags(&path, ctx.cancel()).await;
    if let Some(tags) = best_effort(ctx, "metadata extraction", tags).await? {
        ctx.journal
            .log(&format!("extracted {} metadata tags", tags.len()))
            .await?;
        ctx.tags = tags;
    }

    match class_of(deps, ctx) {
        MediaClass::Video => {
            let probed = extractor.probe_video(&path, ctx.cancel()).await;
            match best_effort(ctx, "video probe", probed).await? {
                Some(Some(info)) => {
                    ctx.journal
                        .log(&format!(
                            "video stream: {}, {}s",
                            info.codec,
                            info.duration_string().unwrap_or_else(|| "?".into())
                        ))
                        .await?;
                    ctx.video = Some(info);
                }
                Some(None) => ctx.journal.log("no video stream found").await?,
                None => {}
            }
        }
        MediaClass::Image if options.ocr => {
            let text = extractor.ocr_image(&path, None, ctx.cancel()).await;
            record_text(ctx, "ocr", text).await?;
        }
        MediaClass::Document if options.parse => {
            let text = extractor
                .extract_document_text(&path, options.ocr, ctx.cancel())
                .await;
            record_text(ctx, "document text extraction", text).await?;
        }
        _ => {}
    }
    Ok(())
}

async fn record_text(
    ctx: &mut IngestContext,
    what: &str,
    result: ToolResult<Option<String>>,
) -> Result<(), AppError> {
    match best_effort(ctx, what, result).await? {
        Some(Some(text)) if !text.trim().is_empty() => {
            ctx.journal
                .log(&format!("{}: {} characters", what, text.chars().count()))
                .await?;
            ctx.texts.push(text.trim().to_string());
        }
        Some(_) => ctx.journal.log(&format!("{}: no text", what)).await?,
        None => {}
    }
    Ok(())
}

/// Web-playable mp4 for video that is not web-safe, when asked to optimize.
pub(super) async fn derive(deps: &IngestDeps, ctx: &mut IngestContext) -> Result<(), AppError> {
    if !ctx.data.options.optimize || class_of(deps, ctx) != MediaClass::Video {
        return Ok(());
    }
    let Some(video) = ctx.video.clone() else {
        return ctx.journal.log("transcode skipped: no video stream info").await;
    };
    let ext = ctx.extension.clone().unwrap_or_default();
    if !needs_transcode(&ext, &video.codec) {
        return ctx
            .journal
            .log(&format!("{} / {} is web-safe, no transcode", ext, video.codec))
            .await;
    }
    let Some(transcoder) = deps.transcoder.clone() else {
        return ctx.journal.log("transcode skipped: no transcoder available").await;
    };

    let src = ctx.local_path()?.to_path_buf();
    let stem = file_stem(&ctx.original_filename);
    let dest = ctx.workdir.path().join(format!("{}.web.mp4", stem));
    let start = std::time::Instant::now();
    let result = transcoder.transcode(&src, &dest, ctx.cancel()).await;
    if best_effort(ctx, "transcode", result).await?.is_none() {
        return Ok(());
    }

    let hash = match hash_file(&dest).await {
        Ok(hash) => hash,
        Err(e) => return ctx.journal.log(&format!("transcode failed: {}", e)).await,
    };
    if deps.dedup.is_committed(&hash).await? {
        return ctx
            .journal
            .log("transcoded file already exists, derivative discarded")
            .await;
    }

    let probed = deps.extractor.probe_video(&dest, ctx.cancel()).await;
    let duration = best_effort(ctx, "derivative probe", probed)
        .await?
        .flatten()
        .and_then(|info| info.duration_string())
        .or_else(|| video.duration_string());

    let stored = generate_stored_name(&format!("{}.mp4", stem));
    if let Err(e) = deps.blobs.put_file(&dest, &stored).await {
        return ctx
            .journal
            .log(&format!("storing transcoded file failed: {}", e))
            .await;
    }
    ctx.owned_objects.push(stored.clone());

    tracing::info!(
        import_id = %ctx.journal.id(),
        stored_name = %stored,
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Transcoded derivative stored"
    );
    ctx.journal
        .log(&format!("transcoded to mp4, stored as {}", stored))
        .await?;
    ctx.derivative = Some(Derivative {
        stored_name: stored,
        hash,
        duration,
    });
    Ok(())
}

pub(super) async fn transcribe(deps: &IngestDeps, ctx: &mut IngestContext) -> Result<(), AppError> {
    if !ctx.data.options.transcription {
        return Ok(());
    }
    if !matches!(class_of(deps, ctx), MediaClass::Video | MediaClass::Audio) {
        return Ok(());
    }
    let path = ctx.local_path()?.to_path_buf();
    let language = ctx
        .data
        .options
        .transcription_language
        .clone()
        .filter(|l| !l.is_empty() && l != "auto");

    let result = deps
        .extractor
        .transcribe(&path, language.as_deref(), ctx.cancel())
        .await;
    match best_effort(ctx, "transcription", result).await? {
        Some(Some(text)) if !text.trim().is_empty() => {
            ctx.journal.log("transcription complete").await?;
            ctx.transcription = Some(text.trim().to_string());
        }
        Some(_) => ctx.journal.log("transcription: no speech recognized").await?,
        None => {}
    }
    Ok(())
}
