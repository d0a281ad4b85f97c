//! Bulletin assembly and the commit stage.

use serde_json::json;
use tessera_core::models::{Bulletin, NewBulletin, NewMedia, STATUS_MACHINE_CREATED};
use tessera_core::AppError;

use super::context::IngestContext;
use super::IngestDeps;

const DERIVATIVE_MIME: &str = "video/mp4";

fn unique(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for v in values {
        let v = v.trim().to_string();
        if !v.is_empty() && !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

/// Bulletin and media rows for a fully processed import.
pub fn build_bulletin(ctx: &IngestContext) -> Result<(NewBulletin, Vec<NewMedia>), AppError> {
    let mime = ctx.tags.mime_type().ok_or_else(|| {
        AppError::UnknownMime(format!("no MIME type detected for {}", ctx.original_filename))
    })?;
    let stored = ctx.stored_name()?.to_string();
    let hash = ctx.hash()?.to_string();
    let options = &ctx.data.options;

    let mut paragraphs = ctx.texts.clone();
    if let Some(text) = &ctx.transcription {
        paragraphs.push(format!("Transcription:\n{}", text));
    }

    let tags = unique(
        std::iter::once(ctx.import.batch_id.clone())
            .chain(ctx.tags.serial_number())
            .chain(options.tags.iter().cloned()),
    );

    let mut source_ids = options.sources.clone();
    for id in &ctx.draft.source_ids {
        if !source_ids.contains(id) {
            source_ids.push(*id);
        }
    }

    let meta = json!({
        "import_id": ctx.import.id,
        "mode": ctx.import.mode,
        "original_filename": ctx.original_filename,
        "file_size": ctx.file_size,
        "file_hash": hash,
        "tags": ctx.tags.to_json(),
        "video": ctx.video,
        "web": ctx.web.as_ref().map(|w| w.meta.clone()),
        "relations": {
            "labels": options.labels,
            "locations": options.locations,
            "roles": options.roles,
        },
    });

    let bulletin = NewBulletin {
        title: ctx.draft.title.clone(),
        description: paragraphs.join("\n\n"),
        status: STATUS_MACHINE_CREATED.to_string(),
        origin_id: ctx.draft.origin_id.clone(),
        source_link: ctx.draft.source_link.clone(),
        comment: Some(format!("Created by {} import {}", ctx.import.mode, ctx.import.id)),
        documentation_date: ctx.tags.create_date(),
        publish_date: ctx.draft.publish_date,
        tags,
        meta,
        assigned_to: ctx.import.user_id.clone(),
        source_ids,
        ..Default::default()
    };

    let duration = ctx.video.as_ref().and_then(|v| v.duration_string());
    let mut media = vec![NewMedia {
        title: ctx.draft.title.clone(),
        media_file: stored,
        media_file_type: mime,
        etag: hash,
        main: true,
        duration: duration.clone(),
    }];
    if let Some(derivative) = &ctx.derivative {
        media.push(NewMedia {
            title: ctx.draft.title.clone(),
            media_file: derivative.stored_name.clone(),
            media_file_type: DERIVATIVE_MIME.to_string(),
            etag: derivative.hash.clone(),
            main: false,
            duration: derivative.duration.clone().or(duration),
        });
    }
    Ok((bulletin, media))
}

/// Insert bulletin and media atomically. A file of unknown type is not kept.
pub(super) async fn commit(deps: &IngestDeps, ctx: &mut IngestContext) -> Result<Bulletin, AppError> {
    let (bulletin, media) = match build_bulletin(ctx) {
        Ok(rows) => rows,
        Err(e @ AppError::UnknownMime(_)) => {
            let mut doomed: Vec<String> = ctx.owned_objects.drain(..).collect();
            if let Some(stored) = &ctx.stored_name {
                if !doomed.contains(stored) {
                    doomed.push(stored.clone());
                }
            }
            for name in doomed {
                if let Err(err) = deps.blobs.delete(&name).await {
                    tracing::warn!(object = %name, error = %err, "Failed to remove file of unknown type");
                }
            }
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    let committed = deps.repos.bulletins.commit(bulletin, media).await?;
    ctx.owned_objects.clear();
    ctx.journal
        .log(&format!("bulletin {} created", committed.id))
        .await?;
    Ok(committed)
}
