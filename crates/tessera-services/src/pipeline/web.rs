//! WEB: a capture in a web archive bucket.
//!
//! A capture is a meta JSON document, a checksum manifest and the media. The
//! media is either one merged file or separate video and audio streams named
//! `<id>.f<format>.<ext>` that get muxed here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use tessera_core::models::{ImportMode, SourceHints, WebDescriptor};
use tessera_core::validation::{file_extension, is_safe_token};
use tessera_core::AppError;
use tessera_processing::hash_file;
use tessera_storage::{generate_stored_name, ArchiveSource};

use super::context::{IngestContext, WebCapture};
use super::strategy::ImportStrategy;
use super::IngestDeps;

const AUDIO_STREAM_EXTENSIONS: [&str; 7] = ["m4a", "mp3", "aac", "opus", "oga", "weba", "wav"];

/// `sha256sum` style manifest: `<hex>  <name>` per line, `*` marking binary
/// mode. Keys are base names.
pub fn parse_checksum_manifest(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (hash, name) = line.split_once(char::is_whitespace)?;
            let name = name.trim_start().trim_start_matches('*');
            if hash.is_empty() || name.is_empty() {
                return None;
            }
            Some((base_name(name).to_string(), hash.to_lowercase()))
        })
        .collect()
}

fn base_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

fn sibling_key(video_key: &str, name: &str) -> String {
    match video_key.rsplit_once('/') {
        Some((dir, _)) => format!("{}/{}", dir, name),
        None => name.to_string(),
    }
}

/// `<id>.f<format digits>.<ext>`
fn is_stream_file(name: &str, id: &str) -> bool {
    let Some(rest) = name
        .strip_prefix(id)
        .and_then(|rest| rest.strip_prefix(".f"))
    else {
        return false;
    };
    match rest.split_once('.') {
        Some((format, ext)) => {
            !format.is_empty()
                && format.bytes().all(|b| b.is_ascii_digit())
                && !ext.is_empty()
                && !ext.contains('.')
        }
        None => false,
    }
}

fn meta_str(meta: &Value, key: &str) -> Option<String> {
    meta.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

pub struct WebStrategy;

impl WebStrategy {
    fn archive(deps: &IngestDeps) -> Result<&Arc<dyn ArchiveSource>, AppError> {
        deps.archive
            .as_ref()
            .ok_or_else(|| AppError::InvalidRequest("no web archive source configured".into()))
    }

    fn descriptor(ctx: &IngestContext) -> Result<WebDescriptor, AppError> {
        ctx.data
            .descriptor
            .clone()
            .ok_or_else(|| AppError::InvalidRequest("web import has no descriptor".into()))
    }

    async fn verify(
        ctx: &IngestContext,
        manifest: &HashMap<String, String>,
        key: &str,
        actual: &str,
    ) -> Result<(), AppError> {
        match manifest.get(base_name(key)) {
            Some(expected) if expected == actual => Ok(()),
            Some(expected) => Err(AppError::Integrity(format!(
                "hash mismatch for {}: manifest {}, actual {}",
                key, expected, actual
            ))),
            None => {
                ctx.journal
                    .log(&format!("no checksum entry for {}, not verified", key))
                    .await
            }
        }
    }

    /// Download `key` into the workdir, verify it and return its path.
    async fn pull(
        archive: &Arc<dyn ArchiveSource>,
        ctx: &IngestContext,
        bucket: &str,
        manifest: &HashMap<String, String>,
        key: &str,
    ) -> Result<(PathBuf, String), AppError> {
        let dest = ctx.workdir.path().join(base_name(key));
        archive.download_to_file(bucket, key, &dest).await?;
        let hash = hash_file(&dest).await?;
        Self::verify(ctx, manifest, key, &hash).await?;
        Ok((dest, hash))
    }

    /// A merged file whose manifest hash is already on a Media row is not
    /// downloaded at all.
    async fn reject_known_capture(
        deps: &IngestDeps,
        manifest: &HashMap<String, String>,
        key: &str,
    ) -> Result<(), AppError> {
        let Some(hash) = manifest.get(base_name(key)) else {
            return Ok(());
        };
        if deps.dedup.is_committed(hash).await? {
            return Err(AppError::Conflict("already exists".into()));
        }
        Ok(())
    }

    /// Mux the two stream files of a capture whose merged file is missing.
    async fn merge_streams(
        deps: &IngestDeps,
        ctx: &IngestContext,
        descriptor: &WebDescriptor,
        id: &str,
        manifest: &HashMap<String, String>,
    ) -> Result<(PathBuf, String), AppError> {
        let archive = Self::archive(deps)?;
        let mut streams: Vec<&String> = manifest
            .keys()
            .filter(|name| is_stream_file(name, id))
            .collect();
        streams.sort();
        if streams.len() != 2 {
            return Err(AppError::InvalidRequest(format!(
                "{} not found and capture {} has {} stream files, expected 2",
                descriptor.video_file,
                id,
                streams.len()
            )));
        }

        let is_audio = |name: &str| {
            file_extension(name).is_some_and(|ext| AUDIO_STREAM_EXTENSIONS.contains(&ext.as_str()))
        };
        let (video_name, audio_name) = if is_audio(streams[0].as_str()) && !is_audio(streams[1].as_str()) {
            (streams[1], streams[0])
        } else {
            (streams[0], streams[1])
        };

        let transcoder = deps
            .transcoder
            .as_ref()
            .ok_or_else(|| AppError::Transcode("no muxer available".into()))?;

        let video_key = sibling_key(&descriptor.video_file, video_name);
        let audio_key = sibling_key(&descriptor.video_file, audio_name);
        let (video, _) = Self::pull(archive, ctx, &descriptor.bucket, manifest, &video_key).await?;
        let (audio, _) = Self::pull(archive, ctx, &descriptor.bucket, manifest, &audio_key).await?;

        let out = ctx.workdir.path().join(format!("{}.mp4", id));
        transcoder
            .mux(&video, &audio, &out, ctx.cancel())
            .await
            .map_err(|e| match AppError::from(e) {
                AppError::Cancelled => AppError::Cancelled,
                other => AppError::Transcode(other.detail()),
            })?;
        ctx.journal
            .log(&format!("muxed {} and {} into {}.mp4", video_name, audio_name, id))
            .await?;

        let hash = hash_file(&out).await?;
        Self::verify(ctx, manifest, &descriptor.video_file, &hash).await?;
        Ok((out, hash))
    }

    fn sources_from(meta: &Value) -> (Option<String>, SourceHints) {
        let main = meta_str(meta, "extractor_key")
            .or_else(|| meta_str(meta, "extractor"))
            .map(|s| s.to_lowercase());
        let hints = SourceHints {
            uploader_id: meta_str(meta, "uploader_id").or_else(|| meta_str(meta, "channel_id")),
            uploader: meta_str(meta, "uploader").or_else(|| meta_str(meta, "channel")),
            urls: ["channel_url", "uploader_url"]
                .iter()
                .filter_map(|k| meta_str(meta, k))
                .collect(),
        };
        (main, hints)
    }
}

#[async_trait]
impl ImportStrategy for WebStrategy {
    fn mode(&self) -> ImportMode {
        ImportMode::Web
    }

    async fn fetch(&self, deps: &IngestDeps, ctx: &mut IngestContext) -> Result<(), AppError> {
        let archive = Self::archive(deps)?.clone();
        let descriptor = Self::descriptor(ctx)?;

        let raw_meta = archive
            .get_bytes(&descriptor.bucket, &descriptor.meta_file)
            .await?;
        let meta: Value = serde_json::from_slice(&raw_meta)?;
        let id = descriptor
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| meta_str(&meta, "id"))
            .ok_or_else(|| AppError::InvalidRequest("web capture has no id".into()))?;
        if !is_safe_token(&id) {
            return Err(AppError::InvalidRequest(format!(
                "web capture id '{}' is not usable as a file name",
                id.escape_debug()
            )));
        }

        let raw_manifest = archive
            .get_bytes(&descriptor.bucket, &descriptor.checksum_file)
            .await?;
        let manifest = parse_checksum_manifest(&String::from_utf8_lossy(&raw_manifest));

        let (path, hash) = match archive
            .head(&descriptor.bucket, &descriptor.video_file)
            .await?
        {
            Some(_) => {
                Self::reject_known_capture(deps, &manifest, &descriptor.video_file).await?;
                Self::pull(&archive, ctx, &descriptor.bucket, &manifest, &descriptor.video_file)
                    .await?
            }
            None => Self::merge_streams(deps, ctx, &descriptor, &id, &manifest).await?,
        };

        let ext = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(file_extension)
            .unwrap_or_else(|| "mp4".to_string());
        let size = tokio::fs::metadata(&path).await?.len();
        ctx.original_filename = format!("{}.{}", id, ext);
        ctx.web = Some(WebCapture { id, meta });
        ctx.set_fetched(path, hash, size).await
    }

    async fn store(&self, deps: &IngestDeps, ctx: &mut IngestContext) -> Result<(), AppError> {
        let path = ctx.local_path()?.to_path_buf();
        let mut stored = ctx.original_filename.clone();
        if deps.blobs.exists(&stored).await? {
            stored = generate_stored_name(&ctx.original_filename);
        }
        deps.blobs.put_file(&path, &stored).await?;
        ctx.owned_objects.push(stored.clone());
        ctx.journal.log(&format!("stored as {}", stored)).await?;
        ctx.stored_name = Some(stored);
        Ok(())
    }

    async fn finalize_meta(
        &self,
        deps: &IngestDeps,
        ctx: &mut IngestContext,
    ) -> Result<(), AppError> {
        let capture = ctx
            .web
            .clone()
            .ok_or_else(|| AppError::Internal("web capture not fetched".into()))?;
        let meta = &capture.meta;

        ctx.draft.title = meta_str(meta, "fulltitle").unwrap_or_else(|| capture.id.clone());
        ctx.draft.origin_id = Some(capture.id.clone());
        ctx.draft.source_link =
            meta_str(meta, "webpage_url").or_else(|| meta_str(meta, "original_url"));
        ctx.draft.publish_date = meta_str(meta, "upload_date")
            .and_then(|d| NaiveDate::parse_from_str(&d, "%Y%m%d").ok())
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc());

        let (main, hints) = Self::sources_from(meta);
        if let Some(main) = main {
            let main_id = deps.repos.sources.find_or_create_main(&main).await?;
            ctx.draft.source_ids.push(main_id);
            if !hints.is_empty() {
                let sub_id = deps.repos.sources.find_or_create_sub(main_id, &hints).await?;
                ctx.draft.source_ids.push(sub_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_parsing() {
        let manifest = parse_checksum_manifest(
            "ABC123  v1.mp4\n\
             def456 *captures/v1.f137.mp4\n\
             \n\
             # comment\n\
             broken-line\n",
        );
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest["v1.mp4"], "abc123");
        assert_eq!(manifest["v1.f137.mp4"], "def456");
    }

    #[test]
    fn test_stream_file_names() {
        assert!(is_stream_file("abc.f137.mp4", "abc"));
        assert!(is_stream_file("abc.f140.m4a", "abc"));
        assert!(!is_stream_file("abc.flac", "abc"));
        assert!(!is_stream_file("abc.f.mp4", "abc"));
        assert!(!is_stream_file("abc.f137", "abc"));
        assert!(!is_stream_file("abc.f137.part.mp4", "abc"));
        assert!(!is_stream_file("abcd.f137.mp4", "abc"));
    }

    #[test]
    fn test_sibling_key_keeps_directory() {
        assert_eq!(sibling_key("captures/v1.mp4", "v1.f140.m4a"), "captures/v1.f140.m4a");
        assert_eq!(sibling_key("v1.mp4", "v1.f140.m4a"), "v1.f140.m4a");
    }

    #[test]
    fn test_sources_from_meta() {
        let meta = serde_json::json!({
            "extractor_key": "Youtube",
            "uploader": "Field Desk",
            "channel_id": "UC1",
            "channel_url": "https://example.org/c/UC1"
        });
        let (main, hints) = WebStrategy::sources_from(&meta);
        assert_eq!(main.as_deref(), Some("youtube"));
        assert_eq!(hints.uploader_id.as_deref(), Some("UC1"));
        assert_eq!(hints.urls, vec!["https://example.org/c/UC1".to_string()]);
    }
}
