#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use tessera_core::models::{ImportJournal, TagMap, VideoInfo};
use tessera_db::{ImportRepository, MemoryDatabase, Repositories};
use tessera_processing::{MetadataExtractor, ToolError, ToolResult, Transcoder};
use tessera_services::{
    CancelRegistry, ChunkAssembler, ChunkAssemblerConfig, ChunkOutcome, ChunkUpload, DedupIndex,
    ImportService, IngestDeps, IngestOrchestrator, PipelineConfig, StoredUpload,
};
use tessera_storage::{BlobStore, LocalArchive, LocalStorage};
use tessera_worker::ImportHandler;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const OCR_TEXT: &str = "CHECKPOINT 7 - NORTH GATE";
pub const ARCHIVE_BUCKET: &str = "captures";

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn ext_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase()
}

/// Tags keyed on the file extension; `.bin` files have no MIME type.
pub struct FakeExtractor;

#[async_trait]
impl MetadataExtractor for FakeExtractor {
    async fn extract_tags(&self, path: &Path, _cancel: &CancellationToken) -> ToolResult<TagMap> {
        let mut tags = TagMap::new();
        match ext_of(path).as_str() {
            "jpg" => {
                tags.insert("MIME Type", "image/jpeg");
                tags.insert("Create Date", "2021:06:01 14:03:22");
                tags.insert("Serial Number", "CAM-0042");
            }
            "avi" => tags.insert("MIME Type", "video/x-msvideo"),
            "mp4" => tags.insert("MIME Type", "video/mp4"),
            _ => {}
        }
        Ok(tags)
    }

    async fn probe_video(
        &self,
        path: &Path,
        _cancel: &CancellationToken,
    ) -> ToolResult<Option<VideoInfo>> {
        let codec = match ext_of(path).as_str() {
            "avi" => "MPEG-4 part 2",
            "mp4" => "H.264",
            _ => return Ok(None),
        };
        Ok(Some(VideoInfo {
            codec: codec.into(),
            duration_seconds: Some(12.4),
            width: Some(854),
            height: Some(480),
        }))
    }

    async fn ocr_image(
        &self,
        _path: &Path,
        _languages: Option<&str>,
        _cancel: &CancellationToken,
    ) -> ToolResult<Option<String>> {
        Ok(Some(OCR_TEXT.to_string()))
    }

    async fn extract_document_text(
        &self,
        _path: &Path,
        _attempt_ocr: bool,
        _cancel: &CancellationToken,
    ) -> ToolResult<Option<String>> {
        Ok(None)
    }

    async fn transcribe(
        &self,
        _path: &Path,
        _language: Option<&str>,
        _cancel: &CancellationToken,
    ) -> ToolResult<Option<String>> {
        Ok(Some("[0.00 - 2.00] all units report".to_string()))
    }
}

/// Writes recognizable bytes instead of running ffmpeg.
pub struct FakeTranscoder {
    pub fail: bool,
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, src: &Path, dest: &Path, _cancel: &CancellationToken) -> ToolResult<()> {
        if self.fail {
            return Err(ToolError::Failed {
                tool: "ffmpeg".into(),
                status: "exit status: 1".into(),
                stderr: "Invalid data found when processing input".into(),
            });
        }
        let mut out = b"mp4:".to_vec();
        out.extend(tokio::fs::read(src).await?);
        tokio::fs::write(dest, out).await?;
        Ok(())
    }

    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        dest: &Path,
        _cancel: &CancellationToken,
    ) -> ToolResult<()> {
        let mut out = tokio::fs::read(video).await?;
        out.extend(tokio::fs::read(audio).await?);
        tokio::fs::write(dest, out).await?;
        Ok(())
    }
}

/// Blocks inside `transcode` until the import's token fires.
pub struct HangingTranscoder {
    pub started: Arc<Notify>,
}

#[async_trait]
impl Transcoder for HangingTranscoder {
    async fn transcode(&self, _src: &Path, _dest: &Path, cancel: &CancellationToken) -> ToolResult<()> {
        self.started.notify_one();
        cancel.cancelled().await;
        Err(ToolError::Cancelled {
            tool: "ffmpeg".into(),
        })
    }

    async fn mux(
        &self,
        _video: &Path,
        _audio: &Path,
        _dest: &Path,
        cancel: &CancellationToken,
    ) -> ToolResult<()> {
        cancel.cancelled().await;
        Err(ToolError::Cancelled {
            tool: "ffmpeg".into(),
        })
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub db: Arc<MemoryDatabase>,
    pub blobs: Arc<LocalStorage>,
    pub orchestrator: Arc<IngestOrchestrator>,
    pub assembler: ChunkAssembler,
    pub imports: ImportService,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_transcoder(Some(FakeTranscoder { fail: false })).await
    }

    pub async fn with_transcoder(transcoder: Option<FakeTranscoder>) -> Self {
        Self::build(transcoder.map(|t| Arc::new(t) as Arc<dyn Transcoder>)).await
    }

    pub async fn build(transcoder: Option<Arc<dyn Transcoder>>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(MemoryDatabase::new());
        let blobs = Arc::new(
            LocalStorage::new(dir.path().join("media"), dir.path().join("inline"))
                .await
                .unwrap(),
        );
        std::fs::create_dir_all(dir.path().join("archive").join(ARCHIVE_BUCKET)).unwrap();

        let repos = Repositories::memory(db.clone());
        let dedup = DedupIndex::new(repos.media.clone(), repos.imports.clone());
        let allowed = strings(&["jpg", "png", "avi", "mp4", "mp3", "pdf", "bin"]);
        let cancels = CancelRegistry::new();

        let config = PipelineConfig {
            work_dir: dir.path().join("work"),
            allowed_extensions: allowed.clone(),
            image_extensions: strings(&["jpg", "png"]),
            video_extensions: strings(&["avi", "mp4"]),
            audio_extensions: strings(&["mp3"]),
            document_extensions: strings(&["pdf"]),
            cancel_poll_interval: Duration::from_millis(20),
        };
        let deps = IngestDeps {
            repos: repos.clone(),
            blobs: blobs.clone(),
            archive: Some(Arc::new(LocalArchive::new(dir.path().join("archive")))),
            extractor: Arc::new(FakeExtractor),
            transcoder,
            dedup: dedup.clone(),
            cancels: cancels.clone(),
            config,
        };

        let assembler = ChunkAssembler::new(
            ChunkAssemblerConfig {
                staging_dir: dir.path().join("staging"),
                max_file_size: 64 * 1024 * 1024,
                allowed_extensions: allowed.clone(),
                session_ttl: Duration::from_secs(24 * 3600),
            },
            blobs.clone(),
            dedup,
        );
        let imports = ImportService::new(repos.imports.clone(), blobs.clone(), cancels, allowed);

        Self {
            db,
            blobs,
            orchestrator: Arc::new(IngestOrchestrator::new(deps)),
            assembler,
            imports,
            dir,
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Write a file into the archive bucket.
    pub fn archive_put(&self, key: &str, data: &[u8]) {
        std::fs::write(self.path("archive").join(ARCHIVE_BUCKET).join(key), data).unwrap();
    }

    /// Send `data` in chunks of the given sizes and return the finalized upload.
    pub async fn upload(&self, upload_id: &str, filename: &str, data: &[u8], sizes: &[usize]) -> StoredUpload {
        assert_eq!(sizes.iter().sum::<usize>(), data.len());
        let mut offset = 0;
        let mut finalized = None;
        for (index, size) in sizes.iter().enumerate() {
            let outcome = self
                .assembler
                .accept_chunk(ChunkUpload {
                    upload_id: upload_id.into(),
                    index: index as u32,
                    total_chunks: sizes.len() as u32,
                    total_size: data.len() as u64,
                    filename: filename.into(),
                    data: Bytes::copy_from_slice(&data[offset..offset + size]),
                })
                .await
                .unwrap();
            offset += size;
            if let ChunkOutcome::Finalized(stored) = outcome {
                finalized = Some(stored);
            }
        }
        finalized.expect("last chunk finalizes")
    }

    /// Run one attempt the way the queue does and return the journal.
    pub async fn drive(&self, import_id: Uuid) -> ImportJournal {
        if let Err(e) = self.orchestrator.clone().run(import_id, 1).await {
            self.orchestrator.give_up(import_id, &e).await;
        }
        ImportRepository::get(self.db.as_ref(), import_id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn object_exists(&self, name: &str) -> bool {
        self.blobs.exists(name).await.unwrap()
    }

    /// Contents of every object in the media store.
    pub fn stored_objects(&self) -> Vec<Vec<u8>> {
        std::fs::read_dir(self.blobs.base_path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| std::fs::read(e.path()).unwrap())
            .collect()
    }
}

/// Deterministic filler bytes distinct per `seed`.
pub fn sample_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| ((i % 251) as u8).wrapping_add(seed)).collect()
}

pub fn last_line(journal: &ImportJournal) -> String {
    journal.log_lines().last().map(|l| l.to_string()).unwrap_or_default()
}
