//! Chunked upload assembly.
//!
//! Chunks of one upload land in `<staging>/sessions/<upload_id>/<index>`.
//! Once every index in `0..total_chunks` is present, whatever order they came
//! in, the chunks are concatenated in index order into
//! `<staging>/sessions/<upload_id>.assembled` while hashing, the size and
//! dedup checks run, and the result is handed to the blob store under a
//! generated name. Nothing outside `sessions/` is touched, so other users of
//! the staging root keep their directories.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use tessera_core::validation::{file_extension, validate_upload_id};
use tessera_core::{AppError, Config};
use tessera_processing::ContentHasher;
use tessera_storage::{generate_stored_name, BlobStore};
use tessera_worker::PeriodicJob;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::dedup::DedupIndex;

const COPY_BUFFER_SIZE: usize = 1024 * 1024;
const ASSEMBLED_SUFFIX: &str = ".assembled";
const SESSIONS_DIR: &str = "sessions";

#[derive(Debug, Clone)]
pub struct ChunkAssemblerConfig {
    pub staging_dir: PathBuf,
    pub max_file_size: u64,
    /// Lowercase extensions accepted for upload
    pub allowed_extensions: Vec<String>,
    /// Sessions untouched for longer than this are reaped
    pub session_ttl: Duration,
}

impl ChunkAssemblerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            staging_dir: PathBuf::from(config.staging_dir()),
            max_file_size: config.max_file_size_bytes(),
            allowed_extensions: config.allowed_extensions().to_vec(),
            session_ttl: config.upload_session_ttl(),
        }
    }
}

/// One received chunk.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub upload_id: String,
    pub index: u32,
    pub total_chunks: u32,
    pub total_size: u64,
    pub filename: String,
    pub data: Bytes,
}

/// A finalized upload, stored and ready to be imported.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredUpload {
    pub hash: String,
    /// Name the file is stored under
    pub filename: String,
    pub original_filename: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Accepted,
    Finalized(StoredUpload),
}

pub struct ChunkAssembler {
    config: ChunkAssemblerConfig,
    blobs: Arc<dyn BlobStore>,
    dedup: DedupIndex,
    finalizing: Mutex<HashSet<String>>,
}

/// Releases an upload id from the finalizing set.
struct FinalizeGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    upload_id: String,
}

impl Drop for FinalizeGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.upload_id);
        }
    }
}

impl ChunkAssembler {
    pub fn new(config: ChunkAssemblerConfig, blobs: Arc<dyn BlobStore>, dedup: DedupIndex) -> Self {
        Self {
            config,
            blobs,
            dedup,
            finalizing: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &ChunkAssemblerConfig {
        &self.config
    }

    /// Root holding every upload session.
    pub fn sessions_root(&self) -> PathBuf {
        self.config.staging_dir.join(SESSIONS_DIR)
    }

    fn session_dir(&self, upload_id: &str) -> PathBuf {
        self.sessions_root().join(upload_id)
    }

    fn assembled_path(&self, upload_id: &str) -> PathBuf {
        self.sessions_root()
            .join(format!("{}{}", upload_id, ASSEMBLED_SUFFIX))
    }

    /// Checks shared by chunked and single-shot uploads.
    fn validate(&self, chunk: &ChunkUpload) -> Result<(), AppError> {
        validate_upload_id(&chunk.upload_id)?;
        if chunk.filename.trim().is_empty() {
            return Err(AppError::BadRequest("filename is required".into()));
        }
        if chunk.total_chunks == 0 {
            return Err(AppError::InvalidRequest(
                "total_chunks must be at least 1".into(),
            ));
        }
        if chunk.index >= chunk.total_chunks {
            return Err(AppError::InvalidRequest(format!(
                "chunk index {} out of range for {} chunks",
                chunk.index, chunk.total_chunks
            )));
        }
        if chunk.total_size > self.config.max_file_size {
            return Err(AppError::InvalidRequest(format!(
                "total_size {} exceeds the limit of {} bytes",
                chunk.total_size, self.config.max_file_size
            )));
        }
        let allowed = file_extension(&chunk.filename)
            .is_some_and(|ext| self.config.allowed_extensions.contains(&ext));
        if !allowed {
            return Err(AppError::UnsupportedType(format!(
                "file type of '{}' is not allowed",
                chunk.filename
            )));
        }
        Ok(())
    }

    /// Store one chunk; finalize once all chunks of the upload are present.
    #[tracing::instrument(
        skip(self, chunk),
        fields(upload_id = %chunk.upload_id, index = chunk.index, total = chunk.total_chunks)
    )]
    pub async fn accept_chunk(&self, chunk: ChunkUpload) -> Result<ChunkOutcome, AppError> {
        self.validate(&chunk)?;

        let dir = self.session_dir(&chunk.upload_id);
        fs::create_dir_all(&dir).await?;
        write_chunk(&dir, chunk.index, &chunk.data).await?;
        tracing::debug!(size_bytes = chunk.data.len(), "Chunk stored");

        if !all_chunks_present(&dir, chunk.total_chunks).await? {
            return Ok(ChunkOutcome::Accepted);
        }
        // A concurrent request completing the same session finalizes it.
        let Some(guard) = self.claim_finalize(&chunk.upload_id)? else {
            return Ok(ChunkOutcome::Accepted);
        };
        let result = self.finalize(&chunk).await;
        drop(guard);
        result.map(ChunkOutcome::Finalized)
    }

    /// Single-shot upload: one chunk covering the whole file.
    pub async fn store_whole(&self, filename: &str, data: Bytes) -> Result<StoredUpload, AppError> {
        let upload_id = format!("single-{}", uuid::Uuid::new_v4().simple());
        let chunk = ChunkUpload {
            upload_id,
            index: 0,
            total_chunks: 1,
            total_size: data.len() as u64,
            filename: filename.to_string(),
            data,
        };
        match self.accept_chunk(chunk).await? {
            ChunkOutcome::Finalized(stored) => Ok(stored),
            ChunkOutcome::Accepted => Err(AppError::Internal(
                "single chunk upload was not finalized".into(),
            )),
        }
    }

    async fn finalize(&self, chunk: &ChunkUpload) -> Result<StoredUpload, AppError> {
        let dir = self.session_dir(&chunk.upload_id);
        let assembled = self.assembled_path(&chunk.upload_id);

        let result = self.assemble_and_store(chunk, &dir, &assembled).await;

        let _ = fs::remove_file(&assembled).await;
        match &result {
            // Missing chunks keep the session so the client can resend them.
            Err(AppError::BadRequest(_)) => {}
            _ => {
                if let Err(e) = fs::remove_dir_all(&dir).await {
                    tracing::warn!(error = %e, dir = %dir.display(), "Failed to remove upload session");
                }
            }
        }
        result
    }

    /// `None` when another request is already finalizing this upload.
    fn claim_finalize(&self, upload_id: &str) -> Result<Option<FinalizeGuard<'_>>, AppError> {
        let mut set = self
            .finalizing
            .lock()
            .map_err(|_| AppError::Internal("finalize set poisoned".into()))?;
        if !set.insert(upload_id.to_string()) {
            tracing::debug!(upload_id, "Upload already being finalized");
            return Ok(None);
        }
        Ok(Some(FinalizeGuard {
            set: &self.finalizing,
            upload_id: upload_id.to_string(),
        }))
    }

    async fn assemble_and_store(
        &self,
        chunk: &ChunkUpload,
        dir: &Path,
        assembled: &Path,
    ) -> Result<StoredUpload, AppError> {
        let start = std::time::Instant::now();

        if let Some(index) = first_missing_chunk(dir, chunk.total_chunks).await? {
            return Err(AppError::BadRequest(format!("chunk {} is missing", index)));
        }

        let (hash, size) = concatenate(dir, chunk.total_chunks, assembled).await?;
        if size != chunk.total_size {
            return Err(AppError::InvalidRequest(format!(
                "assembled size {} does not match declared total_size {}",
                size, chunk.total_size
            )));
        }

        if self.dedup.is_known(&hash).await? {
            return Err(AppError::Conflict("file already exists".into()));
        }

        let stored_name = generate_stored_name(&chunk.filename);
        self.blobs.put_file(assembled, &stored_name).await?;

        tracing::info!(
            upload_id = %chunk.upload_id,
            stored_name = %stored_name,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Upload finalized"
        );

        Ok(StoredUpload {
            hash,
            filename: stored_name,
            original_filename: chunk.filename.clone(),
            size,
        })
    }

    /// Remove sessions and leftovers older than the session TTL.
    pub async fn reap_stale_sessions(&self) -> Result<usize, AppError> {
        let mut entries = match fs::read_dir(self.sessions_root()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age < self.config.session_ttl {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.is_finalizing(&name) {
                continue;
            }
            let outcome = if meta.is_dir() {
                fs::remove_dir_all(entry.path()).await
            } else {
                fs::remove_file(entry.path()).await
            };
            match outcome {
                Ok(()) => {
                    tracing::info!(entry = %name, age_secs = age.as_secs(), "Reaped upload session");
                    removed += 1;
                }
                Err(e) => tracing::warn!(entry = %name, error = %e, "Failed to reap upload session"),
            }
        }
        Ok(removed)
    }

    fn is_finalizing(&self, entry: &str) -> bool {
        let upload_id = entry.strip_suffix(ASSEMBLED_SUFFIX).unwrap_or(entry);
        self.finalizing
            .lock()
            .map(|set| set.contains(upload_id))
            .unwrap_or(true)
    }
}

#[async_trait]
impl PeriodicJob for ChunkAssembler {
    fn name(&self) -> &'static str {
        "upload-session-reaper"
    }

    async fn run_once(&self) -> anyhow::Result<usize> {
        Ok(self.reap_stale_sessions().await?)
    }
}

/// Write through a temp name then rename, so a concurrent finalize never
/// reads a half-written chunk.
async fn write_chunk(dir: &Path, index: u32, data: &[u8]) -> Result<(), AppError> {
    let target = dir.join(index.to_string());
    let temp = dir.join(format!(".{}.{}", index, uuid::Uuid::new_v4().simple()));
    let mut file = fs::File::create(&temp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&temp, &target).await?;
    Ok(())
}

async fn first_missing_chunk(dir: &Path, total: u32) -> Result<Option<u32>, AppError> {
    for index in 0..total {
        if !fs::try_exists(dir.join(index.to_string())).await? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

async fn all_chunks_present(dir: &Path, total: u32) -> Result<bool, AppError> {
    Ok(first_missing_chunk(dir, total).await?.is_none())
}

/// Append chunks `0..total` to `dest` in index order, hashing on the way.
async fn concatenate(dir: &Path, total: u32, dest: &Path) -> Result<(String, u64), AppError> {
    let mut out = fs::File::create(dest).await?;
    let mut hasher = ContentHasher::new();
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];

    for index in 0..total {
        let mut input = fs::File::open(dir.join(index.to_string())).await?;
        loop {
            let n = input.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            out.write_all(&buffer[..n]).await?;
        }
    }
    out.sync_all().await?;

    let size = hasher.len();
    Ok((hasher.finalize_hex(), size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::models::{ImportData, ImportMode, NewImport};
    use tessera_db::{ImportRepository, MemoryDatabase};
    use tessera_processing::hash_bytes;
    use tessera_storage::LocalStorage;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        db: Arc<MemoryDatabase>,
        blobs: Arc<LocalStorage>,
        assembler: ChunkAssembler,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(MemoryDatabase::new());
        let blobs = Arc::new(
            LocalStorage::new(dir.path().join("media"), dir.path().join("inline"))
                .await
                .unwrap(),
        );
        let config = ChunkAssemblerConfig {
            staging_dir: dir.path().join("staging"),
            max_file_size: 10 * 1024 * 1024,
            allowed_extensions: vec!["jpg".into(), "mp4".into()],
            session_ttl: Duration::from_secs(24 * 3600),
        };
        let assembler = ChunkAssembler::new(
            config,
            blobs.clone(),
            DedupIndex::new(db.clone(), db.clone()),
        );
        Fixture {
            _dir: dir,
            db,
            blobs,
            assembler,
        }
    }

    fn chunk(upload_id: &str, index: u32, total: u32, size: u64, data: &[u8]) -> ChunkUpload {
        ChunkUpload {
            upload_id: upload_id.into(),
            index,
            total_chunks: total,
            total_size: size,
            filename: "photo.jpg".into(),
            data: Bytes::copy_from_slice(data),
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    async fn upload_in(f: &Fixture, upload_id: &str, data: &[u8], sizes: &[usize]) -> StoredUpload {
        let total = sizes.len() as u32;
        let mut offset = 0;
        let mut last = None;
        for (i, len) in sizes.iter().enumerate() {
            let piece = &data[offset..offset + len];
            offset += len;
            last = Some(
                f.assembler
                    .accept_chunk(chunk(upload_id, i as u32, total, data.len() as u64, piece))
                    .await
                    .unwrap(),
            );
        }
        match last.unwrap() {
            ChunkOutcome::Finalized(stored) => stored,
            ChunkOutcome::Accepted => panic!("not finalized"),
        }
    }

    #[tokio::test]
    async fn test_hash_independent_of_chunk_layout() {
        let data = payload(300_000);
        let f = fixture().await;
        let a = upload_in(&f, "layout-a", &data, &[300_000]).await;

        let g = fixture().await;
        let b = upload_in(&g, "layout-b", &data, &[1, 99_999, 100_000, 100_000]).await;

        assert_eq!(a.hash, hash_bytes(&data));
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.size, 300_000);
        assert!(f.blobs.exists(&a.filename).await.unwrap());
        assert!(!f.assembler.sessions_root().join("layout-a").exists());
    }

    #[tokio::test]
    async fn test_out_of_order_chunks_assemble_in_index_order() {
        let f = fixture().await;
        let data = payload(30);
        f.assembler
            .accept_chunk(chunk("ooo", 1, 3, 30, &data[10..20]))
            .await
            .unwrap();
        f.assembler
            .accept_chunk(chunk("ooo", 0, 3, 30, &data[..10]))
            .await
            .unwrap();
        // Resent chunk replaces the first copy.
        f.assembler
            .accept_chunk(chunk("ooo", 0, 3, 30, &data[..10]))
            .await
            .unwrap();
        let outcome = f
            .assembler
            .accept_chunk(chunk("ooo", 2, 3, 30, &data[20..]))
            .await
            .unwrap();
        let ChunkOutcome::Finalized(stored) = outcome else {
            panic!("expected finalization");
        };
        assert_eq!(stored.hash, hash_bytes(&data));
    }

    #[tokio::test]
    async fn test_last_chunk_first_finalizes_when_complete() {
        let f = fixture().await;
        let data = payload(30);
        let early = f
            .assembler
            .accept_chunk(chunk("tail-first", 2, 3, 30, &data[20..]))
            .await
            .unwrap();
        assert_eq!(early, ChunkOutcome::Accepted);
        let middle = f
            .assembler
            .accept_chunk(chunk("tail-first", 0, 3, 30, &data[..10]))
            .await
            .unwrap();
        assert_eq!(middle, ChunkOutcome::Accepted);

        let outcome = f
            .assembler
            .accept_chunk(chunk("tail-first", 1, 3, 30, &data[10..20]))
            .await
            .unwrap();
        let ChunkOutcome::Finalized(stored) = outcome else {
            panic!("expected finalization once every chunk is present");
        };
        assert_eq!(stored.hash, hash_bytes(&data));
        assert!(f.blobs.exists(&stored.filename).await.unwrap());
        assert!(!f.assembler.sessions_root().join("tail-first").exists());
    }

    #[tokio::test]
    async fn test_sessions_leave_other_staging_entries_alone() {
        let f = fixture().await;
        let scratch = f.assembler.config().staging_dir.join("work").join("import-abc-1");
        std::fs::create_dir_all(&scratch).unwrap();
        std::fs::write(scratch.join("download.mp4"), b"partial").unwrap();

        let outcome = f
            .assembler
            .accept_chunk(chunk("work", 0, 1, 3, b"abc"))
            .await
            .unwrap();
        assert!(matches!(outcome, ChunkOutcome::Finalized(_)));
        assert!(scratch.join("download.mp4").exists());

        let eager = ChunkAssembler::new(
            ChunkAssemblerConfig {
                session_ttl: Duration::ZERO,
                ..f.assembler.config().clone()
            },
            f.blobs.clone(),
            DedupIndex::new(f.db.clone(), f.db.clone()),
        );
        eager.reap_stale_sessions().await.unwrap();
        assert!(scratch.join("download.mp4").exists());
    }

    #[tokio::test]
    async fn test_size_mismatch_is_invalid_request() {
        let f = fixture().await;
        f.assembler
            .accept_chunk(chunk("short", 0, 2, 100, &[1u8; 40]))
            .await
            .unwrap();
        let err = f
            .assembler
            .accept_chunk(chunk("short", 1, 2, 100, &[2u8; 40]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
        assert!(!f.assembler.sessions_root().join("short").exists());
        assert_eq!(std::fs::read_dir(f.blobs.base_path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unsafe_upload_ids_write_nothing() {
        let f = fixture().await;
        for bad in ["../escape", "a/b", "..", "a\\b", ".hidden"] {
            let err = f
                .assembler
                .accept_chunk(chunk(bad, 0, 1, 3, b"abc"))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::InvalidRequest(_)), "{bad}");
        }
        assert!(!f.assembler.config().staging_dir.exists());
        assert!(!f._dir.path().join("escape").exists());
    }

    #[tokio::test]
    async fn test_index_and_type_checks() {
        let f = fixture().await;
        let err = f
            .assembler
            .accept_chunk(chunk("idx", 2, 2, 3, b"abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));

        let mut exe = chunk("exe", 0, 1, 3, b"abc");
        exe.filename = "tool.exe".into();
        let err = f.assembler.accept_chunk(exe).await.unwrap_err();
        assert!(matches!(err, AppError::UnsupportedType(_)));

        let mut unnamed = chunk("anon", 0, 1, 3, b"abc");
        unnamed.filename = " ".into();
        let err = f.assembler.accept_chunk(unnamed).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_duplicate_content_conflicts() {
        let f = fixture().await;
        let first = f.assembler.store_whole("a.jpg", Bytes::from_static(b"same")).await.unwrap();
        f.db.seed_media(&first.filename, &first.hash).unwrap();

        let err = f
            .assembler
            .store_whole("b.jpg", Bytes::from_static(b"same"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m == "file already exists"));
    }

    #[tokio::test]
    async fn test_in_flight_import_conflicts() {
        let f = fixture().await;
        let hash = hash_bytes(b"queued");
        f.db.create(NewImport {
            user_id: None,
            batch_id: "b".into(),
            mode: ImportMode::Upload,
            file: None,
            file_hash: Some(hash),
            file_format: None,
            data: ImportData::default(),
        })
        .await
        .unwrap();

        let err = f
            .assembler
            .store_whole("q.jpg", Bytes::from_static(b"queued"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_reaper_honours_ttl() {
        let f = fixture().await;
        f.assembler
            .accept_chunk(chunk("stale", 0, 2, 10, b"12345"))
            .await
            .unwrap();
        assert_eq!(f.assembler.reap_stale_sessions().await.unwrap(), 0);

        let eager = ChunkAssembler::new(
            ChunkAssemblerConfig {
                session_ttl: Duration::ZERO,
                ..f.assembler.config().clone()
            },
            f.blobs.clone(),
            DedupIndex::new(f.db.clone(), f.db.clone()),
        );
        assert_eq!(eager.reap_stale_sessions().await.unwrap(), 1);
        assert!(!f.assembler.sessions_root().join("stale").exists());
    }
}
