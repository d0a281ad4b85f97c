use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tessera_core::models::{ImportData, ImportJournal, TagMap, VideoInfo};
use tessera_core::AppError;
use tokio_util::sync::CancellationToken;

use crate::journal::JournalHandle;

/// A transcoded rendition stored next to the original.
#[derive(Debug, Clone)]
pub struct Derivative {
    pub stored_name: String,
    pub hash: String,
    pub duration: Option<String>,
}

/// A web capture resolved from its meta document.
#[derive(Debug, Clone)]
pub struct WebCapture {
    pub id: String,
    pub meta: serde_json::Value,
}

/// Bulletin fields that depend on the import mode.
#[derive(Debug, Clone, Default)]
pub struct BulletinDraft {
    pub title: String,
    pub origin_id: Option<String>,
    pub source_link: Option<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub source_ids: Vec<i64>,
}

/// State carried through the stages of one attempt.
pub struct IngestContext {
    pub journal: JournalHandle,
    pub import: ImportJournal,
    pub data: ImportData,
    /// Removed with the context
    pub workdir: TempDir,
    pub original_filename: String,
    pub extension: Option<String>,
    pub local_path: Option<PathBuf>,
    pub file_hash: Option<String>,
    pub file_size: Option<u64>,
    pub stored_name: Option<String>,
    /// Objects this attempt wrote; removed if it fails
    pub owned_objects: Vec<String>,
    pub tags: TagMap,
    pub video: Option<VideoInfo>,
    pub texts: Vec<String>,
    pub transcription: Option<String>,
    pub derivative: Option<Derivative>,
    pub web: Option<WebCapture>,
    pub draft: BulletinDraft,
}

impl IngestContext {
    pub async fn new(
        journal: JournalHandle,
        import: ImportJournal,
        work_root: &Path,
    ) -> Result<Self, AppError> {
        tokio::fs::create_dir_all(work_root).await?;
        let workdir = tempfile::Builder::new()
            .prefix(&format!("import-{}-", import.id.simple()))
            .tempdir_in(work_root)?;
        let data = import.import_data();
        let original_filename = data
            .original_filename
            .clone()
            .or_else(|| import.file.clone())
            .unwrap_or_default();

        Ok(Self {
            journal,
            data,
            workdir,
            original_filename,
            extension: None,
            local_path: None,
            file_hash: None,
            file_size: None,
            stored_name: None,
            owned_objects: Vec::new(),
            tags: TagMap::new(),
            video: None,
            texts: Vec::new(),
            transcription: None,
            derivative: None,
            web: None,
            draft: BulletinDraft::default(),
            import,
        })
    }

    pub fn cancel(&self) -> &CancellationToken {
        self.journal.cancel_token()
    }

    pub fn local_path(&self) -> Result<&Path, AppError> {
        self.local_path
            .as_deref()
            .ok_or_else(|| AppError::Internal("file not fetched".into()))
    }

    pub fn hash(&self) -> Result<&str, AppError> {
        self.file_hash
            .as_deref()
            .ok_or_else(|| AppError::Internal("file not hashed".into()))
    }

    pub fn stored_name(&self) -> Result<&str, AppError> {
        self.stored_name
            .as_deref()
            .ok_or_else(|| AppError::Internal("file not stored".into()))
    }

    /// Record the fetched file and report hash and format on the journal.
    pub async fn set_fetched(
        &mut self,
        path: PathBuf,
        hash: String,
        size: u64,
    ) -> Result<(), AppError> {
        self.extension = tessera_core::validation::file_extension(&self.original_filename);
        self.journal
            .set_file_info(Some(&hash), self.extension.as_deref())
            .await?;
        self.journal
            .log(&format!("hashed {} ({} bytes): {}", self.original_filename, size, hash))
            .await?;
        self.local_path = Some(path);
        self.file_hash = Some(hash);
        self.file_size = Some(size);
        Ok(())
    }
}
