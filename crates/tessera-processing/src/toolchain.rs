//! The metadata extraction facade used by the ingest pipeline.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tessera_core::models::{TagMap, VideoInfo};
use tessera_core::validation::file_extension;
use tessera_core::Config;
use tokio_util::sync::CancellationToken;

use crate::error::{ToolError, ToolResult};
use crate::lazy::LazyService;
use crate::ocr::{OcrEngine, TesseractEngine};
use crate::tags::{native_tags, ExifTool};
use crate::transcribe::{format_segments, SpeechTranscriber, WhisperTranscriber};
use crate::video::VideoProbe;

/// Tool locations and limits, derived from [`Config`].
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    pub exiftool_path: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub tesseract_path: String,
    pub pdftoppm_path: String,
    pub whisper_path: String,
    pub subprocess_timeout: Duration,
    pub transcode_timeout: Duration,
    pub ocr_enabled: bool,
    pub ocr_languages: String,
    pub transcription_enabled: bool,
    pub transcription_model: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            exiftool_path: "exiftool".into(),
            ffmpeg_path: "ffmpeg".into(),
            ffprobe_path: "ffprobe".into(),
            tesseract_path: "tesseract".into(),
            pdftoppm_path: "pdftoppm".into(),
            whisper_path: "whisper".into(),
            subprocess_timeout: Duration::from_secs(600),
            transcode_timeout: Duration::from_secs(7200),
            ocr_enabled: true,
            ocr_languages: "eng".into(),
            transcription_enabled: false,
            transcription_model: "base".into(),
        }
    }
}

impl ToolchainConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            exiftool_path: config.exiftool_path().to_string(),
            ffmpeg_path: config.ffmpeg_path().to_string(),
            ffprobe_path: config.ffprobe_path().to_string(),
            tesseract_path: config.tesseract_path().to_string(),
            pdftoppm_path: config.pdftoppm_path().to_string(),
            whisper_path: config.whisper_path().to_string(),
            subprocess_timeout: config.subprocess_timeout(),
            transcode_timeout: config.transcode_timeout(),
            ocr_enabled: config.ocr_enabled(),
            ocr_languages: config.ocr_languages().to_string(),
            transcription_enabled: config.transcription_enabled(),
            transcription_model: config.transcription_model().to_string(),
        }
    }
}

/// Best-effort metadata extraction.
///
/// `Ok(None)` from the text producers means no text: the engine is disabled,
/// not installed, or found nothing. Errors are for engines that ran and failed.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract_tags(&self, path: &Path, cancel: &CancellationToken) -> ToolResult<TagMap>;

    /// `None` for files without a video stream.
    async fn probe_video(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> ToolResult<Option<VideoInfo>>;

    /// `languages: None` uses the configured OCR languages.
    async fn ocr_image(
        &self,
        path: &Path,
        languages: Option<&str>,
        cancel: &CancellationToken,
    ) -> ToolResult<Option<String>>;

    /// Native text of every page of a PDF (or the body of a DOCX). When a PDF
    /// has no native text and `attempt_ocr` is set, pages are rasterized and
    /// OCR'd instead.
    async fn extract_document_text(
        &self,
        path: &Path,
        attempt_ocr: bool,
        cancel: &CancellationToken,
    ) -> ToolResult<Option<String>>;

    /// Formatted `[start - end] text` segments.
    async fn transcribe(
        &self,
        path: &Path,
        language: Option<&str>,
        cancel: &CancellationToken,
    ) -> ToolResult<Option<String>>;
}

pub struct Toolchain {
    config: ToolchainConfig,
    exiftool: ExifTool,
    probe: VideoProbe,
    ocr: LazyService<dyn OcrEngine>,
    transcriber: LazyService<dyn SpeechTranscriber>,
}

impl Toolchain {
    pub fn new(config: ToolchainConfig) -> ToolResult<Self> {
        let exiftool = ExifTool::new(&config.exiftool_path, config.subprocess_timeout)?;
        let probe = VideoProbe::new(&config.ffprobe_path, config.subprocess_timeout)?;

        let ocr = if config.ocr_enabled {
            let (path, timeout) = (config.tesseract_path.clone(), config.subprocess_timeout);
            LazyService::new(move || TesseractEngine::detect(&path, timeout))
        } else {
            LazyService::unavailable()
        };

        let transcriber = if config.transcription_enabled {
            let (path, model, timeout) = (
                config.whisper_path.clone(),
                config.transcription_model.clone(),
                config.transcode_timeout,
            );
            LazyService::new(move || WhisperTranscriber::detect(&path, &model, timeout))
        } else {
            LazyService::unavailable()
        };

        Ok(Self {
            config,
            exiftool,
            probe,
            ocr,
            transcriber,
        })
    }

    /// Replace the OCR and transcription engines.
    pub fn with_engines(
        mut self,
        ocr: Option<Arc<dyn OcrEngine>>,
        transcriber: Option<Arc<dyn SpeechTranscriber>>,
    ) -> Self {
        self.ocr = ocr.map(LazyService::ready).unwrap_or_else(LazyService::unavailable);
        self.transcriber = transcriber
            .map(LazyService::ready)
            .unwrap_or_else(LazyService::unavailable);
        self
    }

    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    #[cfg(feature = "document")]
    async fn pdf_text(
        &self,
        path: &Path,
        attempt_ocr: bool,
        cancel: &CancellationToken,
    ) -> ToolResult<Option<String>> {
        use crate::document::{join_pages, pdf_page_texts, PdfRasterizer};

        let pages = pdf_page_texts(path).await?;
        if let Some(text) = join_pages(&pages) {
            return Ok(Some(text));
        }
        if !attempt_ocr {
            return Ok(None);
        }
        let Some(engine) = self.ocr.get().await else {
            return Ok(None);
        };

        tracing::debug!(path = %path.display(), "PDF has no text layer, running OCR");
        let out_dir = tempfile::tempdir()?;
        let rasterizer = PdfRasterizer::new(&self.config.pdftoppm_path, self.config.subprocess_timeout)?;
        let images = rasterizer.rasterize(path, out_dir.path(), cancel).await?;

        let mut texts = Vec::with_capacity(images.len());
        for image in &images {
            texts.push(
                engine
                    .recognize(image, &self.config.ocr_languages, cancel)
                    .await?,
            );
        }
        Ok(join_pages(&texts))
    }
}

#[async_trait]
impl MetadataExtractor for Toolchain {
    async fn extract_tags(&self, path: &Path, cancel: &CancellationToken) -> ToolResult<TagMap> {
        if self.exiftool.is_installed() {
            return self.exiftool.read_tags(path, cancel).await;
        }
        tracing::debug!("exiftool not installed, reading tags natively");
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || native_tags(&path))
            .await
            .map_err(|e| ToolError::parse("native tags", e))?
    }

    async fn probe_video(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> ToolResult<Option<VideoInfo>> {
        self.probe.probe(path, cancel).await
    }

    async fn ocr_image(
        &self,
        path: &Path,
        languages: Option<&str>,
        cancel: &CancellationToken,
    ) -> ToolResult<Option<String>> {
        let Some(engine) = self.ocr.get().await else {
            return Ok(None);
        };
        let languages = languages.unwrap_or(self.config.ocr_languages.as_str());
        let text = engine.recognize(path, languages, cancel).await?;
        Ok(Some(text).filter(|t| !t.trim().is_empty()))
    }

    async fn extract_document_text(
        &self,
        path: &Path,
        attempt_ocr: bool,
        cancel: &CancellationToken,
    ) -> ToolResult<Option<String>> {
        match file_extension(&path.to_string_lossy()).as_deref() {
            #[cfg(feature = "document")]
            Some("pdf") => self.pdf_text(path, attempt_ocr, cancel).await,
            #[cfg(feature = "document")]
            Some("docx") => {
                let text = crate::document::docx_text(path).await?;
                Ok(Some(text).filter(|t| !t.is_empty()))
            }
            _ => {
                let _ = (attempt_ocr, cancel);
                Ok(None)
            }
        }
    }

    async fn transcribe(
        &self,
        path: &Path,
        language: Option<&str>,
        cancel: &CancellationToken,
    ) -> ToolResult<Option<String>> {
        let Some(engine) = self.transcriber.get().await else {
            return Ok(None);
        };
        let segments = engine.transcribe(path, language, cancel).await?;
        let text = format_segments(&segments);
        Ok(Some(text).filter(|t| !t.is_empty()))
    }
}
