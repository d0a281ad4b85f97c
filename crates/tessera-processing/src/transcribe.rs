//! Speech to text through the whisper command line tool.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::{ToolError, ToolResult};
use crate::subprocess::{locate_program, ToolCommand};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[async_trait]
pub trait SpeechTranscriber: Send + Sync {
    /// `language: None` lets the model detect it.
    async fn transcribe(
        &self,
        media: &Path,
        language: Option<&str>,
        cancel: &CancellationToken,
    ) -> ToolResult<Vec<Segment>>;
}

/// One `[start - end] text` line per non-empty segment, times in seconds.
pub fn format_segments(segments: &[Segment]) -> String {
    segments
        .iter()
        .filter(|s| !s.text.trim().is_empty())
        .map(|s| format!("[{:.2} - {:.2}] {}", s.start, s.end, s.text.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Deserialize)]
struct WhisperJson {
    #[serde(default)]
    segments: Vec<Segment>,
}

pub fn parse_whisper_json(raw: &[u8]) -> ToolResult<Vec<Segment>> {
    let parsed: WhisperJson =
        serde_json::from_slice(raw).map_err(|e| ToolError::parse("whisper", e))?;
    Ok(parsed.segments)
}

pub struct WhisperTranscriber {
    path: String,
    model: String,
    timeout: Duration,
}

impl WhisperTranscriber {
    pub fn detect(path: &str, model: &str, timeout: Duration) -> Option<Arc<dyn SpeechTranscriber>> {
        if crate::subprocess::validate_program(path).is_err() || locate_program(path).is_none() {
            tracing::warn!(whisper = %path, "whisper not installed, transcription unavailable");
            return None;
        }
        tracing::info!(whisper = %path, model = %model, "Transcription engine initialized");
        Some(Arc::new(Self {
            path: path.to_string(),
            model: model.to_string(),
            timeout,
        }))
    }
}

#[async_trait]
impl SpeechTranscriber for WhisperTranscriber {
    #[tracing::instrument(skip(self, cancel), fields(process.executable.name = "whisper", model = %self.model))]
    async fn transcribe(
        &self,
        media: &Path,
        language: Option<&str>,
        cancel: &CancellationToken,
    ) -> ToolResult<Vec<Segment>> {
        let out_dir = tempfile::tempdir()?;
        let mut command = ToolCommand::new(&self.path, self.timeout)?
            .path_arg(media)
            .args(["--model", self.model.as_str(), "--output_format", "json", "--fp16", "False"])
            .arg("--output_dir")
            .path_arg(out_dir.path());
        if let Some(lang) = language.filter(|l| !l.is_empty() && *l != "auto") {
            command = command.args(["--language", lang]);
        }
        command.run(cancel).await?;

        let stem = media
            .file_stem()
            .ok_or_else(|| ToolError::InvalidInput(format!("{} has no file name", media.display())))?;
        let mut json_name = stem.to_os_string();
        json_name.push(".json");
        let json_path = out_dir.path().join(json_name);
        let raw = tokio::fs::read(&json_path).await?;
        parse_whisper_json(&raw)
    }
}
