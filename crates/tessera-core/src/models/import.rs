use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "import_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl ImportStatus {
    /// `Success` and `Failed` never change once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportStatus::Success | ImportStatus::Failed)
    }
}

impl Display for ImportStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ImportStatus::Pending => write!(f, "pending"),
            ImportStatus::Processing => write!(f, "processing"),
            ImportStatus::Success => write!(f, "success"),
            ImportStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "import_mode", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    Upload,
    Server,
    Web,
}

impl Display for ImportMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ImportMode::Upload => write!(f, "upload"),
            ImportMode::Server => write!(f, "server"),
            ImportMode::Web => write!(f, "web"),
        }
    }
}

impl FromStr for ImportMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "upload" => Ok(ImportMode::Upload),
            "server" => Ok(ImportMode::Server),
            "web" => Ok(ImportMode::Web),
            _ => Err(anyhow::anyhow!("Invalid import mode: {}", s)),
        }
    }
}

/// Caller options carried by an import.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(default)]
pub struct ImportOptions {
    /// Transcode non web-safe video into an mp4 derivative
    pub optimize: bool,
    pub ocr: bool,
    /// Extract text from pdf/docx documents
    pub parse: bool,
    pub transcription: bool,
    /// `None` lets the engine detect the language
    pub transcription_language: Option<String>,
    pub sources: Vec<i64>,
    pub labels: Vec<i64>,
    pub locations: Vec<i64>,
    pub tags: Vec<String>,
    pub roles: Vec<i64>,
}

/// Location of a remote web archive capture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct WebDescriptor {
    pub bucket: String,
    pub meta_file: String,
    pub checksum_file: String,
    pub video_file: String,
    #[serde(default)]
    pub id: Option<String>,
}

/// Mode-specific context stored in `data_import.data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImportData {
    #[serde(default)]
    pub options: ImportOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    /// UPLOAD: name the assembled file was stored under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_name: Option<String>,
    /// SERVER: operator supplied path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<WebDescriptor>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Per-file ingest record (`data_import`).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ImportJournal {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub batch_id: String,
    pub mode: ImportMode,
    /// Declared source: stored upload name, server path or remote key
    pub file: Option<String>,
    pub file_hash: Option<String>,
    pub file_format: Option<String>,
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    pub log: String,
    pub status: ImportStatus,
    pub items: Vec<i64>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportJournal {
    /// Render one log line: `[<rfc3339 utc>] <text>\n`.
    pub fn format_log_line(at: DateTime<Utc>, line: &str) -> String {
        format!(
            "[{}] {}\n",
            at.to_rfc3339_opts(SecondsFormat::Millis, true),
            line.trim_end()
        )
    }

    pub fn log_lines(&self) -> Vec<&str> {
        self.log.lines().filter(|l| !l.is_empty()).collect()
    }

    /// Decoded `data`; malformed payloads decode to the default.
    pub fn import_data(&self) -> ImportData {
        serde_json::from_value(self.data.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct NewImport {
    pub user_id: Option<String>,
    pub batch_id: String,
    pub mode: ImportMode,
    pub file: Option<String>,
    pub file_hash: Option<String>,
    pub file_format: Option<String>,
    pub data: ImportData,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_terminal_states() {
        assert!(!ImportStatus::Pending.is_terminal());
        assert!(!ImportStatus::Processing.is_terminal());
        assert!(ImportStatus::Success.is_terminal());
        assert!(ImportStatus::Failed.is_terminal());
    }

    #[test]
    fn test_log_line_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(
            ImportJournal::format_log_line(at, "hashing\n"),
            "[2024-03-01T12:30:05.000Z] hashing\n"
        );
    }

    #[test]
    fn test_import_data_keeps_unknown_keys() {
        let raw = serde_json::json!({
            "options": {"ocr": true, "tags": ["pilot"]},
            "old_path": "/srv/in/a.avi",
            "operator_note": "from field kit"
        });
        let data: ImportData = serde_json::from_value(raw).unwrap();
        assert!(data.options.ocr);
        assert!(!data.options.optimize);
        assert_eq!(data.options.tags, vec!["pilot".to_string()]);
        assert_eq!(data.old_path.as_deref(), Some("/srv/in/a.avi"));
        assert_eq!(data.extra["operator_note"], "from field kit");
    }

    #[test]
    fn test_web_descriptor_id_optional() {
        let d: WebDescriptor = serde_json::from_value(serde_json::json!({
            "bucket": "archive",
            "meta_file": "x.info.json",
            "checksum_file": "x.sha256",
            "video_file": "x.mp4"
        }))
        .unwrap();
        assert!(d.id.is_none());
    }
}
