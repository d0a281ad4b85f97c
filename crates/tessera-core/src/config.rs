//! Configuration module
//!
//! All settings come from the environment (optionally seeded from a `.env`
//! file). Components receive small typed views built from [`Config`] rather
//! than the whole struct.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage_types::StorageBackend;

const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const MAX_FILE_SIZE_MB: u64 = 2048;
const GRACE_WINDOW_SECONDS: u64 = 2 * 60 * 60;
const PRESIGN_TTL_SECONDS: u64 = 60 * 60;
const RETRY_MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_BACKOFF_SECONDS: u64 = 60;
const WORKER_MAX_WORKERS: usize = 4;
const WORKER_POLL_INTERVAL_MS: u64 = 1000;
const IMPORT_TIMEOUT_SECS: u64 = 4 * 60 * 60;
const SUBPROCESS_TIMEOUT_SECS: u64 = 10 * 60;
const TRANSCODE_TIMEOUT_SECS: u64 = 2 * 60 * 60;
const UPLOAD_SESSION_TTL_HOURS: u64 = 24;
const UPLOAD_SESSION_REAP_INTERVAL_SECS: u64 = 60 * 60;

/// Settings shared by every process
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub environment: String,
    pub log_format: String,
}

/// Ingest configuration
#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub base: BaseConfig,
    pub database_url: String,
    // Storage
    pub storage_backend: StorageBackend,
    pub local_storage_path: Option<String>,
    pub local_inline_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    /// Root used to resolve web-archive buckets when storage is local
    pub archive_local_root: Option<String>,
    pub staging_dir: String,
    pub grace_window_seconds: u64,
    pub presign_ttl_seconds: u64,
    // Accepted uploads
    pub max_file_size_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub image_allowed_extensions: Vec<String>,
    pub video_allowed_extensions: Vec<String>,
    pub audio_allowed_extensions: Vec<String>,
    pub document_allowed_extensions: Vec<String>,
    // External tools
    pub exiftool_path: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub tesseract_path: String,
    pub pdftoppm_path: String,
    pub whisper_path: String,
    pub subprocess_timeout_secs: u64,
    pub transcode_timeout_secs: u64,
    // OCR / transcription
    pub ocr_enabled: bool,
    pub ocr_languages: String,
    pub transcription_enabled: bool,
    pub transcription_model: String,
    // Worker pool
    pub retry_max_attempts: u32,
    pub retry_base_backoff_seconds: u64,
    pub worker_max_workers: usize,
    pub worker_poll_interval_ms: u64,
    pub import_timeout_secs: u64,
    pub upload_session_ttl_hours: u64,
    pub upload_session_reap_interval_secs: u64,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<IngestConfig>);

impl Config {
    fn as_ingest(&self) -> &IngestConfig {
        &self.0
    }

    pub fn is_production(&self) -> bool {
        matches!(
            self.as_ingest().base.environment.to_lowercase().as_str(),
            "production" | "prod"
        )
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = IngestConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.as_ingest().validate()
    }

    pub fn server_port(&self) -> u16 {
        self.as_ingest().base.server_port
    }

    pub fn environment(&self) -> &str {
        &self.as_ingest().base.environment
    }

    pub fn log_format(&self) -> &str {
        &self.as_ingest().base.log_format
    }

    pub fn database_url(&self) -> &str {
        &self.as_ingest().database_url
    }

    pub fn db_max_connections(&self) -> u32 {
        self.as_ingest().base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.as_ingest().base.db_timeout_seconds
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.as_ingest().storage_backend
    }

    pub fn local_storage_path(&self) -> Option<&str> {
        self.as_ingest().local_storage_path.as_deref()
    }

    /// Inline attachments default to `<media_dir>/inline`.
    pub fn local_inline_path(&self) -> Option<String> {
        self.as_ingest().local_inline_path.clone().or_else(|| {
            self.local_storage_path()
                .map(|p| PathBuf::from(p).join("inline").to_string_lossy().into_owned())
        })
    }

    pub fn local_storage_base_url(&self) -> Option<&str> {
        self.as_ingest().local_storage_base_url.as_deref()
    }

    pub fn s3_bucket(&self) -> Option<&str> {
        self.as_ingest().s3_bucket.as_deref()
    }

    pub fn s3_region(&self) -> Option<&str> {
        self.as_ingest().s3_region.as_deref()
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.as_ingest().s3_endpoint.as_deref()
    }

    pub fn aws_access_key_id(&self) -> Option<&str> {
        self.as_ingest().aws_access_key_id.as_deref()
    }

    pub fn aws_secret_access_key(&self) -> Option<&str> {
        self.as_ingest().aws_secret_access_key.as_deref()
    }

    pub fn archive_local_root(&self) -> Option<&str> {
        self.as_ingest().archive_local_root.as_deref()
    }

    pub fn staging_dir(&self) -> &str {
        &self.as_ingest().staging_dir
    }

    pub fn grace_window(&self) -> Duration {
        Duration::from_secs(self.as_ingest().grace_window_seconds)
    }

    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.as_ingest().presign_ttl_seconds)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.as_ingest().max_file_size_bytes
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.as_ingest().allowed_extensions
    }

    pub fn image_allowed_extensions(&self) -> &[String] {
        &self.as_ingest().image_allowed_extensions
    }

    pub fn video_allowed_extensions(&self) -> &[String] {
        &self.as_ingest().video_allowed_extensions
    }

    pub fn audio_allowed_extensions(&self) -> &[String] {
        &self.as_ingest().audio_allowed_extensions
    }

    pub fn document_allowed_extensions(&self) -> &[String] {
        &self.as_ingest().document_allowed_extensions
    }

    pub fn exiftool_path(&self) -> &str {
        &self.as_ingest().exiftool_path
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.as_ingest().ffmpeg_path
    }

    pub fn ffprobe_path(&self) -> &str {
        &self.as_ingest().ffprobe_path
    }

    pub fn tesseract_path(&self) -> &str {
        &self.as_ingest().tesseract_path
    }

    pub fn pdftoppm_path(&self) -> &str {
        &self.as_ingest().pdftoppm_path
    }

    pub fn whisper_path(&self) -> &str {
        &self.as_ingest().whisper_path
    }

    pub fn subprocess_timeout(&self) -> Duration {
        Duration::from_secs(self.as_ingest().subprocess_timeout_secs)
    }

    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.as_ingest().transcode_timeout_secs)
    }

    pub fn ocr_enabled(&self) -> bool {
        self.as_ingest().ocr_enabled
    }

    pub fn ocr_languages(&self) -> &str {
        &self.as_ingest().ocr_languages
    }

    pub fn transcription_enabled(&self) -> bool {
        self.as_ingest().transcription_enabled
    }

    pub fn transcription_model(&self) -> &str {
        &self.as_ingest().transcription_model
    }

    pub fn retry_max_attempts(&self) -> u32 {
        self.as_ingest().retry_max_attempts
    }

    pub fn retry_base_backoff(&self) -> Duration {
        Duration::from_secs(self.as_ingest().retry_base_backoff_seconds)
    }

    pub fn worker_max_workers(&self) -> usize {
        self.as_ingest().worker_max_workers
    }

    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.as_ingest().worker_poll_interval_ms)
    }

    pub fn import_timeout(&self) -> Duration {
        Duration::from_secs(self.as_ingest().import_timeout_secs)
    }

    pub fn upload_session_ttl(&self) -> Duration {
        Duration::from_secs(self.as_ingest().upload_session_ttl_hours * 60 * 60)
    }

    pub fn upload_session_reap_interval(&self) -> Duration {
        Duration::from_secs(self.as_ingest().upload_session_reap_interval_secs)
    }
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr + ToString>(key: &str, default: T) -> T {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let base = BaseConfig {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            db_timeout_seconds: env_parse("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
            environment,
            log_format: env_string("LOG_FORMAT", "text").to_lowercase(),
        };

        let storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse::<StorageBackend>()?,
            Err(_) => StorageBackend::Local,
        };

        let image_allowed_extensions =
            env_list("IMAGE_ALLOWED_EXTENSIONS", "jpg,jpeg,png,gif,webp,tif,tiff,heic");
        let video_allowed_extensions = env_list(
            "VIDEO_ALLOWED_EXTENSIONS",
            "mp4,webm,ogg,ogv,mov,avi,mkv,flv,wmv,m4v,3gp,mpg,mpeg",
        );
        let audio_allowed_extensions =
            env_list("AUDIO_ALLOWED_EXTENSIONS", "mp3,wav,m4a,aac,flac,opus,oga");
        let document_allowed_extensions =
            env_list("DOCUMENT_ALLOWED_EXTENSIONS", "pdf,docx,txt");

        // Unset ALLOWED_EXTENSIONS means the union of the per-class lists.
        let allowed_extensions = match env::var("ALLOWED_EXTENSIONS") {
            Ok(_) => env_list("ALLOWED_EXTENSIONS", ""),
            Err(_) => image_allowed_extensions
                .iter()
                .chain(&video_allowed_extensions)
                .chain(&audio_allowed_extensions)
                .chain(&document_allowed_extensions)
                .cloned()
                .collect(),
        };

        let config = IngestConfig {
            base,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            storage_backend,
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok(),
            local_inline_path: env::var("LOCAL_INLINE_PATH").ok(),
            local_storage_base_url: env::var("LOCAL_STORAGE_BASE_URL").ok(),
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            aws_access_key_id: env::var("AWS_ACCESS_KEY_ID").ok(),
            aws_secret_access_key: env::var("AWS_SECRET_ACCESS_KEY").ok(),
            archive_local_root: env::var("ARCHIVE_LOCAL_ROOT").ok(),
            staging_dir: env_string("STAGING_DIR", "./data/staging"),
            grace_window_seconds: env_parse("GRACE_WINDOW_SECONDS", GRACE_WINDOW_SECONDS),
            presign_ttl_seconds: env_parse("PRESIGN_TTL_SECONDS", PRESIGN_TTL_SECONDS),
            max_file_size_bytes: env_parse("MAX_FILE_SIZE_MB", MAX_FILE_SIZE_MB) * 1024 * 1024,
            allowed_extensions,
            image_allowed_extensions,
            video_allowed_extensions,
            audio_allowed_extensions,
            document_allowed_extensions,
            exiftool_path: env_string("EXIFTOOL_PATH", "exiftool"),
            ffmpeg_path: env_string("FFMPEG_PATH", "ffmpeg"),
            ffprobe_path: env_string("FFPROBE_PATH", "ffprobe"),
            tesseract_path: env_string("TESSERACT_PATH", "tesseract"),
            pdftoppm_path: env_string("PDFTOPPM_PATH", "pdftoppm"),
            whisper_path: env_string("WHISPER_PATH", "whisper"),
            subprocess_timeout_secs: env_parse("SUBPROCESS_TIMEOUT_SECS", SUBPROCESS_TIMEOUT_SECS),
            transcode_timeout_secs: env_parse("TRANSCODE_TIMEOUT_SECS", TRANSCODE_TIMEOUT_SECS),
            ocr_enabled: env_bool("OCR_ENABLED", false),
            ocr_languages: env_string("OCR_LANGUAGES", "eng"),
            transcription_enabled: env_bool("TRANSCRIPTION_ENABLED", false),
            transcription_model: env_string("TRANSCRIPTION_MODEL", "base"),
            retry_max_attempts: env_parse("RETRY_MAX_ATTEMPTS", RETRY_MAX_ATTEMPTS),
            retry_base_backoff_seconds: env_parse(
                "RETRY_BASE_BACKOFF_SECONDS",
                RETRY_BASE_BACKOFF_SECONDS,
            ),
            worker_max_workers: env_parse("WORKER_MAX_WORKERS", WORKER_MAX_WORKERS),
            worker_poll_interval_ms: env_parse("WORKER_POLL_INTERVAL_MS", WORKER_POLL_INTERVAL_MS),
            import_timeout_secs: env_parse("IMPORT_TIMEOUT_SECS", IMPORT_TIMEOUT_SECS),
            upload_session_ttl_hours: env_parse(
                "UPLOAD_SESSION_TTL_HOURS",
                UPLOAD_SESSION_TTL_HOURS,
            ),
            upload_session_reap_interval_secs: env_parse(
                "UPLOAD_SESSION_REAP_INTERVAL_SECS",
                UPLOAD_SESSION_REAP_INTERVAL_SECS,
            ),
        };

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        match self.storage_backend {
            StorageBackend::Remote => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using the remote storage backend"
                    ));
                }
                if self.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using the remote storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using the local storage backend"
                    ));
                }
            }
        }

        if self.retry_max_attempts == 0 {
            return Err(anyhow::anyhow!("RETRY_MAX_ATTEMPTS must be at least 1"));
        }

        if self.worker_max_workers == 0 {
            return Err(anyhow::anyhow!("WORKER_MAX_WORKERS must be at least 1"));
        }

        if self.allowed_extensions.is_empty() {
            return Err(anyhow::anyhow!("ALLOWED_EXTENSIONS must not be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_list_normalizes_entries() {
        env::set_var("TESSERA_TEST_LIST", " .MP4, webm ,,OGG");
        assert_eq!(
            env_list("TESSERA_TEST_LIST", ""),
            vec!["mp4".to_string(), "webm".to_string(), "ogg".to_string()]
        );
        assert_eq!(env_list("TESSERA_TEST_LIST_UNSET", "pdf"), vec!["pdf".to_string()]);
    }

    #[test]
    fn test_env_bool_falls_back_on_garbage() {
        env::set_var("TESSERA_TEST_BOOL", "maybe");
        assert!(env_bool("TESSERA_TEST_BOOL", true));
        env::set_var("TESSERA_TEST_BOOL_ON", "On");
        assert!(env_bool("TESSERA_TEST_BOOL_ON", false));
    }

    #[test]
    fn test_env_parse_defaults() {
        env::set_var("TESSERA_TEST_NUM", "not-a-number");
        assert_eq!(env_parse("TESSERA_TEST_NUM", 7u64), 7);
        assert_eq!(env_parse("TESSERA_TEST_NUM_UNSET", GRACE_WINDOW_SECONDS), 7200);
    }
}
