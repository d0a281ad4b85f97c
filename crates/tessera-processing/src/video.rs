//! Video probing, transcoding and stream muxing via ffprobe/ffmpeg.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tessera_core::models::VideoInfo;
use tokio_util::sync::CancellationToken;

use crate::error::{ToolError, ToolResult};
use crate::subprocess::ToolCommand;

/// Containers browsers play natively.
pub const WEB_SAFE_CONTAINERS: [&str; 3] = ["mp4", "ogg", "webm"];
/// Codecs browsers play natively, by display name.
pub const WEB_SAFE_CODECS: [&str; 3] = ["H.264", "Theora", "VP8"];

/// Whether a video must be transcoded before it can be served to browsers.
pub fn needs_transcode(ext: &str, codec: &str) -> bool {
    let ext = ext.trim_start_matches('.');
    let container_ok = WEB_SAFE_CONTAINERS
        .iter()
        .any(|c| c.eq_ignore_ascii_case(ext));
    let codec = display_codec_name(codec);
    let codec_ok = WEB_SAFE_CODECS.iter().any(|c| c.eq_ignore_ascii_case(&codec));
    !(container_ok && codec_ok)
}

/// Map ffprobe's short codec names to the display names used in metadata.
pub fn display_codec_name(codec: &str) -> String {
    match codec.to_ascii_lowercase().as_str() {
        "h264" | "avc" | "avc1" | "h.264" => "H.264".to_string(),
        "hevc" | "h265" | "h.265" => "H.265".to_string(),
        "theora" => "Theora".to_string(),
        "vp8" => "VP8".to_string(),
        "vp9" => "VP9".to_string(),
        "av1" => "AV1".to_string(),
        "mpeg4" => "MPEG-4".to_string(),
        _ => codec.to_string(),
    }
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
/// `None` when the container has no video stream.
pub fn parse_probe_output(raw: &[u8]) -> ToolResult<Option<VideoInfo>> {
    let probe: serde_json::Value =
        serde_json::from_slice(raw).map_err(|e| ToolError::parse("ffprobe", e))?;

    let Some(stream) = probe["streams"].as_array().and_then(|streams| {
        streams
            .iter()
            .find(|s| s["codec_type"].as_str() == Some("video"))
    }) else {
        return Ok(None);
    };

    // Cover art in audio files shows up as a single-frame video stream.
    if stream["disposition"]["attached_pic"].as_u64() == Some(1) {
        return Ok(None);
    }

    let codec = stream["codec_name"].as_str().unwrap_or("unknown");
    let duration_seconds = probe["format"]["duration"]
        .as_str()
        .or_else(|| stream["duration"].as_str())
        .and_then(|d| d.parse::<f64>().ok());

    Ok(Some(VideoInfo {
        codec: display_codec_name(codec),
        duration_seconds,
        width: stream["width"].as_u64().map(|w| w as u32),
        height: stream["height"].as_u64().map(|h| h as u32),
    }))
}

#[derive(Debug, Clone)]
pub struct VideoProbe {
    ffprobe_path: String,
    timeout: Duration,
}

impl VideoProbe {
    pub fn new(ffprobe_path: impl Into<String>, timeout: Duration) -> ToolResult<Self> {
        let ffprobe_path = ffprobe_path.into();
        crate::subprocess::validate_program(&ffprobe_path)?;
        Ok(Self {
            ffprobe_path,
            timeout,
        })
    }

    #[tracing::instrument(skip(self, cancel), fields(
        process.executable.name = "ffprobe",
        ffmpeg.operation = "probe"
    ))]
    pub async fn probe(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> ToolResult<Option<VideoInfo>> {
        let start = std::time::Instant::now();
        let output = ToolCommand::new(&self.ffprobe_path, self.timeout)?
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .path_arg(path)
            .run(cancel)
            .await?;

        let info = parse_probe_output(output.stdout().as_bytes())?;
        if let Some(ref info) = info {
            tracing::info!(
                duration_ms = start.elapsed().as_millis(),
                video_duration = info.duration_seconds,
                codec = %info.codec,
                "Video probe completed"
            );
        }
        Ok(info)
    }
}

/// Produces web-playable derivatives.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Re-encode `src` into an H.264/AAC mp4 at `dest`.
    async fn transcode(&self, src: &Path, dest: &Path, cancel: &CancellationToken)
        -> ToolResult<()>;

    /// Combine separate video and audio streams into one mp4 at `dest`,
    /// copying the video and encoding the audio to AAC.
    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> ToolResult<()>;
}

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<String>, timeout: Duration) -> ToolResult<Self> {
        let ffmpeg_path = ffmpeg_path.into();
        crate::subprocess::validate_program(&ffmpeg_path)?;
        Ok(Self {
            ffmpeg_path,
            timeout,
        })
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    #[tracing::instrument(skip(self, cancel), fields(ffmpeg.operation = "transcode"))]
    async fn transcode(
        &self,
        src: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> ToolResult<()> {
        let start = std::time::Instant::now();
        ToolCommand::new(&self.ffmpeg_path, self.timeout)?
            .args(["-y", "-nostdin", "-loglevel", "error", "-i"])
            .path_arg(src)
            .args([
                "-c:v",
                "libx264",
                "-preset",
                "fast",
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-b:a",
                "128k",
                "-movflags",
                "+faststart",
            ])
            .path_arg(dest)
            .run(cancel)
            .await?;

        tracing::info!(
            duration_ms = start.elapsed().as_millis(),
            "Video transcode completed"
        );
        Ok(())
    }

    #[tracing::instrument(skip(self, cancel), fields(ffmpeg.operation = "mux"))]
    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> ToolResult<()> {
        ToolCommand::new(&self.ffmpeg_path, self.timeout)?
            .args(["-y", "-nostdin", "-loglevel", "error", "-i"])
            .path_arg(video)
            .arg("-i")
            .path_arg(audio)
            .args([
                "-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a", "aac",
            ])
            .path_arg(dest)
            .run(cancel)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_transcode() {
        assert!(!needs_transcode("mp4", "H.264"));
        assert!(!needs_transcode("webm", "VP8"));
        assert!(!needs_transcode("ogg", "Theora"));
        assert!(!needs_transcode("MP4", "h264"));
        assert!(needs_transcode("avi", "H.264"));
        assert!(needs_transcode("mp4", "HEVC"));
        assert!(needs_transcode("mkv", "VP8"));
        assert!(needs_transcode("webm", "VP9"));
    }

    #[test]
    fn test_parse_probe_output() {
        let raw = br#"{
            "streams": [
                {"codec_type": "audio", "codec_name": "mp3"},
                {"codec_type": "video", "codec_name": "mpeg4", "width": 640, "height": 480}
            ],
            "format": {"duration": "61.400000", "format_name": "avi"}
        }"#;
        let info = parse_probe_output(raw).unwrap().unwrap();
        assert_eq!(info.codec, "MPEG-4");
        assert_eq!(info.width, Some(640));
        assert_eq!(info.height, Some(480));
        assert_eq!(info.duration_string().as_deref(), Some("61"));
    }

    #[test]
    fn test_parse_probe_output_audio_only() {
        let raw = br#"{
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"},
                {"codec_type": "video", "codec_name": "mjpeg", "disposition": {"attached_pic": 1}}
            ],
            "format": {"duration": "200.0"}
        }"#;
        assert!(parse_probe_output(raw).unwrap().is_none());
        assert!(parse_probe_output(br#"{"streams": []}"#).unwrap().is_none());
    }

    #[test]
    fn test_parse_probe_output_garbage() {
        assert!(matches!(
            parse_probe_output(b"not json"),
            Err(ToolError::Parse { .. })
        ));
    }
}
