//! Tag extraction.
//!
//! `exiftool -j` is the primary source. Its CamelCase tag names are spaced
//! (`MIMEType` becomes `MIME Type`) so the pipeline's case-insensitive
//! [`MetaKey`] lookups find them. Without exiftool, tags come from the native
//! reader and container magic bytes.

use std::path::Path;
use std::time::Duration;

use tessera_core::models::{MetaKey, TagMap, TagValue};
use tokio_util::sync::CancellationToken;

use crate::error::{ToolError, ToolResult};
use crate::subprocess::ToolCommand;

/// exiftool keys describing the host rather than the file.
const SKIPPED_KEYS: [&str; 8] = [
    "SourceFile",
    "Directory",
    "FileName",
    "ExifToolVersion",
    "FilePermissions",
    "FileAccessDate",
    "FileInodeChangeDate",
    "FileModifyDate",
];

/// `MIMEType` -> `MIME Type`, `CreateDate` -> `Create Date`.
pub fn humanize_tag_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && c.is_ascii_uppercase() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            if prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_is_lower)
            {
                out.push(' ');
            }
        }
        out.push(c);
    }
    out
}

/// Parse the JSON array printed by `exiftool -j <file>`.
pub fn parse_exiftool_output(raw: &[u8]) -> ToolResult<TagMap> {
    let parsed: serde_json::Value =
        serde_json::from_slice(raw).map_err(|e| ToolError::parse("exiftool", e))?;
    let object = parsed
        .as_array()
        .and_then(|entries| entries.first())
        .and_then(|entry| entry.as_object())
        .ok_or_else(|| ToolError::parse("exiftool", "expected a one-element array"))?;

    let mut tags = TagMap::new();
    for (key, value) in object {
        if SKIPPED_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let Some(value) = TagValue::from_json(value) {
            tags.insert(humanize_tag_key(key), value);
        }
    }
    Ok(tags)
}

#[derive(Debug, Clone)]
pub struct ExifTool {
    path: String,
    timeout: Duration,
}

impl ExifTool {
    pub fn new(path: impl Into<String>, timeout: Duration) -> ToolResult<Self> {
        let path = path.into();
        crate::subprocess::validate_program(&path)?;
        Ok(Self { path, timeout })
    }

    pub fn is_installed(&self) -> bool {
        crate::subprocess::locate_program(&self.path).is_some()
    }

    #[tracing::instrument(skip(self, cancel), fields(process.executable.name = "exiftool"))]
    pub async fn read_tags(&self, path: &Path, cancel: &CancellationToken) -> ToolResult<TagMap> {
        let output = ToolCommand::new(&self.path, self.timeout)?
            .args(["-j", "-q"])
            .path_arg(path)
            .run(cancel)
            .await?;
        parse_exiftool_output(output.stdout().as_bytes())
    }
}

/// MIME type from leading bytes, falling back to the extension for
/// containers whose magic is shared (zip, ogg, riff).
pub fn sniff_mime(header: &[u8], ext: Option<&str>) -> Option<&'static str> {
    let ext = ext.map(|e| e.to_ascii_lowercase());
    let ext = ext.as_deref();

    #[cfg(feature = "image")]
    {
        if let Ok(format) = image::guess_format(header) {
            return Some(format.to_mime_type());
        }
    }

    if header.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if header.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some("image/png");
    }
    if header.starts_with(b"GIF87a") || header.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if header.starts_with(b"%PDF") {
        return Some("application/pdf");
    }
    if header.starts_with(b"PK\x03\x04") {
        return match ext {
            Some("docx") => {
                Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document")
            }
            _ => Some("application/zip"),
        };
    }
    if header.len() >= 12 && &header[0..4] == b"RIFF" {
        return match &header[8..12] {
            b"AVI " => Some("video/x-msvideo"),
            b"WAVE" => Some("audio/x-wav"),
            b"WEBP" => Some("image/webp"),
            _ => None,
        };
    }
    if header.len() >= 12 && &header[4..8] == b"ftyp" {
        return match &header[8..12] {
            b"qt  " => Some("video/quicktime"),
            b"M4A " => Some("audio/mp4"),
            _ if ext == Some("m4a") => Some("audio/mp4"),
            _ => Some("video/mp4"),
        };
    }
    if header.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return match ext {
            Some("mkv") => Some("video/x-matroska"),
            _ => Some("video/webm"),
        };
    }
    if header.starts_with(b"OggS") {
        return match ext {
            Some("ogv") | Some("ogg") => Some("video/ogg"),
            _ => Some("audio/ogg"),
        };
    }
    if header.starts_with(b"fLaC") {
        return Some("audio/flac");
    }
    if header.starts_with(b"ID3") || header.starts_with(&[0xFF, 0xFB]) {
        return Some("audio/mpeg");
    }
    if matches!(ext, Some("txt") | Some("csv") | Some("md")) && std::str::from_utf8(header).is_ok()
    {
        return Some("text/plain");
    }
    None
}

/// Tags available without exiftool: size, sniffed MIME type and, for
/// images, EXIF fields.
pub fn native_tags(path: &Path) -> ToolResult<TagMap> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let size = file.metadata()?.len();
    let mut header = vec![0u8; 64];
    let n = file.read(&mut header)?;
    header.truncate(n);

    let mut tags = TagMap::new();
    tags.insert("File Size", TagValue::Number(size as f64));
    let ext = path.extension().and_then(|e| e.to_str());
    if let Some(mime) = sniff_mime(&header, ext) {
        tags.set(MetaKey::MimeType, mime);
    }

    #[cfg(feature = "image")]
    {
        tags.extend(crate::native::exif_tags(path));
    }

    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_humanize_tag_key() {
        assert_eq!(humanize_tag_key("MIMEType"), "MIME Type");
        assert_eq!(humanize_tag_key("CreateDate"), "Create Date");
        assert_eq!(humanize_tag_key("SerialNumber"), "Serial Number");
        assert_eq!(humanize_tag_key("Orientation"), "Orientation");
        assert_eq!(humanize_tag_key("GPSLatitude"), "GPS Latitude");
        assert_eq!(humanize_tag_key("Image2Width"), "Image2 Width");
    }

    #[test]
    fn test_parse_exiftool_output() {
        let raw = br#"[{
            "SourceFile": "/srv/in/a.jpg",
            "Directory": "/srv/in",
            "MIMEType": "image/jpeg",
            "CreateDate": "2021:06:01 14:03:22",
            "Orientation": "Rotate 90 CW",
            "SerialNumber": 4021337,
            "ImageWidth": 4000,
            "Flash": null
        }]"#;
        let tags = parse_exiftool_output(raw).unwrap();
        assert_eq!(tags.mime_type().as_deref(), Some("image/jpeg"));
        assert_eq!(tags.serial_number().as_deref(), Some("4021337"));
        assert!(tags.create_date().is_some());
        assert_eq!(
            tags.text(MetaKey::Orientation).as_deref(),
            Some("Rotate 90 CW")
        );
        assert!(tags.iter().all(|(k, _)| k != "Source File" && k != "Directory"));
        assert_eq!(tags.len(), 5);
    }

    #[test]
    fn test_parse_exiftool_rejects_unexpected_shape() {
        assert!(parse_exiftool_output(br#"{"MIMEType": "image/png"}"#).is_err());
        assert!(parse_exiftool_output(b"[]").is_err());
    }

    #[test]
    fn test_sniff_mime() {
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F', 0, 1];
        assert_eq!(sniff_mime(&jpeg, Some("jpg")), Some("image/jpeg"));
        assert_eq!(sniff_mime(b"%PDF-1.7\n", None), Some("application/pdf"));
        assert_eq!(
            sniff_mime(b"RIFF\x00\x00\x00\x00AVI LIST", Some("avi")),
            Some("video/x-msvideo")
        );
        assert_eq!(
            sniff_mime(b"\x00\x00\x00\x20ftypisom\x00\x00", Some("mp4")),
            Some("video/mp4")
        );
        assert_eq!(sniff_mime(b"OggS\x00\x02", Some("opus")), Some("audio/ogg"));
        assert_eq!(sniff_mime(b"hello", Some("txt")), Some("text/plain"));
        assert_eq!(sniff_mime(b"\x00\x01\x02\x03", Some("bin")), None);
    }

    #[test]
    fn test_native_tags_unknown_file_has_no_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, [0u8, 1, 2, 3, 4, 5]).unwrap();
        let tags = native_tags(&path).unwrap();
        assert!(tags.mime_type().is_none());
        assert_eq!(tags.iter().next().map(|(k, _)| k.as_str()), Some("File Size"));
    }
}
