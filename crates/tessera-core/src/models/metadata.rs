//! Extracted file metadata
//!
//! Tag maps come from heterogeneous extractors, so values are kept as a small
//! tagged union and every key the extractor reported is preserved. The
//! pipeline only consults the keys named by [`MetaKey`].

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl TagValue {
    pub fn as_text(&self) -> String {
        match self {
            TagValue::Text(s) => s.clone(),
            TagValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            TagValue::Number(n) => n.to_string(),
            TagValue::Bool(b) => b.to_string(),
        }
    }

    /// Converts an extractor JSON value; arrays and objects are flattened to text.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(TagValue::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(TagValue::Number),
            serde_json::Value::String(s) => Some(TagValue::Text(s.clone())),
            other => Some(TagValue::Text(other.to_string())),
        }
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::Text(s.to_string())
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::Text(s)
    }
}

/// Keys the pipeline reads from a tag map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaKey {
    MimeType,
    CreateDate,
    Orientation,
    SerialNumber,
    Duration,
    Codec,
}

impl MetaKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaKey::MimeType => "MIME type",
            MetaKey::CreateDate => "create date",
            MetaKey::Orientation => "orientation",
            MetaKey::SerialNumber => "serial number",
            MetaKey::Duration => "duration",
            MetaKey::Codec => "codec",
        }
    }
}

/// Ordered tag map. Lookups through [`MetaKey`] ignore ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagMap(BTreeMap<String, TagValue>);

impl TagMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn set(&mut self, key: MetaKey, value: impl Into<TagValue>) {
        let existing = self
            .0
            .keys()
            .find(|k| k.eq_ignore_ascii_case(key.as_str()))
            .cloned();
        self.0
            .insert(existing.unwrap_or_else(|| key.as_str().to_string()), value.into());
    }

    pub fn get(&self, key: MetaKey) -> Option<&TagValue> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key.as_str()))
            .map(|(_, v)| v)
    }

    /// Trimmed, non-empty text value for `key`.
    pub fn text(&self, key: MetaKey) -> Option<String> {
        self.get(key)
            .map(TagValue::as_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn mime_type(&self) -> Option<String> {
        self.text(MetaKey::MimeType)
            .map(|m| m.to_lowercase())
            .filter(|m| m.contains('/'))
    }

    pub fn serial_number(&self) -> Option<String> {
        self.text(MetaKey::SerialNumber)
    }

    /// `create date` parsed from the EXIF form (`2021:06:01 14:03:22`, optional
    /// zone suffix) or RFC 3339. Zero dates written by some cameras yield `None`.
    pub fn create_date(&self) -> Option<DateTime<Utc>> {
        self.text(MetaKey::CreateDate)
            .and_then(|raw| parse_exif_datetime(&raw))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TagValue)> {
        self.0.iter()
    }

    pub fn extend(&mut self, other: TagMap) {
        self.0.extend(other.0);
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

fn parse_exif_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y:%m:%d %H:%M:%S%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    // Drop sub-seconds and a trailing zone marker we can't interpret.
    let base: String = raw.chars().take(19).collect();
    if let Ok(naive) = NaiveDateTime::parse_from_str(&base, "%Y:%m:%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&base, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    let day: String = raw.chars().take(10).collect();
    NaiveDate::parse_from_str(&day, "%Y:%m:%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Result of probing a video container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Codec long name as reported by the prober, e.g. `H.264`
    pub codec: String,
    pub duration_seconds: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl VideoInfo {
    /// Duration as stored on media rows (whole seconds, stringified).
    pub fn duration_string(&self) -> Option<String> {
        self.duration_seconds
            .map(|d| format!("{}", d.round() as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_lookup_ignores_case() {
        let mut tags = TagMap::new();
        tags.insert("MIME Type", "image/JPEG");
        tags.insert("Serial Number", "SN-42");
        assert_eq!(tags.mime_type().as_deref(), Some("image/jpeg"));
        assert_eq!(tags.serial_number().as_deref(), Some("SN-42"));
    }

    #[test]
    fn test_mime_requires_slash() {
        let mut tags = TagMap::new();
        tags.insert("MIME type", "   ");
        assert!(tags.mime_type().is_none());
        tags.set(MetaKey::MimeType, "unknown");
        assert!(tags.mime_type().is_none());
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn test_create_date_exif_format() {
        let mut tags = TagMap::new();
        tags.insert("Create Date", "2021:06:01 14:03:22");
        let dt = tags.create_date().unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2021, 6, 1));
        assert_eq!(dt.hour(), 14);
    }

    #[test]
    fn test_create_date_with_zone_and_garbage() {
        let mut tags = TagMap::new();
        tags.insert("create date", "2021:06:01 14:03:22+02:00");
        assert_eq!(tags.create_date().unwrap().hour(), 12);

        tags.set(MetaKey::CreateDate, "0000:00:00 00:00:00");
        assert!(tags.create_date().is_none());
    }

    #[test]
    fn test_numbers_render_without_fraction() {
        assert_eq!(TagValue::Number(6.0).as_text(), "6");
        assert_eq!(TagValue::Number(2.5).as_text(), "2.5");
        assert_eq!(
            TagValue::from_json(&serde_json::json!(["a", "b"])),
            Some(TagValue::Text("[\"a\",\"b\"]".to_string()))
        );
    }

    #[test]
    fn test_duration_string_rounds() {
        let info = VideoInfo {
            codec: "H.264".into(),
            duration_seconds: Some(12.6),
            width: None,
            height: None,
        };
        assert_eq!(info.duration_string().as_deref(), Some("13"));
    }
}
