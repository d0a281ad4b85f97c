//! EXIF reading with kamadak-exif, used when exiftool is unavailable.

use std::path::Path;

use exif::{In, Reader, Tag, Value};
use tessera_core::models::{MetaKey, TagMap, TagValue};

use crate::tags::humanize_tag_key;

fn ascii_value(value: &Value) -> Option<String> {
    match value {
        Value::Ascii(parts) => parts
            .first()
            .map(|raw| String::from_utf8_lossy(raw).trim_end_matches('\0').trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

/// EXIF fields of `path`. Files without EXIF yield an empty map.
pub fn exif_tags(path: &Path) -> TagMap {
    let mut tags = TagMap::new();
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return tags,
    };
    let mut reader = std::io::BufReader::new(file);
    let exif = match Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(e) => {
            tracing::debug!(error = %e, path = %path.display(), "No EXIF data");
            return tags;
        }
    };

    for field in exif.fields().filter(|f| f.ifd_num == In::PRIMARY) {
        let value = match ascii_value(&field.value) {
            Some(text) => TagValue::Text(text),
            None => TagValue::Text(field.display_value().with_unit(&exif).to_string()),
        };
        tags.insert(humanize_tag_key(&field.tag.to_string()), value);
    }

    let create_date = [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime]
        .into_iter()
        .find_map(|tag| exif.get_field(tag, In::PRIMARY))
        .and_then(|f| ascii_value(&f.value));
    if let Some(date) = create_date {
        tags.set(MetaKey::CreateDate, date);
    }

    if let Some(orientation) = exif
        .get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
    {
        tags.set(MetaKey::Orientation, TagValue::Number(orientation as f64));
    }

    if let Some(serial) = exif
        .get_field(Tag::BodySerialNumber, In::PRIMARY)
        .and_then(|f| ascii_value(&f.value))
    {
        tags.set(MetaKey::SerialNumber, serial);
    }

    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_without_exif() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, b"no exif here").unwrap();
        assert!(exif_tags(&path).is_empty());
        assert!(exif_tags(&dir.path().join("missing.jpg")).is_empty());
    }

    #[test]
    fn test_ascii_value_trims_padding() {
        let value = Value::Ascii(vec![b"2021:06:01 14:03:22\0".to_vec()]);
        assert_eq!(ascii_value(&value).as_deref(), Some("2021:06:01 14:03:22"));
        assert_eq!(ascii_value(&Value::Ascii(vec![])), None);
        assert_eq!(ascii_value(&Value::Short(vec![1])), None);
    }
}
