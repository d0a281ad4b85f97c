//! Stored object naming.

use tessera_core::validation::{file_extension, sanitize_base_name};

use crate::traits::{StorageError, StorageResult};

/// Prefix routing an object to the inline attachment area.
pub const INLINE_PREFIX: &str = "inline/";

/// `<32 hex>_<sanitized base>.<ext>` for an original file name. The random
/// part keeps concurrent uploads of same-named files apart.
pub fn generate_stored_name(original: &str) -> String {
    let random: [u8; 16] = rand::random();
    let base = sanitize_base_name(original);
    match file_extension(original) {
        Some(ext) if ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            format!("{}_{}.{}", hex::encode(random), base, ext)
        }
        _ => format!("{}_{}", hex::encode(random), base),
    }
}

/// Reject names that could escape the storage root.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");
    if invalid {
        return Err(StorageError::InvalidKey(format!(
            "storage key '{}' is not allowed",
            key.escape_debug()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_name_shape() {
        let name = generate_stored_name("Field Report 03.JPG");
        let (random, rest) = name.split_once('_').unwrap();
        assert_eq!(random.len(), 32);
        assert!(random.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(rest, "Field_Report_03.jpg");
    }

    #[test]
    fn test_stored_names_differ() {
        assert_ne!(generate_stored_name("a.mp4"), generate_stored_name("a.mp4"));
    }

    #[test]
    fn test_stored_name_without_extension() {
        let name = generate_stored_name("README");
        assert!(name.ends_with("_README"));
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("abc_def.jpg").is_ok());
        assert!(validate_key("inline/abc.png").is_ok());
        for bad in ["", "/etc/passwd", "../x", "a/../b", "a\\b", "a//b", "./a"] {
            assert!(validate_key(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
