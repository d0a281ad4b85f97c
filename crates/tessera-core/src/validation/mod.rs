//! Validation of client-supplied identifiers and file names
//!
//! Upload ids become directory names under the staging area and original file
//! names feed stored object names, so both are checked here before touching
//! the filesystem.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::AppError;

/// Maximum length of an upload id
pub const MAX_UPLOAD_ID_LENGTH: usize = 128;

/// Maximum length of the sanitized base kept in stored object names
pub const MAX_STORED_BASE_LENGTH: usize = 64;

static SAFE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("static regex"));

static UNSAFE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("static regex"));

/// True when `token` is a plain path component: ASCII letters, digits, `_`
/// and `-`, not starting with a separator-like character.
pub fn is_safe_token(token: &str) -> bool {
    !token.is_empty() && token.len() <= MAX_UPLOAD_ID_LENGTH && SAFE_TOKEN.is_match(token)
}

pub fn validate_upload_id(upload_id: &str) -> Result<(), AppError> {
    if is_safe_token(upload_id) {
        Ok(())
    } else {
        Err(AppError::InvalidRequest(format!(
            "upload_id '{}' is not a safe path component",
            upload_id.escape_debug()
        )))
    }
}

/// Lowercased extension of `name` without the dot.
pub fn file_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_lowercase())
}

/// File name without directories and without the final extension.
pub fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Reduce an original file stem to `[A-Za-z0-9_-]`, collapsing runs of other
/// characters to a single `_`.
pub fn sanitize_base_name(name: &str) -> String {
    let stem = file_stem(name);
    let cleaned = UNSAFE_NAME_CHARS.replace_all(&stem, "_");
    let trimmed: String = cleaned
        .trim_matches('_')
        .chars()
        .take(MAX_STORED_BASE_LENGTH)
        .collect();
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_tokens() {
        assert!(is_safe_token("abc123"));
        assert!(is_safe_token("d2e8f4a1-7b3c-5d6e"));
        assert!(is_safe_token("upload_01"));
    }

    #[test]
    fn test_rejects_traversal_and_separators() {
        for bad in ["", "..", "../etc", "a/b", "a\\b", ".hidden", "a.b", "-rf", "a b", "x\0y"] {
            assert!(!is_safe_token(bad), "{bad:?} should be rejected");
        }
        assert!(matches!(
            validate_upload_id("../../tmp"),
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_rejects_overlong_id() {
        let long = "a".repeat(MAX_UPLOAD_ID_LENGTH + 1);
        assert!(!is_safe_token(&long));
    }

    #[test]
    fn test_sanitize_base_name() {
        assert_eq!(sanitize_base_name("My Holiday (1).JPG"), "My_Holiday_1");
        assert_eq!(sanitize_base_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_base_name("   .jpg"), "file");
        assert_eq!(sanitize_base_name("ünïcode.png"), "n_code");
    }

    #[test]
    fn test_extension_and_stem() {
        assert_eq!(file_extension("clip.MP4").as_deref(), Some("mp4"));
        assert_eq!(file_extension("noext"), None);
        assert_eq!(file_stem("/srv/in/a.avi"), "a");
    }
}
