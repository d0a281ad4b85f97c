//! Optical character recognition.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ToolResult;
use crate::subprocess::{locate_program, ToolCommand};

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognized text of one image; `languages` uses tesseract's `eng+fra` form.
    async fn recognize(
        &self,
        image: &Path,
        languages: &str,
        cancel: &CancellationToken,
    ) -> ToolResult<String>;
}

pub struct TesseractEngine {
    path: String,
    timeout: Duration,
}

impl TesseractEngine {
    /// `None` when the tesseract binary cannot be found.
    pub fn detect(path: &str, timeout: Duration) -> Option<Arc<dyn OcrEngine>> {
        if crate::subprocess::validate_program(path).is_err() || locate_program(path).is_none() {
            tracing::warn!(tesseract = %path, "tesseract not installed, OCR unavailable");
            return None;
        }
        tracing::info!(tesseract = %path, "OCR engine initialized");
        Some(Arc::new(Self {
            path: path.to_string(),
            timeout,
        }))
    }
}

/// Tesseract accepts `eng+fra`; configuration may list `eng,fra`.
pub fn normalize_languages(languages: &str) -> String {
    let langs: Vec<&str> = languages
        .split([',', '+', ' '])
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if langs.is_empty() {
        "eng".to_string()
    } else {
        langs.join("+")
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    #[tracing::instrument(skip(self, cancel), fields(process.executable.name = "tesseract"))]
    async fn recognize(
        &self,
        image: &Path,
        languages: &str,
        cancel: &CancellationToken,
    ) -> ToolResult<String> {
        let output = ToolCommand::new(&self.path, self.timeout)?
            .path_arg(image)
            .args(["stdout", "-l"])
            .arg(normalize_languages(languages))
            .run(cancel)
            .await?;
        Ok(output.stdout().trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_languages() {
        assert_eq!(normalize_languages("eng"), "eng");
        assert_eq!(normalize_languages("eng, ara"), "eng+ara");
        assert_eq!(normalize_languages("eng+fra"), "eng+fra");
        assert_eq!(normalize_languages(""), "eng");
    }

    #[test]
    fn test_detect_missing_binary() {
        assert!(TesseractEngine::detect("tessera-missing-tesseract", Duration::from_secs(1)).is_none());
    }
}
