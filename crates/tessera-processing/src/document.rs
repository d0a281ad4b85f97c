//! Text extraction from PDF and DOCX documents.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::error::{ToolError, ToolResult};
use crate::subprocess::ToolCommand;

/// Separator between pages (PDF) and paragraphs (DOCX) in extracted text.
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

static DOCX_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>|<w:tab/>|<w:br/>|</w:p>")
        .expect("static regex is valid")
});

/// Join non-blank pages; `None` when nothing is left.
pub fn join_pages<S: AsRef<str>>(pages: &[S]) -> Option<String> {
    let kept: Vec<&str> = pages
        .iter()
        .map(|p| p.as_ref().trim())
        .filter(|p| !p.is_empty())
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join(PARAGRAPH_SEPARATOR))
    }
}

/// Native text of every page. Scanned PDFs give blank pages.
#[tracing::instrument]
pub async fn pdf_page_texts(path: &Path) -> ToolResult<Vec<String>> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_by_pages(&path).map_err(|e| ToolError::parse("pdf", e))
    })
    .await
    // pdf-extract panics on some malformed files
    .map_err(|e| ToolError::parse("pdf", e))?
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Plain text of a `word/document.xml` body.
pub fn docx_xml_to_text(xml: &str) -> String {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    for caps in DOCX_TOKEN.captures_iter(xml) {
        match caps.get(1) {
            Some(run) => current.push_str(&unescape_xml(run.as_str())),
            None => match caps.get(0).map(|m| m.as_str()) {
                Some("<w:tab/>") => current.push('\t'),
                Some("<w:br/>") => current.push('\n'),
                _ => paragraphs.push(std::mem::take(&mut current)),
            },
        }
    }
    paragraphs.push(current);
    join_pages(&paragraphs).unwrap_or_default()
}

#[tracing::instrument]
pub async fn docx_text(path: &Path) -> ToolResult<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&path)?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| ToolError::parse("docx", e))?;
        let mut entry = archive
            .by_name("word/document.xml")
            .map_err(|e| ToolError::parse("docx", e))?;
        let mut xml = String::new();
        entry.read_to_string(&mut xml)?;
        Ok(docx_xml_to_text(&xml))
    })
    .await
    .map_err(|e| ToolError::parse("docx", e))?
}

/// Renders PDF pages to PNG with pdftoppm for OCR.
#[derive(Debug, Clone)]
pub struct PdfRasterizer {
    path: String,
    timeout: Duration,
}

impl PdfRasterizer {
    pub fn new(path: impl Into<String>, timeout: Duration) -> ToolResult<Self> {
        let path = path.into();
        crate::subprocess::validate_program(&path)?;
        Ok(Self { path, timeout })
    }

    /// Page images in page order.
    pub async fn rasterize(
        &self,
        pdf: &Path,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> ToolResult<Vec<PathBuf>> {
        ToolCommand::new(&self.path, self.timeout)?
            .args(["-r", "300", "-png"])
            .path_arg(pdf)
            .path_arg(&out_dir.join("page"))
            .run(cancel)
            .await?;

        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(out_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "png") {
                pages.push(path);
            }
        }
        // page-1.png .. page-10.png; zero padding depends on the page count
        pages.sort_by_key(|p| page_number(p));
        Ok(pages)
    }
}

fn page_number(path: &Path) -> u32 {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.rsplit('-').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_join_pages() {
        assert_eq!(
            join_pages(&["  first page ", "", "second"]).as_deref(),
            Some("first page\n\nsecond")
        );
        assert_eq!(join_pages(&["", "  \n"]), None);
    }

    #[test]
    fn test_docx_xml_to_text() {
        let xml = r#"<w:document><w:body>
            <w:p><w:r><w:t>Witness</w:t></w:r><w:r><w:t xml:space="preserve"> statement &amp; notes</w:t></w:r></w:p>
            <w:p></w:p>
            <w:p><w:r><w:t>Date:</w:t><w:tab/><w:t>2019</w:t></w:r></w:p>
        </w:body></w:document>"#;
        assert_eq!(
            docx_xml_to_text(xml),
            "Witness statement & notes\n\nDate:\t2019"
        );
    }

    #[test]
    fn test_page_order() {
        let mut pages = vec![
            PathBuf::from("/t/page-10.png"),
            PathBuf::from("/t/page-2.png"),
            PathBuf::from("/t/page-1.png"),
        ];
        pages.sort_by_key(|p| page_number(p));
        assert_eq!(pages[0], PathBuf::from("/t/page-1.png"));
        assert_eq!(pages[2], PathBuf::from("/t/page-10.png"));
    }

    #[tokio::test]
    async fn test_docx_text_from_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.docx");
        {
            let file = std::fs::File::create(&path).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            zip.start_file("word/document.xml", zip::write::FileOptions::default())
                .unwrap();
            zip.write_all(b"<w:p><w:r><w:t>Field report</w:t></w:r></w:p>")
                .unwrap();
            zip.finish().unwrap();
        }
        assert_eq!(docx_text(&path).await.unwrap(), "Field report");
    }

    #[tokio::test]
    async fn test_docx_text_rejects_non_zip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.docx");
        std::fs::write(&path, b"plain text").unwrap();
        assert!(matches!(
            docx_text(&path).await,
            Err(ToolError::Parse { .. })
        ));
    }
}
