//! Loads documents from disk and extracts their text.
//!
//! Files that cannot yield text (images, scanned PDFs) are not errors: the
//! loader returns a [`DocumentContent::Notice`] explaining why, and the
//! pipeline records the file as skipped.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff"];
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "pdf"];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Text,
    Markdown,
    Pdf,
    Image,
    Other(String),
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "txt" => DocumentKind::Text,
            "md" => DocumentKind::Markdown,
            "pdf" => DocumentKind::Pdf,
            e if IMAGE_EXTENSIONS.contains(&e) => DocumentKind::Image,
            _ => DocumentKind::Other(ext),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DocumentKind::Text => "text",
            DocumentKind::Markdown => "markdown",
            DocumentKind::Pdf => "pdf",
            DocumentKind::Image => "image",
            DocumentKind::Other(_) => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum DocumentContent {
    Text(String),
    Notice(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadedDocument {
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub content: DocumentContent,
    pub pages: Option<usize>,
}

impl LoadedDocument {
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            DocumentContent::Text(t) => Some(t),
            DocumentContent::Notice(_) => None,
        }
    }

    /// The extracted text, or the notice explaining why there is none.
    pub fn display_text(&self) -> &str {
        match &self.content {
            DocumentContent::Text(t) | DocumentContent::Notice(t) => t,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentLoader;

impl DocumentLoader {
    pub fn new() -> Self {
        Self
    }

    pub fn load(&self, path: &Path) -> Result<LoadedDocument, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }
        let kind = DocumentKind::from_path(path);
        let mut pages = None;
        let content = match &kind {
            DocumentKind::Text | DocumentKind::Markdown => {
                DocumentContent::Text(read_text_lossy(path)?)
            }
            DocumentKind::Pdf => {
                let (content, count) = load_pdf(path);
                pages = count;
                content
            }
            DocumentKind::Image => DocumentContent::Notice(
                "[image files are not processed: OCR is not enabled]".to_string(),
            ),
            DocumentKind::Other(ext) => {
                warn!(path = %path.display(), ext = %ext, "unknown file type, reading as plain text");
                match read_text_lossy(path) {
                    Ok(text) => DocumentContent::Text(text),
                    Err(e) => DocumentContent::Notice(format!(
                        "[cannot process file type .{ext}: {e}]"
                    )),
                }
            }
        };
        Ok(LoadedDocument {
            path: path.to_path_buf(),
            kind,
            content,
            pages,
        })
    }

    /// [`DocumentLoader::load`] on the blocking pool; PDF parsing is CPU bound.
    pub async fn load_async(&self, path: PathBuf) -> anyhow::Result<LoadedDocument> {
        let loader = *self;
        let doc = tokio::task::spawn_blocking(move || loader.load(&path)).await??;
        Ok(doc)
    }
}

/// UTF-8 decode dropping invalid sequences instead of failing.
fn read_text_lossy(path: &Path) -> Result<String, LoadError> {
    let bytes = fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).replace('\u{FFFD}', ""),
    })
}

#[cfg(feature = "pdf")]
fn load_pdf(path: &Path) -> (DocumentContent, Option<usize>) {
    let pages = lopdf::Document::load(path).ok().map(|d| d.get_pages().len());
    match extract_pdf_text(path) {
        Ok(text) if !text.trim().is_empty() => (DocumentContent::Text(text), pages),
        Ok(_) => (
            DocumentContent::Notice(
                "[no selectable text found in PDF, possibly a scanned document: OCR is not enabled]"
                    .to_string(),
            ),
            pages,
        ),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "PDF text extraction failed");
            (
                DocumentContent::Notice(format!(
                    "[error while processing PDF: {e}; OCR is not enabled]"
                )),
                pages,
            )
        }
    }
}

/// pdf-extract first; lopdf when it errors or panics on odd encodings.
#[cfg(feature = "pdf")]
fn extract_pdf_text(path: &Path) -> anyhow::Result<String> {
    let primary = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text(path)
    }));
    match primary {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => {
            warn!(path = %path.display(), error = %e, "pdf-extract failed, trying lopdf");
            extract_pdf_text_via_lopdf(path)
        }
        Err(_) => {
            warn!(path = %path.display(), "pdf-extract panicked, trying lopdf");
            extract_pdf_text_via_lopdf(path)
        }
    }
}

#[cfg(feature = "pdf")]
fn extract_pdf_text_via_lopdf(path: &Path) -> anyhow::Result<String> {
    let doc = lopdf::Document::load(path)?;
    let mut text = String::new();
    for page in doc.get_pages().keys() {
        text.push_str(&doc.extract_text(&[*page])?);
    }
    Ok(text)
}

#[cfg(not(feature = "pdf"))]
fn load_pdf(_path: &Path) -> (DocumentContent, Option<usize>) {
    (
        DocumentContent::Notice(
            "[cannot process PDF files: built without the `pdf` feature; OCR is not enabled]"
                .to_string(),
        ),
        None,
    )
}
