//! Document Ingestion
//!
//! Loads scientific PDFs into raw text and splits them into overlapping
//! passages for indexing. Extraction is delegated to lopdf; the module's
//! own logic is page ordering, document discovery and chunking.

pub mod chunker;

pub use chunker::passages_from_documents;

use lopdf::Document as PdfDocument;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Ingestion errors
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("no input documents were provided")]
    NoDocuments,

    #[error("failed to read '{path}': {detail}")]
    Unreadable { path: PathBuf, detail: String },

    #[error("no extractable text in '{path}' (the document may be scanned)")]
    EmptyDocument { path: PathBuf },

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A source document after text extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Short identifier derived from the file name
    pub id: String,
    /// Original file path
    pub path: PathBuf,
    /// Extracted raw text, pages joined in page order
    pub text: String,
}

/// A chunk of source text with a known origin and byte offset.
/// Immutable once created; produced by the chunker, consumed by the
/// embedder and the retriever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub source_id: String,
    pub offset: usize,
}

/// PDF text extractor backed by lopdf
pub struct PdfExtractor;

impl PdfExtractor {
    /// Extract the full text of a PDF, pages concatenated in page order.
    pub fn extract(path: &Path) -> Result<String, IngestError> {
        let doc = PdfDocument::load(path).map_err(|e| IngestError::Unreadable {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

        let pages = doc.get_pages();
        let mut page_numbers: Vec<u32> = pages.keys().copied().collect();
        page_numbers.sort();

        let mut page_texts = Vec::new();
        for page_num in &page_numbers {
            if let Ok(text) = doc.extract_text(&[*page_num]) {
                let trimmed = text.trim().to_string();
                if !trimmed.is_empty() {
                    page_texts.push(trimmed);
                }
            }
        }

        if page_texts.is_empty() {
            return Err(IngestError::EmptyDocument {
                path: path.to_path_buf(),
            });
        }

        Ok(page_texts.join("\n\n"))
    }
}

/// Find all PDF files under a directory, sorted by path for determinism.
pub fn discover_documents(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| IngestError::Unreadable {
            path: dir.to_path_buf(),
            detail: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_pdf = entry
            .path()
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        if is_pdf {
            found.push(entry.path().to_path_buf());
        }
    }
    found.sort();
    Ok(found)
}

/// Expand a mixed list of file and directory paths into concrete PDF paths.
/// Files are kept in input order; directories contribute their PDFs sorted.
pub fn resolve_documents(paths: &[PathBuf]) -> Result<Vec<PathBuf>, IngestError> {
    let mut resolved = Vec::new();
    for path in paths {
        if path.is_dir() {
            resolved.extend(discover_documents(path)?);
        } else {
            resolved.push(path.clone());
        }
    }
    Ok(resolved)
}

/// Load and extract a set of PDF documents.
///
/// An empty input list fails with [`IngestError::NoDocuments`] before any
/// file is touched, so callers can rely on this check happening ahead of
/// any model or index work.
pub fn load_documents(paths: &[PathBuf]) -> Result<Vec<Document>, IngestError> {
    if paths.is_empty() {
        return Err(IngestError::NoDocuments);
    }

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let text = PdfExtractor::extract(path)?;
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        tracing::debug!("loaded '{}' ({} chars)", id, text.len());
        documents.push(Document {
            id,
            path: path.clone(),
            text,
        });
    }
    Ok(documents)
}
