//! Core data models used throughout Lumina.
//!
//! These types represent the documents, chunks, citations, and retrieval
//! results that flow through the ingestion and query pipelines.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Maximum characters of chunk text shown in a [`SourceCitation`].
pub const PREVIEW_CHARS: usize = 200;

/// Document formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    PlainText,
    Image,
    Csv,
    Sqlite,
}

impl DocumentFormat {
    /// Detect the format from an optional MIME hint, falling back to the
    /// filename extension. A generic hint like `application/octet-stream`
    /// defers to the extension.
    pub fn detect(filename: &str, mime: Option<&str>) -> Option<Self> {
        mime.and_then(Self::from_mime)
            .or_else(|| Self::from_filename(filename))
    }

    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())?
            .to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" | "doc" => Some(Self::Docx),
            "txt" | "md" | "text" => Some(Self::PlainText),
            "jpg" | "jpeg" | "png" | "tif" | "tiff" | "bmp" => Some(Self::Image),
            "csv" => Some(Self::Csv),
            "db" | "sqlite" | "sqlite3" => Some(Self::Sqlite),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "application/pdf" => Some(Self::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            | "application/msword" => Some(Self::Docx),
            "text/plain" | "text/markdown" => Some(Self::PlainText),
            "image/jpeg" | "image/png" | "image/tiff" | "image/bmp" => Some(Self::Image),
            "text/csv" | "application/csv" => Some(Self::Csv),
            "application/vnd.sqlite3" | "application/x-sqlite3" => Some(Self::Sqlite),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::PlainText => "text",
            Self::Image => "image",
            Self::Csv => "csv",
            Self::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a document through the ingestion pipeline.
///
/// ```text
/// pending → extracting → chunking → embedding → indexed
///    └──────────┴────────────┴───────────┴──→ failed
/// ```
///
/// `indexed` and `failed` are terminal. A failed document is retried by
/// uploading it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Extracting,
    Chunking,
    Embedding,
    Indexed,
    Failed,
}

impl DocumentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Indexed | Self::Failed)
    }

    /// The single forward successor, if any.
    fn successor(&self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Extracting),
            Self::Extracting => Some(Self::Chunking),
            Self::Chunking => Some(Self::Embedding),
            Self::Embedding => Some(Self::Indexed),
            Self::Indexed | Self::Failed => None,
        }
    }

    /// Validate a transition to `next`.
    pub fn transition(self, next: Self) -> Result<Self> {
        let allowed = match next {
            Self::Failed => !self.is_terminal(),
            other => self.successor() == Some(other),
        };
        if allowed {
            Ok(next)
        } else {
            Err(RagError::InvalidRequest(format!(
                "illegal document status transition {} -> {}",
                self, next
            )))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Indexed => "indexed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked document. Persisted in the corpus registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub format: DocumentFormat,
    pub status: DocumentStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub chunk_count: usize,
    /// URL the bytes were fetched from, for URL uploads.
    #[serde(default)]
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(filename: &str, format: DocumentFormat) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            format,
            status: DocumentStatus::Pending,
            error: None,
            chunk_count: 0,
            source_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn advance(&mut self, next: DocumentStatus) -> Result<()> {
        self.status = self.status.transition(next)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move to `failed` with a cause. A terminal document is left as is.
    pub fn fail(&mut self, cause: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = DocumentStatus::Failed;
        self.error = Some(cause.into());
        self.updated_at = Utc::now();
    }
}

/// Marks a chunk produced from tabular content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredOrigin {
    pub table: String,
    /// First row (zero-based, inclusive).
    pub row_start: usize,
    /// Last row (zero-based, inclusive).
    pub row_end: usize,
}

/// One row of tabular content, as located in the extracted text.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRowExcerpt {
    pub table: String,
    pub row: usize,
    pub text: String,
    /// Character offsets of the row's paragraph in the extracted text.
    pub char_start: usize,
    pub char_end: usize,
}

/// Output of the text extractor.
#[derive(Debug, Clone, Default)]
pub struct ExtractedText {
    pub text: String,
    pub excerpts: Vec<TableRowExcerpt>,
}

impl ExtractedText {
    pub fn plain(text: String) -> Self {
        Self {
            text,
            excerpts: Vec::new(),
        }
    }
}

/// A contiguous excerpt of a document's extracted text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    /// Character span in the extracted text (end exclusive).
    pub char_start: usize,
    pub char_end: usize,
    /// Token span in the extracted text (end exclusive).
    pub token_start: usize,
    pub token_end: usize,
    pub origin: Option<StructuredOrigin>,
}

impl Chunk {
    pub fn token_count(&self) -> usize {
        self.token_end - self.token_start
    }

    pub fn metadata(&self, filename: &str) -> ChunkMetadata {
        ChunkMetadata {
            document_id: self.document_id.clone(),
            filename: filename.to_string(),
            chunk_index: self.chunk_index,
            text: self.text.clone(),
            origin: self.origin.clone(),
        }
    }
}

pub fn chunk_id(document_id: &str, chunk_index: usize) -> String {
    format!("{}_{}", document_id, chunk_index)
}

/// Metadata stored with every vector; enough to build a [`SourceCitation`]
/// without re-reading the original document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub filename: String,
    pub chunk_index: usize,
    pub text: String,
    #[serde(default)]
    pub origin: Option<StructuredOrigin>,
}

/// A retrieved chunk, attributable to its source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceCitation {
    pub document_id: String,
    pub filename: String,
    pub chunk_index: usize,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
    pub preview: String,
}

impl SourceCitation {
    pub fn from_hit(metadata: &ChunkMetadata, score: f32) -> Self {
        Self {
            document_id: metadata.document_id.clone(),
            filename: metadata.filename.clone(),
            chunk_index: metadata.chunk_index,
            score,
            preview: preview(&metadata.text),
        }
    }
}

/// First [`PREVIEW_CHARS`] characters, with `...` when truncated.
pub fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// A chunk included in the generation context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextBlock {
    pub citation: SourceCitation,
    pub text: String,
}

/// Result of the retrieval half of a query.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedContext {
    pub question: String,
    /// Text recognized from the query image, if one was supplied.
    pub ocr_text: Option<String>,
    /// Blocks in descending similarity order, already fitted to the budget.
    pub blocks: Vec<ContextBlock>,
}

impl RetrievedContext {
    pub fn citations(&self) -> Vec<SourceCitation> {
        self.blocks.iter().map(|b| b.citation.clone()).collect()
    }
}

/// A grounded (or explicitly ungrounded) answer.
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub answer: String,
    pub citations: Vec<SourceCitation>,
    pub ocr_text: Option<String>,
    /// False when no context was retrieved.
    pub grounded: bool,
}

/// Outcome of ingesting one document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub filename: String,
    pub format: DocumentFormat,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    pub error_kind: Option<crate::error::ErrorKind>,
    pub message: String,
}
