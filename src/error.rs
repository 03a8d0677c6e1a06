//! Error types for the RAG core.
//!
//! Every failure carries a stable [`ErrorKind`] (for callers that branch on
//! the category, or render it at an API boundary) and a human-readable cause
//! through `Display`.

use std::fmt;

use thiserror::Error;

use crate::models::RetrievedContext;

/// Result type alias for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors produced by extraction, embedding, indexing, and query orchestration.
#[derive(Debug, Error)]
pub enum RagError {
    /// Filename extension / MIME hint maps to no known extractor.
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// The document could not be turned into text.
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// The OCR collaborator is not installed or not configured.
    #[error("OCR unavailable: {0}")]
    OcrUnavailable(String),

    /// Extraction succeeded but produced nothing to chunk.
    #[error("Document has no extractable content")]
    EmptyContent,

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// The index was built with another embedding model.
    #[error(
        "Embedding model mismatch: index was built with '{index}', configured model is '{configured}' (clear the corpus to re-embed)"
    )]
    ModelMismatch { index: String, configured: String },

    #[error("Failed to initialize embedding model: {0}")]
    ModelInit(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// Persisted index state could not be parsed or is internally inconsistent.
    #[error("Index corrupted: {0}")]
    IndexCorruption(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The generation collaborator failed. When raised by a query, the
    /// retrieval result is attached so generation can be retried without
    /// re-embedding.
    #[error("Generation failed: {message}")]
    Generation {
        message: String,
        retrieved: Option<Box<RetrievedContext>>,
    },

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Stable error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedFormat,
    ExtractionFailure,
    EmptyContent,
    EmbeddingDimensionMismatch,
    ModelInitializationFailure,
    EmbeddingFailure,
    IndexCorruption,
    IoFailure,
    GenerationServiceFailure,
    NotFound,
    InvalidConfig,
    InvalidRequest,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::ExtractionFailure => "extraction_failure",
            ErrorKind::EmptyContent => "empty_content",
            ErrorKind::EmbeddingDimensionMismatch => "embedding_dimension_mismatch",
            ErrorKind::ModelInitializationFailure => "model_initialization_failure",
            ErrorKind::EmbeddingFailure => "embedding_failure",
            ErrorKind::IndexCorruption => "index_corruption",
            ErrorKind::IoFailure => "io_failure",
            ErrorKind::GenerationServiceFailure => "generation_service_failure",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::InvalidRequest => "invalid_request",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RagError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            RagError::Extraction(_) | RagError::OcrUnavailable(_) => ErrorKind::ExtractionFailure,
            RagError::EmptyContent => ErrorKind::EmptyContent,
            RagError::DimensionMismatch { .. } | RagError::ModelMismatch { .. } => {
                ErrorKind::EmbeddingDimensionMismatch
            }
            RagError::ModelInit(_) => ErrorKind::ModelInitializationFailure,
            RagError::Embedding(_) => ErrorKind::EmbeddingFailure,
            RagError::IndexCorruption(_) => ErrorKind::IndexCorruption,
            RagError::Index(_) | RagError::Io(_) => ErrorKind::IoFailure,
            RagError::Generation { .. } => ErrorKind::GenerationServiceFailure,
            RagError::NotFound(_) => ErrorKind::NotFound,
            RagError::Config(_) => ErrorKind::InvalidConfig,
            RagError::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction(message.into())
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    pub fn index(message: impl Into<String>) -> Self {
        Self::Index(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// A generation failure without attached retrieval state.
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
            retrieved: None,
        }
    }

    /// The retrieval result carried by a query-time generation failure.
    pub fn retrieved_context(&self) -> Option<&RetrievedContext> {
        match self {
            RagError::Generation { retrieved, .. } => retrieved.as_deref(),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for RagError {
    fn from(err: sqlx::Error) -> Self {
        RagError::Index(err.to_string())
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        RagError::IndexCorruption(err.to_string())
    }
}
