use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::chunk::{assign_origins, chunk_text};
use crate::corpus::Corpus;
use crate::error::{RagError, Result};
use crate::index::IndexEntry;
use crate::models::{Document, DocumentFormat, DocumentStatus, IngestReport};

/// One upload in a batch.
#[derive(Debug, Clone)]
pub struct IngestItem {
    pub filename: String,
    pub bytes: Vec<u8>,
    /// MIME hint from the upload boundary; wins over the extension.
    pub mime: Option<String>,
}

impl IngestItem {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
            mime: None,
        }
    }
}

impl Corpus {
    /// Ingest one document.
    ///
    /// An unrecognized format is rejected with `UnsupportedFormat` before
    /// anything is registered. Every later failure is reported through the
    /// returned [`IngestReport`] with status `failed`.
    pub async fn ingest_bytes(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        mime: Option<&str>,
    ) -> Result<IngestReport> {
        let format = DocumentFormat::detect(filename, mime)
            .ok_or_else(|| RagError::UnsupportedFormat(filename.to_string()))?;
        self.ingest_document(Document::new(filename, format), bytes).await
    }

    /// Read and ingest a file.
    pub async fn ingest_path(&self, path: &Path) -> Result<IngestReport> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RagError::InvalidRequest(format!("not a file path: {}", path.display())))?
            .to_string();
        DocumentFormat::detect(&filename, None)
            .ok_or_else(|| RagError::UnsupportedFormat(filename.clone()))?;
        let bytes = tokio::fs::read(path).await?;
        self.ingest_bytes(&filename, bytes, None).await
    }

    /// Download `url` and ingest the response body.
    pub async fn ingest_url(&self, url: &str) -> Result<IngestReport> {
        let (filename, bytes, mime) =
            fetch_url(url, self.config.embedding.timeout_secs).await?;
        let format = DocumentFormat::detect(&filename, mime.as_deref())
            .ok_or_else(|| RagError::UnsupportedFormat(filename.clone()))?;
        let mut doc = Document::new(&filename, format);
        doc.source_url = Some(url.to_string());
        self.ingest_document(doc, bytes).await
    }

    /// Ingest documents concurrently. Results are in input order; one
    /// document's failure does not affect the others.
    pub async fn ingest_batch(self: &Arc<Self>, items: Vec<IngestItem>) -> Vec<Result<IngestReport>> {
        let mut set = JoinSet::new();
        for (i, item) in items.into_iter().enumerate() {
            let corpus = Arc::clone(self);
            set.spawn(async move {
                let result = corpus
                    .ingest_bytes(&item.filename, item.bytes, item.mime.as_deref())
                    .await;
                (i, result)
            });
        }

        let mut slots: Vec<Option<Result<IngestReport>>> = (0..set.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((i, result)) => slots[i] = Some(result),
                Err(e) => warn!("ingest task failed: {}", e),
            }
        }
        // A task that panicked or was cancelled left its slot empty.
        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(RagError::extraction("ingest task aborted before reporting"))
                })
            })
            .collect()
    }

    async fn ingest_document(&self, mut doc: Document, bytes: Vec<u8>) -> Result<IngestReport> {
        self.documents
            .write()
            .await
            .insert(doc.id.clone(), doc.clone());
        info!(id = %doc.id, filename = %doc.filename, format = %doc.format, "ingesting");

        let outcome = self.run_stages(&mut doc, bytes).await;

        let message = match outcome {
            Ok(()) => {
                info!(
                    id = %doc.id,
                    filename = %doc.filename,
                    chunks = doc.chunk_count,
                    "document indexed"
                );
                format!("indexed {} chunks", doc.chunk_count)
            }
            Err(ref e) => {
                warn!(id = %doc.id, filename = %doc.filename, "ingestion failed: {}", e);
                if let Err(rollback) = self.index.delete_document(&doc.id).await {
                    warn!(id = %doc.id, "rollback failed: {}", rollback);
                }
                doc.fail(e.to_string());
                self.update_document(&doc).await;
                e.to_string()
            }
        };

        self.index.persist().await?;
        self.save_registry().await?;

        Ok(IngestReport {
            document_id: doc.id.clone(),
            filename: doc.filename.clone(),
            format: doc.format,
            status: doc.status,
            chunk_count: doc.chunk_count,
            error_kind: outcome.as_ref().err().map(|e| e.kind()),
            message,
        })
    }

    /// Move `doc` to `next` in the registry. `doc` itself only changes once
    /// the registry holds the new status.
    async fn advance(&self, doc: &mut Document, next: DocumentStatus) -> Result<()> {
        let mut updated = doc.clone();
        updated.advance(next)?;
        if !self.update_document(&updated).await {
            return Err(RagError::NotFound(format!(
                "document {} was removed during ingestion",
                doc.id
            )));
        }
        *doc = updated;
        debug!(id = %doc.id, status = %next, "document status");
        Ok(())
    }

    async fn run_stages(&self, doc: &mut Document, bytes: Vec<u8>) -> Result<()> {
        self.advance(doc, DocumentStatus::Extracting).await?;
        let extracted = self.extractor.extract(&doc.filename, bytes, doc.format).await?;

        self.advance(doc, DocumentStatus::Chunking).await?;
        let mut chunks = chunk_text(
            &doc.id,
            &extracted.text,
            self.config.chunking.chunk_size,
            self.config.chunking.overlap_tokens,
        );
        if chunks.is_empty() {
            return Err(RagError::EmptyContent);
        }
        assign_origins(&mut chunks, &extracted.excerpts);

        self.advance(doc, DocumentStatus::Embedding).await?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let entries: Vec<IndexEntry> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                chunk_id: chunk.id.clone(),
                vector,
                metadata: chunk.metadata(&doc.filename),
            })
            .collect();
        self.index.add_batch(entries).await?;

        doc.chunk_count = chunks.len();
        self.advance(doc, DocumentStatus::Indexed).await
    }
}

/// GET `url`. Returns the file name (last path segment), the body and the
/// response MIME type.
pub async fn fetch_url(url: &str, timeout_secs: u64) -> Result<(String, Vec<u8>, Option<String>)> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| RagError::InvalidRequest(format!("invalid URL {}: {}", url, e)))?;
    let filename = parsed
        .path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("download")
        .to_string();

    let fetch_err = |e: reqwest::Error| RagError::Io(std::io::Error::other(format!("fetching {}: {}", url, e)));
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(fetch_err)?;
    let response = client
        .get(parsed)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(fetch_err)?;

    let mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
    let bytes = response.bytes().await.map_err(fetch_err)?.to_vec();
    debug!(url, filename = %filename, bytes = bytes.len(), "fetched");

    Ok((filename, bytes, mime))
}
