//! The corpus: every tracked document plus the one active vector index.
//!
//! The document registry is persisted as `documents.json` in the data
//! directory (temp file + rename). On open, the registry and the index are
//! reconciled so that the index holds vectors for exactly the documents
//! whose status is `indexed`:
//!
//! - documents left mid-pipeline by a previous process are marked failed,
//! - vectors of documents the registry does not track as indexed are dropped,
//! - indexed documents without any vectors are marked failed.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::extract::Extractor;
use crate::generation::{create_generator, AnswerGenerator};
use crate::index::{create_index, VectorIndex};
use crate::models::{Document, DocumentStatus};
use crate::ocr::{create_ocr, OcrEngine};

/// Health summary of a corpus.
#[derive(Debug, Clone, Serialize)]
pub struct CorpusStats {
    pub documents: usize,
    pub indexed: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub vectors: usize,
    pub backend: String,
    pub embedding_model: String,
    pub dims: usize,
    pub embedder_initialized: bool,
    pub chunk_size: usize,
    pub overlap_tokens: usize,
}

pub struct Corpus {
    pub(crate) config: Config,
    pub(crate) embedder: Arc<Embedder>,
    pub(crate) index: Arc<dyn VectorIndex>,
    pub(crate) extractor: Extractor,
    pub(crate) generator: Arc<dyn AnswerGenerator>,
    pub(crate) documents: RwLock<HashMap<String, Document>>,
    registry_lock: Mutex<()>,
}

impl Corpus {
    /// Open the corpus under `config.data.dir`, creating it if needed.
    pub async fn open(
        config: Config,
        embedder: Arc<Embedder>,
        ocr: Arc<dyn OcrEngine>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RagError::config(format!("{:#}", e)))?;
        if embedder.model_name() != config.embedding.model || embedder.dims() != config.embedding.dims {
            return Err(RagError::ModelMismatch {
                index: config.embedding.model.clone(),
                configured: embedder.model_name().to_string(),
            });
        }

        tokio::fs::create_dir_all(&config.data.dir).await?;
        let index = create_index(&config).await?;
        let mut documents = load_registry(&config.registry_path()).await?;

        for doc in documents.values_mut() {
            if !doc.status.is_terminal() {
                warn!(id = %doc.id, filename = %doc.filename, status = %doc.status, "document was interrupted");
                doc.fail("interrupted before indexing completed");
            }
        }

        let tracked: HashSet<String> = documents
            .values()
            .filter(|d| d.status == DocumentStatus::Indexed)
            .map(|d| d.id.clone())
            .collect();
        let dropped = index.load(&tracked).await?;
        if dropped > 0 {
            warn!(dropped, "dropped vectors of untracked documents");
            index.persist().await?;
        }

        let counts = index.document_vector_counts().await?;
        for doc in documents.values_mut() {
            if doc.status == DocumentStatus::Indexed && !counts.contains_key(&doc.id) {
                warn!(id = %doc.id, filename = %doc.filename, "indexed document has no vectors");
                doc.status = DocumentStatus::Failed;
                doc.error = Some("vectors missing from index".to_string());
            }
        }

        let corpus = Self {
            extractor: Extractor::new(config.extraction.clone(), ocr),
            config,
            embedder,
            index,
            generator,
            documents: RwLock::new(documents),
            registry_lock: Mutex::new(()),
        };
        corpus.save_registry().await?;

        info!(
            dir = %corpus.config.data.dir.display(),
            backend = corpus.index.backend_name(),
            documents = corpus.documents.read().await.len(),
            "corpus opened"
        );
        Ok(corpus)
    }

    /// Open with collaborators built from configuration and the process-wide
    /// embedder.
    pub async fn from_config(config: Config) -> Result<Self> {
        let embedder = Embedder::shared(&config.embedding)?;
        let ocr = create_ocr(&config.ocr)?;
        let generator = create_generator(&config.generation)?;
        Self::open(config, embedder, ocr, generator).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// All tracked documents, oldest first.
    pub async fn documents(&self) -> Vec<Document> {
        let mut docs: Vec<Document> = self.documents.read().await.values().cloned().collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        docs
    }

    pub async fn get_document(&self, id: &str) -> Option<Document> {
        self.documents.read().await.get(id).cloned()
    }

    /// Remove a document and all its vectors. Returns the vector count
    /// removed.
    pub async fn delete_document(&self, id: &str) -> Result<usize> {
        // Unregistering first hides the document from queries at once.
        let removed = self.documents.write().await.remove(id);
        let Some(doc) = removed else {
            return Err(RagError::NotFound(format!("document {}", id)));
        };

        let vectors = self.index.delete_document(id).await?;
        self.index.persist().await?;
        self.save_registry().await?;
        info!(id, filename = %doc.filename, vectors, "document deleted");
        Ok(vectors)
    }

    /// Remove every document and vector.
    pub async fn clear(&self) -> Result<()> {
        let count = {
            let mut docs = self.documents.write().await;
            let n = docs.len();
            docs.clear();
            n
        };
        self.index.clear().await?;
        self.index.persist().await?;
        self.save_registry().await?;
        info!(documents = count, "corpus cleared");
        Ok(())
    }

    pub async fn stats(&self) -> Result<CorpusStats> {
        let (documents, indexed, failed) = {
            let docs = self.documents.read().await;
            let count = |s: DocumentStatus| docs.values().filter(|d| d.status == s).count();
            (docs.len(), count(DocumentStatus::Indexed), count(DocumentStatus::Failed))
        };
        Ok(CorpusStats {
            documents,
            indexed,
            failed,
            in_progress: documents - indexed - failed,
            vectors: self.index.len().await?,
            backend: self.index.backend_name().to_string(),
            embedding_model: self.embedder.model_name().to_string(),
            dims: self.embedder.dims(),
            embedder_initialized: self.embedder.is_initialized(),
            chunk_size: self.config.chunking.chunk_size,
            overlap_tokens: self.config.chunking.overlap_tokens,
        })
    }

    /// Flush index and registry.
    pub async fn persist(&self) -> Result<()> {
        self.index.persist().await?;
        self.save_registry().await
    }

    /// Store `doc` in the registry. Returns false if the document is no
    /// longer tracked (deleted or cleared meanwhile).
    pub(crate) async fn update_document(&self, doc: &Document) -> bool {
        let mut docs = self.documents.write().await;
        match docs.get_mut(&doc.id) {
            Some(slot) => {
                *slot = doc.clone();
                true
            }
            None => false,
        }
    }

    pub(crate) async fn save_registry(&self) -> Result<()> {
        let _guard = self.registry_lock.lock().await;
        let json = serde_json::to_vec_pretty(&self.documents().await)?;

        let path = self.config.registry_path();
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

async fn load_registry(path: &Path) -> Result<HashMap<String, Document>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };
    let docs: Vec<Document> = serde_json::from_slice(&bytes)
        .map_err(|e| RagError::IndexCorruption(format!("{}: {}", path.display(), e)))?;
    Ok(docs.into_iter().map(|d| (d.id.clone(), d)).collect())
}
