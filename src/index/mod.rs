//! Vector storage and similarity search.
//!
//! Two [`VectorIndex`] backends share one contract:
//!
//! | `index.backend` | Type | Storage |
//! |-----------------|------|---------|
//! | `memory` | [`MemoryIndex`] | HNSW graph in memory, JSON snapshot `index.json` |
//! | `sqlite` | [`SqliteIndex`] | `index.sqlite`, exhaustive cosine scan |
//!
//! Every vector is stored with its [`ChunkMetadata`] and belongs to one
//! document. Both backends record the embedding model and dimension they
//! were built with and refuse to open under a different one.

mod hnsw;
mod memory;
mod sqlite;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use hnsw::Hnsw;
pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;

use crate::config::Config;
use crate::error::{RagError, Result};
use crate::models::ChunkMetadata;

/// The model an index was built with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub model: String,
    pub dims: usize,
}

impl IndexSpec {
    pub fn new(model: impl Into<String>, dims: usize) -> Self {
        Self {
            model: model.into(),
            dims,
        }
    }

    /// Compare a persisted header against this spec.
    pub fn check(&self, stored: &IndexSpec) -> Result<()> {
        if stored.model != self.model {
            return Err(RagError::ModelMismatch {
                index: stored.model.clone(),
                configured: self.model.clone(),
            });
        }
        if stored.dims != self.dims {
            return Err(RagError::DimensionMismatch {
                expected: self.dims,
                got: stored.dims,
            });
        }
        Ok(())
    }

    pub fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dims {
            return Err(RagError::DimensionMismatch {
                expected: self.dims,
                got: vector.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk_id: String,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// Storage and nearest-neighbor search over chunk vectors.
///
/// Writes are all-or-nothing per call. An entry whose `chunk_id` already
/// exists replaces it. Search results are sorted by descending score.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn backend_name(&self) -> &'static str;

    fn spec(&self) -> &IndexSpec;

    async fn add(&self, entry: IndexEntry) -> Result<()> {
        self.add_batch(vec![entry]).await
    }

    /// Validates every entry before storing any.
    async fn add_batch(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Up to `k` hits. An empty index yields an empty list.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    /// Remove every vector of `document_id`; returns how many were removed.
    async fn delete_document(&self, document_id: &str) -> Result<usize>;

    async fn clear(&self) -> Result<()>;

    /// Flush to durable storage.
    async fn persist(&self) -> Result<()>;

    /// Load persisted state, dropping vectors whose document is not in
    /// `tracked`. Returns the number dropped.
    async fn load(&self, tracked: &HashSet<String>) -> Result<usize>;

    async fn len(&self) -> Result<usize>;

    /// Vector count per document id.
    async fn document_vector_counts(&self) -> Result<HashMap<String, usize>>;
}

/// Open the backend named by `index.backend` for the configured model.
pub async fn create_index(config: &Config) -> Result<Arc<dyn VectorIndex>> {
    let spec = IndexSpec::new(config.embedding.model.clone(), config.embedding.dims);
    match config.index.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryIndex::new(
            spec,
            config.snapshot_path(),
            config.index.hnsw_m,
            config.index.hnsw_ef_construction,
        ))),
        "sqlite" => Ok(Arc::new(
            SqliteIndex::open(&config.sqlite_index_path(), spec).await?,
        )),
        other => Err(RagError::config(format!("Unknown index backend: {}", other))),
    }
}

/// Sort hits best first; equal scores fall back to chunk id.
pub(crate) fn rank(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}
