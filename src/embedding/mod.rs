//! Embedding backends and the shared, lazily initialized [`Embedder`].
//!
//! Defines the [`EmbeddingBackend`] trait and concrete implementations:
//! - **[`LocalEmbedder`]** runs models locally via fastembed; no network calls after model download.
//! - **[`OpenAIEmbedder`]** calls the OpenAI embeddings API with retry and backoff.
//! - **[`OllamaEmbedder`]** calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`HashEmbedder`]** deterministic feature hashing; needs no model, for offline setups and tests.
//!
//! Callers never touch a backend directly. [`Embedder`] builds it on first
//! use (concurrent first callers wait on one initialization), splits large
//! batches, checks dimensionality, and L2-normalizes every vector so that
//! inner product equals cosine similarity.
//!
//! Also provides vector utilities:
//! - [`cosine_similarity`]: compute similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`

mod hash;
#[cfg(feature = "local-embeddings-fastembed")]
mod local;
mod remote;

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::info;

pub use hash::HashEmbedder;
#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;
pub use remote::{OllamaEmbedder, OpenAIEmbedder};

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};

/// A model that maps text to vectors.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed one batch, in input order. Vectors need not be normalized.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Builds a backend. Runs once, on the blocking pool.
pub type BackendLoader =
    Arc<dyn Fn(&EmbeddingConfig) -> Result<Arc<dyn EmbeddingBackend>> + Send + Sync>;

/// The process's embedding model.
pub struct Embedder {
    config: EmbeddingConfig,
    loader: BackendLoader,
    backend: OnceCell<Arc<dyn EmbeddingBackend>>,
}

static SHARED: OnceLock<Arc<Embedder>> = OnceLock::new();

impl Embedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self::with_loader(config, Arc::new(create_backend))
    }

    pub fn with_loader(config: EmbeddingConfig, loader: BackendLoader) -> Self {
        Self {
            config,
            loader,
            backend: OnceCell::new(),
        }
    }

    /// The process-wide embedder. The first call fixes the model; a later
    /// call with a different model or dimension is refused.
    pub fn shared(config: &EmbeddingConfig) -> Result<Arc<Embedder>> {
        let shared = SHARED.get_or_init(|| Arc::new(Embedder::new(config.clone())));
        if shared.config.provider != config.provider
            || shared.config.model != config.model
            || shared.config.dims != config.dims
        {
            return Err(RagError::ModelMismatch {
                index: shared.config.model.clone(),
                configured: config.model.clone(),
            });
        }
        Ok(shared.clone())
    }

    pub fn model_name(&self) -> &str {
        &self.config.model
    }

    pub fn dims(&self) -> usize {
        self.config.dims
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.initialized()
    }

    async fn backend(&self) -> Result<&Arc<dyn EmbeddingBackend>> {
        self.backend
            .get_or_try_init(|| async {
                let loader = self.loader.clone();
                let config = self.config.clone();
                let backend = tokio::task::spawn_blocking(move || loader(&config))
                    .await
                    .map_err(|e| RagError::ModelInit(e.to_string()))??;

                if backend.dims() != self.config.dims {
                    return Err(RagError::DimensionMismatch {
                        expected: self.config.dims,
                        got: backend.dims(),
                    });
                }
                info!(
                    provider = %self.config.provider,
                    model = backend.model_name(),
                    dims = backend.dims(),
                    "embedding model initialized"
                );
                Ok(backend)
            })
            .await
    }

    /// Embed `texts`, preserving order. Batches above `embedding.batch_size`
    /// are split and sent one after another.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let backend = self.backend().await?;
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let vectors = backend.embed_batch(batch).await?;
            if vectors.len() != batch.len() {
                return Err(RagError::embedding(format!(
                    "backend returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                )));
            }
            for mut v in vectors {
                if v.len() != self.config.dims {
                    return Err(RagError::DimensionMismatch {
                        expected: self.config.dims,
                        got: v.len(),
                    });
                }
                l2_normalize(&mut v);
                out.push(v);
            }
        }

        Ok(out)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::embedding("Empty embedding response"))
    }
}

/// Create the [`EmbeddingBackend`] named by `embedding.provider`.
///
/// | Config Value | Backend |
/// |-------------|----------|
/// | `"local"` | [`LocalEmbedder`] (feature `local-embeddings-fastembed`) |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"hash"` | [`HashEmbedder`] |
/// | `"disabled"` | error |
pub fn create_backend(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingBackend>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(&config.model, config.dims))),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(RagError::ModelInit(
            "Local embedding provider requires --features local-embeddings-fastembed".to_string(),
        )),
        "disabled" => Err(RagError::ModelInit(
            "Embedding provider is disabled".to_string(),
        )),
        other => Err(RagError::config(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Scale `v` to unit length in place. Zero vectors are left as is.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use lumina_rag::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}
