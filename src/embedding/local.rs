//! Local inference via fastembed (ONNX Runtime bundled). The model is
//! downloaded on first use and cached by fastembed.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::EmbeddingBackend;
use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};

pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<Mutex<fastembed::TextEmbedding>>,
}

impl LocalEmbedder {
    /// Loads the model. Blocking; [`Embedder`](super::Embedder) calls this on
    /// the blocking pool.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let expected = native_dims(&config.model)?;
        if expected != config.dims {
            return Err(RagError::DimensionMismatch {
                expected: config.dims,
                got: expected,
            });
        }

        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(config_to_fastembed_model(&config.model)?)
                .with_show_download_progress(false),
        )
        .map_err(|e| {
            RagError::ModelInit(format!("Failed to initialize local embedding model: {}", e))
        })?;

        Ok(Self {
            model_name: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size,
            model: Arc::new(Mutex::new(model)),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| RagError::embedding("local embedding model lock poisoned"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| RagError::embedding(format!("Local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| RagError::embedding(format!("Local embedding task failed: {}", e)))?
    }
}

fn native_dims(name: &str) -> Result<usize> {
    Ok(match name {
        "all-minilm-l6-v2" | "bge-small-en-v1.5" | "multilingual-e5-small" => 384,
        "bge-base-en-v1.5"
        | "nomic-embed-text-v1"
        | "nomic-embed-text-v1.5"
        | "multilingual-e5-base" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
        other => return Err(unknown_model(other)),
    })
}

fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => Err(unknown_model(other)),
    }
}

fn unknown_model(name: &str) -> RagError {
    RagError::ModelInit(format!(
        "Unknown local embedding model: '{}'. Supported models: \
         all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
         nomic-embed-text-v1, nomic-embed-text-v1.5, \
         multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
        name
    ))
}
