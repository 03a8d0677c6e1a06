//! TOML configuration.
//!
//! Only `[data]` is required; every other section falls back to defaults.
//! See [`load_config`] for the validation rules.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub data: DataConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    /// Directory holding the document registry and index files.
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    75
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Upper bound on context tokens handed to the generator.
    #[serde(default = "default_context_budget")]
    pub context_budget_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            context_budget_tokens: default_context_budget(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_context_budget() -> usize {
    3000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_embedding_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `memory` (HNSW graph with a JSON snapshot) or `sqlite`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_hnsw_m")]
    pub hnsw_m: usize,
    #[serde(default = "default_hnsw_ef")]
    pub hnsw_ef_construction: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            hnsw_m: default_hnsw_m(),
            hnsw_ef_construction: default_hnsw_ef(),
        }
    }
}

fn default_backend() -> String {
    "memory".to_string()
}
fn default_hnsw_m() -> usize {
    16
}
fn default_hnsw_ef() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// A PDF strategy whose trimmed output has fewer characters than this
    /// counts as having found nothing.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    /// Row-excerpt cap per CSV file; row cap per SQLite table.
    #[serde(default = "default_max_table_rows")]
    pub max_table_rows: usize,
    /// Plain-text decoders, tried in order.
    #[serde(default = "default_encodings")]
    pub encodings: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_text_chars: default_min_text_chars(),
            max_table_rows: default_max_table_rows(),
            encodings: default_encodings(),
        }
    }
}

fn default_min_text_chars() -> usize {
    20
}
fn default_max_table_rows() -> usize {
    100
}
fn default_encodings() -> Vec<String> {
    vec![
        "utf-8".to_string(),
        "utf-16".to_string(),
        "windows-1252".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default = "default_ocr_provider")]
    pub provider: String,
    #[serde(default = "default_ocr_command")]
    pub command: String,
    #[serde(default = "default_ocr_language")]
    pub language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            provider: default_ocr_provider(),
            command: default_ocr_command(),
            language: default_ocr_language(),
        }
    }
}

fn default_ocr_provider() -> String {
    "tesseract".to_string()
}
fn default_ocr_command() -> String {
    "tesseract".to_string()
}
fn default_ocr_language() -> String {
    "eng".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout(),
            url: None,
        }
    }
}

fn default_generation_provider() -> String {
    "gemini".to_string()
}
fn default_generation_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_output_tokens() -> u32 {
    2048
}
fn default_generation_timeout() -> u64 {
    60
}

/// Names accepted in `extraction.encodings`.
pub const SUPPORTED_ENCODINGS: &[&str] = &["utf-8", "utf-16", "windows-1252", "latin-1"];

impl Config {
    /// Defaults everywhere, rooted at `dir`.
    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            data: DataConfig { dir: dir.into() },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            extraction: ExtractionConfig::default(),
            ocr: OcrConfig::default(),
            generation: GenerationConfig::default(),
        }
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data.dir.join("documents.json")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data.dir.join("index.json")
    }

    pub fn sqlite_index_path(&self) -> PathBuf {
        self.data.dir.join("index.sqlite")
    }

    pub fn validate(&self) -> Result<()> {
        // Validate chunking
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.overlap_tokens >= self.chunking.chunk_size {
            bail!(
                "chunking.overlap_tokens ({}) must be < chunking.chunk_size ({})",
                self.chunking.overlap_tokens,
                self.chunking.chunk_size
            );
        }

        // Validate retrieval
        if self.retrieval.top_k < 1 {
            bail!("retrieval.top_k must be >= 1");
        }
        if self.retrieval.context_budget_tokens == 0 {
            bail!("retrieval.context_budget_tokens must be > 0");
        }

        // Validate embedding
        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" | "local" | "hash" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, local, or hash.",
                other
            ),
        }
        if self.embedding.is_enabled() && self.embedding.dims == 0 {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                self.embedding.provider
            );
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }

        // Validate index
        match self.index.backend.as_str() {
            "memory" | "sqlite" => {}
            other => bail!(
                "Unknown index backend: '{}'. Must be memory or sqlite.",
                other
            ),
        }
        if self.index.hnsw_m < 2 {
            bail!("index.hnsw_m must be >= 2");
        }

        // Validate extraction
        if self.extraction.encodings.is_empty() {
            bail!("extraction.encodings must list at least one encoding");
        }
        for enc in &self.extraction.encodings {
            if !SUPPORTED_ENCODINGS.contains(&enc.to_ascii_lowercase().as_str()) {
                bail!(
                    "Unknown encoding '{}' in extraction.encodings. Supported: {}",
                    enc,
                    SUPPORTED_ENCODINGS.join(", ")
                );
            }
        }

        match self.ocr.provider.as_str() {
            "tesseract" | "disabled" => {}
            other => bail!(
                "Unknown OCR provider: '{}'. Must be tesseract or disabled.",
                other
            ),
        }

        match self.generation.provider.as_str() {
            "gemini" | "ollama" | "disabled" => {}
            other => bail!(
                "Unknown generation provider: '{}'. Must be gemini, ollama, or disabled.",
                other
            ),
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            bail!("generation.temperature must be in [0.0, 2.0]");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
