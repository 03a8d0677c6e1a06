//! Answer generation backends.
//!
//! | `generation.provider` | Backend |
//! |-----------------------|---------|
//! | `gemini` | [`GeminiGenerator`], REST `generateContent`, key from `GEMINI_API_KEY` |
//! | `ollama` | [`OllamaGenerator`], `POST /api/generate` |
//! | `disabled` | [`DisabledGenerator`], always fails |
//!
//! Remote calls retry with the same backoff as the embedding backends.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GenerationConfig;
use crate::error::{RagError, Result};
use crate::http;
use crate::prompt;

/// Returned when the service answers without any text.
pub const EMPTY_ANSWER: &str =
    "I could not generate an answer. Please try rephrasing your question.";

/// Everything a generator sees for one question.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub question: String,
    /// Context texts in rank order; may be empty.
    pub blocks: Vec<String>,
    pub image_text: Option<String>,
}

impl GenerationRequest {
    pub fn prompt(&self) -> String {
        prompt::build_prompt(&self.question, &self.blocks, self.image_text.as_deref())
    }
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn AnswerGenerator>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        other => Err(RagError::config(format!(
            "Unknown generation provider: {}",
            other
        ))),
    }
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl AnswerGenerator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        Err(RagError::generation("Answer generation is disabled"))
    }
}

// ============ Gemini ============

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

/// Google Gemini via the Generative Language REST API.
///
/// The API key is read at generation time, so a corpus without one can
/// still ingest and retrieve.
pub struct GeminiGenerator {
    model: String,
    endpoint: String,
    temperature: f32,
    max_output_tokens: u32,
    max_retries: u32,
    client: reqwest::Client,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());
        Ok(Self {
            endpoint: format!(
                "{}/models/{}:generateContent",
                base.trim_end_matches('/'),
                config.model
            ),
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs).map_err(RagError::config)?,
        })
    }
}

fn parse_gemini_response(json: serde_json::Value) -> Result<String> {
    let response: GenerateResponse = serde_json::from_value(json)
        .map_err(|e| RagError::generation(format!("Failed to parse Gemini response: {}", e)))?;
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();
    let text = text.trim();
    Ok(if text.is_empty() {
        EMPTY_ANSWER.to_string()
    } else {
        text.to_string()
    })
}

#[async_trait]
impl AnswerGenerator for GeminiGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| RagError::generation("GEMINI_API_KEY is not configured"))?;

        let body = GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: request.prompt(),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        };
        debug!(model = %self.model, blocks = request.blocks.len(), "requesting answer");

        let json = http::send_json_with_retry(
            || {
                self.client
                    .post(&self.endpoint)
                    .header("x-goog-api-key", &api_key)
                    .json(&body)
            },
            self.max_retries,
            "Gemini",
        )
        .await
        .map_err(RagError::generation)?;

        parse_gemini_response(json)
    }
}

// ============ Ollama ============

pub struct OllamaGenerator {
    model: String,
    url: String,
    temperature: f32,
    max_output_tokens: u32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs).map_err(RagError::config)?,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OllamaGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": request.prompt(),
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_output_tokens,
            },
        });
        let endpoint = format!("{}/api/generate", self.url.trim_end_matches('/'));

        let json = http::send_json_with_retry(
            || self.client.post(&endpoint).json(&body),
            self.max_retries,
            "Ollama",
        )
        .await
        .map_err(RagError::generation)?;

        let text = json
            .get("response")
            .and_then(|r| r.as_str())
            .ok_or_else(|| RagError::generation("Invalid Ollama response: missing response"))?
            .trim();
        Ok(if text.is_empty() {
            EMPTY_ANSWER.to_string()
        } else {
            text.to_string()
        })
    }
}
