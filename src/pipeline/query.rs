use base64::Engine;
use tracing::{debug, info, warn};

use crate::corpus::Corpus;
use crate::error::{RagError, Result};
use crate::generation::GenerationRequest;
use crate::models::{ContextBlock, DocumentStatus, QueryAnswer, RetrievedContext, SourceCitation};

#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub question: String,
    /// Raw image bytes; the recognized text joins the query.
    pub image: Option<Vec<u8>>,
    /// Result count; defaults to `retrieval.top_k`.
    pub k: Option<usize>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }
}

/// Decode an image passed as base64, optionally as a `data:` URL.
pub fn decode_image_input(input: &str) -> Result<Vec<u8>> {
    let input = input.trim();
    let payload = match input.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(";base64,")
            .map(|(_, data)| data)
            .ok_or_else(|| RagError::InvalidRequest("data URL is not base64 encoded".to_string()))?,
        None => input,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| RagError::InvalidRequest(format!("invalid base64 image: {}", e)))
}

fn tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

impl Corpus {
    /// Answer `request` from the corpus.
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryAnswer> {
        let retrieved = self.retrieve(request).await?;
        self.generate_answer(&retrieved).await
    }

    /// The retrieval half of [`query`](Self::query): OCR, embed, search and
    /// fit the context budget.
    pub async fn retrieve(&self, request: &QueryRequest) -> Result<RetrievedContext> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidRequest("question is empty".to_string()));
        }
        let k = request.k.unwrap_or(self.config.retrieval.top_k);
        if k == 0 {
            return Err(RagError::InvalidRequest("k must be at least 1".to_string()));
        }

        // Image OCR is best effort; the question alone is still answerable.
        let ocr_text = match &request.image {
            Some(image) => match self.extractor.ocr().recognize(image).await {
                Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
                Ok(_) => None,
                Err(e) => {
                    warn!("query image OCR failed: {}", e);
                    None
                }
            },
            None => None,
        };

        let query_text = match &ocr_text {
            Some(ocr) => format!("{}\n\nAdditional context from image:\n{}", question, ocr),
            None => question.to_string(),
        };
        let vector = self.embedder.embed_query(&query_text).await?;

        // Vectors of documents still ingesting or mid-delete are skipped, so
        // widen the search until k visible hits are found or the index runs out.
        let mut fetch = k;
        let visible = loop {
            let hits = self.index.search(&vector, fetch).await?;
            let exhausted = hits.len() < fetch;
            let visible: Vec<_> = {
                let docs = self.documents.read().await;
                hits.into_iter()
                    .filter(|h| {
                        docs.get(&h.metadata.document_id)
                            .is_some_and(|d| d.status == DocumentStatus::Indexed)
                    })
                    .collect()
            };
            if visible.len() >= k || exhausted {
                break visible.into_iter().take(k).collect::<Vec<_>>();
            }
            fetch = fetch.saturating_mul(2);
        };

        // Hits arrive best first; the lowest-ranked are dropped to fit.
        let budget = self.config.retrieval.context_budget_tokens;
        let mut used = 0;
        let mut blocks = Vec::new();
        for hit in visible {
            let cost = tokens(&hit.metadata.text);
            if !blocks.is_empty() && used + cost > budget {
                break;
            }
            used += cost;
            blocks.push(ContextBlock {
                citation: SourceCitation::from_hit(&hit.metadata, hit.score),
                text: hit.metadata.text,
            });
        }
        debug!(k, blocks = blocks.len(), tokens = used, "context assembled");

        Ok(RetrievedContext {
            question: question.to_string(),
            ocr_text,
            blocks,
        })
    }

    /// The generation half of [`query`](Self::query). A failure carries
    /// `retrieved`, so calling this again does not repeat retrieval.
    pub async fn generate_answer(&self, retrieved: &RetrievedContext) -> Result<QueryAnswer> {
        let request = GenerationRequest {
            question: retrieved.question.clone(),
            blocks: retrieved.blocks.iter().map(|b| b.text.clone()).collect(),
            image_text: retrieved.ocr_text.clone(),
        };

        let answer = match self.generator.generate(&request).await {
            Ok(answer) => answer,
            Err(RagError::Generation { message, .. }) => {
                return Err(RagError::Generation {
                    message,
                    retrieved: Some(Box::new(retrieved.clone())),
                })
            }
            Err(e) => return Err(e),
        };

        info!(
            citations = retrieved.blocks.len(),
            grounded = !retrieved.blocks.is_empty(),
            "answer generated"
        );
        Ok(QueryAnswer {
            answer,
            citations: retrieved.citations(),
            ocr_text: retrieved.ocr_text.clone(),
            grounded: !retrieved.blocks.is_empty(),
        })
    }
}
