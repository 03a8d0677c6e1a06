//! Ingestion and query over a [`Corpus`](crate::corpus::Corpus).
//!
//! ```text
//! ingest:  bytes → detect format → extract → chunk → embed (one batch) → index (one batch) → indexed
//! query:   question (+ image OCR) → embed → search top-k → fit context budget → generate → answer + citations
//! ```
//!
//! A failure at any ingestion stage marks the document failed and removes
//! whatever vectors it had written. A generation failure at query time
//! carries the retrieved context so generation can be retried alone with
//! [`Corpus::generate_answer`](crate::corpus::Corpus::generate_answer).

mod ingest;
mod query;

pub use ingest::{fetch_url, IngestItem};
pub use query::{decode_image_input, QueryRequest};
