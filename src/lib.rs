//! # Lumina
//!
//! Local document question answering: upload PDFs, Word files, text, images,
//! spreadsheets-as-CSV and SQLite databases, then ask questions answered from
//! their content with citations.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────┐   ┌──────────┐   ┌──────────────┐
//! │ Extractor │──▶│ Chunker │──▶│ Embedder │──▶│ Vector Index │
//! │ + OCR     │   │         │   │ (shared) │   │ HNSW/SQLite  │
//! └───────────┘   └─────────┘   └──────────┘   └──────┬───────┘
//!                                                     │ top-k
//!                      ┌──────────┐            ┌──────▼───────┐
//!                      │ Answer + │◀───────────│  Generation  │
//!                      │ sources  │            │ Gemini/Ollama│
//!                      └──────────┘            └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lumina init
//! lumina ingest ./reports ./exports/sales.csv
//! lumina ask "What was the total revenue in Q3?"
//! lumina ask "What does this invoice say?" --image ./invoice.png
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Documents, chunks, citations, answers |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | Multi-format text extraction |
//! | [`ocr`] | OCR engines |
//! | [`chunk`] | Sentence-aware chunking |
//! | [`embedding`] | Embedding backends and the shared embedder |
//! | [`index`] | Vector index backends |
//! | [`generation`] | Answer generation backends |
//! | [`prompt`] | Prompt assembly |
//! | [`corpus`] | Document registry and index lifecycle |
//! | [`pipeline`] | Ingestion and query |
//! | [`commands`] | CLI subcommands |
//! | [`stats`] | Corpus statistics |
//! | [`db`] | SQLite connections |
//! | [`migrate`] | SQLite index schema |

pub mod chunk;
pub mod commands;
pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
mod http;
pub mod index;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod prompt;
pub mod stats;

pub use corpus::{Corpus, CorpusStats};
pub use error::{ErrorKind, RagError, Result};
