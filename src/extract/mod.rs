//! Multi-format text extraction.
//!
//! [`Extractor::extract`] turns raw document bytes into UTF-8 text plus, for
//! tabular formats, per-row excerpts.
//!
//! | Format | Method |
//! |--------|--------|
//! | PDF | [`PDF_STRATEGIES`] in order: pdf-extract, content-stream operators, OCR of page images |
//! | DOCX | paragraphs in document order, then table rows (`cell | cell`) |
//! | Plain text | first decoder in `extraction.encodings` that accepts the bytes |
//! | Image | OCR |
//! | CSV | header line, then one `field: value; ...` paragraph per row |
//! | SQLite | per table: `[Table: name]`, `Columns: ...`, then one paragraph per row |
//!
//! Blocks are separated by blank lines, so each paragraph or row always ends
//! a sentence for the chunker. CPU-bound parsing runs on the blocking pool.

mod docx;
mod pdf;
mod tabular;
mod text;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

pub use pdf::{PdfStrategy, PDF_STRATEGIES};
pub use text::decode_text;

use crate::config::ExtractionConfig;
use crate::error::{RagError, Result};
use crate::models::{DocumentFormat, ExtractedText, TableRowExcerpt};
use crate::ocr::OcrEngine;

/// Accumulates blank-line separated blocks while tracking character offsets
/// for row excerpts.
#[derive(Default)]
pub(crate) struct TextBuilder {
    text: String,
    chars: usize,
    excerpts: Vec<TableRowExcerpt>,
}

impl TextBuilder {
    /// Append a block and return its character span.
    pub(crate) fn push_block(&mut self, block: &str) -> (usize, usize) {
        if !self.text.is_empty() {
            self.text.push_str("\n\n");
            self.chars += 2;
        }
        let start = self.chars;
        self.text.push_str(block);
        self.chars += block.chars().count();
        (start, self.chars)
    }

    pub(crate) fn push_row(&mut self, table: &str, row: usize, block: &str) {
        let (char_start, char_end) = self.push_block(block);
        self.excerpts.push(TableRowExcerpt {
            table: table.to_string(),
            row,
            text: block.to_string(),
            char_start,
            char_end,
        });
    }

    pub(crate) fn finish(self) -> ExtractedText {
        ExtractedText {
            text: self.text,
            excerpts: self.excerpts,
        }
    }
}

pub struct Extractor {
    config: ExtractionConfig,
    ocr: Arc<dyn OcrEngine>,
}

impl Extractor {
    pub fn new(config: ExtractionConfig, ocr: Arc<dyn OcrEngine>) -> Self {
        Self { config, ocr }
    }

    pub fn ocr(&self) -> &Arc<dyn OcrEngine> {
        &self.ocr
    }

    /// Whether a PDF strategy found enough text to stop the chain.
    pub fn is_sufficient(&self, text: &str) -> bool {
        text.trim().chars().count() >= self.config.min_text_chars
    }

    /// Extract text from `bytes` of the given format. `filename` labels CSV
    /// row excerpts and error messages.
    pub async fn extract(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        format: DocumentFormat,
    ) -> Result<ExtractedText> {
        debug!(filename, %format, bytes = bytes.len(), "extracting");
        match format {
            DocumentFormat::Pdf => self.extract_pdf(Arc::new(bytes)).await.map(ExtractedText::plain),
            DocumentFormat::Docx => {
                let blocks = blocking(move || docx::extract_docx(&bytes)).await?;
                let mut out = TextBuilder::default();
                for block in &blocks {
                    out.push_block(block);
                }
                Ok(out.finish())
            }
            DocumentFormat::PlainText => {
                let encodings = self.config.encodings.clone();
                let text = blocking(move || decode_text(&bytes, &encodings)).await?;
                Ok(ExtractedText::plain(text))
            }
            DocumentFormat::Image => {
                let text = self.ocr.recognize(&bytes).await?;
                Ok(ExtractedText::plain(text))
            }
            DocumentFormat::Csv => {
                let encodings = self.config.encodings.clone();
                let max_rows = self.config.max_table_rows;
                let table = Path::new(filename)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(filename)
                    .to_string();
                blocking(move || {
                    let text = decode_text(&bytes, &encodings)?;
                    tabular::extract_csv(&text, &table, max_rows)
                })
                .await
            }
            DocumentFormat::Sqlite => {
                tabular::extract_sqlite(&bytes, self.config.max_table_rows).await
            }
        }
    }

    async fn extract_pdf(&self, bytes: Arc<Vec<u8>>) -> Result<String> {
        let mut last_err = None;
        let mut best_len = 0;

        for strategy in PDF_STRATEGIES {
            let attempt = match strategy {
                PdfStrategy::Structured => {
                    let bytes = bytes.clone();
                    blocking(move || pdf::extract_structured(&bytes)).await
                }
                PdfStrategy::ContentStream => {
                    let bytes = bytes.clone();
                    blocking(move || pdf::extract_content_streams(&bytes)).await
                }
                PdfStrategy::Ocr => self.ocr_pages(bytes.clone()).await,
            };

            match attempt {
                Ok(text) if self.is_sufficient(&text) => {
                    debug!(strategy = strategy.as_str(), chars = text.len(), "PDF strategy succeeded");
                    return Ok(text);
                }
                Ok(text) => {
                    debug!(
                        strategy = strategy.as_str(),
                        chars = text.trim().len(),
                        "PDF strategy produced insufficient text"
                    );
                    best_len = best_len.max(text.trim().chars().count());
                }
                Err(e) => {
                    warn!(strategy = strategy.as_str(), "PDF strategy failed: {}", e);
                    last_err = Some(e);
                }
            }
        }

        // OCR is the last stage; its failure is the most informative cause.
        match last_err {
            Some(e @ RagError::OcrUnavailable(_)) => Err(e),
            Some(e) if best_len == 0 => Err(e),
            _ => Err(RagError::extraction(format!(
                "PDF has no extractable text ({} characters found, {} required)",
                best_len, self.config.min_text_chars
            ))),
        }
    }

    /// OCR every page image, concatenated in page order.
    async fn ocr_pages(&self, bytes: Arc<Vec<u8>>) -> Result<String> {
        let images = blocking(move || pdf::page_images(&bytes)).await?;
        if images.is_empty() {
            debug!("PDF has no decodable page images for OCR");
            return Ok(String::new());
        }

        let mut pages: Vec<String> = Vec::new();
        for image in images {
            let text = self.ocr.recognize(&image.bytes).await?;
            let text = text.trim();
            if !text.is_empty() {
                pages.push(format!("[Page {} - OCR]\n{}", image.page, text));
            }
        }
        Ok(pages.join("\n\n"))
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RagError::extraction(format!("extraction task failed: {}", e)))?
}
