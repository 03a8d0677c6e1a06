//! OCR collaborator.
//!
//! Defines the [`OcrEngine`] trait the extractor and the query pipeline use
//! to turn image bytes into text, plus two implementations:
//! - **[`TesseractOcr`]** pipes the image through the `tesseract` CLI
//!   (`tesseract stdin stdout -l <lang>`).
//! - **[`DisabledOcr`]** always fails with [`RagError::OcrUnavailable`].

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::OcrConfig;
use crate::error::{RagError, Result};

#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Recognize text in an encoded image (JPEG, PNG, TIFF, PNM, ...).
    async fn recognize(&self, image: &[u8]) -> Result<String>;
}

// ============ Disabled ============

pub struct DisabledOcr;

#[async_trait]
impl OcrEngine for DisabledOcr {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn recognize(&self, _image: &[u8]) -> Result<String> {
        Err(RagError::OcrUnavailable(
            "OCR provider is disabled".to_string(),
        ))
    }
}

// ============ Tesseract ============

pub struct TesseractOcr {
    command: String,
    language: String,
}

impl TesseractOcr {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            command: config.command.clone(),
            language: config.language.clone(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, image: &[u8]) -> Result<String> {
        let mut child = Command::new(&self.command)
            .args(["stdin", "stdout", "-l", &self.language])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RagError::OcrUnavailable(format!(
                        "'{}' not found on PATH (install tesseract-ocr)",
                        self.command
                    ))
                } else {
                    RagError::OcrUnavailable(format!("failed to start '{}': {}", self.command, e))
                }
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RagError::extraction("tesseract stdin unavailable"))?;
        let payload = image.to_vec();
        let writer = tokio::spawn(async move {
            let res = stdin.write_all(&payload).await;
            drop(stdin);
            res
        });

        let output = child.wait_with_output().await?;
        // A write error after tesseract exited on its own is reported via the exit status.
        let _ = writer.await;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RagError::extraction(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(chars = text.len(), "tesseract recognized text");
        Ok(text)
    }
}

/// Create the [`OcrEngine`] named by `ocr.provider`.
pub fn create_ocr(config: &OcrConfig) -> Result<Arc<dyn OcrEngine>> {
    match config.provider.as_str() {
        "tesseract" => Ok(Arc::new(TesseractOcr::new(config))),
        "disabled" => Ok(Arc::new(DisabledOcr)),
        other => Err(RagError::config(format!("Unknown OCR provider: {}", other))),
    }
}
