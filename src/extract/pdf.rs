//! PDF text strategies and page-image discovery.
//!
//! Each strategy is a plain function from bytes to text; the ordering and
//! the sufficiency check between them live in [`super::Extractor`].

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use crate::error::{RagError, Result};

/// PDF extraction strategies, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfStrategy {
    /// Layout-aware text extraction (pdf-extract).
    Structured,
    /// Text-showing operators read straight from each page's content stream.
    ContentStream,
    /// Every page image routed through the OCR collaborator.
    Ocr,
}

pub const PDF_STRATEGIES: [PdfStrategy; 3] = [
    PdfStrategy::Structured,
    PdfStrategy::ContentStream,
    PdfStrategy::Ocr,
];

impl PdfStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PdfStrategy::Structured => "structured",
            PdfStrategy::ContentStream => "content-stream",
            PdfStrategy::Ocr => "ocr",
        }
    }
}

/// An image found on a page, encoded so an OCR engine can read it.
pub struct PageImage {
    pub page: u32,
    pub bytes: Vec<u8>,
}

pub fn extract_structured(bytes: &[u8]) -> Result<String> {
    // pdf-extract panics on some malformed inputs.
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(RagError::extraction(format!("PDF extraction failed: {}", e))),
        Err(_) => Err(RagError::extraction("PDF extraction panicked")),
    }
}

fn load(bytes: &[u8]) -> Result<Document> {
    Document::load_mem(bytes).map_err(|e| RagError::extraction(format!("Failed to load PDF: {}", e)))
}

/// Concatenate the strings shown by `Tj`, `TJ`, `'` and `"` on every page,
/// tagging each page that yields text with `[Page N]`.
pub fn extract_content_streams(bytes: &[u8]) -> Result<String> {
    let doc = load(bytes)?;
    let mut pages_text = Vec::new();

    for (page_num, page_id) in doc.get_pages() {
        let content = match doc.get_page_content(page_id) {
            Ok(content) => content,
            Err(e) => {
                debug!("Could not get content for page {}: {}", page_num, e);
                continue;
            }
        };
        let ops = match Content::decode(&content) {
            Ok(ops) => ops,
            Err(e) => {
                debug!("Could not decode content stream for page {}: {}", page_num, e);
                continue;
            }
        };

        let mut text = String::new();
        for op in &ops.operations {
            match op.operator.as_str() {
                "Tj" | "'" | "\"" => {
                    if let Some(Object::String(s, _)) = op.operands.last() {
                        text.push_str(&decode_pdf_string(s));
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = op.operands.first() {
                        for item in items {
                            match item {
                                Object::String(s, _) => text.push_str(&decode_pdf_string(s)),
                                // Large negative kerning renders as a word gap.
                                Object::Integer(n) if *n < -200 => text.push(' '),
                                Object::Real(n) if *n < -200.0 => text.push(' '),
                                _ => {}
                            }
                        }
                    }
                }
                "T*" | "Td" | "TD" | "Tm" | "ET" => text.push(' '),
                _ => {}
            }
        }

        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !normalized.is_empty() {
            pages_text.push(format!("[Page {}]\n{}", page_num, normalized));
        }
    }

    Ok(pages_text.join("\n\n"))
}

/// PDF text strings are PDFDocEncoding (close to Latin-1) unless they carry
/// a UTF-16BE byte order mark.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if let [0xFE, 0xFF, rest @ ..] = bytes {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|p| u16::from_be_bytes([p[0], p[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}

/// Images placed on each page, in page order, ready for OCR.
///
/// JPEG (`DCTDecode`) and JPEG 2000 (`JPXDecode`) streams are passed through
/// as is. Raw or Flate-compressed 8-bit gray and RGB samples are wrapped as
/// PGM/PPM. Other encodings are skipped.
pub fn page_images(bytes: &[u8]) -> Result<Vec<PageImage>> {
    let doc = load(bytes)?;
    let mut images = Vec::new();

    for (page_num, page_id) in doc.get_pages() {
        for stream in page_image_streams(&doc, page_id) {
            match encode_image(stream) {
                Some(bytes) => images.push(PageImage {
                    page: page_num,
                    bytes,
                }),
                None => debug!("Skipping undecodable image on page {}", page_num),
            }
        }
    }

    Ok(images)
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match obj {
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        other => other.as_dict().ok(),
    }
}

/// Image XObjects from the page's resources, inherited from ancestor
/// `Pages` nodes when the page has none of its own.
fn page_image_streams(doc: &Document, page_id: ObjectId) -> Vec<&Stream> {
    let mut node = doc.get_dictionary(page_id).ok();
    while let Some(dict) = node {
        if let Some(resources) = dict.get(b"Resources").ok().and_then(|r| resolve_dict(doc, r)) {
            let Some(xobjects) = resources
                .get(b"XObject")
                .ok()
                .and_then(|x| resolve_dict(doc, x))
            else {
                return Vec::new();
            };
            return xobjects
                .iter()
                .filter_map(|(_, obj)| match obj {
                    Object::Reference(id) => doc.get_object(*id).ok()?.as_stream().ok(),
                    Object::Stream(s) => Some(s),
                    _ => None,
                })
                .filter(|s| {
                    s.dict
                        .get(b"Subtype")
                        .and_then(Object::as_name)
                        .map(|n| n == &b"Image"[..])
                        .unwrap_or(false)
                })
                .collect();
        }
        node = dict
            .get(b"Parent")
            .and_then(Object::as_reference)
            .and_then(|id| doc.get_dictionary(id))
            .ok();
    }
    Vec::new()
}

fn stream_filters(stream: &Stream) -> Vec<Vec<u8>> {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(n)) => vec![n.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|o| o.as_name().ok().map(|n| n.to_vec()))
            .collect(),
        _ => Vec::new(),
    }
}

fn encode_image(stream: &Stream) -> Option<Vec<u8>> {
    let filters = stream_filters(stream);
    match filters.as_slice() {
        [f] if f.as_slice() == b"DCTDecode" || f.as_slice() == b"JPXDecode" => {
            Some(stream.content.clone())
        }
        [] => wrap_pnm(stream, stream.content.clone()),
        [f] if f.as_slice() == b"FlateDecode" => {
            let samples = stream.decompressed_content().ok()?;
            wrap_pnm(stream, samples)
        }
        _ => None,
    }
}

fn wrap_pnm(stream: &Stream, samples: Vec<u8>) -> Option<Vec<u8>> {
    let width = stream.dict.get(b"Width").and_then(Object::as_i64).ok()? as usize;
    let height = stream.dict.get(b"Height").and_then(Object::as_i64).ok()? as usize;
    let bits = stream
        .dict
        .get(b"BitsPerComponent")
        .and_then(Object::as_i64)
        .unwrap_or(8);
    if bits != 8 {
        return None;
    }
    let (magic, channels) = match stream.dict.get(b"ColorSpace").and_then(Object::as_name) {
        Ok(b"DeviceGray") => ("P5", 1),
        Ok(b"DeviceRGB") => ("P6", 3),
        _ => return None,
    };
    if samples.len() < width * height * channels {
        return None;
    }

    let mut out = format!("{}\n{} {}\n255\n", magic, width, height).into_bytes();
    out.extend_from_slice(&samples[..width * height * channels]);
    Some(out)
}
