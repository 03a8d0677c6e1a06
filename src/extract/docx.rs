//! Word (OOXML) extraction: body paragraphs first, then tables.

use std::io::Read;

use quick_xml::events::Event;

use crate::error::{RagError, Result};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

fn ooxml_err(e: impl std::fmt::Display) -> RagError {
    RagError::extraction(format!("OOXML extraction failed: {}", e))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>> {
    let entry = archive.by_name(name).map_err(|e| match e {
        zip::result::ZipError::FileNotFound => ooxml_err(format!("{} not found", name)),
        other => ooxml_err(other),
    })?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(ooxml_err)?;
    if out.len() as u64 >= max_bytes {
        return Err(ooxml_err(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Paragraph and table blocks of a `.docx`, prose before tables.
///
/// Each block is one paragraph or one table row (cells joined with ` | `).
pub fn extract_docx(bytes: &[u8]) -> Result<Vec<String>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| {
        RagError::extraction(format!(
            "not an OOXML document (legacy .doc files are not supported): {}",
            e
        ))
    })?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    let (mut blocks, tables) = parse_document_xml(&xml)?;
    for rows in tables {
        blocks.extend(rows);
    }
    Ok(blocks)
}

/// Returns (paragraphs outside tables, rows per table).
fn parse_document_xml(xml: &[u8]) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut paragraphs = Vec::new();
    let mut tables: Vec<Vec<String>> = Vec::new();

    let mut table_depth = 0usize;
    let mut in_text = false;
    let mut paragraph = String::new();
    let mut cell = String::new();
    let mut row: Vec<String> = Vec::new();
    let mut rows: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"tbl" => {
                    table_depth += 1;
                    if table_depth == 1 {
                        rows.clear();
                    }
                }
                b"tc" if table_depth == 1 => cell.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" | b"br" => {
                    if table_depth > 0 {
                        cell.push(' ');
                    } else {
                        paragraph.push(' ');
                    }
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(ooxml_err)?;
                if table_depth > 0 {
                    cell.push_str(&text);
                } else {
                    paragraph.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if table_depth > 0 {
                        cell.push(' ');
                    } else {
                        let text = normalize(&paragraph);
                        if !text.is_empty() {
                            paragraphs.push(text);
                        }
                        paragraph.clear();
                    }
                }
                b"tc" if table_depth == 1 => row.push(normalize(&cell)),
                b"tr" if table_depth == 1 => {
                    if row.iter().any(|c| !c.is_empty()) {
                        rows.push(row.join(" | "));
                    }
                    row.clear();
                }
                b"tbl" => {
                    table_depth = table_depth.saturating_sub(1);
                    if table_depth == 0 && !rows.is_empty() {
                        tables.push(std::mem::take(&mut rows));
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok((paragraphs, tables))
}

fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx(body: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn paragraphs_then_tables() {
        let body = concat!(
            "<w:p><w:r><w:t>Intro </w:t></w:r><w:r><w:t>text.</w:t></w:r></w:p>",
            "<w:tbl><w:tr><w:tc><w:p><w:r><w:t>Region</w:t></w:r></w:p></w:tc>",
            "<w:tc><w:p><w:r><w:t>Revenue</w:t></w:r></w:p></w:tc></w:tr>",
            "<w:tr><w:tc><w:p><w:r><w:t>West</w:t></w:r></w:p></w:tc>",
            "<w:tc><w:p><w:r><w:t>1200</w:t></w:r></w:p></w:tc></w:tr></w:tbl>",
            "<w:p><w:r><w:t>Closing remark.</w:t></w:r></w:p>",
        );
        let blocks = extract_docx(&docx(body)).unwrap();
        assert_eq!(
            blocks,
            vec![
                "Intro text.".to_string(),
                "Closing remark.".to_string(),
                "Region | Revenue".to_string(),
                "West | 1200".to_string(),
            ]
        );
    }

    #[test]
    fn invalid_zip_returns_error() {
        let err = extract_docx(b"not a zip").unwrap_err();
        assert!(err.to_string().contains("legacy .doc"));
    }

    #[test]
    fn missing_document_xml() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        let err = extract_docx(&buf).unwrap_err();
        assert!(err.to_string().contains("word/document.xml"));
    }
}
