//! Sentence-aware text chunker with token overlap.
//!
//! Splits extracted text into [`Chunk`]s of roughly `chunk_size` tokens.
//! Chunks are built from whole sentences and never cut one in half.
//! Consecutive chunks share a tail of at most `overlap` tokens.
//!
//! # Rules
//!
//! - A *token* is a whitespace-delimited word.
//! - A *sentence* ends after `.`, `!` or `?` (plus any trailing closing
//!   quotes or brackets) when the next character is whitespace or the end of
//!   the text. A paragraph break (two line breaks with only blanks between)
//!   always ends a sentence.
//! - Sentences are accumulated until the next one would push the chunk over
//!   `chunk_size`. The next chunk starts with the longest run of trailing
//!   sentences whose total is `<= overlap`, shrunk further if needed so it
//!   still has room for at least one new sentence.
//! - A sentence longer than `chunk_size` becomes a chunk of its own.
//! - Chunk text is its sentences joined by single spaces, with internal
//!   whitespace collapsed.
//!
//! Empty or whitespace-only text produces no chunks.

use crate::models::{chunk_id, Chunk, StructuredOrigin, TableRowExcerpt};

const CLOSERS: &[char] = &['"', '\'', ')', ']', '}', '\u{201D}', '\u{2019}', '\u{00BB}'];

/// A sentence located in the source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Sentence {
    /// Whitespace-normalized text.
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    pub token_start: usize,
    pub tokens: usize,
}

/// Split `text` into sentences using the rules in the module docs.
pub fn split_sentences(text: &str) -> Vec<Sentence> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut tokens_before = 0;
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let mut boundary = None;

        if matches!(c, '.' | '!' | '?') {
            let mut j = i + 1;
            while j < chars.len() && (matches!(chars[j], '.' | '!' | '?') || CLOSERS.contains(&chars[j]))
            {
                j += 1;
            }
            if j == chars.len() || chars[j].is_whitespace() {
                boundary = Some(j);
            } else {
                // "3.14", "e.g.x": not a boundary
                i = j;
                continue;
            }
        } else if c == '\n' {
            let mut j = i + 1;
            while j < chars.len() && chars[j] != '\n' && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && chars[j] == '\n' {
                boundary = Some(i);
            }
        }

        if let Some(end) = boundary {
            push_sentence(&chars, start, end, &mut tokens_before, &mut sentences);
            start = end;
            i = end.max(i + 1);
        } else {
            i += 1;
        }
    }
    push_sentence(&chars, start, chars.len(), &mut tokens_before, &mut sentences);

    sentences
}

fn push_sentence(
    chars: &[char],
    start: usize,
    end: usize,
    tokens_before: &mut usize,
    out: &mut Vec<Sentence>,
) {
    let slice = &chars[start..end];
    let lead = slice.iter().take_while(|c| c.is_whitespace()).count();
    if lead == slice.len() {
        return;
    }
    let trail = slice.iter().rev().take_while(|c| c.is_whitespace()).count();
    let raw: String = slice[lead..slice.len() - trail].iter().collect();
    let words: Vec<&str> = raw.split_whitespace().collect();

    out.push(Sentence {
        text: words.join(" "),
        char_start: start + lead,
        char_end: end - trail,
        token_start: *tokens_before,
        tokens: words.len(),
    });
    *tokens_before += words.len();
}

/// Split text into overlapping chunks.
/// Returns chunks with contiguous indices starting at 0.
pub fn chunk_text(document_id: &str, text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);
    let sentences = split_sentences(text);

    let mut chunks = Vec::new();
    // The open chunk is sentences[first..i]; `fresh` counts the ones not
    // carried over from the previous chunk.
    let mut first = 0;
    let mut tokens = 0;
    let mut fresh = 0;

    for (i, sentence) in sentences.iter().enumerate() {
        if fresh > 0 && tokens + sentence.tokens > chunk_size {
            let index = chunks.len();
            chunks.push(make_chunk(document_id, index, &sentences[first..i]));

            let mut seed_first = i;
            let mut seed_tokens = 0;
            while seed_first > first && seed_tokens + sentences[seed_first - 1].tokens <= overlap {
                seed_first -= 1;
                seed_tokens += sentences[seed_first].tokens;
            }
            first = seed_first;
            tokens = seed_tokens;
            fresh = 0;

            while first < i && tokens + sentence.tokens > chunk_size {
                tokens -= sentences[first].tokens;
                first += 1;
            }
        }
        tokens += sentence.tokens;
        fresh += 1;
    }

    if fresh > 0 {
        let index = chunks.len();
        chunks.push(make_chunk(document_id, index, &sentences[first..]));
    }

    chunks
}

fn make_chunk(document_id: &str, index: usize, sentences: &[Sentence]) -> Chunk {
    let head = &sentences[0];
    let tail = &sentences[sentences.len() - 1];
    let text = sentences
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    Chunk {
        id: chunk_id(document_id, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        text,
        char_start: head.char_start,
        char_end: tail.char_end,
        token_start: head.token_start,
        token_end: tail.token_start + tail.tokens,
        origin: None,
    }
}

/// Tag chunks that cover table rows with the table name and row range.
///
/// When a chunk spans two tables, the first one it touches wins.
pub fn assign_origins(chunks: &mut [Chunk], excerpts: &[TableRowExcerpt]) {
    if excerpts.is_empty() {
        return;
    }
    for chunk in chunks.iter_mut() {
        let mut covered = excerpts
            .iter()
            .filter(|e| e.char_start < chunk.char_end && e.char_end > chunk.char_start);
        let Some(head) = covered.next() else {
            continue;
        };
        let mut origin = StructuredOrigin {
            table: head.table.clone(),
            row_start: head.row,
            row_end: head.row,
        };
        for e in covered.filter(|e| e.table == origin.table) {
            origin.row_start = origin.row_start.min(e.row);
            origin.row_end = origin.row_end.max(e.row);
        }
        chunk.origin = Some(origin);
    }
}
