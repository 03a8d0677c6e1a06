//! Prompt assembly for answer generation.

/// Stands in for the document context when retrieval found nothing.
pub const NO_CONTEXT_MARKER: &str = "[NO DOCUMENTS UPLOADED OR NO RELEVANT CONTEXT FOUND]";

const SEPARATOR: &str = "\n\n---\n\n";

/// The document context section: numbered `[Document n]` blocks in rank
/// order, then the query image's text, if any. With neither, the
/// [`NO_CONTEXT_MARKER`].
pub fn render_context(blocks: &[String], image_text: Option<&str>) -> String {
    let mut parts: Vec<String> = blocks
        .iter()
        .enumerate()
        .map(|(i, text)| format!("[Document {}]\n{}", i + 1, text))
        .collect();

    if let Some(ocr) = image_text.map(str::trim).filter(|t| !t.is_empty()) {
        parts.push(format!("[Additional Context - User Provided Image]\n{}", ocr));
    }

    if parts.is_empty() {
        NO_CONTEXT_MARKER.to_string()
    } else {
        parts.join(SEPARATOR)
    }
}

pub fn build_prompt(question: &str, blocks: &[String], image_text: Option<&str>) -> String {
    let mut prompt = String::new();

    prompt.push_str("You are a helpful assistant answering questions about the user's documents.\n\n");

    prompt.push_str("=== DOCUMENT CONTEXT ===\n");
    prompt.push_str(&render_context(blocks, image_text));
    prompt.push_str("\n\n");

    prompt.push_str("=== QUESTION ===\n");
    prompt.push_str(question.trim());
    prompt.push_str("\n\n");

    prompt.push_str("=== GUIDELINES ===\n");
    prompt.push_str("- When the documents contain the answer, answer from them and mention which [Document n] you used.\n");
    prompt.push_str("- When they do not, say so briefly, then answer from general knowledge if you can.\n");
    prompt.push_str("- Use markdown when it helps readability. Keep the answer focused.\n\n");
    prompt.push_str("Answer:");

    prompt
}
