//! Prompts for question/answer generation and page transcription.
//!
//! Every prompt lives here so tests can inspect them without a live model.
//! Callers can override the generation prompts via
//! [`crate::config::CorpusConfig::system_prompt`] and
//! [`crate::config::CorpusConfig::user_prompt`].

/// System message fixing the reply format for question generation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that generates question-answer pairs from text. \
Always format your responses as JSON objects with 'question' and 'answer' keys, one per line.";

/// User prompt template. `{n}` is the number of pairs, `{text}` the chunk.
pub const DEFAULT_USER_PROMPT: &str = r#"Based on the following text, generate {n} relevant question-answer pairs.
Each pair must be on its own line as a single valid JSON object with exactly the keys "question" and "answer".
Do not number the pairs, do not wrap them in an array or a code block, and do not add commentary.

Text: {text}

Format each line exactly like this:
{"question": "What is X?", "answer": "X is Y."}
{"question": "How does Z work?", "answer": "Z works by..."}
{"question": "Why is W important?", "answer": "W is important because..."}"#;

/// System prompt for transcribing a rasterised page (OCR fallback).
pub const OCR_SYSTEM_PROMPT: &str = r#"You are an OCR engine. Transcribe ALL text visible in the page image exactly as written.

Rules:
- Preserve the natural reading order, including multi-column layouts
- Keep paragraph breaks as blank lines
- Do NOT describe images, add commentary, or wrap output in code fences
- If the page contains no text, output nothing"#;

/// Fill the user prompt template for one chunk.
pub fn qa_user_prompt(template: Option<&str>, pairs: usize, chunk_text: &str) -> String {
    template
        .unwrap_or(DEFAULT_USER_PROMPT)
        .replace("{n}", &pairs.to_string())
        .replace("{text}", chunk_text)
}
