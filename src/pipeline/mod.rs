//! Pipeline stages for PDF-to-corpus generation.
//!
//! Each submodule implements one step and can be tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! acquire ──▶ extract ──▶ chunk ──▶ generate ──▶ parse ──▶ corpus
//! (path/URL)  (3 strategies) (overlap)  (rate-limited)  (JSON lines)  (append)
//! ```
//!
//! 1. [`acquire`]  resolve a local path or download a URL (Google Drive aware)
//!    and check the `%PDF` signature
//! 2. [`extract`]  try the text layer ([`render`] supplies pdfium access),
//!    then OCR through a vision model ([`ocr`])
//! 3. [`chunk`]    split text into overlapping, size-bounded segments
//! 4. [`generate`] one completion call per chunk over a [`client`], gated by
//!    the shared [`ratelimit`] limiter, with retry and backoff
//! 5. [`parse`]    recover question/answer objects from the free-form reply
//! 6. [`corpus`]   append chat-format examples to the JSONL file

pub mod acquire;
pub mod chunk;
pub mod client;
pub mod corpus;
pub mod extract;
pub mod generate;
pub mod ocr;
pub mod parse;
pub mod ratelimit;
pub mod render;
