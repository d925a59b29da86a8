//! # edgequake-pdf2qa
//!
//! Turn PDF documents into a question/answer training corpus.
//!
//! Text is pulled out of the PDF (embedded text layer first, OCR through a
//! vision model for scanned pages), split into overlapping chunks, and each
//! chunk is sent to a chat-completion model that writes question/answer
//! pairs about it. Valid pairs are appended to a JSONL file in the chat
//! fine-tuning format:
//!
//! ```text
//! {"messages":[{"role":"user","content":"…"},{"role":"assistant","content":"…"}]}
//! ```
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Acquire   local file, URL, or Google Drive share link
//!  ├─ 2. Extract   lopdf text layer → pdfium text → vision OCR
//!  ├─ 3. Chunk     1000 chars, 200 overlap
//!  ├─ 4. Generate  rate-limited completion calls with retry/backoff
//!  ├─ 5. Parse     tolerant line-by-line JSON recovery
//!  └─ 6. Append    training_data/training_examples.jsonl
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2qa::{generate_corpus, CorpusConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CorpusConfig::builder()
//!         .api_key(std::env::var("MISTRAL_API_KEY")?)
//!         .output("training_data/training_examples.jsonl")
//!         .build()?;
//!     let report = generate_corpus("handbook.pdf", &config).await?;
//!     eprintln!(
//!         "{} pairs, {} of {} chunks skipped",
//!         report.accepted_pairs, report.skipped_chunks, report.total_chunks
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2qa` binary (clap + anyhow + tracing-subscriber + dotenvy) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2qa = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod run;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CorpusConfig, CorpusConfigBuilder};
pub use error::{ChunkError, CorpusError};
pub use output::RunReport;
pub use pipeline::chunk::{Chunk, Chunker};
pub use pipeline::client::{CompletionClient, CompletionError, CompletionRequest, HttpCompletionClient};
pub use pipeline::corpus::{CorpusReport, CorpusWriter, TrainingExample};
pub use pipeline::extract::{ExtractedText, ExtractionStrategy, TextExtractor};
pub use pipeline::generate::{GenerationError, QaGenerator};
pub use pipeline::parse::{parse_pairs, QaPair};
pub use pipeline::ratelimit::RateLimiter;
pub use progress::{CorpusProgressCallback, NoopProgressCallback, ProgressCallback};
pub use run::{extract_text, generate_corpus, generate_corpus_sync, Pipeline};
