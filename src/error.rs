//! Error types for the edgequake-pdf2qa library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`CorpusError`] is **fatal**: the run cannot proceed at all (bad input
//!   file, unreachable URL, no extractable text, corpus not writable).
//!   Returned as `Err(CorpusError)` from the top-level entry points.
//!
//! * [`ChunkError`] is **non-fatal**: a single chunk produced nothing (the
//!   model rejected the request, retries ran out, or the reply held no valid
//!   pair) but every other chunk is fine. Stored inside
//!   [`crate::output::RunReport`] so callers can inspect partial success.
//!
//! Component seams have their own narrower errors:
//! [`crate::pipeline::generate::GenerationError`],
//! [`crate::pipeline::client::CompletionError`] and
//! [`crate::pipeline::extract::ExtractionFailure`].

use crate::pipeline::extract::ExtractionFailure;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2qa library.
#[derive(Debug, Error)]
pub enum CorpusError {
    // ── Acquisition errors ────────────────────────────────────────────────
    /// Local file missing, or the remote server answered 404.
    #[error("PDF not found: '{source_ref}'\nCheck the path or URL exists.")]
    NotFound { source_ref: String },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The bytes were read, but they are not a PDF.
    #[error("'{source_ref}' is not a valid PDF\nFirst bytes: {magic:?}")]
    InvalidFormat { source_ref: String, magic: Vec<u8> },

    /// The download failed: transport error, timeout, or non-success status.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    NetworkError { url: String, reason: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// Every extraction strategy failed or produced only whitespace.
    #[error("No text could be extracted from '{source_ref}':\n{}", format_failures(.failures))]
    ExtractionExhausted {
        source_ref: String,
        failures: Vec<ExtractionFailure>,
    },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create, append to, or sync the corpus file.
    #[error("Failed to write corpus file '{path}': {source}")]
    CorpusWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No credential was supplied for the completion service.
    #[error("Completion service is not configured.\n{hint}")]
    ServiceNotConfigured { hint: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CorpusError {
    /// `true` when the caller supplied bad input (missing file, not a PDF,
    /// no text, bad config); `false` for environment and network problems
    /// where retrying later may help.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            CorpusError::NotFound { .. }
                | CorpusError::InvalidFormat { .. }
                | CorpusError::ExtractionExhausted { .. }
                | CorpusError::InvalidConfig(_)
        )
    }
}

fn format_failures(failures: &[ExtractionFailure]) -> String {
    if failures.is_empty() {
        return "  (no extraction strategy was available)".to_string();
    }
    failures
        .iter()
        .map(|f| format!("  {f}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A non-fatal error for a single chunk.
///
/// The run logs it, records it in the report and moves on to the next chunk.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ChunkError {
    /// The completion call failed for good (rejected or retries exhausted).
    #[error("Chunk {chunk}: generation failed after {attempts} attempt(s): {detail}")]
    GenerationFailed {
        chunk: usize,
        attempts: u32,
        detail: String,
    },

    /// The model answered, but the reply contained no usable pair.
    #[error("Chunk {chunk}: no valid question/answer pairs in model output (attempt {attempts})")]
    NoPairs { chunk: usize, attempts: u32 },
}

impl ChunkError {
    /// 0-based index of the chunk that failed.
    pub fn chunk(&self) -> usize {
        match self {
            ChunkError::GenerationFailed { chunk, .. } | ChunkError::NoPairs { chunk, .. } => *chunk,
        }
    }

    /// Completion calls spent on the chunk.
    pub fn attempts(&self) -> u32 {
        match self {
            ChunkError::GenerationFailed { attempts, .. } | ChunkError::NoPairs { attempts, .. } => {
                *attempts
            }
        }
    }
}
