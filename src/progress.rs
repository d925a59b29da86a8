//! Progress-callback trait for per-chunk generation events.
//!
//! Inject an [`Arc<dyn CorpusProgressCallback>`] via
//! [`crate::config::CorpusConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through each chunk.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2qa::{CorpusConfig, CorpusProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PairCounter {
//!     pairs: AtomicUsize,
//! }
//!
//! impl CorpusProgressCallback for PairCounter {
//!     fn on_chunk_complete(&self, chunk: usize, processed: usize, total: usize, pairs: usize, cumulative: usize) {
//!         self.pairs.store(cumulative, Ordering::SeqCst);
//!         eprintln!("chunk {chunk}: {pairs} pairs ({processed}/{total})");
//!     }
//! }
//!
//! let counter = Arc::new(PairCounter { pairs: AtomicUsize::new(0) });
//! let config = CorpusConfig::builder()
//!     .progress_callback(counter as Arc<dyn CorpusProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::ChunkError;
use crate::output::RunReport;
use std::sync::Arc;

/// Called by the pipeline as it processes each chunk.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. With `concurrency > 1`, `on_chunk_start` may fire
/// for several chunks before the first completes; completion and skip events
/// always arrive in chunk order.
pub trait CorpusProgressCallback: Send + Sync {
    /// Called once after chunking, before any completion call.
    fn on_run_start(&self, total_chunks: usize) {
        let _ = total_chunks;
    }

    /// Called just before generation starts for a chunk (0-based index).
    fn on_chunk_start(&self, chunk: usize, total_chunks: usize) {
        let _ = (chunk, total_chunks);
    }

    /// Called after a chunk's examples were appended to the corpus.
    ///
    /// # Arguments
    /// * `chunk`: 0-based chunk index
    /// * `processed`: chunks processed so far, this one included
    /// * `total`: total chunks
    /// * `pairs`: pairs accepted from this chunk
    /// * `cumulative`: pairs accepted so far in this run
    fn on_chunk_complete(
        &self,
        chunk: usize,
        processed: usize,
        total: usize,
        pairs: usize,
        cumulative: usize,
    ) {
        let _ = (chunk, processed, total, pairs, cumulative);
    }

    /// Called when a chunk is skipped (generation failed or no valid pairs).
    /// `cumulative` is the pairs accepted so far, unchanged by this chunk;
    /// the chunk index and attempt count travel in `error`.
    fn on_chunk_skipped(&self, processed: usize, total: usize, cumulative: usize, error: &ChunkError) {
        let _ = (processed, total, cumulative, error);
    }

    /// Called once after every chunk was attempted.
    fn on_run_complete(&self, report: &RunReport) {
        let _ = report;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl CorpusProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::CorpusConfig`].
pub type ProgressCallback = Arc<dyn CorpusProgressCallback>;
