//! Result types returned by a corpus-generation run.

use crate::error::ChunkError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Summary of one run of the pipeline over a single document.
///
/// A run "succeeds" as soon as text was extracted and the corpus could be
/// written; individual chunks may still have failed (see `failures`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// The path or URL the run was started with.
    pub source: String,
    /// Corpus file the examples were appended to.
    pub output: PathBuf,
    /// Identifier of the extraction strategy that produced the text.
    pub extraction_strategy: String,
    /// Characters of extracted text.
    pub extracted_chars: usize,
    /// Chunks the text was split into.
    pub total_chunks: usize,
    /// Chunks attempted (successful or skipped).
    pub processed_chunks: usize,
    /// Chunks that yielded no examples.
    pub skipped_chunks: usize,
    /// Question/answer pairs accepted across all chunks.
    pub accepted_pairs: usize,
    /// Lines appended to the corpus during this run.
    pub written_lines: usize,
    /// Why each skipped chunk was skipped, in chunk order.
    pub failures: Vec<ChunkError>,
    pub extraction_duration_ms: u64,
    pub generation_duration_ms: u64,
    pub total_duration_ms: u64,
}

impl RunReport {
    /// Chunks that contributed at least one example.
    pub fn successful_chunks(&self) -> usize {
        self.processed_chunks.saturating_sub(self.skipped_chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_chunks_excludes_skipped() {
        let report = RunReport {
            processed_chunks: 3,
            skipped_chunks: 1,
            ..Default::default()
        };
        assert_eq!(report.successful_chunks(), 2);
    }

    #[test]
    fn report_serialises_failures() {
        let report = RunReport {
            failures: vec![ChunkError::NoPairs { chunk: 7, attempts: 1 }],
            ..Default::default()
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("NoPairs"));
        assert!(json.contains("\"attempts\":1"));
        assert!(json.contains("\"skipped_chunks\":0"));
    }
}
