//! Corpus-generation entry points.
//!
//! A run is Acquire → Extract → Chunk, then for every chunk Generate →
//! Parse → Append. Only acquisition, extraction and corpus writes can fail
//! a run; a chunk that yields nothing is recorded in the [`RunReport`] and
//! skipped.

use crate::config::CorpusConfig;
use crate::error::{ChunkError, CorpusError};
use crate::output::RunReport;
use crate::pipeline::acquire::{self, Document};
use crate::pipeline::chunk::Chunker;
use crate::pipeline::client::{CompletionClient, HttpCompletionClient};
use crate::pipeline::corpus::{CorpusWriter, TrainingExample};
use crate::pipeline::extract::{ExtractedText, TextExtractor};
use crate::pipeline::generate::{GenerationSettings, QaGenerator};
use crate::pipeline::parse::{parse_pairs, QaPair};
use crate::pipeline::ratelimit::RateLimiter;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// A fully wired pipeline.
///
/// [`Pipeline::from_config`] builds the standard components. Use
/// [`Pipeline::new`] to inject your own extractor, generator (and so your
/// own [`CompletionClient`]) or writer.
pub struct Pipeline {
    config: CorpusConfig,
    extractor: TextExtractor,
    chunker: Chunker,
    generator: QaGenerator,
    writer: CorpusWriter,
}

impl Pipeline {
    pub fn new(
        config: CorpusConfig,
        extractor: TextExtractor,
        generator: QaGenerator,
        writer: CorpusWriter,
    ) -> Result<Self, CorpusError> {
        config.validate()?;
        let chunker = Chunker::from_config(&config)?;
        Ok(Self { config, extractor, chunker, generator, writer })
    }

    /// Standard components: HTTP completion client, one shared rate limiter,
    /// the default extraction chain and a writer on `config.output`.
    ///
    /// Fails with [`CorpusError::ServiceNotConfigured`] when no API key is set.
    pub fn from_config(config: &CorpusConfig) -> Result<Self, CorpusError> {
        config.validate()?;
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| CorpusError::ServiceNotConfigured {
                hint: "Set MISTRAL_API_KEY (or pass --api-key) for the completion service.".into(),
            })?;

        let client = HttpCompletionClient::new(&config.api_base, api_key, config.api_timeout())
            .map_err(|e| CorpusError::Internal(format!("HTTP client: {e}")))?;
        let limiter = Arc::new(RateLimiter::new(config.max_requests, config.window()));

        let extractor = TextExtractor::standard(config, Arc::clone(&limiter));
        let generator = QaGenerator::new(
            Arc::new(client) as Arc<dyn CompletionClient>,
            limiter,
            GenerationSettings::from(config),
        );
        let writer = CorpusWriter::new(config.output.clone());

        Self::new(config.clone(), extractor, generator, writer)
    }

    pub fn writer(&self) -> &CorpusWriter {
        &self.writer
    }

    pub fn extractor(&self) -> &TextExtractor {
        &self.extractor
    }

    /// Run the whole pipeline for a path or URL.
    pub async fn run(&self, input: &str) -> Result<RunReport, CorpusError> {
        info!("Starting corpus generation: {}", input);
        let document = acquire::acquire(input, &self.config).await?;
        self.run_document(&document).await
    }

    /// Run extraction and generation on an already acquired document.
    pub async fn run_document(&self, document: &Document) -> Result<RunReport, CorpusError> {
        let total_start = Instant::now();
        let callback = self.config.progress_callback.as_ref();

        // ── Extract ──────────────────────────────────────────────────────
        let extract_start = Instant::now();
        let extracted = self.extractor.extract(document).await?;
        let extraction_duration_ms = extract_start.elapsed().as_millis() as u64;

        // ── Chunk ────────────────────────────────────────────────────────
        let chunks = self.chunker.split(&extracted.text, &document.source);
        let total = chunks.clone().count();
        info!(
            "Split {} chars into {} chunks (size {}, overlap {})",
            extracted.text.chars().count(),
            total,
            self.chunker.max_size(),
            self.chunker.overlap()
        );

        let mut report = RunReport {
            source: document.source.clone(),
            output: self.writer.path().to_path_buf(),
            extraction_strategy: extracted.strategy.clone(),
            extracted_chars: extracted.text.chars().count(),
            total_chunks: total,
            extraction_duration_ms,
            ..Default::default()
        };

        if let Some(cb) = callback {
            cb.on_run_start(total);
        }

        // ── Generate, parse, append ──────────────────────────────────────
        // Generation may run ahead by `concurrency` chunks; results are
        // consumed here in chunk order, so the corpus is written in order.
        let generation_start = Instant::now();
        let generator = &self.generator;
        let mut outcomes = stream::iter(chunks)
            .map(|chunk| async move {
                if let Some(cb) = callback {
                    cb.on_chunk_start(chunk.index, total);
                }
                let result = generator.generate(&chunk).await;
                (chunk.index, result)
            })
            .buffered(self.config.concurrency.max(1));

        while let Some((index, result)) = outcomes.next().await {
            report.processed_chunks += 1;

            let outcome = result.map_err(ChunkError::from).and_then(|raw| {
                let pairs = parse_pairs(&raw.text, index);
                if pairs.is_empty() {
                    Err(ChunkError::NoPairs { chunk: index, attempts: raw.attempts })
                } else {
                    Ok(pairs)
                }
            });

            match outcome {
                Ok(pairs) => {
                    let written = self.append_pairs(&pairs).await?;
                    report.accepted_pairs += pairs.len();
                    report.written_lines += written;
                    info!(
                        "Chunk {}/{}: {} pairs ({} total)",
                        report.processed_chunks,
                        total,
                        pairs.len(),
                        report.accepted_pairs
                    );
                    if let Some(cb) = callback {
                        cb.on_chunk_complete(
                            index,
                            report.processed_chunks,
                            total,
                            pairs.len(),
                            report.accepted_pairs,
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        "Skipping chunk {}/{} after {} attempt(s): {} ({} pairs so far)",
                        report.processed_chunks,
                        total,
                        e.attempts(),
                        e,
                        report.accepted_pairs
                    );
                    report.skipped_chunks += 1;
                    if let Some(cb) = callback {
                        cb.on_chunk_skipped(report.processed_chunks, total, report.accepted_pairs, &e);
                    }
                    report.failures.push(e);
                }
            }
        }

        report.generation_duration_ms = generation_start.elapsed().as_millis() as u64;
        report.total_duration_ms = total_start.elapsed().as_millis() as u64;

        info!(
            "Corpus generation complete: {}/{} chunks, {} pairs written to {} in {}ms",
            report.successful_chunks(),
            total,
            report.written_lines,
            report.output.display(),
            report.total_duration_ms
        );

        if let Some(cb) = callback {
            cb.on_run_complete(&report);
        }

        Ok(report)
    }

    async fn append_pairs(&self, pairs: &[QaPair]) -> Result<usize, CorpusError> {
        let examples: Vec<TrainingExample> = pairs.iter().map(TrainingExample::from).collect();
        self.writer.append(&examples).await
    }
}

/// Generate question/answer pairs for a PDF path or URL and append them to
/// `config.output`.
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdf2qa::{generate_corpus, CorpusConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = CorpusConfig::builder()
///     .api_key(std::env::var("MISTRAL_API_KEY")?)
///     .build()?;
/// let report = generate_corpus("manual.pdf", &config).await?;
/// eprintln!("{} pairs from {} chunks", report.accepted_pairs, report.total_chunks);
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// Only fatal problems are returned: the input cannot be read or is not a
/// PDF, no text could be extracted, or the corpus cannot be written.
/// Chunks that fail are listed in [`RunReport::failures`].
pub async fn generate_corpus(
    input: impl AsRef<str>,
    config: &CorpusConfig,
) -> Result<RunReport, CorpusError> {
    Pipeline::from_config(config)?.run(input.as_ref()).await
}

/// Synchronous wrapper around [`generate_corpus`].
///
/// Creates a temporary tokio runtime internally.
pub fn generate_corpus_sync(
    input: impl AsRef<str>,
    config: &CorpusConfig,
) -> Result<RunReport, CorpusError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CorpusError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(generate_corpus(input, config))
}

/// Acquire a PDF and extract its text without generating anything.
///
/// Needs no completion credential; OCR still needs a vision provider.
pub async fn extract_text(
    input: impl AsRef<str>,
    config: &CorpusConfig,
) -> Result<ExtractedText, CorpusError> {
    config.validate()?;
    let document = acquire::acquire(input.as_ref(), config).await?;
    let limiter = Arc::new(RateLimiter::new(config.max_requests, config.window()));
    TextExtractor::standard(config, limiter).extract(&document).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credential_is_reported() {
        let config = CorpusConfig::builder().ocr_enabled(false).build().unwrap();
        match Pipeline::from_config(&config) {
            Err(CorpusError::ServiceNotConfigured { hint }) => assert!(hint.contains("MISTRAL_API_KEY")),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("pipeline built without credential"),
        }
    }

    #[test]
    fn standard_pipeline_writes_to_configured_output() {
        let config = CorpusConfig::builder()
            .api_key("test-key")
            .ocr_enabled(false)
            .output("out/corpus.jsonl")
            .build()
            .unwrap();
        let pipeline = Pipeline::from_config(&config).unwrap();
        assert_eq!(pipeline.writer().path(), std::path::Path::new("out/corpus.jsonl"));
        assert_eq!(pipeline.extractor().strategy_names(), vec!["text-layer", "layout-text"]);
    }

    #[tokio::test]
    async fn missing_local_file_fails_before_extraction() {
        let config = CorpusConfig::builder().api_key("k").ocr_enabled(false).build().unwrap();
        let err = Pipeline::from_config(&config)
            .unwrap()
            .run("/definitely/not/here.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, CorpusError::NotFound { .. }));
    }
}
