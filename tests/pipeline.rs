//! Integration tests for the corpus pipeline.
//!
//! Extraction and the completion service are replaced by scripted fakes so
//! the whole Acquire → Extract → Chunk → Generate → Parse → Append flow runs
//! offline. Time is paused, so backoff sleeps and rate-limit waits complete
//! instantly.
//!
//! The live test at the bottom talks to the real service and is gated behind
//! `E2E_ENABLED`:
//!   E2E_ENABLED=1 MISTRAL_API_KEY=... cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use edgequake_pdf2qa::pipeline::acquire::Document;
use edgequake_pdf2qa::pipeline::extract::PageText;
use edgequake_pdf2qa::pipeline::generate::GenerationSettings;
use edgequake_pdf2qa::{
    ChunkError, CompletionClient, CompletionError, CompletionRequest, CorpusConfig, CorpusError,
    CorpusProgressCallback, CorpusWriter, ExtractionStrategy, Pipeline, QaGenerator, RateLimiter,
    RunReport, TextExtractor,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Returns the same pages for any document.
struct FixedText(Vec<String>);

#[async_trait]
impl ExtractionStrategy for FixedText {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn extract_pages(&self, _document: &Document) -> Result<Vec<PageText>, String> {
        Ok(self.0.iter().cloned().map(Ok).collect())
    }
}

/// Replays scripted replies in call order.
struct ScriptedClient {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    calls: Mutex<usize>,
}

impl ScriptedClient {
    fn new(replies: Vec<Result<String, CompletionError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, CompletionError> {
        *self.calls.lock().unwrap() += 1;
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CompletionError::Status { code: 400, body: "unscripted".into() }))
    }
}

/// Answers with the chunk it recognises, slower for earlier chunks.
struct MarkerClient;

#[async_trait]
impl CompletionClient for MarkerClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let prompt = &request.messages[1].content;
        let (chunk, delay) = if prompt.contains(&"C".repeat(60)) {
            (2, 1)
        } else if prompt.contains(&"B".repeat(80)) {
            (1, 2)
        } else {
            (0, 3)
        };
        tokio::time::sleep(Duration::from_secs(delay)).await;
        Ok(format!(r#"{{"question": "chunk {chunk}?", "answer": "yes"}}"#))
    }
}

#[derive(Default)]
struct RecordingProgress {
    events: Mutex<Vec<String>>,
}

impl CorpusProgressCallback for RecordingProgress {
    fn on_run_start(&self, total_chunks: usize) {
        self.events.lock().unwrap().push(format!("start {total_chunks}"));
    }

    fn on_chunk_complete(&self, chunk: usize, processed: usize, total: usize, pairs: usize, cumulative: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("done {chunk} {processed}/{total} +{pairs} ={cumulative}"));
    }

    fn on_chunk_skipped(&self, processed: usize, total: usize, cumulative: usize, error: &ChunkError) {
        self.events.lock().unwrap().push(format!(
            "skip {} {processed}/{total} ={cumulative} x{}",
            error.chunk(),
            error.attempts()
        ));
    }

    fn on_run_complete(&self, report: &RunReport) {
        self.events
            .lock()
            .unwrap()
            .push(format!("end {}", report.written_lines));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn pairs(n: usize) -> Result<String, CompletionError> {
    Ok((0..n)
        .map(|i| format!(r#"{{"question": "Q{i}?", "answer": "A{i}."}}"#))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn status(code: u16) -> Result<String, CompletionError> {
    Err(CompletionError::Status { code, body: String::new() })
}

/// A file that passes the `%PDF` check; the fake extractor ignores its content.
fn fake_pdf(dir: &Path) -> String {
    let path = dir.join("input.pdf");
    std::fs::write(&path, b"%PDF-1.4\n% stand-in\n").unwrap();
    path.to_string_lossy().into_owned()
}

fn small_chunk_config(output: PathBuf) -> CorpusConfig {
    CorpusConfig::builder()
        .chunk_size(100)
        .chunk_overlap(20)
        .ocr_enabled(false)
        .output(output)
        .build()
        .unwrap()
}

fn pipeline(config: &CorpusConfig, text: String, client: Arc<dyn CompletionClient>) -> Pipeline {
    let limiter = Arc::new(RateLimiter::new(config.max_requests, config.window()));
    Pipeline::new(
        config.clone(),
        TextExtractor::new(vec![Box::new(FixedText(vec![text]))]),
        QaGenerator::new(client, limiter, GenerationSettings::from(config)),
        CorpusWriter::new(config.output.clone()),
    )
    .unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failed_chunk_is_skipped_and_run_succeeds() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("training_data/training_examples.jsonl");
    let config = small_chunk_config(output.clone());

    // 259 chars + the page newline = 260 chars → three 100-char chunks.
    let client = ScriptedClient::new(vec![pairs(3), status(429), pairs(2), status(400)]);
    let report = pipeline(&config, "x".repeat(259), client.clone())
        .run(&fake_pdf(dir.path()))
        .await
        .unwrap();

    assert_eq!(report.total_chunks, 3);
    assert_eq!(report.processed_chunks, 3);
    assert_eq!(report.skipped_chunks, 1);
    assert_eq!(report.accepted_pairs, 5);
    assert_eq!(report.written_lines, 5);
    assert_eq!(report.extraction_strategy, "fixed");
    assert_eq!(client.calls(), 4);

    assert_eq!(report.failures.len(), 1);
    match &report.failures[0] {
        ChunkError::GenerationFailed { chunk, attempts, detail } => {
            assert_eq!(*chunk, 2);
            assert_eq!(*attempts, 1);
            assert!(detail.contains("400"), "{detail}");
        }
        other => panic!("unexpected failure {other:?}"),
    }

    let corpus = std::fs::read_to_string(&output).unwrap();
    assert_eq!(corpus.lines().count(), 5);
    for line in corpus.lines() {
        let v: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(v["messages"][0]["role"], "user");
        assert_eq!(v["messages"][1]["role"], "assistant");
    }
}

#[tokio::test(start_paused = true)]
async fn reply_without_pairs_counts_as_skipped() {
    let dir = TempDir::new().unwrap();
    let config = small_chunk_config(dir.path().join("c.jsonl"));

    let client = ScriptedClient::new(vec![Ok("Sorry, I cannot help with that.".into())]);
    let report = pipeline(&config, "short text".into(), client)
        .run(&fake_pdf(dir.path()))
        .await
        .unwrap();

    assert_eq!(report.total_chunks, 1);
    assert_eq!(report.skipped_chunks, 1);
    assert!(matches!(report.failures[0], ChunkError::NoPairs { chunk: 0, attempts: 1 }));
    assert!(!dir.path().join("c.jsonl").exists());
}

#[tokio::test(start_paused = true)]
async fn second_run_appends_to_corpus() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("corpus.jsonl");
    let config = small_chunk_config(output.clone());
    let input = fake_pdf(dir.path());

    let first = pipeline(&config, "one chunk".into(), ScriptedClient::new(vec![pairs(3)]))
        .run(&input)
        .await
        .unwrap();
    let second = pipeline(&config, "one chunk".into(), ScriptedClient::new(vec![pairs(2)]))
        .run(&input)
        .await
        .unwrap();

    let writer = CorpusWriter::new(&output);
    assert_eq!(
        writer.line_count().await.unwrap(),
        first.written_lines + second.written_lines
    );
    assert_eq!(writer.line_count().await.unwrap(), 5);
    assert!(writer.verify().await.unwrap().is_valid());
}

#[tokio::test(start_paused = true)]
async fn concurrent_generation_keeps_chunk_order() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("ordered.jsonl");
    let config = CorpusConfig::builder()
        .chunk_size(100)
        .chunk_overlap(20)
        .concurrency(3)
        .ocr_enabled(false)
        .output(&output)
        .build()
        .unwrap();

    // Chunks: [0,100) all A, [80,180) ends in 80 B, [160,260) holds the C run.
    let text = format!("{}{}{}", "A".repeat(100), "B".repeat(80), "C".repeat(79));
    let report = pipeline(&config, text, Arc::new(MarkerClient))
        .run(&fake_pdf(dir.path()))
        .await
        .unwrap();
    assert_eq!(report.written_lines, 3);

    let questions: Vec<String> = std::fs::read_to_string(&output)
        .unwrap()
        .lines()
        .map(|l| {
            let v: serde_json::Value = serde_json::from_str(l).unwrap();
            v["messages"][0]["content"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(questions, vec!["chunk 0?", "chunk 1?", "chunk 2?"]);
}

#[tokio::test(start_paused = true)]
async fn progress_events_follow_chunk_order() {
    let dir = TempDir::new().unwrap();
    let progress = Arc::new(RecordingProgress::default());
    let config = CorpusConfig::builder()
        .chunk_size(100)
        .chunk_overlap(20)
        .ocr_enabled(false)
        .output(dir.path().join("p.jsonl"))
        .progress_callback(progress.clone() as Arc<dyn CorpusProgressCallback>)
        .build()
        .unwrap();

    let client = ScriptedClient::new(vec![pairs(1), status(401), pairs(2)]);
    pipeline(&config, "x".repeat(259), client)
        .run(&fake_pdf(dir.path()))
        .await
        .unwrap();

    let events = progress.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "start 3",
            "done 0 1/3 +1 =1",
            "skip 1 2/3 =1 x1",
            "done 2 3/3 +2 =3",
            "end 3",
        ]
    );
}

#[tokio::test]
async fn non_pdf_input_is_rejected_before_generation() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("notes.pdf");
    std::fs::write(&input, "plain text, not a PDF").unwrap();
    let config = small_chunk_config(dir.path().join("c.jsonl"));

    let client = ScriptedClient::new(vec![pairs(3)]);
    let err = pipeline(&config, "unused".into(), client.clone())
        .run(&input.to_string_lossy())
        .await
        .unwrap_err();

    assert!(matches!(err, CorpusError::InvalidFormat { .. }));
    assert!(err.is_input_error());
    assert_eq!(client.calls(), 0);
    assert!(input.exists(), "user file must never be deleted");
}

#[tokio::test]
async fn empty_extraction_is_fatal() {
    let dir = TempDir::new().unwrap();
    let config = small_chunk_config(dir.path().join("c.jsonl"));

    let err = pipeline(&config, "   ".into(), ScriptedClient::new(vec![]))
        .run(&fake_pdf(dir.path()))
        .await
        .unwrap_err();

    match err {
        CorpusError::ExtractionExhausted { failures, .. } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].strategy, "fixed");
            assert_eq!(failures[0].errors, vec!["no text".to_string()]);
        }
        other => panic!("unexpected error {other}"),
    }
}

// ── Live service (opt-in) ────────────────────────────────────────────────────

#[tokio::test]
async fn live_generation_against_service() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP: set E2E_ENABLED=1 to run live tests");
        return;
    }
    let Ok(key) = std::env::var("MISTRAL_API_KEY") else {
        println!("SKIP: MISTRAL_API_KEY not set");
        return;
    };

    let dir = TempDir::new().unwrap();
    let output = dir.path().join("live.jsonl");
    let config = CorpusConfig::builder()
        .api_key(key)
        .ocr_enabled(false)
        .output(&output)
        .build()
        .unwrap();

    let text = "Refunds are issued within five business days of receiving the returned item. \
                Items must be returned in their original packaging within 30 days of delivery."
        .to_string();
    let limiter = Arc::new(RateLimiter::new(config.max_requests, config.window()));
    let client = edgequake_pdf2qa::HttpCompletionClient::new(
        &config.api_base,
        config.api_key.clone().unwrap_or_default(),
        config.api_timeout(),
    )
    .unwrap();
    let report = Pipeline::new(
        config.clone(),
        TextExtractor::new(vec![Box::new(FixedText(vec![text]))]),
        QaGenerator::new(Arc::new(client), limiter, GenerationSettings::from(&config)),
        CorpusWriter::new(&output),
    )
    .unwrap()
    .run(&fake_pdf(dir.path()))
    .await
    .unwrap();

    println!("{}", serde_json::to_string_pretty(&report).unwrap());
    assert_eq!(report.total_chunks, 1);
    assert!(CorpusWriter::new(&output).verify().await.unwrap().is_valid());
}
