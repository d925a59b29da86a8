//! Text extraction with ordered fallback strategies.
//!
//! Strategies run cheapest first and the first one that produces any
//! non-whitespace text wins:
//!
//! | # | Name          | Backend                          | Cost |
//! |---|---------------|----------------------------------|------|
//! | 1 | `text-layer`  | lopdf content-stream decoding    | µs/page |
//! | 2 | `layout-text` | pdfium text page (positioned)    | ms/page |
//! | 3 | `ocr`         | pdfium raster + vision LLM       | s/page, paid |
//!
//! Every strategy works page by page. A page that fails is logged, recorded
//! and skipped; it never aborts the strategy. Only when every strategy comes
//! back empty does extraction fail, with each strategy's errors attached.

use crate::config::CorpusConfig;
use crate::error::CorpusError;
use crate::pipeline::acquire::Document;
use crate::pipeline::ocr::{resolve_vision_provider, VisionOcrStrategy};
use crate::pipeline::ratelimit::RateLimiter;
use crate::pipeline::render;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome for one page: its text, or why it could not be read.
pub type PageText = Result<String, String>;

/// One way of turning a PDF into text.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    /// Short identifier recorded in [`ExtractedText::strategy`].
    fn name(&self) -> &'static str;

    /// Extract every page independently.
    ///
    /// `Err` means the strategy could not start at all (document unreadable
    /// by this backend); per-page problems go in the returned vector.
    async fn extract_pages(&self, document: &Document) -> Result<Vec<PageText>, String>;
}

/// Text produced by the first successful strategy.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    /// Page texts, each followed by a newline.
    pub text: String,
    /// Name of the strategy that produced `text`.
    pub strategy: String,
    /// Pages the strategy saw.
    pub pages: usize,
    /// Pages that strategy skipped, as `page N: reason`.
    pub page_errors: Vec<String>,
}

/// Why one strategy produced nothing.
#[derive(Debug, Clone)]
pub struct ExtractionFailure {
    pub strategy: String,
    pub errors: Vec<String>,
}

impl fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.errors.join("; "))
    }
}

/// Runs strategies in order until one yields text.
pub struct TextExtractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl TextExtractor {
    /// Use exactly these strategies, in this order.
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    /// The standard chain: text layer, layout text, then OCR when a vision
    /// provider is available and OCR is enabled.
    ///
    /// OCR calls share `limiter` with question generation.
    pub fn standard(config: &CorpusConfig, limiter: Arc<RateLimiter>) -> Self {
        let mut strategies: Vec<Box<dyn ExtractionStrategy>> = vec![
            Box::new(TextLayerStrategy),
            Box::new(LayoutTextStrategy {
                password: config.password.clone(),
            }),
        ];

        if config.ocr_enabled {
            match resolve_vision_provider(config) {
                Ok(provider) => strategies.push(Box::new(VisionOcrStrategy::new(
                    provider, limiter, config,
                ))),
                Err(reason) => warn!("OCR fallback disabled: {}", reason),
            }
        }

        Self::new(strategies)
    }

    /// Names of the registered strategies, in the order they will run.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Extract text, falling back through the strategies.
    pub async fn extract(&self, document: &Document) -> Result<ExtractedText, CorpusError> {
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            let name = strategy.name();
            debug!("Trying extraction strategy '{}'", name);

            let pages = match strategy.extract_pages(document).await {
                Ok(pages) => pages,
                Err(e) => {
                    warn!("Strategy '{}' failed: {}", name, e);
                    failures.push(ExtractionFailure {
                        strategy: name.to_string(),
                        errors: vec![e],
                    });
                    continue;
                }
            };

            let total = pages.len();
            let mut text = String::new();
            let mut page_errors = Vec::new();
            for (idx, page) in pages.into_iter().enumerate() {
                match page {
                    Ok(t) => {
                        text.push_str(&t);
                        text.push('\n');
                    }
                    Err(e) => {
                        warn!("Strategy '{}': page {} skipped: {}", name, idx + 1, e);
                        page_errors.push(format!("page {}: {}", idx + 1, e));
                    }
                }
            }

            if !text.trim().is_empty() {
                info!(
                    "Extracted {} chars from {} pages with '{}' ({} pages skipped)",
                    text.len(),
                    total,
                    name,
                    page_errors.len()
                );
                return Ok(ExtractedText {
                    text,
                    strategy: name.to_string(),
                    pages: total,
                    page_errors,
                });
            }

            let mut errors = page_errors;
            if errors.is_empty() {
                errors.push(if total == 0 {
                    "document has no pages".to_string()
                } else {
                    "no text".to_string()
                });
            }
            info!("Strategy '{}' yielded no text; falling back", name);
            failures.push(ExtractionFailure {
                strategy: name.to_string(),
                errors,
            });
        }

        Err(CorpusError::ExtractionExhausted {
            source_ref: document.source.clone(),
            failures,
        })
    }
}

// ── Strategy 1: embedded text layer (lopdf) ──────────────────────────────

/// Decodes each page's content stream with the pure-Rust lopdf parser.
///
/// Fast and dependency-free, but it follows content-stream order and only
/// understands common font encodings; odd producers fall through to pdfium.
pub struct TextLayerStrategy;

#[async_trait]
impl ExtractionStrategy for TextLayerStrategy {
    fn name(&self) -> &'static str {
        "text-layer"
    }

    async fn extract_pages(&self, document: &Document) -> Result<Vec<PageText>, String> {
        let bytes = document.bytes.clone();
        tokio::task::spawn_blocking(move || text_layer_blocking(&bytes))
            .await
            .map_err(|e| format!("text-layer task panicked: {e}"))?
    }
}

fn text_layer_blocking(bytes: &[u8]) -> Result<Vec<PageText>, String> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| format!("cannot parse PDF: {e}"))?;
    if doc.is_encrypted() {
        return Err("document is encrypted".to_string());
    }

    Ok(doc
        .get_pages()
        .keys()
        .map(|&page_no| doc.extract_text(&[page_no]).map_err(|e| e.to_string()))
        .collect())
}

// ── Strategy 2: layout-aware text (pdfium) ───────────────────────────────

/// Reads pdfium's text page, which orders characters by their position on
/// the page and resolves font encodings lopdf cannot.
pub struct LayoutTextStrategy {
    pub password: Option<String>,
}

#[async_trait]
impl ExtractionStrategy for LayoutTextStrategy {
    fn name(&self) -> &'static str {
        "layout-text"
    }

    async fn extract_pages(&self, document: &Document) -> Result<Vec<PageText>, String> {
        let bytes = document.bytes.clone();
        let password = self.password.clone();
        tokio::task::spawn_blocking(move || render::page_texts_blocking(&bytes, password.as_deref()))
            .await
            .map_err(|e| format!("layout-text task panicked: {e}"))?
    }
}
