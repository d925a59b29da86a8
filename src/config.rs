//! Configuration types for PDF-to-corpus generation.
//!
//! All pipeline behaviour is controlled through [`CorpusConfig`], built via
//! its [`CorpusConfigBuilder`].

use crate::error::CorpusError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default OpenAI-compatible completion endpoint base.
pub const DEFAULT_API_BASE: &str = "https://api.mistral.ai/v1";

/// Default completion model.
pub const DEFAULT_MODEL: &str = "mistral-small-latest";

/// Default corpus location, relative to the working directory.
pub const DEFAULT_OUTPUT: &str = "training_data/training_examples.jsonl";

/// Configuration for a PDF-to-corpus run.
///
/// Built via [`CorpusConfig::builder()`] or using [`CorpusConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdf2qa::CorpusConfig;
///
/// let config = CorpusConfig::builder()
///     .chunk_size(800)
///     .chunk_overlap(100)
///     .rate_limit(5, 60)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct CorpusConfig {
    /// Maximum chunk length in characters. Default: 1000.
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks. Default: 200. Must be < `chunk_size`.
    pub chunk_overlap: usize,

    /// Completion calls allowed per rolling window. Default: 5.
    pub max_requests: usize,

    /// Rolling window length in seconds. Default: 60.
    pub window_secs: u64,

    /// Total completion attempts per chunk, first try included. Default: 3.
    pub max_attempts: u32,

    /// Upper bound on a single backoff sleep in seconds. Default: 60.
    pub max_backoff_secs: u64,

    /// Per-call completion timeout in seconds. Default: 10.
    ///
    /// A call that outlives this is treated like a 5xx and retried.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Base URL of the OpenAI-compatible completion API.
    pub api_base: String,

    /// Bearer credential for the completion API. Usually read from
    /// `MISTRAL_API_KEY` by the CLI.
    pub api_key: Option<String>,

    /// Completion model identifier. Default: `mistral-small-latest`.
    pub model: String,

    /// Sampling temperature. Default: 0.7.
    ///
    /// Question generation benefits from some variety, unlike transcription.
    pub temperature: f32,

    /// Maximum tokens per completion. Default: 500.
    pub max_tokens: usize,

    /// Pairs requested from the model per chunk. Default: 3.
    pub pairs_per_chunk: usize,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Custom user prompt template; `{n}` and `{text}` are substituted.
    pub user_prompt: Option<String>,

    /// Chunks generated concurrently. Default: 1 (sequential).
    ///
    /// Results are still appended in chunk order, so the corpus is identical
    /// to a sequential run.
    pub concurrency: usize,

    /// Corpus file appended to. Default: `training_data/training_examples.jsonl`.
    pub output: PathBuf,

    /// Where downloaded PDFs are kept. None: a temporary directory removed
    /// after the run.
    pub download_dir: Option<PathBuf>,

    /// Register the OCR fallback strategy when a vision provider is available.
    pub ocr_enabled: bool,

    /// Vision provider name for OCR (e.g. "openai"). None: auto-detect.
    pub ocr_provider_name: Option<String>,

    /// Vision model for OCR. None: provider default.
    pub ocr_model: Option<String>,

    /// Pre-constructed vision provider. Takes precedence over `ocr_provider_name`.
    pub ocr_provider: Option<Arc<dyn LLMProvider>>,

    /// Longest edge of a page rasterised for OCR, in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            max_requests: 5,
            window_secs: 60,
            max_attempts: 3,
            max_backoff_secs: 60,
            api_timeout_secs: 10,
            download_timeout_secs: 120,
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 500,
            pairs_per_chunk: 3,
            system_prompt: None,
            user_prompt: None,
            concurrency: 1,
            output: PathBuf::from(DEFAULT_OUTPUT),
            download_dir: None,
            ocr_enabled: true,
            ocr_provider_name: None,
            ocr_model: None,
            ocr_provider: None,
            max_rendered_pixels: 2000,
            password: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for CorpusConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorpusConfig")
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("max_requests", &self.max_requests)
            .field("window_secs", &self.window_secs)
            .field("max_attempts", &self.max_attempts)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("pairs_per_chunk", &self.pairs_per_chunk)
            .field("concurrency", &self.concurrency)
            .field("output", &self.output)
            .field("download_dir", &self.download_dir)
            .field("ocr_enabled", &self.ocr_enabled)
            .field("ocr_provider_name", &self.ocr_provider_name)
            .field("ocr_model", &self.ocr_model)
            .field(
                "ocr_provider",
                &self.ocr_provider.as_ref().map(|_| "<dyn LLMProvider>"),
            )
            .finish()
    }
}

impl CorpusConfig {
    /// Create a new builder for `CorpusConfig`.
    pub fn builder() -> CorpusConfigBuilder {
        CorpusConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    /// Check the invariants the pipeline relies on.
    pub fn validate(&self) -> Result<(), CorpusError> {
        if self.chunk_size == 0 {
            return Err(CorpusError::InvalidConfig(
                "chunk size must be ≥ 1".into(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(CorpusError::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.max_requests == 0 {
            return Err(CorpusError::InvalidConfig(
                "rate limit must allow at least one request per window".into(),
            ));
        }
        if self.window_secs == 0 {
            return Err(CorpusError::InvalidConfig(
                "rate-limit window must be ≥ 1s".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(CorpusError::InvalidConfig(
                "max attempts must be ≥ 1".into(),
            ));
        }
        if self.pairs_per_chunk == 0 {
            return Err(CorpusError::InvalidConfig(
                "pairs per chunk must be ≥ 1".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(CorpusError::InvalidConfig(
                "concurrency must be ≥ 1".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`CorpusConfig`].
pub struct CorpusConfigBuilder {
    config: CorpusConfig,
}

impl fmt::Debug for CorpusConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorpusConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl CorpusConfigBuilder {
    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n;
        self
    }

    pub fn chunk_overlap(mut self, n: usize) -> Self {
        self.config.chunk_overlap = n;
        self
    }

    /// At most `max_requests` completion calls in any `window_secs` window.
    pub fn rate_limit(mut self, max_requests: usize, window_secs: u64) -> Self {
        self.config.max_requests = max_requests;
        self.config.window_secs = window_secs;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn max_backoff_secs(mut self, secs: u64) -> Self {
        self.config.max_backoff_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs.max(1);
        self
    }

    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.config.api_base = base.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn pairs_per_chunk(mut self, n: usize) -> Self {
        self.config.pairs_per_chunk = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn user_prompt(mut self, template: impl Into<String>) -> Self {
        self.config.user_prompt = Some(template.into());
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output = path.into();
        self
    }

    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.download_dir = Some(dir.into());
        self
    }

    pub fn ocr_enabled(mut self, v: bool) -> Self {
        self.config.ocr_enabled = v;
        self
    }

    pub fn ocr_provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.ocr_provider_name = Some(name.into());
        self
    }

    pub fn ocr_model(mut self, model: impl Into<String>) -> Self {
        self.config.ocr_model = Some(model.into());
        self
    }

    pub fn ocr_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.ocr_provider = Some(provider);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<CorpusConfig, CorpusError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
