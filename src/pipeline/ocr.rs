//! OCR fallback: rasterise pages and have a vision LLM transcribe them.
//!
//! Used only for image-only PDFs where neither text layer yields anything.
//! Each page is one vision call, gated by the shared [`RateLimiter`] and
//! retried with exponential backoff. A page that still fails is reported
//! and skipped; the other pages are kept.

use crate::config::CorpusConfig;
use crate::pipeline::acquire::Document;
use crate::pipeline::extract::{ExtractionStrategy, PageText};
use crate::pipeline::generate::backoff_delay;
use crate::pipeline::ratelimit::RateLimiter;
use crate::pipeline::render;
use crate::prompts::OCR_SYSTEM_PROMPT;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Default vision model when a provider is named without one.
const DEFAULT_VISION_MODEL: &str = "gpt-4.1-nano";

/// A page transcription may take this many completion timeouts.
const OCR_TIMEOUT_FACTOR: u32 = 6;

/// Transcribes rasterised pages with a vision model.
pub struct VisionOcrStrategy {
    provider: Arc<dyn LLMProvider>,
    limiter: Arc<RateLimiter>,
    password: Option<String>,
    max_pixels: u32,
    max_attempts: u32,
    max_backoff_secs: u64,
    timeout: Duration,
}

impl VisionOcrStrategy {
    pub fn new(provider: Arc<dyn LLMProvider>, limiter: Arc<RateLimiter>, config: &CorpusConfig) -> Self {
        Self {
            provider,
            limiter,
            password: config.password.clone(),
            max_pixels: config.max_rendered_pixels,
            max_attempts: config.max_attempts,
            max_backoff_secs: config.max_backoff_secs,
            timeout: config.api_timeout() * OCR_TIMEOUT_FACTOR,
        }
    }

    /// Transcribe one page image, retrying transient failures.
    async fn transcribe(&self, page_num: usize, image: ImageData) -> Result<String, String> {
        let messages = vec![
            ChatMessage::system(OCR_SYSTEM_PROMPT),
            ChatMessage::user_with_images("", vec![image]),
        ];
        let options = CompletionOptions {
            temperature: Some(0.0),
            max_tokens: Some(4096),
            ..Default::default()
        };

        let mut last_err = String::from("no attempt made");
        for attempt in 1..=self.max_attempts {
            self.limiter.acquire().await;

            match tokio::time::timeout(self.timeout, self.provider.chat(&messages, Some(&options)))
                .await
            {
                Ok(Ok(response)) => {
                    debug!(
                        "OCR page {}: {} input / {} output tokens",
                        page_num, response.prompt_tokens, response.completion_tokens
                    );
                    return Ok(clean_transcript(&response.content));
                }
                Ok(Err(e)) => last_err = e.to_string(),
                Err(_) => last_err = format!("timed out after {}s", self.timeout.as_secs()),
            }

            warn!(
                "OCR page {}: attempt {}/{} failed: {}",
                page_num, attempt, self.max_attempts, last_err
            );
            if attempt < self.max_attempts {
                sleep(backoff_delay(attempt, self.max_backoff_secs)).await;
            }
        }

        Err(last_err)
    }
}

#[async_trait]
impl ExtractionStrategy for VisionOcrStrategy {
    fn name(&self) -> &'static str {
        "ocr"
    }

    async fn extract_pages(&self, document: &Document) -> Result<Vec<PageText>, String> {
        let bytes = document.bytes.clone();
        let password = self.password.clone();
        let max_pixels = self.max_pixels;
        let images = tokio::task::spawn_blocking(move || {
            render::render_pages_blocking(&bytes, password.as_deref(), max_pixels)
        })
        .await
        .map_err(|e| format!("render task panicked: {e}"))??;

        let mut pages = Vec::with_capacity(images.len());
        for (idx, image) in images.into_iter().enumerate() {
            let page_num = idx + 1;
            let text = match image.and_then(|img| to_image_data(&img).map_err(|e| e.to_string())) {
                Ok(data) => self.transcribe(page_num, data).await,
                Err(e) => Err(e),
            };
            pages.push(text);
        }
        Ok(pages)
    }
}

/// Encode a page as a grayscale base64 PNG for the vision request.
pub fn to_image_data(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.grayscale()
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page image → {} bytes base64", b64.len());
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-z]*\n(.*)\n```\s*$").unwrap());

/// Strip an outer code fence the model may add despite the prompt, and
/// normalise line endings.
pub fn clean_transcript(raw: &str) -> String {
    let trimmed = raw.trim();
    let body = match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    };
    body.replace("\r\n", "\n")
}

/// Resolve the vision provider for OCR, most specific first:
///
/// 1. a pre-built provider on the config
/// 2. `ocr_provider_name` (+ `ocr_model`)
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` from the environment
/// 4. OpenAI when `OPENAI_API_KEY` is set
/// 5. whatever [`ProviderFactory::from_env`] detects
pub fn resolve_vision_provider(config: &CorpusConfig) -> Result<Arc<dyn LLMProvider>, String> {
    if let Some(ref provider) = config.ocr_provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.ocr_model.as_deref().unwrap_or(DEFAULT_VISION_MODEL);

    if let Some(ref name) = config.ocr_provider_name {
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, &env_model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_vision_provider("openai", model);
    }

    ProviderFactory::from_env()
        .map(|(llm, _embedding)| llm)
        .map_err(|e| format!("no vision provider configured ({e}); set OPENAI_API_KEY or --ocr-provider"))
}

fn create_vision_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, String> {
    ProviderFactory::create_llm_provider(name, model)
        .map_err(|e| format!("vision provider '{name}' unavailable: {e}"))
}
