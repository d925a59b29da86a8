//! Per-chunk question/answer generation with retry and backoff.
//!
//! ## Retry policy
//!
//! Every attempt first waits on the shared [`RateLimiter`], then runs under
//! a per-call timeout. Throttling (429), server errors (5xx), timeouts and
//! transport failures are retried up to `max_attempts` in total, sleeping
//! `min(2^n, max_backoff)` seconds after the n-th failure. Anything else
//! (400, 401, an empty 200) ends the chunk immediately.

use crate::config::CorpusConfig;
use crate::error::ChunkError;
use crate::pipeline::chunk::Chunk;
use crate::pipeline::client::{CompletionClient, CompletionError, CompletionRequest, PromptMessage};
use crate::pipeline::ratelimit::RateLimiter;
use crate::prompts::{qa_user_prompt, DEFAULT_SYSTEM_PROMPT};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Unparsed model reply for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawModelOutput {
    pub chunk_index: usize,
    pub text: String,
    /// Attempts it took, the successful one included.
    pub attempts: u32,
}

/// Retry bookkeeping for the chunk currently being generated.
#[derive(Debug)]
pub struct GenerationAttempt {
    pub chunk_index: usize,
    pub attempts: u32,
    pub last_error: Option<CompletionError>,
}

impl GenerationAttempt {
    fn new(chunk_index: usize) -> Self {
        Self { chunk_index, attempts: 0, last_error: None }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// The service refused the request (4xx other than 429).
    #[error("chunk {chunk}: request rejected on attempt {attempts}: {error}")]
    Rejected { chunk: usize, attempts: u32, error: CompletionError },

    #[error("chunk {chunk}: gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { chunk: usize, attempts: u32, last_error: CompletionError },

    /// A success response without usable content.
    #[error("chunk {chunk}: {detail}")]
    InvalidResponse { chunk: usize, attempts: u32, detail: String },
}

impl GenerationError {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Rejected { attempts, .. }
            | Self::RetriesExhausted { attempts, .. }
            | Self::InvalidResponse { attempts, .. } => *attempts,
        }
    }

    fn from_attempt(attempt: GenerationAttempt) -> Self {
        let GenerationAttempt { chunk_index: chunk, attempts, last_error } = attempt;
        match last_error {
            Some(CompletionError::InvalidResponse(detail)) => {
                Self::InvalidResponse { chunk, attempts, detail }
            }
            Some(error) if !error.is_retryable() => Self::Rejected { chunk, attempts, error },
            Some(error) => Self::RetriesExhausted { chunk, attempts, last_error: error },
            None => Self::RetriesExhausted {
                chunk,
                attempts,
                last_error: CompletionError::Transport("no attempt made".into()),
            },
        }
    }
}

impl From<GenerationError> for ChunkError {
    fn from(e: GenerationError) -> Self {
        let (chunk, attempts, detail) = match e {
            GenerationError::Rejected { chunk, attempts, error } => (chunk, attempts, error.to_string()),
            GenerationError::RetriesExhausted { chunk, attempts, last_error } => {
                (chunk, attempts, last_error.to_string())
            }
            GenerationError::InvalidResponse { chunk, attempts, detail } => (chunk, attempts, detail),
        };
        ChunkError::GenerationFailed { chunk, attempts, detail }
    }
}

/// Sleep after the `attempt`-th failure (1-based): `min(2^attempt, cap)` seconds.
pub fn backoff_delay(attempt: u32, cap_secs: u64) -> Duration {
    let secs = 2u64.checked_pow(attempt).unwrap_or(u64::MAX).min(cap_secs);
    Duration::from_secs(secs)
}

/// Request parameters copied out of [`CorpusConfig`].
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub pairs_per_chunk: usize,
    pub system_prompt: String,
    pub user_prompt: Option<String>,
    pub max_attempts: u32,
    pub max_backoff_secs: u64,
    pub timeout: Duration,
}

impl From<&CorpusConfig> for GenerationSettings {
    fn from(config: &CorpusConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            pairs_per_chunk: config.pairs_per_chunk,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            user_prompt: config.user_prompt.clone(),
            max_attempts: config.max_attempts.max(1),
            max_backoff_secs: config.max_backoff_secs,
            timeout: config.api_timeout(),
        }
    }
}

pub struct QaGenerator {
    client: Arc<dyn CompletionClient>,
    limiter: Arc<RateLimiter>,
    settings: GenerationSettings,
}

impl QaGenerator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        limiter: Arc<RateLimiter>,
        settings: GenerationSettings,
    ) -> Self {
        Self { client, limiter, settings }
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    fn request_for(&self, chunk: &Chunk) -> CompletionRequest {
        CompletionRequest {
            model: self.settings.model.clone(),
            messages: vec![
                PromptMessage::system(self.settings.system_prompt.clone()),
                PromptMessage::user(qa_user_prompt(
                    self.settings.user_prompt.as_deref(),
                    self.settings.pairs_per_chunk,
                    &chunk.text,
                )),
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        }
    }

    /// Ask the model for question/answer pairs covering `chunk`.
    pub async fn generate(&self, chunk: &Chunk) -> Result<RawModelOutput, GenerationError> {
        let request = self.request_for(chunk);
        let max_attempts = self.settings.max_attempts;
        let mut state = GenerationAttempt::new(chunk.index);

        while state.attempts < max_attempts {
            self.limiter.acquire().await;
            state.attempts += 1;

            let outcome = match timeout(self.settings.timeout, self.client.complete(&request)).await {
                Ok(result) => result,
                Err(_) => Err(CompletionError::Timeout),
            };

            let error = match outcome {
                Ok(text) => {
                    debug!(
                        "Chunk {}: {} chars of model output after {} attempt(s)",
                        chunk.index,
                        text.len(),
                        state.attempts
                    );
                    return Ok(RawModelOutput {
                        chunk_index: chunk.index,
                        text,
                        attempts: state.attempts,
                    });
                }
                Err(e) => e,
            };

            warn!(
                "Chunk {}: attempt {}/{} failed: {}",
                chunk.index, state.attempts, max_attempts, error
            );

            let retryable = error.is_retryable();
            state.last_error = Some(error);
            if !retryable {
                break;
            }
            if state.attempts < max_attempts {
                sleep(backoff_delay(state.attempts, self.settings.max_backoff_secs)).await;
            }
        }

        Err(GenerationError::from_attempt(state))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Replays a fixed list of replies, one per call.
    pub(crate) struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String, CompletionError>>>,
        pub(crate) requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedClient {
        pub(crate) fn new(replies: Vec<Result<String, CompletionError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CompletionError::Transport("script exhausted".into())))
        }
    }

    /// Never answers; only a timeout ends the call.
    struct HangingClient;

    #[async_trait]
    impl CompletionClient for HangingClient {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, CompletionError> {
            std::future::pending().await
        }
    }

    fn status(code: u16) -> Result<String, CompletionError> {
        Err(CompletionError::Status { code, body: String::new() })
    }

    fn chunk(index: usize) -> Chunk {
        Chunk { index, text: "Refunds take five business days.".into(), source: Arc::from("doc.pdf") }
    }

    fn generator(client: Arc<dyn CompletionClient>) -> QaGenerator {
        let config = CorpusConfig::default();
        QaGenerator::new(
            client,
            Arc::new(RateLimiter::new(100, Duration::from_secs(60))),
            GenerationSettings::from(&config),
        )
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1, 60), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, 60), Duration::from_secs(4));
        assert_eq!(backoff_delay(5, 60), Duration::from_secs(32));
        assert_eq!(backoff_delay(6, 60), Duration::from_secs(60));
        assert_eq!(backoff_delay(200, 60), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_returns_output() {
        let client = Arc::new(ScriptedClient::new(vec![Ok("{\"question\":\"Q\",\"answer\":\"A\"}".into())]));
        let out = generator(client.clone()).generate(&chunk(0)).await.unwrap();
        assert_eq!(out.attempts, 1);
        assert_eq!(out.chunk_index, 0);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_call_retried_after_backoff() {
        let client = Arc::new(ScriptedClient::new(vec![status(429), Ok("reply".into())]));
        let start = Instant::now();
        let out = generator(client.clone()).generate(&chunk(1)).await.unwrap();
        assert_eq!(out.attempts, 2);
        assert_eq!(out.text, "reply");
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn server_errors_exhaust_retries() {
        let client = Arc::new(ScriptedClient::new(vec![status(503), status(500), status(502)]));
        let start = Instant::now();
        let err = generator(client.clone()).generate(&chunk(2)).await.unwrap_err();
        assert!(matches!(err, GenerationError::RetriesExhausted { attempts: 3, .. }), "{err:?}");
        assert_eq!(client.calls(), 3);
        // 2s after the first failure, 4s after the second, none after the last.
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn bad_request_not_retried() {
        let client = Arc::new(ScriptedClient::new(vec![status(400), Ok("unused".into())]));
        let err = generator(client.clone()).generate(&chunk(3)).await.unwrap_err();
        assert!(matches!(err, GenerationError::Rejected { attempts: 1, .. }), "{err:?}");
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_success_not_retried() {
        let client = Arc::new(ScriptedClient::new(vec![
            Err(CompletionError::InvalidResponse("no message content".into())),
            Ok("unused".into()),
        ]));
        let err = generator(client.clone()).generate(&chunk(0)).await.unwrap_err();
        assert!(matches!(err, GenerationError::InvalidResponse { attempts: 1, .. }));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_treated_as_retryable() {
        let err = generator(Arc::new(HangingClient)).generate(&chunk(4)).await.unwrap_err();
        match err {
            GenerationError::RetriesExhausted { attempts, last_error, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, CompletionError::Timeout);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_goes_through_limiter() {
        let client = Arc::new(ScriptedClient::new(vec![status(429), status(429), Ok("ok".into())]));
        let limiter = Arc::new(RateLimiter::new(100, Duration::from_secs(600)));
        let gen = QaGenerator::new(
            client,
            Arc::clone(&limiter),
            GenerationSettings::from(&CorpusConfig::default()),
        );
        gen.generate(&chunk(0)).await.unwrap();
        assert_eq!(limiter.recent_calls().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn request_carries_prompt_and_settings() {
        let client = Arc::new(ScriptedClient::new(vec![Ok("x".into())]));
        generator(client.clone()).generate(&chunk(0)).await.unwrap();

        let requests = client.requests.lock().unwrap();
        let req = &requests[0];
        assert_eq!(req.model, "mistral-small-latest");
        assert_eq!(req.max_tokens, 500);
        assert_eq!(req.messages[0].role, "system");
        assert!(req.messages[1].content.contains("Refunds take five business days."));
        assert!(req.messages[1].content.contains("generate 3"));
    }

    #[test]
    fn generation_error_becomes_chunk_error() {
        let e = GenerationError::Rejected {
            chunk: 5,
            attempts: 1,
            error: CompletionError::Status { code: 401, body: "bad key".into() },
        };
        let c: ChunkError = e.into();
        assert_eq!(c.chunk(), 5);
        assert!(c.to_string().contains("HTTP 401"));
    }
}
