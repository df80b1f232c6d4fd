//! Ollama generation provider.
//!
//! Talks to a local Ollama server over its native HTTP API, in either of
//! its two shapes: `/api/generate` (single prompt string) or `/api/chat`
//! (role-tagged messages). Both shapes stream NDJSON.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ndjson::NdjsonLineStream;
use super::types::{ChunkStream, GenerationChunk, GenerationRequest, GenerationResult};
use super::{GenerationProvider, ProviderError};
use crate::session::{Turn, TurnRole};

// ============================================================================
// API Mode
// ============================================================================

/// Which Ollama endpoint to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiMode {
    /// `/api/generate`: history is flattened into a single prompt string.
    Generate,
    /// `/api/chat`: history is sent as role-tagged messages.
    Chat,
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Backoff policy for transient backend failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay, including Retry-After hints.
    pub max_delay: Duration,
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        (self.base_delay * 2u32.saturating_pow(attempt)).min(self.max_delay)
    }

    /// Pick the delay before the next attempt. A server-supplied
    /// Retry-After wins over exponential backoff, capped either way.
    fn next_delay(&self, error: &ProviderError, attempt: u32) -> Duration {
        match error {
            ProviderError::RateLimited {
                retry_after: Some(wait),
                ..
            } => (*wait).min(self.max_delay),
            _ => self.delay_for(attempt),
        }
    }
}

// ============================================================================
// Ollama Provider
// ============================================================================

/// Generation provider backed by a local Ollama server.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    api_mode: ApiMode,
    temperature: Option<f32>,
    retry: RetryPolicy,
}

impl OllamaProvider {
    #[must_use]
    pub fn new(
        client: Client,
        base_url: String,
        model: String,
        api_mode: ApiMode,
        temperature: Option<f32>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_mode,
            temperature,
            retry,
        }
    }

    fn endpoint(&self) -> String {
        match self.api_mode {
            ApiMode::Generate => format!("{}/api/generate", self.base_url),
            ApiMode::Chat => format!("{}/api/chat", self.base_url),
        }
    }

    fn body(&self, request: &GenerationRequest, stream: bool) -> serde_json::Value {
        let mut body = match self.api_mode {
            ApiMode::Generate => serde_json::json!({
                "model": self.model,
                "prompt": render_prompt(&request.context, &request.user_text),
                "stream": stream,
            }),
            ApiMode::Chat => serde_json::json!({
                "model": self.model,
                "messages": render_messages(&request.context, &request.user_text),
                "stream": stream,
            }),
        };
        if let Some(t) = self.temperature {
            body["options"] = serde_json::json!({ "temperature": t });
        }
        body
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response, ProviderError> {
        let url = self.endpoint();
        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound {
                message: format!("backend endpoint not found: {url}"),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::RateLimited {
                message,
                retry_after,
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    /// Send with retries on transient failures (429, 5xx, transport errors).
    async fn send_with_retry(
        &self,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.send(body).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.next_delay(&e, attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Backend request failed, retrying"
                    );
                    let jitter = delay.mul_f64(rand::random::<f64>() * 0.1);
                    tokio::time::sleep(delay + jitter).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl GenerationProvider for OllamaProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult, ProviderError> {
        let body = self.body(&request, false);
        let response = self.send_with_retry(&body).await?;
        let mut payload: ResponseLine = response.json().await?;

        if let Some(message) = payload.error.take() {
            return Err(ProviderError::Api {
                status: 500,
                message,
            });
        }

        Ok(payload.into_result(&self.model))
    }

    async fn generate_stream(&self, request: GenerationRequest) -> Result<ChunkStream, ProviderError> {
        let body = self.body(&request, true);
        let response = self.send_with_retry(&body).await?;

        let byte_stream = response.bytes_stream();
        let line_stream = NdjsonLineStream::new(byte_stream);

        Ok(Box::pin(OllamaStreamAdapter::new(line_stream)))
    }

    async fn check_ready(&self) -> Result<(), ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: "backend readiness check failed".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Prompt Rendering
// ============================================================================

fn render_prompt(context: &[Turn], user_text: &str) -> String {
    let mut prompt = String::new();
    for turn in context {
        let label = match turn.role {
            TurnRole::User => "User",
            TurnRole::Assistant => "Assistant",
        };
        prompt.push_str(label);
        prompt.push_str(": ");
        prompt.push_str(&turn.text);
        prompt.push('\n');
    }
    prompt.push_str("User: ");
    prompt.push_str(user_text);
    prompt.push_str("\nAssistant:");
    prompt
}

fn render_messages(context: &[Turn], user_text: &str) -> Vec<serde_json::Value> {
    let mut messages: Vec<serde_json::Value> = context
        .iter()
        .map(|turn| serde_json::json!({ "role": turn.role.to_string(), "content": turn.text }))
        .collect();
    messages.push(serde_json::json!({ "role": "user", "content": user_text }));
    messages
}

// ============================================================================
// Response Decoding
// ============================================================================

/// One Ollama response payload, covering both API shapes. Non-streaming
/// responses and NDJSON stream lines use the same fields.
#[derive(Debug, Deserialize)]
struct ResponseLine {
    /// Text piece in `/api/generate` shape.
    response: Option<String>,
    /// Text piece in `/api/chat` shape.
    message: Option<ChatMessage>,
    model: Option<String>,
    #[serde(default)]
    done: bool,
    /// In-band error, sent by Ollama even on 200 responses.
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl ResponseLine {
    fn text(self) -> String {
        if let Some(message) = self.message {
            return message.content;
        }
        self.response.unwrap_or_default()
    }

    /// Build a complete generation result, falling back to the configured
    /// model name when the backend omits one.
    fn into_result(self, fallback_model: &str) -> GenerationResult {
        let ResponseLine {
            response,
            message,
            model,
            ..
        } = self;
        let text = match message {
            Some(message) => message.content,
            None => response.unwrap_or_default(),
        };
        GenerationResult {
            text,
            model: model.unwrap_or_else(|| fallback_model.to_string()),
        }
    }
}

// ============================================================================
// Stream Adapter
// ============================================================================

/// Converts NDJSON lines into sequenced generation chunks.
struct OllamaStreamAdapter<S> {
    inner: NdjsonLineStream<S>,
    next_seq: u64,
    done: bool,
}

impl<S> OllamaStreamAdapter<S> {
    fn new(inner: NdjsonLineStream<S>) -> Self {
        Self {
            inner,
            next_seq: 0,
            done: false,
        }
    }

    fn emit(&mut self, text: String, is_final: bool) -> GenerationChunk {
        let seq = self.next_seq;
        self.next_seq += 1;
        GenerationChunk {
            seq,
            text,
            is_final,
        }
    }
}

impl<S> Stream for OllamaStreamAdapter<S>
where
    S: Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Unpin,
{
    type Item = Result<GenerationChunk, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(line))) => {
                    let mut payload = match serde_json::from_str::<ResponseLine>(&line) {
                        Ok(payload) => payload,
                        Err(e) => {
                            debug!(line = %line, error = %e, "failed to parse stream line");
                            continue;
                        }
                    };

                    if let Some(message) = payload.error.take() {
                        self.done = true;
                        return Poll::Ready(Some(Err(ProviderError::Api {
                            status: 500,
                            message,
                        })));
                    }

                    let is_final = payload.done;
                    let text = payload.text();

                    if is_final {
                        self.done = true;
                        return Poll::Ready(Some(Ok(self.emit(text, true))));
                    }

                    if text.is_empty() {
                        continue;
                    }

                    return Poll::Ready(Some(Ok(self.emit(text, false))));
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(ProviderError::Request(e))));
                }
                Poll::Ready(None) => {
                    // Stream ended without a done marker; close it out so
                    // consumers always see a final chunk.
                    self.done = true;
                    return Poll::Ready(Some(Ok(self.emit(String::new(), true))));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
