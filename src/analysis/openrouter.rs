//! OpenRouter chat-completions client (OpenAI-compatible wire format).
//! Connection pooling via reqwest, manual SSE parsing, simple interval
//! rate limiting, and the retry policy shared by every request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::prompt::ChatMessage;
use crate::config::LlmConfig;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("OPENROUTER_API_KEY environment variable not set")]
    MissingApiKey,
    #[error("API error: {0}")]
    Api(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("completion request timed out")]
    Timeout,
    #[error("completion cancelled")]
    Cancelled,
    #[error("model returned an empty completion")]
    EmptyCompletion,
}

/// Receiver for streamed completion text.
pub type ChunkSink = dyn for<'c> Fn(&'c str) + Send + Sync;

/// A finished completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u32,
    pub elapsed_ms: f64,
}

/// Anything that can turn chat messages into a completion.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Model identifier; part of analysis cache keys.
    fn model(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> Result<Completion, LlmError>;

    /// Like `complete`, reporting text incrementally through `on_chunk`.
    /// Backends without a streaming transport deliver the whole text once.
    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
        on_chunk: &ChunkSink,
    ) -> Result<Completion, LlmError> {
        let completion = self.complete(messages, cancel).await?;
        on_chunk(&completion.text);
        Ok(completion)
    }
}

/// OpenRouter chat/completions client.
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    /// Tracks the next allowed request time.
    next_allowed: Arc<tokio::sync::Mutex<Instant>>,
    min_interval: Duration,
}

impl OpenRouterClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        if config.api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LlmError::Api(e.to_string()))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            next_allowed: Arc::new(tokio::sync::Mutex::new(Instant::now())),
            min_interval: config.min_interval,
        })
    }

    fn request_body(&self, messages: &[ChatMessage], stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "stream": stream,
        })
    }

    /// Wait until the rate limiter allows a request.
    async fn rate_limit_wait(&self) {
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep(*next - now).await;
        }
        *next = Instant::now() + self.min_interval;
    }

    /// Stream a completion over SSE. `on_chunk` receives content deltas
    /// batched roughly every 40ms.
    async fn stream_sse(
        &self,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
        on_chunk: &ChunkSink,
    ) -> Result<Completion, LlmError> {
        self.rate_limit_wait().await;
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }

        let start = Instant::now();
        let body = self.request_body(messages, true);
        let response = self.send_with_retry(&body, cancel).await?;

        let mut full_text = String::new();
        let mut batch_buf = String::new();
        let mut last_flush = Instant::now();
        let mut tokens_used: u32 = 0;
        let flush_interval = Duration::from_millis(40);

        let mut stream = response.bytes_stream();
        // Raw bytes carried across network chunks; only whole lines are decoded.
        let mut line_buf: Vec<u8> = Vec::new();

        while let Some(chunk_result) = tokio::select! {
            chunk = stream.next() => chunk,
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
        } {
            let bytes = chunk_result.map_err(|e| LlmError::Api(e.to_string()))?;
            line_buf.extend_from_slice(&bytes);

            while let Some(newline_pos) = line_buf.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = line_buf.drain(..=newline_pos).collect();
                let line = String::from_utf8_lossy(&raw);
                match parse_sse_line(line.trim()) {
                    SseEvent::Delta { content, usage } => {
                        if let Some(content) = content {
                            full_text.push_str(&content);
                            batch_buf.push_str(&content);
                        }
                        if let Some(total) = usage {
                            tokens_used = total;
                        }
                    }
                    SseEvent::Done => {
                        if !batch_buf.is_empty() {
                            on_chunk(&batch_buf);
                            batch_buf.clear();
                        }
                    }
                    SseEvent::Ignored => {}
                }
            }

            if !batch_buf.is_empty() && last_flush.elapsed() >= flush_interval {
                on_chunk(&batch_buf);
                batch_buf.clear();
                last_flush = Instant::now();
            }
        }

        if !batch_buf.is_empty() {
            on_chunk(&batch_buf);
        }
        if full_text.trim().is_empty() {
            return Err(LlmError::EmptyCompletion);
        }

        Ok(Completion {
            text: full_text,
            tokens_used,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Send request with retry logic.
    /// 429: Retry-After or 1s/2s/4s (max 3).
    /// 5xx: exponential backoff (max 2).
    /// Timeout: immediate retry once.
    async fn send_with_retry(
        &self,
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, LlmError> {
        let mut attempt: u32 = 0;
        let max_429_retries: u32 = 3;
        let max_5xx_retries: u32 = 2;
        let mut timeout_retried = false;

        loop {
            let result = self
                .http
                .post(format!("{}/v1/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .header("X-Title", "clausewise")
                .json(body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().as_u16() == 429 => {
                    let wait = retry_after(&resp).unwrap_or_else(|| Duration::from_secs(1 << attempt));
                    if attempt >= max_429_retries {
                        return Err(LlmError::RateLimited {
                            retry_after_ms: wait.as_millis() as u64,
                        });
                    }
                    warn!(attempt, wait_ms = wait.as_millis() as u64, "429 rate limited, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                    }
                    attempt += 1;
                }
                Ok(resp) if resp.status().is_server_error() => {
                    if attempt >= max_5xx_retries {
                        return Err(LlmError::Api(format!("server error: {}", resp.status())));
                    }
                    let wait = Duration::from_millis(500 * (1 << attempt));
                    warn!(
                        attempt,
                        status = resp.status().as_u16(),
                        wait_ms = wait.as_millis() as u64,
                        "5xx error, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                    }
                    attempt += 1;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body_text = resp.text().await.unwrap_or_default();
                    return Err(LlmError::Api(format!(
                        "unexpected status {}: {}",
                        status,
                        body_text.chars().take(200).collect::<String>()
                    )));
                }
                Err(e) if e.is_timeout() => {
                    if timeout_retried {
                        return Err(LlmError::Timeout);
                    }
                    warn!("request timeout, retrying once");
                    timeout_retried = true;
                }
                Err(e) => return Err(LlmError::Api(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenRouterClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> Result<Completion, LlmError> {
        self.rate_limit_wait().await;
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }

        let start = Instant::now();
        let body = self.request_body(messages, false);
        let response = self.send_with_retry(&body, cancel).await?;

        let parsed: CompletionResponse = tokio::select! {
            parsed = response.json() => parsed.map_err(|e| LlmError::Api(e.to_string()))?,
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
        };
        let completion = completion_from_response(parsed, start.elapsed())?;
        debug!(
            model = %self.model,
            tokens = completion.tokens_used,
            elapsed_ms = completion.elapsed_ms,
            "completion received"
        );
        Ok(completion)
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
        on_chunk: &ChunkSink,
    ) -> Result<Completion, LlmError> {
        self.stream_sse(messages, cancel, on_chunk).await
    }
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn completion_from_response(
    parsed: CompletionResponse,
    elapsed: Duration,
) -> Result<Completion, LlmError> {
    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|t| !t.trim().is_empty())
        .ok_or(LlmError::EmptyCompletion)?;
    Ok(Completion {
        text,
        tokens_used: parsed.usage.map_or(0, |u| u.total_tokens),
        elapsed_ms: elapsed.as_secs_f64() * 1000.0,
    })
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta {
        content: Option<String>,
        usage: Option<u32>,
    },
    Done,
    Ignored,
}

/// Interpret one trimmed SSE line. Comments (`: OPENROUTER PROCESSING`),
/// blank keep-alives and unparseable payloads are ignored.
fn parse_sse_line(line: &str) -> SseEvent {
    let Some(data) = line.strip_prefix("data:") else {
        return SseEvent::Ignored;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    match serde_json::from_str::<SseChunk>(data) {
        Ok(chunk) => SseEvent::Delta {
            content: chunk.choices.into_iter().next().and_then(|c| c.delta.content),
            usage: chunk.usage.map(|u| u.total_tokens),
        },
        Err(_) => SseEvent::Ignored,
    }
}

// --- Response types ---

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct SseChunk {
    choices: Vec<SseChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct SseChoice {
    delta: SseDelta,
}

#[derive(Deserialize)]
struct SseDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u32,
}
