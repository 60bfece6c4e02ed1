//! Ollama backend
//!
//! Chat via `/api/chat` (NDJSON streaming), embeddings via
//! `/api/embeddings`. Transient failures are retried with exponential
//! backoff; 4xx responses fail immediately.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use cortex_core::{ChatOptions, FinishReason, GenerationResult, Message, StreamChunk, TokenUsage};

use crate::provider::{Capabilities, Provider};
use crate::ProviderError;

/// Ollama backend configuration
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// API endpoint
    pub endpoint: String,
    /// Request timeout
    pub timeout: Duration,
    /// Maximum retry attempts for transient failures
    pub max_retries: u32,
    /// Initial backoff duration, doubled each retry
    pub initial_backoff: Duration,
    /// Keep the model loaded between calls ("5m", "1h", "-1", "0")
    pub keep_alive: String,
    /// Advertise the thinking capability (long-context reasoning models)
    pub thinking: bool,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            timeout: Duration::from_secs(cortex_config::constants::providers::CHAT_TIMEOUT_SECS),
            max_retries: cortex_config::constants::providers::MAX_RETRIES,
            initial_backoff: Duration::from_millis(
                cortex_config::constants::providers::INITIAL_BACKOFF_MS,
            ),
            keep_alive: "5m".to_string(),
            thinking: false,
        }
    }
}

/// Ollama chat + embeddings backend
#[derive(Clone)]
pub struct OllamaBackend {
    client: Client,
    config: OllamaConfig,
}

impl OllamaBackend {
    pub fn new(config: OllamaConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn build_request(
        &self,
        model: &str,
        messages: &[Message],
        options: &ChatOptions,
        stream: bool,
    ) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: messages.iter().map(WireMessage::from).collect(),
            stream,
            options: Some(WireOptions {
                temperature: Some(options.temperature),
                top_p: Some(options.top_p),
                num_predict: Some(options.max_tokens as i32),
                stop: if options.stop.is_empty() { None } else { Some(options.stop.clone()) },
            }),
            keep_alive: Some(self.config.keep_alive.clone()),
        }
    }

    async fn execute_chat(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let response = self
            .client
            .post(self.api_url("/chat"))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            // 5xx is retryable, 4xx is not.
            if status.is_server_error() {
                return Err(ProviderError::Network(format!("server error {}: {}", status, error)));
            }
            return Err(ProviderError::Api(error));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl Provider for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            chat: true,
            streaming: true,
            embeddings: true,
            thinking: self.config.thinking,
            ..Default::default()
        }
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<GenerationResult, ProviderError> {
        let start = std::time::Instant::now();
        let request = self.build_request(model, messages, options, false);

        let mut last_error = None;
        let mut backoff = self.config.initial_backoff;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(
                    attempt,
                    max = self.config.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Ollama chat failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.execute_chat(&request).await {
                Ok(result) => {
                    let total_time = start.elapsed();
                    return Ok(GenerationResult {
                        text: result.message.content,
                        usage: TokenUsage {
                            prompt_tokens: result.prompt_eval_count.unwrap_or(0) as usize,
                            completion_tokens: result.eval_count.unwrap_or(0) as usize,
                        },
                        time_to_first_token_ms: result.prompt_eval_duration.unwrap_or(0)
                            / 1_000_000,
                        total_time_ms: total_time.as_millis() as u64,
                        finish_reason: if result.done_reason.as_deref() == Some("length") {
                            FinishReason::Length
                        } else {
                            FinishReason::Stop
                        },
                    });
                }
                Err(e) if e.is_transient() => {
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::Network("max retries exceeded".into())))
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        options: &ChatOptions,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<GenerationResult, ProviderError> {
        let start = std::time::Instant::now();
        let mut first_token_time = None;
        let mut total_tokens = 0usize;
        let mut full_response = String::new();

        let request = self.build_request(model, messages, options, true);

        let response = self
            .client
            .post(self.api_url("/chat"))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(error));
        }

        let mut stream = response.bytes_stream();
        let mut finish = FinishReason::Stop;

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let text = String::from_utf8_lossy(&chunk);

            // NDJSON: one object per line.
            for line in text.lines() {
                if line.is_empty() {
                    continue;
                }
                let Ok(parsed) = serde_json::from_str::<StreamChunkWire>(line) else {
                    continue;
                };

                if first_token_time.is_none() {
                    first_token_time = Some(start.elapsed());
                }

                let token = parsed.message.content;
                if !token.is_empty() {
                    full_response.push_str(&token);
                    total_tokens += 1;

                    if tx
                        .send(StreamChunk { text: token, done: false, finish: None })
                        .await
                        .is_err()
                    {
                        // Receiver dropped: generation cancelled.
                        finish = FinishReason::Cancelled;
                        break 'outer;
                    }
                }

                if parsed.done {
                    if parsed.done_reason.as_deref() == Some("length") {
                        finish = FinishReason::Length;
                    }
                    break 'outer;
                }
            }
        }

        let _ = tx
            .send(StreamChunk { text: String::new(), done: true, finish: Some(finish) })
            .await;

        let total_time = start.elapsed();
        Ok(GenerationResult {
            text: full_response,
            usage: TokenUsage { prompt_tokens: 0, completion_tokens: total_tokens },
            time_to_first_token_ms: first_token_time.map(|t| t.as_millis() as u64).unwrap_or(0),
            total_time_ms: total_time.as_millis() as u64,
            finish_reason: finish,
        })
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
        let request = EmbedRequest { model: model.to_string(), prompt: text.to_string() };

        let response = self
            .client
            .post(self.api_url("/embeddings"))
            .timeout(Duration::from_secs(
                cortex_config::constants::providers::EMBED_TIMEOUT_SECS,
            ))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(error));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(parsed.embedding)
    }

    async fn health(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.config.endpoint.trim_end_matches('/')))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

// Wire types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<WireOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        Self { role: msg.role.to_string(), content: msg.content.clone() }
    }
}

#[derive(Debug, Serialize)]
struct WireOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: WireMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    prompt_eval_duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StreamChunkWire {
    message: WireMessage,
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}
