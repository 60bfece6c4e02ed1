//! OpenAI-compatible backend
//!
//! Works with OpenAI itself and any server speaking the same chat
//! completions API (vLLM, LiteLLM, llama.cpp server). Streaming uses SSE
//! `data:` lines terminated by `[DONE]`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use cortex_core::{ChatOptions, FinishReason, GenerationResult, Message, Role, StreamChunk, TokenUsage};

use crate::provider::{Capabilities, Provider};
use crate::ProviderError;

/// Configuration for OpenAI-compatible backends
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API endpoint, e.g. `https://api.openai.com/v1`
    pub endpoint: String,
    /// API key; may be empty for localhost endpoints
    pub api_key: String,
    /// Request timeout
    pub timeout: Duration,
    /// Advertise the thinking capability
    pub thinking: bool,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(cortex_config::constants::providers::CHAT_TIMEOUT_SECS),
            thinking: false,
        }
    }
}

impl OpenAiConfig {
    /// Config for a local OpenAI-compatible server
    pub fn local(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), api_key: "not-needed".to_string(), ..Default::default() }
    }
}

/// OpenAI-compatible chat + embeddings backend
pub struct OpenAiBackend {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        if config.api_key.is_empty() && !config.endpoint.starts_with("http://localhost") {
            return Err(ProviderError::Configuration(
                "API key required for remote endpoints".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        use reqwest::header::HeaderValue;

        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", self.config.api_key);
        if let Ok(val) = HeaderValue::from_str(&auth) {
            headers.insert(reqwest::header::AUTHORIZATION, val);
        }
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers
    }

    fn wire_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                }
                .to_string(),
                content: m.content.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl Provider for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
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

        let request = ChatRequest {
            model: model.to_string(),
            messages: Self::wire_messages(messages),
            max_tokens: Some(options.max_tokens),
            temperature: Some(options.temperature),
            top_p: Some(options.top_p),
            stream: Some(false),
            stop: if options.stop.is_empty() { None } else { Some(options.stop.clone()) },
        };

        let response = self
            .client
            .post(self.url("/chat/completions"))
            .headers(self.headers())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(ProviderError::Network(format!("HTTP {}: {}", status, error_text)));
            }
            return Err(ProviderError::Api(format!("HTTP {}: {}", status, error_text)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let choice = parsed
            .choices
            .first()
            .ok_or_else(|| ProviderError::InvalidResponse("no choices in response".to_string()))?;

        let total_time_ms = start.elapsed().as_millis() as u64;
        Ok(GenerationResult {
            text: choice.message.content.clone(),
            usage: parsed
                .usage
                .map(|u| TokenUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                })
                .unwrap_or_default(),
            time_to_first_token_ms: total_time_ms,
            total_time_ms,
            finish_reason: match choice.finish_reason.as_deref() {
                Some("length") => FinishReason::Length,
                _ => FinishReason::Stop,
            },
        })
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        options: &ChatOptions,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<GenerationResult, ProviderError> {
        let start = std::time::Instant::now();
        let mut first_token_ms: Option<u64> = None;
        let mut full_text = String::new();
        let mut token_count = 0usize;
        let mut finish = FinishReason::Stop;

        let request = ChatRequest {
            model: model.to_string(),
            messages: Self::wire_messages(messages),
            max_tokens: Some(options.max_tokens),
            temperature: Some(options.temperature),
            top_p: Some(options.top_p),
            stream: Some(true),
            stop: if options.stop.is_empty() { None } else { Some(options.stop.clone()) },
        };

        let response = self
            .client
            .post(self.url("/chat/completions"))
            .headers(self.headers())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(format!("HTTP {}: {}", status, error_text)));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ProviderError::Network(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();

                if line.is_empty() || line == "data: [DONE]" {
                    continue;
                }

                let Some(json_str) = line.strip_prefix("data: ") else { continue };
                let Ok(parsed) = serde_json::from_str::<StreamChunkWire>(json_str) else {
                    continue;
                };
                let Some(choice) = parsed.choices.first() else { continue };

                if choice.finish_reason.as_deref() == Some("length") {
                    finish = FinishReason::Length;
                }

                if let Some(content) =
                    choice.delta.as_ref().and_then(|d| d.content.as_ref())
                {
                    if first_token_ms.is_none() {
                        first_token_ms = Some(start.elapsed().as_millis() as u64);
                    }
                    full_text.push_str(content);
                    token_count += 1;

                    if tx
                        .send(StreamChunk { text: content.clone(), done: false, finish: None })
                        .await
                        .is_err()
                    {
                        finish = FinishReason::Cancelled;
                        break 'outer;
                    }
                }
            }
        }

        let _ = tx
            .send(StreamChunk { text: String::new(), done: true, finish: Some(finish) })
            .await;

        let total_time_ms = start.elapsed().as_millis() as u64;
        Ok(GenerationResult {
            text: full_text,
            usage: TokenUsage { prompt_tokens: 0, completion_tokens: token_count },
            time_to_first_token_ms: first_token_ms.unwrap_or(total_time_ms),
            total_time_ms,
            finish_reason: finish,
        })
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
        let request = EmbedRequest { model: model.to_string(), input: text.to_string() };

        let response = self
            .client
            .post(self.url("/embeddings"))
            .headers(self.headers())
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

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::InvalidResponse("no embedding in response".to_string()))
    }

    async fn health(&self) -> bool {
        self.client
            .get(self.url("/models"))
            .headers(self.headers())
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
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    completion_tokens: usize,
    prompt_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct StreamChunkWire {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Debug, Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}
