//! Provider layer for Atlas Cortex
//!
//! Owns the set of LLM, embedding, and TTS providers and resolves a
//! provider for a named role (fast / standard / thinking / embed / tts).
//! Backends implement the capability-tagged [`Provider`] contract; the
//! registry checks compatibility at registration, runs periodic health
//! checks, and falls back through an ordered candidate list.

mod embedder;
mod factory;
mod ollama;
mod openai;
mod provider;
mod registry;
mod simple_tts;

pub use embedder::HashEmbedder;
pub use factory::build_registry;
pub use ollama::{OllamaBackend, OllamaConfig};
pub use openai::{OpenAiBackend, OpenAiConfig};
pub use provider::{Capabilities, Provider, SpeechFrame, SpeechRequest, VoiceInfo};
pub use registry::{ProviderRegistry, Role, RoleBinding};
pub use simple_tts::SimpleTts;

use thiserror::Error;

/// Provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Operation not supported by provider {0}")]
    Unsupported(String),

    #[error("No provider available for role {0}")]
    NoProvider(String),

    #[error("Generation cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Transient failures are retried with backoff and then failed over;
    /// permanent ones fail over immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Network(_) | ProviderError::Timeout)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

impl From<ProviderError> for cortex_core::Error {
    fn from(err: ProviderError) -> Self {
        cortex_core::Error::Provider(err.to_string())
    }
}
