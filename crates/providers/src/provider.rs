//! Provider contract
//!
//! Providers are tagged variants over a capability set; callers query
//! capabilities before dispatch. Operations a backend does not support
//! return [`ProviderError::Unsupported`] from the default impls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use cortex_core::{ChatOptions, GenerationResult, Message, StreamChunk};

use crate::ProviderError;

/// Operations a provider claims to support
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub chat: bool,
    pub streaming: bool,
    pub embeddings: bool,
    pub synthesis: bool,
    pub phonemes: bool,
    pub emotion: bool,
    pub thinking: bool,
}

impl Capabilities {
    pub fn chat_streaming() -> Self {
        Self { chat: true, streaming: true, ..Default::default() }
    }
}

/// A voice offered by a synthesis provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub id: String,
    pub name: String,
    pub language: String,
}

/// Speech synthesis request
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: String,
    /// Provider-specific emotion annotation, if the provider supports one
    pub emotion: Option<String>,
    /// Speaking rate multiplier (1.0 = normal)
    pub speed: f32,
    /// Emit timed phonemes alongside audio
    pub include_phonemes: bool,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: voice.into(),
            emotion: None,
            speed: 1.0,
            include_phonemes: false,
        }
    }
}

/// One frame of a synthesis stream
#[derive(Debug, Clone)]
pub enum SpeechFrame {
    Audio { pcm: Arc<[i16]>, sample_rate: u32 },
    Phoneme { start_ms: u32, end_ms: u32, phoneme: String },
    Done,
}

/// Provider contract
///
/// Backends are shared across all requests; per-request state (streaming
/// cursors, token counters) lives on the request task, never here.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider name used in logs and health tables
    fn name(&self) -> &str;

    /// Capability set; callers must check before dispatch
    fn capabilities(&self) -> Capabilities;

    /// Single-shot chat completion
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<GenerationResult, ProviderError> {
        let _ = (model, messages, options);
        Err(ProviderError::Unsupported(self.name().to_string()))
    }

    /// Streaming chat completion. Tokens flow through `tx`; dropping the
    /// receiver cancels generation and the call returns with
    /// `FinishReason::Cancelled`.
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        options: &ChatOptions,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<GenerationResult, ProviderError> {
        let _ = (model, messages, options, tx);
        Err(ProviderError::Unsupported(self.name().to_string()))
    }

    /// Embed a text into a dense vector
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
        let _ = (model, text);
        Err(ProviderError::Unsupported(self.name().to_string()))
    }

    /// Stream synthesized speech frames
    async fn synthesize(
        &self,
        request: &SpeechRequest,
        tx: mpsc::Sender<SpeechFrame>,
    ) -> Result<(), ProviderError> {
        let _ = (request, tx);
        Err(ProviderError::Unsupported(self.name().to_string()))
    }

    /// Voices offered by this provider
    async fn list_voices(&self) -> Result<Vec<VoiceInfo>, ProviderError> {
        Err(ProviderError::Unsupported(self.name().to_string()))
    }

    /// Liveness probe; failures mark the provider unhealthy for its roles
    async fn health(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ChatOnly;

    #[async_trait]
    impl Provider for ChatOnly {
        fn name(&self) -> &str {
            "chat-only"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::chat_streaming()
        }

        async fn health(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn unsupported_ops_are_rejected() {
        let p = ChatOnly;
        assert!(matches!(
            p.embed("m", "text").await,
            Err(ProviderError::Unsupported(_))
        ));
        assert!(matches!(p.list_voices().await, Err(ProviderError::Unsupported(_))));
    }

    #[test]
    fn capability_shortcut() {
        let c = Capabilities::chat_streaming();
        assert!(c.chat && c.streaming);
        assert!(!c.embeddings && !c.synthesis);
    }
}
