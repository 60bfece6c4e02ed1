//! Chat message and streaming types
//!
//! Shared by every provider backend and the generation orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Per-call generation options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Sampling temperature
    pub temperature: f32,
    /// Top-p sampling
    pub top_p: f32,
    /// Maximum tokens to generate (the generation reserve)
    pub max_tokens: usize,
    /// Stop sequences
    #[serde(default)]
    pub stop: Vec<String>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 2048,
            stop: Vec::new(),
        }
    }
}

/// Why a generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    /// Natural end of message
    Stop,
    /// Hit the generation reserve; more content was pending
    Length,
    /// Caller cancelled mid-stream
    Cancelled,
    /// Backend error after partial output
    Error,
}

/// One chunk of a token stream
#[derive(Debug, Clone)]
pub struct StreamChunk {
    /// Token text (may be empty on the terminal chunk)
    pub text: String,
    /// Terminal chunk marker
    pub done: bool,
    /// Set on the terminal chunk
    pub finish: Option<FinishReason>,
}

/// Token accounting from a completed call
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

/// Result of a completed generation
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// Full generated text
    pub text: String,
    /// Token accounting
    pub usage: TokenUsage,
    /// Time to first token in milliseconds
    pub time_to_first_token_ms: u64,
    /// Total wall time in milliseconds
    pub total_time_ms: u64,
    /// Why generation stopped
    pub finish_reason: FinishReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_display_is_lowercase() {
        assert_eq!(Role::System.to_string(), "system");
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }

    #[test]
    fn chat_options_default() {
        let opts = ChatOptions::default();
        assert_eq!(opts.max_tokens, 2048);
        assert!(opts.stop.is_empty());
    }

    #[test]
    fn message_constructors() {
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.content, "hello");
    }
}
