//! Core types for the Atlas Cortex request-processing core
//!
//! This crate provides the foundational types used across all other crates:
//! - Chat message and streaming types shared by every provider backend
//! - The response frame alphabet emitted to callers
//! - Deterministic sentiment analysis (no model call)
//! - Age group and content tier policy mapping
//! - Token estimation shared by all budget math
//! - The workspace error type

pub mod error;
pub mod frame;
pub mod message;
pub mod sentiment;
pub mod tier;
pub mod tokens;

pub use error::{Error, Result};
pub use frame::{MatchedLayer, ResponseFrame};
pub use message::{
    ChatOptions, FinishReason, GenerationResult, Message, Role, StreamChunk, TokenUsage,
};
pub use sentiment::{Sentiment, SentimentAnalyzer, SentimentLabel};
pub use tier::{AgeGroup, ContentTier, IDENTITY_CONFIDENCE_FLOOR};
pub use tokens::estimate_tokens;
