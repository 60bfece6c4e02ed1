//! Request-processing pipeline for Atlas Cortex
//!
//! The driver runs every request through the layered sequence: context
//! assembly, input guardrails, instant resolution, action dispatch,
//! generation, output guardrails, then logging and the COLD memory
//! enqueue. The orchestrator masks model latency with a prefetched filler
//! and survives context-window overflow with silent continuations.

mod context;
mod dedup;
mod driver;
mod interaction;
mod interrupt;
mod orchestrator;

pub use context::{
    AssembleInputs, AssembledPrompt, ContextAssembler, ContextCheckpoint, ConversationState, Turn,
};
pub use dedup::{dedup_sentences, DedupOutcome};
pub use driver::{PipelineDriver, RequestInput, TransportKind};
pub use interaction::{InteractionLog, InteractionRecord};
pub use interrupt::{classify_interruption, InterruptKind};
pub use orchestrator::{GenerationOrchestrator, GenerationOutcome, GenerationRequest};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Context assembly error: {0}")]
    Context(String),

    #[error("Output channel closed")]
    ChannelClosed,
}

impl From<cortex_providers::ProviderError> for PipelineError {
    fn from(err: cortex_providers::ProviderError) -> Self {
        PipelineError::Provider(err.to_string())
    }
}

impl From<PipelineError> for cortex_core::Error {
    fn from(err: PipelineError) -> Self {
        cortex_core::Error::Pipeline(err.to_string())
    }
}
