//! Centralized policy constants
//!
//! Default values for every tunable threshold in the request-processing
//! core. Settings may override most of these; code must read the resolved
//! value from `Settings` where one exists.

/// Memory retrieval (HOT path)
pub mod memory {
    /// Candidates taken from each of the dense and sparse searches
    pub const CANDIDATE_TOP_N: usize = 50;
    /// Candidates passed to the optional reranker
    pub const RERANK_TOP_N: usize = 20;
    /// Final hits returned to the context assembler
    pub const DEFAULT_TOP_K: usize = 8;
    /// Reciprocal rank fusion constant
    pub const RRF_K: f32 = 60.0;
    /// Soft deadline for the whole HOT query (milliseconds)
    pub const HOT_SOFT_TIMEOUT_MS: u64 = 200;
    /// Hard deadline after which an empty hit list is returned
    pub const HOT_HARD_TIMEOUT_MS: u64 = 500;
    /// Bounded retries for a failed COLD event before it is dropped
    pub const COLD_MAX_RETRIES: u32 = 3;
    /// COLD queue capacity
    pub const COLD_QUEUE_CAPACITY: usize = 1024;
}

/// Guardrail engine
pub mod guardrails {
    /// Cosine similarity against attack exemplars that triggers a warn
    pub const SEMANTIC_THRESHOLD: f32 = 0.82;
    /// Maximum measured false-positive rate for admitting a learned pattern
    pub const FALSE_POSITIVE_CEILING: f32 = 0.01;
    /// Drift temperature added per warn event
    pub const DRIFT_WARN_STEP: f32 = 0.15;
    /// Drift temperature removed per benign turn
    pub const DRIFT_BENIGN_DECAY: f32 = 0.05;
    /// Drift decay per idle minute
    pub const DRIFT_IDLE_DECAY_PER_MIN: f32 = 0.02;
    /// Above this temperature an extra safety instruction is injected
    pub const DRIFT_SAFETY_CONTEXT: f32 = 0.7;
    /// Above this temperature the conversation is soft-blocked and reset
    pub const DRIFT_FORCE_BLOCK: f32 = 0.9;
    /// Learned patterns with zero hits are retired after this many days
    pub const PATTERN_RETENTION_DAYS: i64 = 30;
}

/// Emotional profile dynamics
pub mod rapport {
    /// Rapport delta for a positive-sentiment interaction
    pub const POSITIVE_STEP: f32 = 0.05;
    /// Rapport delta for a negative-sentiment interaction
    pub const NEGATIVE_STEP: f32 = 0.05;
    /// Linear decay per idle day
    pub const IDLE_DECAY_PER_DAY: f32 = 0.005;
    /// Initial rapport for a new profile
    pub const INITIAL: f32 = 0.5;
}

/// Filler selection
pub mod filler {
    /// Recently-used phrases excluded from the candidate pool
    pub const RECENCY_WINDOW: usize = 2;
    /// Predicted confidence below this appends a confidence filler
    pub const CONFIDENCE_FILLER_THRESHOLD: f32 = 0.8;
}

/// Generation orchestrator
pub mod orchestrator {
    /// Maximum overflow continuation cycles before forced dedup
    pub const MAX_CONTINUATIONS: usize = 3;
    /// Normalized sentence similarity at or above this is a duplicate
    pub const DEDUP_SIMILARITY: f32 = 0.85;
    /// Fraction of removed content that triggers a smoothing pass
    pub const SMOOTHING_THRESHOLD: f32 = 0.20;
    /// Absolute cap on total generated tokens per response
    pub const MAX_TOTAL_OUTPUT: usize = 8192;
}

/// Context assembly
pub mod context {
    /// Memory hits: fraction of free budget and absolute ceiling
    pub const MEMORY_FRACTION: f32 = 0.20;
    pub const MEMORY_CEILING: usize = 800;
    /// Active verbatim turns: fraction of free budget and absolute ceiling
    pub const ACTIVE_FRACTION: f32 = 0.60;
    pub const ACTIVE_CEILING: usize = 3000;
    /// Generation reserve floors
    pub const RESERVE_STANDARD: usize = 2048;
    pub const RESERVE_THINKING: usize = 4096;
    /// Compaction triggers on projected utilization
    pub const COMPACT_SUMMARIZE_AT: f32 = 0.60;
    pub const COMPACT_CHECKPOINT_AT: f32 = 0.80;
    /// Turns kept verbatim when a checkpoint absorbs the rest
    pub const CHECKPOINT_KEEP_TURNS: usize = 5;
    /// Default context windows (tokens)
    pub const WINDOW_DEFAULT: usize = 8192;
    pub const WINDOW_THINKING: usize = 32768;
}

/// Identity resolution
pub mod identity {
    /// Voice match at or above this is accepted outright
    pub const VOICE_ACCEPT: f32 = 0.85;
    /// Voice match at or above this (but below accept) is flagged low confidence
    pub const VOICE_TENTATIVE: f32 = 0.5;
}

/// Provider IO deadlines
pub mod providers {
    /// Outbound chat call timeout (seconds)
    pub const CHAT_TIMEOUT_SECS: u64 = 60;
    /// Embedding call timeout (seconds)
    pub const EMBED_TIMEOUT_SECS: u64 = 5;
    /// Health check cadence (seconds)
    pub const HEALTH_INTERVAL_SECS: u64 = 30;
    /// Retry attempts for transient failures
    pub const MAX_RETRIES: u32 = 3;
    /// Initial backoff, doubled each retry (milliseconds)
    pub const INITIAL_BACKOFF_MS: u64 = 100;
    /// Fallback in-process embedder dimension
    pub const EMBED_DIM: usize = 384;
}

/// Satellite gateway
pub mod gateway {
    /// Session closed after this many seconds without a heartbeat
    pub const HEARTBEAT_TIMEOUT_SECS: u64 = 30;
    /// Inbound audio format
    pub const AUDIO_IN_SAMPLE_RATE: u32 = 16_000;
    /// Outbound TTS format
    pub const TTS_OUT_SAMPLE_RATE: u32 = 22_050;
}
