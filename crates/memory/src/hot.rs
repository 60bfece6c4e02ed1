//! HOT path types
//!
//! Hits are ephemeral: a reference to the record plus the scores that
//! produced its rank. The HOT path never writes and never fails the
//! request; errors and deadline misses degrade to an empty hit list.

use crate::record::MemoryRecord;

/// One retrieval hit
#[derive(Debug, Clone)]
pub struct MemoryHit {
    pub record: MemoryRecord,
    /// Cosine similarity from the dense search, if listed there
    pub dense_score: Option<f32>,
    /// BM25 score from the sparse search, if listed there
    pub sparse_score: Option<f32>,
    /// Reciprocal rank fusion score
    pub fused_score: f32,
    /// Final 1-based rank
    pub rank: usize,
}

/// Per-query knobs, resolved from settings by the caller
#[derive(Debug, Clone)]
pub struct HotQueryOptions {
    /// Requesting user; `None` for anonymous
    pub requester: Option<String>,
    /// Identity confidence of the requester
    pub identity_confidence: f32,
    /// Final number of hits
    pub top_k: usize,
}

impl Default for HotQueryOptions {
    fn default() -> Self {
        Self {
            requester: None,
            identity_confidence: 0.0,
            top_k: cortex_config::constants::memory::DEFAULT_TOP_K,
        }
    }
}

impl HotQueryOptions {
    pub fn for_user(user_id: impl Into<String>, identity_confidence: f32) -> Self {
        Self {
            requester: Some(user_id.into()),
            identity_confidence,
            ..Default::default()
        }
    }
}
