//! Reranker hook
//!
//! The HOT path optionally reranks the fused top-N with a cross-encoder
//! before cutting to K. No local inference stack ships by default, so the
//! pass-through impl keeps the fused order.

use async_trait::async_trait;

use crate::hot::MemoryHit;

/// Rerank hook over the fused candidates
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, hits: Vec<MemoryHit>) -> Vec<MemoryHit>;
}

/// Keeps the fused order
#[derive(Debug, Default)]
pub struct NoopReranker;

#[async_trait]
impl Reranker for NoopReranker {
    async fn rerank(&self, _query: &str, hits: Vec<MemoryHit>) -> Vec<MemoryHit> {
        hits
    }
}
