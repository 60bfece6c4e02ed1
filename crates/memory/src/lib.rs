//! Hybrid retrieval memory for Atlas Cortex
//!
//! Two paths over a shared index:
//! - **HOT** (read, synchronous): dense vector + BM25 sparse search fused
//!   with reciprocal rank fusion, access-filtered, supersedes-aware. Never
//!   writes and never fails the request.
//! - **COLD** (write, asynchronous): a queued consumer that redacts PII,
//!   classifies events, deduplicates by content hash, and upserts both
//!   indexes atomically. Replay-safe via a journal.

mod cold;
mod decider;
mod dense;
mod fusion;
mod hot;
mod record;
mod redactor;
mod rerank;
mod sparse;
mod store;

pub use cold::{ColdWorker, MemoryEvent};
pub use decider::{DecidedMemory, MemoryDecider};
pub use dense::DenseIndex;
pub use fusion::rrf_fuse;
pub use hot::{HotQueryOptions, MemoryHit};
pub use record::{content_hash, record_id, AccessLevel, MemoryRecord, MemorySource, MemoryType};
pub use redactor::PiiRedactor;
pub use rerank::{NoopReranker, Reranker};
pub use sparse::SparseIndex;
pub use store::{MemoryStore, MemoryStoreConfig};

use thiserror::Error;

/// Memory subsystem errors
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Queue closed")]
    QueueClosed,
}

impl From<MemoryError> for cortex_core::Error {
    fn from(err: MemoryError) -> Self {
        cortex_core::Error::Memory(err.to_string())
    }
}
