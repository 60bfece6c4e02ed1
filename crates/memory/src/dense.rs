//! In-process dense vector index
//!
//! Shared readers / single writer: the HOT path takes read locks, the
//! COLD consumer is the only writer. Brute-force cosine scan is adequate
//! for per-household memory volumes; the snapshot file doubles as the
//! vector index directory of the persisted state layout.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::MemoryError;

/// One scored candidate from the dense search
#[derive(Debug, Clone)]
pub struct DenseResult {
    pub id: String,
    pub score: f32,
}

#[derive(Default, Serialize, Deserialize)]
struct DenseSnapshot {
    vectors: HashMap<String, Vec<f32>>,
}

/// Cosine-similarity vector index
pub struct DenseIndex {
    vectors: RwLock<HashMap<String, Vec<f32>>>,
}

impl DenseIndex {
    pub fn new() -> Self {
        Self { vectors: RwLock::new(HashMap::new()) }
    }

    /// Load a snapshot written by [`DenseIndex::snapshot`]
    pub fn load(path: &Path) -> Result<Self, MemoryError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| MemoryError::Index(format!("snapshot read: {}", e)))?;
        let snapshot: DenseSnapshot = serde_json::from_str(&data)
            .map_err(|e| MemoryError::Index(format!("snapshot parse: {}", e)))?;
        Ok(Self { vectors: RwLock::new(snapshot.vectors) })
    }

    /// Write the index to disk
    pub fn snapshot(&self, path: &Path) -> Result<(), MemoryError> {
        let snapshot = DenseSnapshot { vectors: self.vectors.read().clone() };
        let data = serde_json::to_string(&snapshot)
            .map_err(|e| MemoryError::Index(format!("snapshot encode: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MemoryError::Index(format!("snapshot dir: {}", e)))?;
        }
        std::fs::write(path, data)
            .map_err(|e| MemoryError::Index(format!("snapshot write: {}", e)))?;
        Ok(())
    }

    /// Insert or replace a vector
    pub fn upsert(&self, id: &str, embedding: Vec<f32>) {
        self.vectors.write().insert(id.to_string(), embedding);
    }

    pub fn remove(&self, id: &str) {
        self.vectors.write().remove(id);
    }

    pub fn len(&self) -> usize {
        self.vectors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.read().is_empty()
    }

    /// Top-N by cosine similarity, best first
    pub fn search(&self, query: &[f32], top_n: usize) -> Vec<DenseResult> {
        let vectors = self.vectors.read();
        let mut scored: Vec<DenseResult> = vectors
            .iter()
            .map(|(id, v)| DenseResult { id: id.clone(), score: cosine(query, v) })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_n);
        scored
    }
}

impl Default for DenseIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_ranks_by_similarity() {
        let index = DenseIndex::new();
        index.upsert("a", vec![1.0, 0.0, 0.0]);
        index.upsert("b", vec![0.0, 1.0, 0.0]);
        index.upsert("c", vec![0.9, 0.1, 0.0]);

        let results = index.search(&[1.0, 0.0, 0.0], 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[1].id, "c");
    }

    #[test]
    fn upsert_replaces() {
        let index = DenseIndex::new();
        index.upsert("a", vec![1.0, 0.0]);
        index.upsert("a", vec![0.0, 1.0]);
        assert_eq!(index.len(), 1);
        let results = index.search(&[0.0, 1.0], 1);
        assert!(results[0].score > 0.99);
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.json");

        let index = DenseIndex::new();
        index.upsert("a", vec![0.5, 0.5]);
        index.snapshot(&path).unwrap();

        let restored = DenseIndex::load(&path).unwrap();
        assert_eq!(restored.len(), 1);
    }

    #[test]
    fn mismatched_dims_score_zero() {
        assert_eq!(cosine(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    }
}
