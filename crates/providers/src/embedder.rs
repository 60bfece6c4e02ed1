//! In-process fallback embedder
//!
//! Deterministic normalized char-hash embedding of a configurable
//! dimension. Used when no `embed` role has a network backend; the
//! registry substitutes this so the HOT path always has a vectorizer of a
//! compatible dimension.

use async_trait::async_trait;

use crate::provider::{Capabilities, Provider};
use crate::ProviderError;

/// Hash-based embedder
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Embed a text; identical inputs give identical vectors.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dim];

        for (i, c) in text.to_lowercase().chars().enumerate() {
            let idx = (c as usize).wrapping_add(i) % self.dim;
            embedding[idx] += 1.0;
            // A second position-insensitive bucket keeps word overlap visible.
            let idx2 = (c as usize).wrapping_mul(31) % self.dim;
            embedding[idx2] += 0.5;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl Provider for HashEmbedder {
    fn name(&self) -> &str {
        "hash-embedder"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { embeddings: true, ..Default::default() }
    }

    async fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(self.embed_sync(text))
    }

    async fn health(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_normalized() {
        let embedder = HashEmbedder::new(384);
        let v = embedder.embed_sync("hello world");
        assert_eq!(v.len(), 384);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[test]
    fn embedding_is_deterministic() {
        let embedder = HashEmbedder::new(128);
        assert_eq!(embedder.embed_sync("same text"), embedder.embed_sync("same text"));
    }

    #[test]
    fn similar_texts_score_higher_than_disjoint() {
        let embedder = HashEmbedder::new(384);
        let a = embedder.embed_sync("the lights in the living room");
        let b = embedder.embed_sync("living room lights");
        let c = embedder.embed_sync("quantum field theory seminar");

        let dot = |x: &[f32], y: &[f32]| -> f32 { x.iter().zip(y).map(|(a, b)| a * b).sum() };
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let embedder = HashEmbedder::new(64);
        let v = embedder.embed_sync("");
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
