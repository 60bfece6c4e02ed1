//! Adaptive jailbreak learner
//!
//! On a blocked event: extract a candidate regex from the trigger by
//! keeping structural intent words and wildcarding the specific nouns,
//! store the trigger as a semantic exemplar, and admit the candidate to
//! the active set only if its measured false-positive rate on the
//! known-good corpus stays under the policy ceiling.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use regex::Regex;

use cortex_providers::HashEmbedder;

use crate::known_good::known_good_corpus;
use crate::patterns::{JailbreakPattern, PatternSet};
use crate::GuardrailError;

/// Words preserved verbatim in extracted candidates. These carry the
/// attack's intent; everything else is interchangeable detail.
const STRUCTURAL_WORDS: &[&str] = &[
    "ignore", "disregard", "forget", "override", "bypass", "pretend", "act",
    "roleplay", "play", "game", "rules", "restrictions", "filters", "limits",
    "instructions", "guidelines", "system", "prompt", "developer", "mode",
    "jailbreak", "unfiltered", "unrestricted", "without", "no", "free",
    "you", "are", "be", "as", "an", "a", "any", "all", "your", "not",
];

/// A stored attack exemplar with its embedding
#[derive(Debug, Clone)]
pub struct Exemplar {
    pub text: String,
    pub embedding: Vec<f32>,
    pub cluster: usize,
}

/// Adaptive pattern learner and exemplar library
pub struct AdaptiveLearner {
    patterns: Arc<PatternSet>,
    embedder: HashEmbedder,
    exemplars: RwLock<Vec<Exemplar>>,
    /// Admission ceiling on the measured false-positive rate
    fp_ceiling: f32,
    semantic_threshold: f32,
}

impl AdaptiveLearner {
    pub fn new(patterns: Arc<PatternSet>, fp_ceiling: f32, semantic_threshold: f32) -> Self {
        Self {
            patterns,
            embedder: HashEmbedder::new(cortex_config::constants::providers::EMBED_DIM),
            exemplars: RwLock::new(Vec::new()),
            fp_ceiling,
            semantic_threshold,
        }
    }

    /// Seed the exemplar library with known attack texts
    pub fn seed_exemplars(&self, texts: &[&str]) {
        let mut exemplars = self.exemplars.write();
        for (i, text) in texts.iter().enumerate() {
            exemplars.push(Exemplar {
                text: text.to_string(),
                embedding: self.embedder.embed_sync(text),
                cluster: i,
            });
        }
    }

    /// Cosine similarity of the text to the nearest exemplar
    pub fn semantic_similarity(&self, text: &str) -> f32 {
        let embedding = self.embedder.embed_sync(text);
        self.exemplars
            .read()
            .iter()
            .map(|e| cosine(&embedding, &e.embedding))
            .fold(0.0, f32::max)
    }

    /// Does the text semantically resemble a known attack?
    pub fn semantic_match(&self, text: &str) -> bool {
        self.semantic_similarity(text) >= self.semantic_threshold
    }

    /// Learn from a blocked trigger. Returns the admitted pattern, or
    /// `None` when the candidate failed the admission gate.
    pub fn learn_from_block(&self, trigger: &str) -> Result<Option<String>, GuardrailError> {
        // Always keep the exemplar; semantic matching works even when the
        // extracted regex is rejected.
        {
            let mut exemplars = self.exemplars.write();
            let cluster = exemplars.len();
            exemplars.push(Exemplar {
                text: trigger.to_string(),
                embedding: self.embedder.embed_sync(trigger),
                cluster,
            });
        }

        let Some(candidate) = extract_candidate(trigger) else {
            return Ok(None);
        };

        let fp_rate = measure_false_positives(&candidate)?;
        if fp_rate >= self.fp_ceiling {
            tracing::info!(
                candidate = %candidate,
                fp_rate,
                ceiling = self.fp_ceiling,
                "candidate pattern rejected by admission gate"
            );
            metrics::counter!("guardrail_patterns_rejected").increment(1);
            return Ok(None);
        }

        self.patterns.admit(JailbreakPattern {
            pattern: candidate.clone(),
            source: "learned".to_string(),
            hit_count: 0,
            false_positive_count: 0,
            active: true,
            added_at: Utc::now(),
            last_hit: None,
        })?;
        metrics::counter!("guardrail_patterns_admitted").increment(1);
        tracing::info!(pattern = %candidate, fp_rate, "learned jailbreak pattern admitted");
        Ok(Some(candidate))
    }

    /// Periodic consolidation: merge near-duplicate exemplars and retire
    /// zero-hit learned patterns past the retention window.
    pub fn consolidate(&self) -> (usize, usize) {
        let mut exemplars = self.exemplars.write();
        let mut merged = 0usize;
        let mut kept: Vec<Exemplar> = Vec::with_capacity(exemplars.len());
        for e in exemplars.drain(..) {
            if kept.iter().any(|k| cosine(&k.embedding, &e.embedding) > 0.95) {
                merged += 1;
            } else {
                kept.push(e);
            }
        }
        *exemplars = kept;
        drop(exemplars);

        let retired = self.patterns.retire_stale(Utc::now());
        (merged, retired)
    }

    pub fn exemplar_count(&self) -> usize {
        self.exemplars.read().len()
    }
}

/// Extract a candidate regex from a trigger: structural words survive,
/// specific nouns become bounded wildcards.
fn extract_candidate(trigger: &str) -> Option<String> {
    let words: Vec<String> = trigger
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect();

    if words.len() < 3 {
        return None;
    }

    let mut parts: Vec<String> = Vec::with_capacity(words.len());
    let mut structural_hits = 0usize;
    for w in &words {
        if STRUCTURAL_WORDS.contains(&w.as_str()) {
            structural_hits += 1;
            parts.push(regex::escape(w));
        } else {
            // Collapse consecutive wildcards.
            if parts.last().map(|p| p == r"\w+").unwrap_or(false) {
                continue;
            }
            parts.push(r"\w+".to_string());
        }
    }

    // A candidate with no intent words would match everything.
    if structural_hits < 3 {
        return None;
    }

    Some(parts.join(r"[\s,]+"))
}

/// Measured false-positive rate of a candidate against the corpus
fn measure_false_positives(candidate: &str) -> Result<f32, GuardrailError> {
    let regex = Regex::new(candidate)
        .map_err(|e| GuardrailError::Pattern(format!("{}: {}", candidate, e)))?;
    let corpus = known_good_corpus();
    let hits = corpus
        .iter()
        .filter(|benign| regex.is_match(&benign.to_lowercase()))
        .count();
    Ok(hits as f32 / corpus.len() as f32)
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
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
