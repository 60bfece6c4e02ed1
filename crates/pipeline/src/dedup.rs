//! Sentence-level fuzzy dedup
//!
//! Removes continuation sentences that restate already-delivered content.
//! Similarity is Jaccard over normalized word sets; at or above the
//! threshold a sentence is a duplicate.

use std::collections::HashSet;

/// Result of a dedup pass
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    /// Sentences that survived, in order
    pub kept: Vec<String>,
    pub removed: usize,
    /// Fraction of input sentences removed
    pub removed_fraction: f32,
}

fn normalize(sentence: &str) -> HashSet<String> {
    sentence
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(|w| w.to_string())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    intersection / union
}

/// Split a text into rough sentences
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let trimmed = current.trim().to_string();
            if !trimmed.is_empty() {
                sentences.push(trimmed);
            }
            current.clear();
        }
    }
    let tail = current.trim().to_string();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Drop candidate sentences that duplicate either the committed prefix or
/// an earlier candidate.
pub fn dedup_sentences(committed: &str, candidates: &str, threshold: f32) -> DedupOutcome {
    let committed_sets: Vec<HashSet<String>> =
        split_sentences(committed).iter().map(|s| normalize(s)).collect();

    let candidate_sentences = split_sentences(candidates);
    let total = candidate_sentences.len();

    let mut kept: Vec<String> = Vec::new();
    let mut kept_sets: Vec<HashSet<String>> = Vec::new();
    let mut removed = 0usize;

    for sentence in candidate_sentences {
        let set = normalize(&sentence);
        let duplicate = committed_sets
            .iter()
            .chain(kept_sets.iter())
            .any(|prior| jaccard(prior, &set) >= threshold);
        if duplicate {
            removed += 1;
        } else {
            kept.push(sentence);
            kept_sets.push(set);
        }
    }

    DedupOutcome {
        kept,
        removed,
        removed_fraction: if total == 0 { 0.0 } else { removed as f32 / total as f32 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_repeats_are_removed() {
        let outcome = dedup_sentences(
            "Quantum tunnelling lets particles cross barriers.",
            "Quantum tunnelling lets particles cross barriers. It shows up in alpha decay.",
            0.85,
        );
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.kept.len(), 1);
        assert!(outcome.kept[0].contains("alpha decay"));
    }

    #[test]
    fn near_duplicates_are_removed() {
        let outcome = dedup_sentences(
            "The wavefunction decays exponentially inside the barrier region.",
            "Inside the barrier region the wavefunction decays exponentially.",
            0.85,
        );
        assert_eq!(outcome.removed, 1);
    }

    #[test]
    fn novel_content_survives() {
        let outcome = dedup_sentences(
            "Particles can cross energy barriers.",
            "Scanning tunnelling microscopes exploit this effect to image atoms.",
            0.85,
        );
        assert_eq!(outcome.removed, 0);
        assert_eq!(outcome.kept.len(), 1);
    }

    #[test]
    fn duplicates_within_the_candidates_are_also_removed() {
        let outcome = dedup_sentences(
            "",
            "Tunnelling is probabilistic. Tunnelling is probabilistic.",
            0.85,
        );
        assert_eq!(outcome.removed, 1);
    }

    #[test]
    fn removed_fraction_is_reported() {
        let outcome = dedup_sentences("Alpha.", "", 0.85);
        assert_eq!(outcome.removed_fraction, 0.0);
    }
}
