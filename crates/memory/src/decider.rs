//! Memory decider
//!
//! Classifies a redacted event into a memory type by deterministic cue
//! heuristics and drops low-signal chit-chat. An optional model hook
//! resolves genuinely ambiguous events; the heuristics never call out.

use cortex_core::{Sentiment, SentimentLabel};

use crate::record::MemoryType;

/// Decision for one event
#[derive(Debug, Clone, PartialEq)]
pub struct DecidedMemory {
    pub memory_type: MemoryType,
    pub confidence: f32,
}

/// Deterministic classifier for COLD events
#[derive(Debug, Clone, Default)]
pub struct MemoryDecider;

const PREFERENCE_CUES: &[&str] = &[
    "i prefer", "i like", "i love", "i'd rather", "i hate", "my favorite",
    "i always", "i never", "i usually", "i want the", "i don't like",
];

const DECISION_CUES: &[&str] = &[
    "let's go with", "we decided", "i decided", "i'll take", "go ahead with",
    "we'll do", "i choose", "book the", "confirm the",
];

const CORRECTION_CUES: &[&str] = &[
    "actually", "no, i meant", "that's wrong", "not that", "i said", "correction",
    "i meant",
];

const FACT_CUES: &[&str] = &[
    "my name is", "i live", "i work", "my birthday", "i am allergic", "i'm allergic",
    "my wife", "my husband", "my son", "my daughter", "i have a", "i own",
];

impl MemoryDecider {
    pub fn new() -> Self {
        Self
    }

    /// Classify an event; `None` means drop it.
    pub fn decide(&self, text: &str, sentiment: &Sentiment) -> Option<DecidedMemory> {
        let lowered = text.to_lowercase();
        let words = lowered.split_whitespace().count();

        if words < 3 {
            return None;
        }

        if CORRECTION_CUES.iter().any(|c| lowered.contains(c)) {
            return Some(DecidedMemory { memory_type: MemoryType::Correction, confidence: 0.8 });
        }
        if PREFERENCE_CUES.iter().any(|c| lowered.contains(c)) {
            return Some(DecidedMemory { memory_type: MemoryType::Preference, confidence: 0.9 });
        }
        if DECISION_CUES.iter().any(|c| lowered.contains(c)) {
            return Some(DecidedMemory { memory_type: MemoryType::Decision, confidence: 0.85 });
        }
        if FACT_CUES.iter().any(|c| lowered.contains(c)) {
            return Some(DecidedMemory { memory_type: MemoryType::Fact, confidence: 0.85 });
        }

        // Strong emotion is worth remembering as mood even without a cue.
        if sentiment.compound.abs() >= 0.5
            || matches!(sentiment.label, SentimentLabel::Frustrated)
        {
            return Some(DecidedMemory { memory_type: MemoryType::Mood, confidence: 0.6 });
        }

        // Questions and commands are transactional, not memories.
        if matches!(sentiment.label, SentimentLabel::Command | SentimentLabel::Curious | SentimentLabel::Casual) {
            return None;
        }

        None
    }
}
