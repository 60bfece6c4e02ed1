//! Jailbreak pattern set
//!
//! Seeded with known jailbreak families and extended by the learner.
//! The compiled set is swapped copy-on-write: readers clone the Arc and
//! see either the old or the new set, never a partial one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::GuardrailError;

/// One pattern with its bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JailbreakPattern {
    pub pattern: String,
    /// "seed" or "learned"
    pub source: String,
    pub hit_count: u64,
    pub false_positive_count: u64,
    pub active: bool,
    pub added_at: DateTime<Utc>,
    pub last_hit: Option<DateTime<Utc>>,
}

/// Compiled patterns, immutable once built
pub struct CompiledPatterns {
    entries: Vec<(Regex, JailbreakPattern)>,
}

impl CompiledPatterns {
    fn build(patterns: Vec<JailbreakPattern>) -> Result<Self, GuardrailError> {
        let mut entries = Vec::with_capacity(patterns.len());
        for p in patterns {
            if !p.active {
                continue;
            }
            let regex = Regex::new(&p.pattern)
                .map_err(|e| GuardrailError::Pattern(format!("{}: {}", p.pattern, e)))?;
            entries.push((regex, p));
        }
        Ok(Self { entries })
    }

    /// First matching pattern, if any
    pub fn find_match(&self, text: &str) -> Option<&JailbreakPattern> {
        let lowered = text.to_lowercase();
        self.entries
            .iter()
            .find(|(regex, _)| regex.is_match(&lowered))
            .map(|(_, p)| p)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Hot-reloadable pattern set
pub struct PatternSet {
    compiled: RwLock<Arc<CompiledPatterns>>,
    /// Source of truth including inactive/retired patterns
    all: RwLock<Vec<JailbreakPattern>>,
}

const SEED_PATTERNS: &[&str] = &[
    r"ignore (all|any|your|previous|prior) (previous |prior )?(instructions|rules|guidelines)",
    r"pretend (to be|you are|you're) .{0,40}(without|no) (any )?(rules|restrictions|limits|filters)",
    r"you are now (dan|in developer mode|unfiltered|jailbroken)",
    r"act as .{0,40}(without|no) (any )?(restrictions|rules|filters|guidelines)",
    r"(disregard|forget|override) (your|the|all) (system prompt|instructions|training|guidelines)",
    r"(enable|enter|activate) (developer|god|sudo|admin|dan) mode",
    r"repeat (your|the) (system prompt|initial instructions|hidden instructions)",
    r"(from now on|henceforth) you (have no|are free of) (rules|restrictions)",
];

impl PatternSet {
    /// Build the seeded set
    pub fn seeded() -> Result<Self, GuardrailError> {
        let now = Utc::now();
        let patterns: Vec<JailbreakPattern> = SEED_PATTERNS
            .iter()
            .map(|p| JailbreakPattern {
                pattern: p.to_string(),
                source: "seed".to_string(),
                hit_count: 0,
                false_positive_count: 0,
                active: true,
                added_at: now,
                last_hit: None,
            })
            .collect();
        Self::from_patterns(patterns)
    }

    pub fn from_patterns(patterns: Vec<JailbreakPattern>) -> Result<Self, GuardrailError> {
        let compiled = CompiledPatterns::build(patterns.clone())?;
        Ok(Self {
            compiled: RwLock::new(Arc::new(compiled)),
            all: RwLock::new(patterns),
        })
    }

    /// Current compiled snapshot
    pub fn snapshot(&self) -> Arc<CompiledPatterns> {
        self.compiled.read().clone()
    }

    /// Check a text against the active set and bump hit bookkeeping
    pub fn matches(&self, text: &str) -> Option<String> {
        let snapshot = self.snapshot();
        let matched = snapshot.find_match(text)?.pattern.clone();

        let mut all = self.all.write();
        if let Some(p) = all.iter_mut().find(|p| p.pattern == matched) {
            p.hit_count += 1;
            p.last_hit = Some(Utc::now());
        }
        Some(matched)
    }

    /// Add a validated pattern and swap the compiled set atomically.
    /// Rejects regexes that fail to compile.
    pub fn admit(&self, pattern: JailbreakPattern) -> Result<(), GuardrailError> {
        Regex::new(&pattern.pattern)
            .map_err(|e| GuardrailError::Pattern(format!("{}: {}", pattern.pattern, e)))?;

        let mut all = self.all.write();
        if all.iter().any(|p| p.pattern == pattern.pattern) {
            return Ok(());
        }
        all.push(pattern);
        let rebuilt = CompiledPatterns::build(all.clone())?;
        *self.compiled.write() = Arc::new(rebuilt);
        tracing::info!(total = all.len(), "jailbreak pattern set swapped");
        Ok(())
    }

    /// Retire learned patterns with zero hits beyond the retention window
    pub fn retire_stale(&self, now: DateTime<Utc>) -> usize {
        let retention =
            chrono::Duration::days(cortex_config::constants::guardrails::PATTERN_RETENTION_DAYS);
        let mut all = self.all.write();
        let mut retired = 0usize;
        for p in all.iter_mut() {
            if p.active
                && p.source == "learned"
                && p.hit_count == 0
                && now - p.added_at > retention
            {
                p.active = false;
                retired += 1;
            }
        }
        if retired > 0 {
            if let Ok(rebuilt) = CompiledPatterns::build(all.clone()) {
                *self.compiled.write() = Arc::new(rebuilt);
            }
        }
        retired
    }

    /// All patterns including retired, for the admin surface
    pub fn all_patterns(&self) -> Vec<JailbreakPattern> {
        self.all.read().clone()
    }

    pub fn active_count(&self) -> usize {
        self.snapshot().len()
    }
}
