//! Guardrail engine for Atlas Cortex
//!
//! Wraps the pipeline on both sides: input checks compose over
//! deobfuscated variants, output checks run on the complete final text.
//! Blocks feed an adaptive learner whose candidates only join the active
//! pattern set after passing the false-positive admission gate. Guardrail
//! internals fail closed: an error inside a check is a soft block.

mod checks;
mod deobfuscate;
mod drift;
mod engine;
mod known_good;
mod learner;
mod patterns;

pub use checks::{CheckCategory, CheckOutcome};
pub use deobfuscate::deobfuscate;
pub use drift::DriftMonitor;
pub use engine::{GuardrailEngine, InputVerdict, OutputVerdict};
pub use known_good::{known_good_corpus, CORPUS_VERSION};
pub use learner::AdaptiveLearner;
pub use patterns::{JailbreakPattern, PatternSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Guardrail severity; order matters and the worst severity wins
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Pass,
    Warn,
    SoftBlock,
    HardBlock,
}

/// Direction of a guardrail event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

/// One recorded guardrail event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailEvent {
    pub direction: Direction,
    pub category: String,
    pub severity: Severity,
    /// Matched text, PII-redacted where applicable
    pub trigger: String,
    pub action: String,
    pub content_tier: cortex_core::ContentTier,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
}

/// Guardrail errors. Any of these surfacing during a check is treated as
/// a soft block by the engine.
#[derive(Error, Debug)]
pub enum GuardrailError {
    #[error("Pattern error: {0}")]
    Pattern(String),

    #[error("Check failed: {0}")]
    Check(String),
}

impl From<GuardrailError> for cortex_core::Error {
    fn from(err: GuardrailError) -> Self {
        cortex_core::Error::Guardrail(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_is_totally_ordered() {
        assert!(Severity::Pass < Severity::Warn);
        assert!(Severity::Warn < Severity::SoftBlock);
        assert!(Severity::SoftBlock < Severity::HardBlock);
        assert_eq!(
            [Severity::Warn, Severity::HardBlock, Severity::Pass].iter().max(),
            Some(&Severity::HardBlock)
        );
    }
}
