//! Input and output detectors
//!
//! Input checks run on every deobfuscated variant; output checks run on
//! the complete final text. Each check returns the worst outcome it found
//! and the engine takes the maximum across checks and variants.

use once_cell::sync::Lazy;
use regex::Regex;

use cortex_core::ContentTier;

use crate::Severity;

/// Which detector fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    SelfHarm,
    IllegalRequest,
    PiiExposure,
    PromptInjection,
    ExplicitContent,
    TierCompliance,
    HarmfulInstruction,
    ConfidenceHedging,
    DataLeakage,
    PersonaBreak,
    SystemPromptLeak,
    JailbreakEcho,
    ToneShift,
}

impl CheckCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckCategory::SelfHarm => "self_harm",
            CheckCategory::IllegalRequest => "illegal_request",
            CheckCategory::PiiExposure => "pii_exposure",
            CheckCategory::PromptInjection => "prompt_injection",
            CheckCategory::ExplicitContent => "explicit_content",
            CheckCategory::TierCompliance => "tier_compliance",
            CheckCategory::HarmfulInstruction => "harmful_instruction",
            CheckCategory::ConfidenceHedging => "confidence_hedging",
            CheckCategory::DataLeakage => "data_leakage",
            CheckCategory::PersonaBreak => "persona_break",
            CheckCategory::SystemPromptLeak => "system_prompt_leak",
            CheckCategory::JailbreakEcho => "jailbreak_echo",
            CheckCategory::ToneShift => "tone_shift",
        }
    }
}

/// Result of one detector over one text
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub category: CheckCategory,
    pub severity: Severity,
    /// The span that triggered, for the event log
    pub trigger: String,
}

static SELF_HARM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(kill myself|end my life|want to die|hurt myself|self[- ]harm|suicid\w*|no reason to live)\b",
    )
    .unwrap()
});

static ILLEGAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(how to (make|build|synthesi[sz]e) (a )?(bomb|explosive|meth|napalm)|hotwire a car|steal (a |someone)|counterfeit (money|currency)|buy (illegal )?drugs online|hack into)\b",
    )
    .unwrap()
});

static PII_REQUEST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(what is|tell me|give me|read me) .{0,30}(password|credit card|social security|ssn|card number|pin code)\b",
    )
    .unwrap()
});

static INJECTION_HINTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(ignore (all|your|previous)|disregard (the|your)|system prompt|developer mode|jailbreak|no (rules|restrictions|filter)|pretend (you|to be))\b",
    )
    .unwrap()
});

static EXPLICIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(explicit sexual|graphic violence|gore|pornograph\w*)\b").unwrap()
});

static HARMFUL_INSTRUCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(step[s]? (to|for) (making|building) (a )?(bomb|weapon|explosive)|mix (bleach|ammonia) (and|with))\b",
    )
    .unwrap()
});

static PERSONA_BREAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(i am (dan|now unfiltered|free from|no longer bound)|as an unrestricted ai|my (restrictions|rules) (are|have been) (lifted|removed|disabled))\b",
    )
    .unwrap()
});

static SYSTEM_LEAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(my system prompt (is|says)|here (is|are) my (instructions|system prompt)|\[system\])")
        .unwrap()
});

static DATA_LEAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}|\b\d{3}-\d{2}-\d{4}\b").unwrap()
});

// Adult-register words disallowed below the standard tier.
static TIER_VOCAB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(damn|hell|sexy|drunk|gambling)\b").unwrap());

fn outcome(category: CheckCategory, severity: Severity, m: &str) -> CheckOutcome {
    CheckOutcome { category, severity, trigger: m.chars().take(120).collect() }
}

/// Input detectors over one variant
pub fn input_checks(variant: &str) -> Vec<CheckOutcome> {
    let mut outcomes = Vec::new();

    if let Some(m) = SELF_HARM.find(variant) {
        // Crisis handling: a pre-written empathetic response, never a model.
        outcomes.push(outcome(CheckCategory::SelfHarm, Severity::HardBlock, m.as_str()));
    }
    if let Some(m) = ILLEGAL.find(variant) {
        outcomes.push(outcome(CheckCategory::IllegalRequest, Severity::HardBlock, m.as_str()));
    }
    if let Some(m) = PII_REQUEST.find(variant) {
        outcomes.push(outcome(CheckCategory::PiiExposure, Severity::SoftBlock, m.as_str()));
    }
    if let Some(m) = INJECTION_HINTS.find(variant) {
        outcomes.push(outcome(CheckCategory::PromptInjection, Severity::Warn, m.as_str()));
    }

    outcomes
}

/// Output detectors over the complete final text
pub fn output_checks(
    text: &str,
    tier: ContentTier,
    conversation_baseline: Option<&str>,
) -> Vec<CheckOutcome> {
    let mut outcomes = Vec::new();

    if let Some(m) = EXPLICIT.find(text) {
        let severity = if tier == ContentTier::Standard { Severity::Warn } else { Severity::HardBlock };
        outcomes.push(outcome(CheckCategory::ExplicitContent, severity, m.as_str()));
    }
    if tier != ContentTier::Standard {
        if let Some(m) = TIER_VOCAB.find(text) {
            outcomes.push(outcome(CheckCategory::TierCompliance, Severity::Warn, m.as_str()));
        }
    }
    if let Some(m) = HARMFUL_INSTRUCTION.find(text) {
        outcomes.push(outcome(CheckCategory::HarmfulInstruction, Severity::HardBlock, m.as_str()));
    }
    if let Some(m) = PERSONA_BREAK.find(text) {
        outcomes.push(outcome(CheckCategory::PersonaBreak, Severity::HardBlock, m.as_str()));
    }
    if let Some(m) = SYSTEM_LEAK.find(text) {
        outcomes.push(outcome(CheckCategory::SystemPromptLeak, Severity::HardBlock, m.as_str()));
    }
    if let Some(m) = DATA_LEAK.find(text) {
        outcomes.push(outcome(CheckCategory::DataLeakage, Severity::SoftBlock, m.as_str()));
    }
    if let Some(m) = INJECTION_HINTS.find(text) {
        outcomes.push(outcome(CheckCategory::JailbreakEcho, Severity::Warn, m.as_str()));
    }

    // Abrupt tone shift relative to the conversation baseline: an
    // all-caps outburst in an otherwise calm exchange.
    if let Some(baseline) = conversation_baseline {
        if !baseline.is_empty() && is_shouting(text) && !is_shouting(baseline) {
            outcomes.push(outcome(CheckCategory::ToneShift, Severity::Warn, text));
        }
    }

    outcomes
}

/// Does a low-confidence answer hedge? Used by the engine to append a
/// hedge rather than block.
pub fn lacks_hedging(text: &str) -> bool {
    static HEDGES: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)\b(i think|i believe|probably|might|not (entirely )?sure|as far as i know|if i recall)\b")
            .unwrap()
    });
    !HEDGES.is_match(text)
}

fn is_shouting(text: &str) -> bool {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < 20 {
        return false;
    }
    let upper = letters.iter().filter(|c| c.is_uppercase()).count();
    upper as f32 / letters.len() as f32 > 0.7
}
