//! Deterministic sentiment analysis
//!
//! Lexicon-based compound scoring with negation and intensifier handling.
//! Runs on every request during Layer 0 context assembly, so it must be
//! cheap and never call a model. Labels double as filler-pool categories.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Sentiment category, also the filler pool key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
    /// Imperative device/system command
    Command,
    /// Greeting or short acknowledgement
    Casual,
    /// Question seeking information
    Curious,
    /// Strong negative directed at the assistant or system
    Frustrated,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Negative => "negative",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Command => "command",
            SentimentLabel::Casual => "casual",
            SentimentLabel::Curious => "curious",
            SentimentLabel::Frustrated => "frustrated",
        }
    }
}

/// Resolved sentiment for one message
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Sentiment {
    pub label: SentimentLabel,
    /// Compound score in [-1, 1]
    pub compound: f32,
}

impl Sentiment {
    pub fn neutral() -> Self {
        Self { label: SentimentLabel::Neutral, compound: 0.0 }
    }
}

static POSITIVE: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "good", "great", "love", "like", "thanks", "thank", "awesome", "nice",
        "perfect", "happy", "wonderful", "excellent", "cool", "amazing", "glad",
        "fantastic", "best", "helpful", "appreciate", "yay", "brilliant",
    ]
    .into_iter()
    .collect()
});

static NEGATIVE: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "bad", "hate", "awful", "terrible", "sad", "angry", "annoyed", "worst",
        "horrible", "wrong", "broken", "useless", "stupid", "slow", "ugh",
        "disappointed", "frustrating", "frustrated", "sucks", "fail", "failed",
    ]
    .into_iter()
    .collect()
});

// Words that direct a strong negative at the assistant itself.
static FRUSTRATION: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["stupid", "useless", "broken", "ugh", "sucks", "frustrating", "frustrated"]
        .into_iter()
        .collect()
});

static NEGATIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["not", "no", "never", "dont", "don't", "cant", "can't", "wont", "won't", "isnt", "isn't"]
        .into_iter()
        .collect()
});

static INTENSIFIERS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["very", "really", "so", "extremely", "totally", "absolutely", "super"]
        .into_iter()
        .collect()
});

static COMMAND_VERBS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "turn", "set", "switch", "dim", "play", "pause", "stop", "start", "open",
        "close", "lock", "unlock", "mute", "unmute", "increase", "decrease",
        "raise", "lower", "enable", "disable", "remind", "add", "cancel",
    ]
    .into_iter()
    .collect()
});

static CASUAL: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["hi", "hello", "hey", "yo", "ok", "okay", "yes", "yeah", "no", "nope", "sure", "bye", "goodnight"]
        .into_iter()
        .collect()
});

static QUESTION_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["what", "why", "how", "when", "where", "who", "which", "explain", "tell"]
        .into_iter()
        .collect()
});

/// Lexicon-based sentiment analyzer
#[derive(Debug, Clone, Default)]
pub struct SentimentAnalyzer;

impl SentimentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze a message. Deterministic for a given input.
    pub fn analyze(&self, text: &str) -> Sentiment {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .collect();

        if words.is_empty() {
            return Sentiment::neutral();
        }

        let mut score = 0.0f32;
        let mut hits = 0usize;
        let mut frustration = false;

        for (i, word) in words.iter().enumerate() {
            let polarity = if POSITIVE.contains(word) {
                1.0
            } else if NEGATIVE.contains(word) {
                if FRUSTRATION.contains(word) {
                    frustration = true;
                }
                -1.0
            } else {
                continue;
            };

            // Negation within the two preceding words flips polarity.
            let negated = words[i.saturating_sub(2)..i]
                .iter()
                .any(|w| NEGATIONS.contains(w));
            // Intensifier immediately before amplifies.
            let amplified = i > 0 && INTENSIFIERS.contains(&words[i - 1]);

            let mut v = polarity * if amplified { 1.5 } else { 1.0 };
            if negated {
                v = -v * 0.8;
            }
            score += v;
            hits += 1;
        }

        // Exclamation marks push the score outward.
        let bangs = text.matches('!').count().min(3) as f32;
        if hits > 0 && bangs > 0.0 {
            score += score.signum() * bangs * 0.1;
        }

        let compound = if hits == 0 {
            0.0
        } else {
            (score / (hits as f32 + 2.0)).clamp(-1.0, 1.0)
        };

        let label = self.classify(&words, text, compound, frustration);
        Sentiment { label, compound }
    }

    fn classify(
        &self,
        words: &[&str],
        raw: &str,
        compound: f32,
        frustration: bool,
    ) -> SentimentLabel {
        if frustration && compound < -0.1 {
            return SentimentLabel::Frustrated;
        }
        if let Some(first) = words.first() {
            if COMMAND_VERBS.contains(first) {
                return SentimentLabel::Command;
            }
        }
        let is_question = raw.trim_end().ends_with('?')
            || words.first().map(|w| QUESTION_WORDS.contains(w)).unwrap_or(false);
        if is_question {
            return SentimentLabel::Curious;
        }
        if words.len() <= 3 && words.iter().all(|w| CASUAL.contains(w)) {
            return SentimentLabel::Casual;
        }
        if compound >= 0.25 {
            SentimentLabel::Positive
        } else if compound <= -0.25 {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_message() {
        let s = SentimentAnalyzer::new().analyze("thanks, that was really great!");
        assert_eq!(s.label, SentimentLabel::Positive);
        assert!(s.compound > 0.0);
    }

    #[test]
    fn negation_flips_polarity() {
        let s = SentimentAnalyzer::new().analyze("that is not good at all");
        assert!(s.compound < 0.0);
    }

    #[test]
    fn command_detected_from_leading_verb() {
        let s = SentimentAnalyzer::new().analyze("turn off the bedroom lights");
        assert_eq!(s.label, SentimentLabel::Command);
    }

    #[test]
    fn question_is_curious() {
        let s = SentimentAnalyzer::new().analyze("what time is it?");
        assert_eq!(s.label, SentimentLabel::Curious);
    }

    #[test]
    fn greeting_is_casual() {
        let s = SentimentAnalyzer::new().analyze("hey");
        assert_eq!(s.label, SentimentLabel::Casual);
    }

    #[test]
    fn frustration_label() {
        let s = SentimentAnalyzer::new().analyze("ugh this is so stupid and broken");
        assert_eq!(s.label, SentimentLabel::Frustrated);
    }

    #[test]
    fn empty_input_is_neutral() {
        let s = SentimentAnalyzer::new().analyze("");
        assert_eq!(s.label, SentimentLabel::Neutral);
        assert_eq!(s.compound, 0.0);
    }

    #[test]
    fn compound_stays_in_range() {
        let s = SentimentAnalyzer::new()
            .analyze("great great great great awesome perfect love love!!!");
        assert!(s.compound <= 1.0);
        assert!(s.compound >= -1.0);
    }
}
