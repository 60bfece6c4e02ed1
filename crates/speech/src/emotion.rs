//! Emotion composition and paralinguals
//!
//! Maps sentiment, confidence, rapport, and context onto the annotation
//! shape the active provider understands: an inline tag, a natural
//! language description, or nothing. Paralingual injection adds at most
//! one non-lexical vocalisation per response and never repeats the same
//! one consecutively for a user.

use dashmap::DashMap;

use cortex_core::{Sentiment, SentimentLabel};
use cortex_providers::Capabilities;

/// Provider-facing emotion annotation
#[derive(Debug, Clone, PartialEq)]
pub enum EmotionAnnotation {
    /// Compact inline tag, e.g. "[warm]"
    Inline(String),
    /// Free-text voice direction for providers that accept prose
    Description(String),
    /// Provider does not support emotion
    None,
}

impl EmotionAnnotation {
    pub fn as_provider_string(&self) -> Option<String> {
        match self {
            EmotionAnnotation::Inline(s) | EmotionAnnotation::Description(s) => Some(s.clone()),
            EmotionAnnotation::None => None,
        }
    }
}

/// Night-mode prosody modifier
#[derive(Debug, Clone, Copy)]
pub struct NightMode {
    pub night_start_hour: u32,
    pub night_end_hour: u32,
}

impl NightMode {
    /// Active when the local hour is inside the window or presence signals
    /// indicate quiet hours
    pub fn active(&self, local_hour: u32, quiet_hours_signal: bool) -> bool {
        if quiet_hours_signal {
            return true;
        }
        if self.night_start_hour <= self.night_end_hour {
            (self.night_start_hour..self.night_end_hour).contains(&local_hour)
        } else {
            local_hour >= self.night_start_hour || local_hour < self.night_end_hour
        }
    }

    /// Speaking-rate multiplier when active
    pub fn speed(&self, active: bool) -> f32 {
        if active {
            0.9
        } else {
            1.0
        }
    }
}

/// Composes annotations and injects paralinguals
pub struct EmotionComposer {
    /// Last paralingual emitted per user, to avoid consecutive repeats
    last_paralingual: DashMap<String, String>,
}

impl EmotionComposer {
    pub fn new() -> Self {
        Self { last_paralingual: DashMap::new() }
    }

    /// Build the annotation for one sentence
    pub fn compose(
        &self,
        sentiment: &Sentiment,
        confidence: f32,
        rapport: f32,
        night_mode: bool,
        capabilities: &Capabilities,
    ) -> EmotionAnnotation {
        if !capabilities.emotion {
            return EmotionAnnotation::None;
        }

        let mood = match sentiment.label {
            SentimentLabel::Positive if rapport > 0.7 => "warm",
            SentimentLabel::Positive => "cheerful",
            SentimentLabel::Negative | SentimentLabel::Frustrated => "sympathetic",
            SentimentLabel::Curious => "engaged",
            SentimentLabel::Casual => "relaxed",
            _ => "neutral",
        };

        let mut qualifiers: Vec<&str> = Vec::new();
        if night_mode {
            qualifiers.push("quiet");
        }
        if confidence < 0.8 {
            qualifiers.push("measured");
        }

        if qualifiers.is_empty() {
            EmotionAnnotation::Inline(format!("[{}]", mood))
        } else {
            EmotionAnnotation::Description(format!("{}, {}", mood, qualifiers.join(", ")))
        }
    }

    /// Paralingual to append pre-synthesis, if any. Applied only to
    /// multi-sentence responses with an emotional context, and never the
    /// same one twice in a row for a user.
    pub fn paralingual(
        &self,
        user_id: &str,
        sentiment: &Sentiment,
        sentence_count: usize,
    ) -> Option<&'static str> {
        if sentence_count < 2 {
            return None;
        }

        let candidate = match sentiment.label {
            SentimentLabel::Positive if sentiment.compound > 0.5 => "*chuckle*",
            SentimentLabel::Negative | SentimentLabel::Frustrated => "*sigh*",
            _ => return None,
        };

        let repeated = self
            .last_paralingual
            .get(user_id)
            .map(|last| *last == candidate)
            .unwrap_or(false);
        if repeated {
            // Skipping clears the streak so the one after may carry it.
            self.last_paralingual.remove(user_id);
            return None;
        }

        self.last_paralingual.insert(user_id.to_string(), candidate.to_string());
        Some(candidate)
    }
}

impl Default for EmotionComposer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentiment(label: SentimentLabel, compound: f32) -> Sentiment {
        Sentiment { label, compound }
    }

    fn emotion_caps() -> Capabilities {
        Capabilities { synthesis: true, emotion: true, ..Default::default() }
    }

    #[test]
    fn no_emotion_capability_means_no_annotation() {
        let composer = EmotionComposer::new();
        let caps = Capabilities { synthesis: true, ..Default::default() };
        let a = composer.compose(&sentiment(SentimentLabel::Positive, 0.8), 0.9, 0.5, false, &caps);
        assert_eq!(a, EmotionAnnotation::None);
    }

    #[test]
    fn high_rapport_positive_is_warm() {
        let composer = EmotionComposer::new();
        let a = composer.compose(
            &sentiment(SentimentLabel::Positive, 0.8),
            0.9,
            0.9,
            false,
            &emotion_caps(),
        );
        assert_eq!(a, EmotionAnnotation::Inline("[warm]".to_string()));
    }

    #[test]
    fn night_mode_yields_a_description() {
        let composer = EmotionComposer::new();
        let a = composer.compose(
            &sentiment(SentimentLabel::Neutral, 0.0),
            0.9,
            0.5,
            true,
            &emotion_caps(),
        );
        match a {
            EmotionAnnotation::Description(d) => assert!(d.contains("quiet")),
            other => panic!("expected description, got {:?}", other),
        }
    }

    #[test]
    fn single_sentence_gets_no_paralingual() {
        let composer = EmotionComposer::new();
        assert!(composer
            .paralingual("u1", &sentiment(SentimentLabel::Positive, 0.9), 1)
            .is_none());
    }

    #[test]
    fn paralingual_never_repeats_consecutively() {
        let composer = EmotionComposer::new();
        let s = sentiment(SentimentLabel::Positive, 0.9);
        assert_eq!(composer.paralingual("u1", &s, 3), Some("*chuckle*"));
        assert!(composer.paralingual("u1", &s, 3).is_none());
        // A different user is unaffected.
        assert_eq!(composer.paralingual("u2", &s, 3), Some("*chuckle*"));
    }

    #[test]
    fn night_window_wraps_midnight() {
        let night = NightMode { night_start_hour: 22, night_end_hour: 7 };
        assert!(night.active(23, false));
        assert!(night.active(3, false));
        assert!(!night.active(12, false));
        assert!(night.active(12, true));
        assert_eq!(night.speed(true), 0.9);
    }
}
