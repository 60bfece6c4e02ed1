//! Emotional profiles
//!
//! Rapport in [0,1] with sentiment-driven steps and linear idle decay,
//! per-sentiment filler pools with last-used timestamps, peak-hour
//! histogram, and topic frequencies.

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use cortex_config::constants::rapport;
use cortex_core::{Sentiment, SentimentLabel};

/// A filler phrase with usage recency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillerPhrase {
    pub text: String,
    pub last_used: Option<DateTime<Utc>>,
}

impl FillerPhrase {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), last_used: None }
    }
}

/// Per-user emotional state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionalProfile {
    pub user_id: String,
    /// Rapport score, clamped to [0, 1]
    pub rapport: f32,
    /// Personalised filler pools keyed by sentiment category
    pub filler_pools: HashMap<SentimentLabel, Vec<FillerPhrase>>,
    /// Activity histogram by local hour
    pub peak_hours: [u32; 24],
    /// Topic frequency map
    pub topics: HashMap<String, u32>,
    pub last_interaction: Option<DateTime<Utc>>,
}

impl EmotionalProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            rapport: rapport::INITIAL,
            filler_pools: HashMap::new(),
            peak_hours: [0; 24],
            topics: HashMap::new(),
            last_interaction: None,
        }
    }

    /// Apply idle decay since the last interaction, then the sentiment
    /// step. Rapport stays clamped whatever the sequence of updates.
    pub fn apply_interaction(&mut self, sentiment: &Sentiment, now: DateTime<Utc>) {
        self.decay_to(now);

        let step = match sentiment.label {
            SentimentLabel::Positive => rapport::POSITIVE_STEP,
            SentimentLabel::Negative | SentimentLabel::Frustrated => -rapport::NEGATIVE_STEP,
            _ => {
                // Mildly scored neutral messages still nudge rapport.
                if sentiment.compound >= 0.25 {
                    rapport::POSITIVE_STEP
                } else if sentiment.compound <= -0.25 {
                    -rapport::NEGATIVE_STEP
                } else {
                    0.0
                }
            }
        };

        self.rapport = (self.rapport + step).clamp(0.0, 1.0);
        self.peak_hours[now.hour() as usize % 24] += 1;
        self.last_interaction = Some(now);
    }

    /// Linear decay per idle day since the last interaction
    pub fn decay_to(&mut self, now: DateTime<Utc>) {
        if let Some(last) = self.last_interaction {
            let idle_days = (now - last).num_seconds().max(0) as f32 / 86_400.0;
            if idle_days > 0.0 {
                self.rapport =
                    (self.rapport - idle_days * rapport::IDLE_DECAY_PER_DAY).clamp(0.0, 1.0);
            }
        }
    }

    pub fn note_topic(&mut self, topic: impl Into<String>) {
        *self.topics.entry(topic.into()).or_insert(0) += 1;
    }

    /// Mark a filler phrase as used now, inserting it if personal
    pub fn touch_filler(&mut self, label: SentimentLabel, text: &str, now: DateTime<Utc>) {
        let pool = self.filler_pools.entry(label).or_default();
        if let Some(phrase) = pool.iter_mut().find(|p| p.text == text) {
            phrase.last_used = Some(now);
        } else {
            pool.push(FillerPhrase { text: text.to_string(), last_used: Some(now) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sentiment(label: SentimentLabel, compound: f32) -> Sentiment {
        Sentiment { label, compound }
    }

    #[test]
    fn rapport_starts_at_half() {
        assert_eq!(EmotionalProfile::new("u").rapport, 0.5);
    }

    #[test]
    fn positive_interaction_raises_rapport() {
        let mut p = EmotionalProfile::new("u");
        p.apply_interaction(&sentiment(SentimentLabel::Positive, 0.6), Utc::now());
        assert!(p.rapport > 0.5);
    }

    #[test]
    fn rapport_clamped_at_zero_and_one() {
        let mut p = EmotionalProfile::new("u");
        let now = Utc::now();
        for _ in 0..100 {
            p.apply_interaction(&sentiment(SentimentLabel::Negative, -0.8), now);
        }
        assert_eq!(p.rapport, 0.0);

        // A positive interaction at the floor still produces a positive,
        // bounded rapport.
        p.apply_interaction(&sentiment(SentimentLabel::Positive, 0.6), now);
        assert!(p.rapport > 0.0);
        assert!(p.rapport <= 1.0);

        for _ in 0..100 {
            p.apply_interaction(&sentiment(SentimentLabel::Positive, 0.8), now);
        }
        assert_eq!(p.rapport, 1.0);
    }

    #[test]
    fn idle_decay_is_linear_and_clamped() {
        let mut p = EmotionalProfile::new("u");
        let start = Utc::now();
        p.apply_interaction(&sentiment(SentimentLabel::Positive, 0.6), start);
        let rapport_before = p.rapport;

        p.decay_to(start + Duration::days(10));
        let expected = (rapport_before - 10.0 * rapport::IDLE_DECAY_PER_DAY).clamp(0.0, 1.0);
        assert!((p.rapport - expected).abs() < 1e-5);

        p.decay_to(start + Duration::days(100_000));
        assert_eq!(p.rapport, 0.0);
    }

    #[test]
    fn touch_filler_updates_recency() {
        let mut p = EmotionalProfile::new("u");
        let now = Utc::now();
        p.touch_filler(SentimentLabel::Curious, "Hmm — ", now);
        let pool = &p.filler_pools[&SentimentLabel::Curious];
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].last_used, Some(now));
    }
}
