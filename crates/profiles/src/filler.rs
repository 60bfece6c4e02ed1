//! Filler selection
//!
//! Picks the phrase streamed before the first model token. Candidate pool
//! is the user's personalised pool plus the defaults for the sentiment
//! category, minus the most recently used phrases; the draw is weighted
//! random with weight inversely proportional to recency. Command and
//! casual turns, and active follow-ups, get no filler at all.

use chrono::{DateTime, Utc};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use cortex_config::constants::filler;
use cortex_core::SentimentLabel;

use crate::emotional::EmotionalProfile;

/// Default pools per sentiment category
fn default_pool(label: SentimentLabel) -> &'static [&'static str] {
    match label {
        SentimentLabel::Positive => &["Love that — ", "Nice, ", "Great question — "],
        SentimentLabel::Negative => &["I hear you. ", "Okay, let me see. "],
        SentimentLabel::Frustrated => &["Let me sort that out. ", "Okay — on it. "],
        SentimentLabel::Curious => &["Hmm — ", "Let me think... ", "Good question. "],
        SentimentLabel::Neutral => &["Alright, ", "One moment — ", "Okay, "],
        // Empty filler categories
        SentimentLabel::Command | SentimentLabel::Casual => &[],
    }
}

const CONFIDENCE_FILLERS: &[&str] = &["I think — ", "Let me verify... ", "If I recall right, "];

/// Outcome of a selection
#[derive(Debug, Clone, Default)]
pub struct FillerSelection {
    /// Empty when the category yields no filler
    pub text: Option<String>,
    /// Appended confidence hedge, when predicted confidence was low
    pub confidence_filler: Option<String>,
}

impl FillerSelection {
    /// Full text to stream, filler plus hedge
    pub fn combined(&self) -> Option<String> {
        match (&self.text, &self.confidence_filler) {
            (None, None) => None,
            (t, c) => Some(format!(
                "{}{}",
                t.as_deref().unwrap_or(""),
                c.as_deref().unwrap_or("")
            )),
        }
    }
}

/// Weighted-random filler selector
#[derive(Debug, Clone, Default)]
pub struct FillerSelector;

impl FillerSelector {
    pub fn new() -> Self {
        Self
    }

    /// Select a filler and update the profile's recency state.
    ///
    /// `follow_up` marks an active clarification exchange, which gets no
    /// filler just like commands and casual turns.
    pub fn select(
        &self,
        profile: &mut EmotionalProfile,
        label: SentimentLabel,
        predicted_confidence: f32,
        follow_up: bool,
        now: DateTime<Utc>,
    ) -> FillerSelection {
        let mut selection = FillerSelection::default();

        let skip_main = follow_up
            || matches!(label, SentimentLabel::Command | SentimentLabel::Casual);

        if !skip_main {
            selection.text = self.draw(profile, label, now);
        }

        if predicted_confidence < filler::CONFIDENCE_FILLER_THRESHOLD {
            selection.confidence_filler =
                self.draw_from(profile, label, CONFIDENCE_FILLERS, false, now);
        }

        if let Some(text) = &selection.text {
            tracing::debug!(user = %profile.user_id, filler = %text, "filler selected");
        }

        selection
    }

    fn draw(
        &self,
        profile: &mut EmotionalProfile,
        label: SentimentLabel,
        now: DateTime<Utc>,
    ) -> Option<String> {
        self.draw_from(profile, label, default_pool(label), true, now)
    }

    fn draw_from(
        &self,
        profile: &mut EmotionalProfile,
        label: SentimentLabel,
        defaults: &[&str],
        include_personal: bool,
        now: DateTime<Utc>,
    ) -> Option<String> {
        // Defaults plus (for the main draw) the personalised pool, with
        // recency metadata carried from the profile either way.
        let personal = profile.filler_pools.get(&label).cloned().unwrap_or_default();
        let mut candidates: Vec<(String, Option<DateTime<Utc>>)> = if include_personal {
            personal.iter().map(|p| (p.text.clone(), p.last_used)).collect()
        } else {
            Vec::new()
        };
        for d in defaults {
            if !candidates.iter().any(|(t, _)| t == d) {
                let last_used = personal
                    .iter()
                    .find(|p| p.text == *d)
                    .and_then(|p| p.last_used);
                candidates.push((d.to_string(), last_used));
            }
        }

        if candidates.is_empty() {
            return None;
        }

        // Drop the last N used by this user.
        let mut by_recency: Vec<&(String, Option<DateTime<Utc>>)> =
            candidates.iter().filter(|(_, lu)| lu.is_some()).collect();
        by_recency.sort_by(|a, b| b.1.cmp(&a.1));
        let excluded: Vec<String> = by_recency
            .iter()
            .take(filler::RECENCY_WINDOW)
            .map(|(t, _)| t.clone())
            .collect();

        let mut remaining: Vec<(String, Option<DateTime<Utc>>)> = candidates
            .iter()
            .filter(|(t, _)| !excluded.contains(t))
            .cloned()
            .collect();
        if remaining.is_empty() {
            // Tiny pool: everything was recent, fall back to the full set.
            remaining = candidates;
        }

        // Weight inversely proportional to recency: never-used phrases get
        // the ceiling, recently-used ones approach 1.
        let weights: Vec<f32> = remaining
            .iter()
            .map(|(_, last_used)| match last_used {
                None => 1000.0,
                Some(t) => {
                    let idle_secs = (now - *t).num_seconds().max(0) as f32;
                    (idle_secs / 60.0).min(1000.0) + 1.0
                }
            })
            .collect();

        let mut rng = rand::thread_rng();
        let chosen = match WeightedIndex::new(&weights) {
            Ok(dist) => &remaining[dist.sample(&mut rng)].0,
            Err(_) => &remaining[rng.gen_range(0..remaining.len())].0,
        };

        let chosen = chosen.clone();
        profile.touch_filler(label, &chosen, now);
        Some(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_category_yields_empty_filler() {
        let mut profile = EmotionalProfile::new("u");
        let s = FillerSelector::new().select(
            &mut profile,
            SentimentLabel::Command,
            0.95,
            false,
            Utc::now(),
        );
        assert!(s.text.is_none());
        assert!(s.combined().is_none());
    }

    #[test]
    fn follow_up_yields_empty_filler() {
        let mut profile = EmotionalProfile::new("u");
        let s = FillerSelector::new().select(
            &mut profile,
            SentimentLabel::Curious,
            0.95,
            true,
            Utc::now(),
        );
        assert!(s.text.is_none());
    }

    #[test]
    fn curious_category_selects_from_pool() {
        let mut profile = EmotionalProfile::new("u");
        let s = FillerSelector::new().select(
            &mut profile,
            SentimentLabel::Curious,
            0.95,
            false,
            Utc::now(),
        );
        let text = s.text.unwrap();
        assert!(default_pool(SentimentLabel::Curious).contains(&text.as_str()));
        // Selection updated recency.
        assert!(profile.filler_pools[&SentimentLabel::Curious]
            .iter()
            .any(|p| p.text == text && p.last_used.is_some()));
    }

    #[test]
    fn low_confidence_appends_hedge() {
        let mut profile = EmotionalProfile::new("u");
        let s = FillerSelector::new().select(
            &mut profile,
            SentimentLabel::Curious,
            0.5,
            false,
            Utc::now(),
        );
        assert!(s.confidence_filler.is_some());
        let combined = s.combined().unwrap();
        assert!(combined.len() >= s.confidence_filler.unwrap().len());
    }

    #[test]
    fn recent_phrases_are_excluded() {
        let mut profile = EmotionalProfile::new("u");
        let selector = FillerSelector::new();
        let now = Utc::now();

        let first = selector
            .select(&mut profile, SentimentLabel::Curious, 0.95, false, now)
            .text
            .unwrap();
        let second = selector
            .select(&mut profile, SentimentLabel::Curious, 0.95, false, now + chrono::Duration::seconds(1))
            .text
            .unwrap();
        assert_ne!(first, second);

        // Third draw must avoid both of the last two.
        let third = selector
            .select(&mut profile, SentimentLabel::Curious, 0.95, false, now + chrono::Duration::seconds(2))
            .text
            .unwrap();
        assert_ne!(third, first);
        assert_ne!(third, second);
    }
}
