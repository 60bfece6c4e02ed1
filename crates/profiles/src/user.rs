//! User profiles
//!
//! Created on first observed identity, mutated only by the profile
//! service, never deleted while referenced by interactions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cortex_core::AgeGroup;

/// Vocabulary complexity used by the system prompt builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VocabularyLevel {
    Simple,
    #[default]
    Moderate,
    Advanced,
}

/// One user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: Option<String>,
    /// Stated or inferred age in years
    pub age: Option<u8>,
    /// Derived group; consumers must go through `effective_age_group`
    pub age_group: AgeGroup,
    /// Confidence in the age estimate
    pub age_confidence: f32,
    pub vocabulary: VocabularyLevel,
    pub preferred_tone: Option<String>,
    pub communication_style: Option<String>,
    pub humor_style: Option<String>,
    /// Linked parent for child accounts
    pub parent_id: Option<String>,
    pub onboarding_complete: bool,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            age: None,
            age_group: AgeGroup::Unknown,
            age_confidence: 0.0,
            vocabulary: VocabularyLevel::Moderate,
            preferred_tone: None,
            communication_style: None,
            humor_style: None,
            parent_id: None,
            onboarding_complete: false,
            created_at: Utc::now(),
        }
    }

    /// Set the age and rederive the group
    pub fn set_age(&mut self, age: u8, confidence: f32) {
        self.age = Some(age);
        self.age_group = AgeGroup::from_age(age);
        self.age_confidence = confidence.clamp(0.0, 1.0);
    }

    /// Group after the confidence floor; downstream consumers must use
    /// this, never the raw field.
    pub fn effective_age_group(&self) -> AgeGroup {
        self.age_group.effective(self.age_confidence)
    }

    pub fn is_child(&self) -> bool {
        matches!(self.effective_age_group(), AgeGroup::Toddler | AgeGroup::Child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_age_confidence_means_unknown_group() {
        let mut p = UserProfile::new("u1");
        p.set_age(30, 0.5);
        assert_eq!(p.effective_age_group(), AgeGroup::Unknown);

        p.set_age(30, 0.9);
        assert_eq!(p.effective_age_group(), AgeGroup::Adult);
    }

    #[test]
    fn child_detection_requires_confidence() {
        let mut p = UserProfile::new("kid");
        p.set_age(8, 0.95);
        assert!(p.is_child());

        p.age_confidence = 0.3;
        // Unknown group is not treated as a verified child...
        assert!(!p.is_child());
        // ...but it still maps to the strict tier downstream.
    }
}
