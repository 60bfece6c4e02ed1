//! Age groups and content tiers
//!
//! Policy mapping used by guardrails and the system prompt builder.
//! Identity confidence below the floor forces the strict tier regardless
//! of the profile's stated age.

use serde::{Deserialize, Serialize};

/// Identity confidence below this value is treated as unknown.
/// Exactly at the floor still counts as low confidence.
pub const IDENTITY_CONFIDENCE_FLOOR: f32 = 0.6;

/// Derived age group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgeGroup {
    Toddler,
    Child,
    Teen,
    Adult,
    #[default]
    Unknown,
}

impl AgeGroup {
    /// Map a known age in years to a group
    pub fn from_age(age: u8) -> Self {
        match age {
            0..=4 => AgeGroup::Toddler,
            5..=12 => AgeGroup::Child,
            13..=17 => AgeGroup::Teen,
            _ => AgeGroup::Adult,
        }
    }

    /// Effective group after the confidence floor is applied
    pub fn effective(self, age_confidence: f32) -> Self {
        if age_confidence <= IDENTITY_CONFIDENCE_FLOOR {
            AgeGroup::Unknown
        } else {
            self
        }
    }
}

/// Safety/vocabulary policy label
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentTier {
    Strict,
    Moderate,
    Standard,
}

impl ContentTier {
    /// Tier from an effective age group and identity confidence.
    /// Low identity confidence forces strict even for adults.
    pub fn resolve(group: AgeGroup, identity_confidence: f32) -> Self {
        if identity_confidence <= IDENTITY_CONFIDENCE_FLOOR {
            return ContentTier::Strict;
        }
        match group {
            AgeGroup::Toddler | AgeGroup::Child | AgeGroup::Unknown => ContentTier::Strict,
            AgeGroup::Teen => ContentTier::Moderate,
            AgeGroup::Adult => ContentTier::Standard,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentTier::Strict => "strict",
            ContentTier::Moderate => "moderate",
            ContentTier::Standard => "standard",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_group_boundaries() {
        assert_eq!(AgeGroup::from_age(4), AgeGroup::Toddler);
        assert_eq!(AgeGroup::from_age(12), AgeGroup::Child);
        assert_eq!(AgeGroup::from_age(13), AgeGroup::Teen);
        assert_eq!(AgeGroup::from_age(18), AgeGroup::Adult);
    }

    #[test]
    fn confidence_exactly_at_floor_is_unknown() {
        // The floor itself counts as low confidence.
        assert_eq!(AgeGroup::Adult.effective(0.6), AgeGroup::Unknown);
        assert_eq!(ContentTier::resolve(AgeGroup::Adult, 0.6), ContentTier::Strict);
        assert_eq!(ContentTier::resolve(AgeGroup::Adult, 0.61), ContentTier::Standard);
    }

    #[test]
    fn tier_mapping() {
        assert_eq!(ContentTier::resolve(AgeGroup::Child, 1.0), ContentTier::Strict);
        assert_eq!(ContentTier::resolve(AgeGroup::Unknown, 1.0), ContentTier::Strict);
        assert_eq!(ContentTier::resolve(AgeGroup::Teen, 1.0), ContentTier::Moderate);
        assert_eq!(ContentTier::resolve(AgeGroup::Adult, 1.0), ContentTier::Standard);
    }

    #[test]
    fn tier_ordering() {
        assert!(ContentTier::Strict < ContentTier::Moderate);
        assert!(ContentTier::Moderate < ContentTier::Standard);
    }
}
