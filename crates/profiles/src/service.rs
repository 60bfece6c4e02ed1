//! Profile service
//!
//! Exclusive owner of user and emotional profiles. Profiles live in
//! per-user map entries; rapport and filler-recency updates happen under
//! the entry lock so concurrent requests for the same user never race.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use cortex_core::{ContentTier, Sentiment, SentimentLabel};

use crate::emotional::EmotionalProfile;
use crate::filler::{FillerSelection, FillerSelector};
use crate::identity::{EnrolledVoices, ResolvedIdentity, VoiceEnrolment, VoiceIdentifier};
use crate::user::UserProfile;

/// Parental controls for a linked child account
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParentalPolicy {
    /// Entities the child may target through actions, e.g. "light.bedroom"
    pub allowed_entities: Vec<String>,
    /// Hard tier override, if the parent set one
    pub tier_override: Option<ContentTier>,
}

/// Enrolment metadata for the admin surface; the embedding itself never
/// leaves the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceEnrolmentSummary {
    pub user_id: String,
    pub label: String,
    pub embedding_dim: usize,
    pub enrolled_at: DateTime<Utc>,
}

/// Profile and identity service
pub struct ProfileService {
    users: DashMap<String, UserProfile>,
    emotional: DashMap<String, EmotionalProfile>,
    parental: DashMap<String, ParentalPolicy>,
    /// Enrolled voice samples, keyed by user; the default matcher scores
    /// against these when no external identifier is plugged in
    enrolments: Arc<DashMap<String, Vec<VoiceEnrolment>>>,
    voice: Option<Box<dyn VoiceIdentifier>>,
    filler: FillerSelector,
}

impl ProfileService {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            emotional: DashMap::new(),
            parental: DashMap::new(),
            enrolments: Arc::new(DashMap::new()),
            voice: None,
            filler: FillerSelector::new(),
        }
    }

    pub fn with_voice_identifier(mut self, voice: Box<dyn VoiceIdentifier>) -> Self {
        self.voice = Some(voice);
        self
    }

    /// Resolve identity for a request
    pub async fn resolve_identity(
        &self,
        session_user: Option<&str>,
        voice_embedding: Option<&[f32]>,
    ) -> ResolvedIdentity {
        // External identifier when plugged in, enrolment matcher otherwise.
        let enrolled;
        let identifier: Option<&dyn VoiceIdentifier> = match self.voice.as_deref() {
            Some(external) => Some(external),
            None => {
                enrolled = EnrolledVoices::new(Arc::clone(&self.enrolments));
                Some(&enrolled)
            }
        };

        let resolved =
            crate::identity::resolve(session_user, voice_embedding, identifier).await;

        // First observed identity creates the profile.
        if let Some(user_id) = &resolved.user_id {
            self.users
                .entry(user_id.clone())
                .or_insert_with(|| UserProfile::new(user_id.clone()));
        }

        resolved
    }

    /// Register a voice sample for a user. First observed identity
    /// creates the profile, same as the resolution chain.
    pub fn enrol_voice(
        &self,
        user_id: &str,
        label: &str,
        embedding: Vec<f32>,
    ) -> VoiceEnrolmentSummary {
        let enrolment = VoiceEnrolment {
            user_id: user_id.to_string(),
            label: label.to_string(),
            embedding,
            enrolled_at: Utc::now(),
        };
        let summary = VoiceEnrolmentSummary {
            user_id: enrolment.user_id.clone(),
            label: enrolment.label.clone(),
            embedding_dim: enrolment.embedding.len(),
            enrolled_at: enrolment.enrolled_at,
        };
        self.users
            .entry(user_id.to_string())
            .or_insert_with(|| UserProfile::new(user_id.to_string()));
        self.enrolments.entry(user_id.to_string()).or_default().push(enrolment);
        tracing::info!(user = user_id, label, "voice sample enrolled");
        summary
    }

    /// Enrolment metadata, for the admin surface
    pub fn voice_enrolments(&self) -> Vec<VoiceEnrolmentSummary> {
        let mut summaries: Vec<VoiceEnrolmentSummary> = self
            .enrolments
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .map(|e| VoiceEnrolmentSummary {
                        user_id: e.user_id.clone(),
                        label: e.label.clone(),
                        embedding_dim: e.embedding.len(),
                        enrolled_at: e.enrolled_at,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        summaries.sort_by(|a, b| b.enrolled_at.cmp(&a.enrolled_at));
        summaries
    }

    pub fn profile(&self, user_id: &str) -> Option<UserProfile> {
        self.users.get(user_id).map(|p| p.clone())
    }

    pub fn upsert_profile(&self, profile: UserProfile) {
        self.users.insert(profile.user_id.clone(), profile);
    }

    pub fn set_parental_policy(&self, child_id: &str, policy: ParentalPolicy) {
        self.parental.insert(child_id.to_string(), policy);
    }

    pub fn parental_policy(&self, child_id: &str) -> Option<ParentalPolicy> {
        self.parental.get(child_id).map(|p| p.clone())
    }

    /// Is the child allowed to target this entity? Non-child profiles and
    /// profiles without a policy are unrestricted.
    pub fn entity_allowed(&self, user_id: &str, entity: &str) -> bool {
        let Some(profile) = self.profile(user_id) else { return true };
        if !profile.is_child() || profile.parent_id.is_none() {
            return true;
        }
        match self.parental_policy(user_id) {
            Some(policy) => policy.allowed_entities.iter().any(|e| e == entity),
            None => true,
        }
    }

    /// Effective content tier for a resolved identity
    pub fn content_tier(&self, identity: &ResolvedIdentity) -> ContentTier {
        let Some(user_id) = &identity.user_id else {
            return ContentTier::Strict;
        };
        let Some(profile) = self.profile(user_id) else {
            return ContentTier::Strict;
        };

        // A parent-linked child takes the parent's override when present.
        if profile.is_child() && profile.parent_id.is_some() {
            if let Some(policy) = self.parental_policy(user_id) {
                if let Some(tier) = policy.tier_override {
                    return tier;
                }
            }
        }

        ContentTier::resolve(profile.effective_age_group(), identity.confidence)
    }

    /// Emotional profile snapshot (creates one on first access)
    pub fn emotional(&self, user_id: &str) -> EmotionalProfile {
        self.emotional
            .entry(user_id.to_string())
            .or_insert_with(|| EmotionalProfile::new(user_id.to_string()))
            .clone()
    }

    /// Apply a sentiment observation under the per-user entry lock
    pub fn record_interaction(&self, user_id: &str, sentiment: &Sentiment) {
        let mut entry = self
            .emotional
            .entry(user_id.to_string())
            .or_insert_with(|| EmotionalProfile::new(user_id.to_string()));
        entry.apply_interaction(sentiment, Utc::now());
    }

    /// Select a filler for this user and update recency, all under the
    /// entry lock.
    pub fn select_filler(
        &self,
        user_id: Option<&str>,
        label: SentimentLabel,
        predicted_confidence: f32,
        follow_up: bool,
    ) -> FillerSelection {
        let key = user_id.unwrap_or("anonymous").to_string();
        let mut entry = self
            .emotional
            .entry(key.clone())
            .or_insert_with(|| EmotionalProfile::new(key));
        self.filler
            .select(&mut entry, label, predicted_confidence, follow_up, Utc::now())
    }

    /// All profiles, for the admin surface
    pub fn all_profiles(&self) -> Vec<UserProfile> {
        self.users.iter().map(|e| e.value().clone()).collect()
    }
}

impl Default for ProfileService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityMethod;

    fn confident(user_id: &str) -> ResolvedIdentity {
        ResolvedIdentity {
            user_id: Some(user_id.to_string()),
            confidence: 1.0,
            method: IdentityMethod::Session,
        }
    }

    #[tokio::test]
    async fn first_identity_creates_profile() {
        let service = ProfileService::new();
        let resolved = service.resolve_identity(Some("ada"), None).await;
        assert_eq!(resolved.user_id.as_deref(), Some("ada"));
        assert!(service.profile("ada").is_some());
    }

    #[test]
    fn anonymous_is_strict() {
        let service = ProfileService::new();
        assert_eq!(
            service.content_tier(&ResolvedIdentity::anonymous()),
            ContentTier::Strict
        );
    }

    #[test]
    fn adult_with_confident_identity_is_standard() {
        let service = ProfileService::new();
        let mut profile = UserProfile::new("ada");
        profile.set_age(35, 0.95);
        service.upsert_profile(profile);
        assert_eq!(service.content_tier(&confident("ada")), ContentTier::Standard);
    }

    #[test]
    fn low_identity_confidence_forces_strict() {
        let service = ProfileService::new();
        let mut profile = UserProfile::new("ada");
        profile.set_age(35, 0.95);
        service.upsert_profile(profile);

        let low = ResolvedIdentity {
            user_id: Some("ada".to_string()),
            confidence: 0.55,
            method: IdentityMethod::VoiceTentative,
        };
        assert_eq!(service.content_tier(&low), ContentTier::Strict);
    }

    #[test]
    fn parental_override_applies_to_linked_child() {
        let service = ProfileService::new();
        let mut child = UserProfile::new("kid");
        child.set_age(9, 0.95);
        child.parent_id = Some("parent".to_string());
        service.upsert_profile(child);
        service.set_parental_policy(
            "kid",
            ParentalPolicy {
                allowed_entities: vec!["light.bedroom".to_string()],
                tier_override: Some(ContentTier::Moderate),
            },
        );

        assert_eq!(service.content_tier(&confident("kid")), ContentTier::Moderate);
        assert!(service.entity_allowed("kid", "light.bedroom"));
        assert!(!service.entity_allowed("kid", "lock.front_door"));
    }

    #[test]
    fn rapport_updates_through_service() {
        let service = ProfileService::new();
        let sentiment = Sentiment { label: SentimentLabel::Positive, compound: 0.7 };
        service.record_interaction("ada", &sentiment);
        assert!(service.emotional("ada").rapport > 0.5);
    }

    #[tokio::test]
    async fn enrolled_voice_resolves_identity() {
        let service = ProfileService::new();
        let summary = service.enrol_voice("ada", "default", vec![1.0, 0.0, 0.0]);
        assert_eq!(summary.embedding_dim, 3);
        // Enrolment alone creates the profile.
        assert!(service.profile("ada").is_some());

        let resolved = service.resolve_identity(None, Some(&[0.99, 0.01, 0.0])).await;
        assert_eq!(resolved.user_id.as_deref(), Some("ada"));
        assert_eq!(resolved.method, IdentityMethod::Voice);

        // An unrelated voice stays anonymous.
        let stranger = service.resolve_identity(None, Some(&[0.0, 0.0, 1.0])).await;
        assert_eq!(stranger.method, IdentityMethod::Anonymous);
    }

    #[test]
    fn enrolment_listing_carries_metadata_only() {
        let service = ProfileService::new();
        service.enrol_voice("ada", "kitchen, morning", vec![0.5; 128]);
        service.enrol_voice("bob", "default", vec![0.5; 128]);

        let listed = service.voice_enrolments();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|e| e.user_id == "ada" && e.label == "kitchen, morning"));
        assert!(listed.iter().all(|e| e.embedding_dim == 128));
    }
}
