//! Identity resolution
//!
//! Priority chain: authenticated session id, confident voice match,
//! tentative voice match (flagged low confidence), anonymous. Voice
//! resolvers are pluggable; the default matcher scores an utterance
//! embedding against the enrolled voice samples.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use cortex_config::constants::identity;

/// How an identity was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMethod {
    Session,
    Voice,
    VoiceTentative,
    Anonymous,
}

/// Resolution result
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    /// `None` for anonymous requests
    pub user_id: Option<String>,
    pub confidence: f32,
    pub method: IdentityMethod,
}

impl ResolvedIdentity {
    pub fn anonymous() -> Self {
        Self { user_id: None, confidence: 0.0, method: IdentityMethod::Anonymous }
    }

    /// Tentative matches carry a user id but downstream consumers must
    /// treat them as low confidence (strict tier, shared memory only).
    pub fn is_low_confidence(&self) -> bool {
        self.confidence <= cortex_core::IDENTITY_CONFIDENCE_FLOOR
    }
}

/// Best speaker match from a voice embedding
#[derive(Debug, Clone)]
pub struct VoiceMatch {
    pub user_id: String,
    pub confidence: f32,
}

/// Pluggable speaker identification backend
#[async_trait]
pub trait VoiceIdentifier: Send + Sync {
    /// Best match for the utterance embedding, if any
    async fn identify(&self, embedding: &[f32]) -> Option<VoiceMatch>;
}

/// One enrolled voice sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceEnrolment {
    pub user_id: String,
    /// Human label for the sample, e.g. "kitchen, morning"
    pub label: String,
    pub embedding: Vec<f32>,
    pub enrolled_at: DateTime<Utc>,
}

/// Default voice matcher over the enrolment store. Confidence is the
/// cosine similarity of the best-matching sample; the resolution chain's
/// accept/tentative thresholds do the rest.
pub struct EnrolledVoices {
    enrolments: Arc<DashMap<String, Vec<VoiceEnrolment>>>,
}

impl EnrolledVoices {
    pub fn new(enrolments: Arc<DashMap<String, Vec<VoiceEnrolment>>>) -> Self {
        Self { enrolments }
    }
}

#[async_trait]
impl VoiceIdentifier for EnrolledVoices {
    async fn identify(&self, embedding: &[f32]) -> Option<VoiceMatch> {
        let mut best: Option<VoiceMatch> = None;
        for entry in self.enrolments.iter() {
            for sample in entry.value() {
                let score = cosine(embedding, &sample.embedding);
                if best.as_ref().map(|b| score > b.confidence).unwrap_or(true) {
                    best = Some(VoiceMatch { user_id: entry.key().clone(), confidence: score });
                }
            }
        }
        best
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Resolve an identity from the available signals
pub async fn resolve(
    session_user: Option<&str>,
    voice_embedding: Option<&[f32]>,
    voice: Option<&dyn VoiceIdentifier>,
) -> ResolvedIdentity {
    if let Some(user_id) = session_user {
        return ResolvedIdentity {
            user_id: Some(user_id.to_string()),
            confidence: 1.0,
            method: IdentityMethod::Session,
        };
    }

    if let (Some(embedding), Some(identifier)) = (voice_embedding, voice) {
        if let Some(m) = identifier.identify(embedding).await {
            if m.confidence >= identity::VOICE_ACCEPT {
                return ResolvedIdentity {
                    user_id: Some(m.user_id),
                    confidence: m.confidence,
                    method: IdentityMethod::Voice,
                };
            }
            if m.confidence >= identity::VOICE_TENTATIVE {
                return ResolvedIdentity {
                    user_id: Some(m.user_id),
                    confidence: m.confidence,
                    method: IdentityMethod::VoiceTentative,
                };
            }
        }
    }

    ResolvedIdentity::anonymous()
}
