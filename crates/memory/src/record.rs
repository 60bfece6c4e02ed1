//! Memory records
//!
//! Append-only, content-addressed. Corrections never rewrite a record;
//! they add a new one carrying `supersedes`, and retrieval walks to the
//! newest non-superseded entry at query time. `supersedes` always points
//! at an older record, so the correction graph cannot form a cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind of remembered information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Preference,
    Fact,
    Decision,
    Correction,
    Mood,
    Interaction,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Preference => "preference",
            MemoryType::Fact => "fact",
            MemoryType::Decision => "decision",
            MemoryType::Correction => "correction",
            MemoryType::Mood => "mood",
            MemoryType::Interaction => "interaction",
        }
    }
}

/// Who may retrieve a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// Only the owner
    #[default]
    Private,
    /// Any resolved member of the household
    Household,
    /// Anyone, including anonymous requesters
    Public,
}

/// Where a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    Conversation,
    Onboarding,
    Evolution,
    System,
}

/// One memory record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Deterministic content-addressed id
    pub id: String,
    /// Owning user
    pub owner_id: String,
    pub memory_type: MemoryType,
    /// Redacted text; raw input is never stored
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Id of the record this one corrects, if any
    #[serde(default)]
    pub supersedes: Option<String>,
    /// Optional time-to-live in seconds
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    pub confidence: f32,
    pub source: MemorySource,
    pub access: AccessLevel,
    /// Dense embedding of `text`
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    /// Bumped when a duplicate event re-observes this content
    pub last_seen: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(
        owner_id: impl Into<String>,
        memory_type: MemoryType,
        text: impl Into<String>,
        source: MemorySource,
    ) -> Self {
        let owner_id = owner_id.into();
        let text = text.into();
        let now = Utc::now();
        let id = record_id(&owner_id, memory_type, &text, now);
        Self {
            id,
            owner_id,
            memory_type,
            text,
            tags: Vec::new(),
            supersedes: None,
            ttl_secs: None,
            confidence: 1.0,
            source: MemorySource::Conversation,
            access: AccessLevel::Private,
            embedding: Vec::new(),
            created_at: now,
            last_seen: now,
        }
        .with_source(source)
    }

    pub fn with_source(mut self, source: MemorySource) -> Self {
        self.source = source;
        self
    }

    pub fn with_access(mut self, access: AccessLevel) -> Self {
        self.access = access;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_supersedes(mut self, id: impl Into<String>) -> Self {
        self.supersedes = Some(id.into());
        self
    }

    /// Dedup key: same (owner, type, content) upserts instead of inserting
    pub fn dedup_key(&self) -> String {
        format!("{}:{}:{}", self.owner_id, self.memory_type.as_str(), content_hash(&self.text))
    }
}

/// Hash of normalized content, used for dedup
pub fn content_hash(text: &str) -> String {
    let normalized: String = text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex_prefix(&hasher.finalize(), 16)
}

/// Deterministic record id: hash(owner ‖ type ‖ content hash ‖ timestamp)
pub fn record_id(
    owner_id: &str,
    memory_type: MemoryType,
    text: &str,
    timestamp: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(owner_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(memory_type.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(content_hash(text).as_bytes());
    hasher.update([0u8]);
    hasher.update(timestamp.timestamp_micros().to_be_bytes());
    hex_prefix(&hasher.finalize(), 32)
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(len);
    for b in bytes {
        if out.len() >= len {
            break;
        }
        out.push_str(&format!("{:02x}", b));
    }
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_normalizes_whitespace_and_case() {
        assert_eq!(content_hash("I like  Tea"), content_hash("i like tea"));
        assert_ne!(content_hash("i like tea"), content_hash("i like coffee"));
    }

    #[test]
    fn record_id_is_deterministic() {
        let ts = Utc::now();
        let a = record_id("u1", MemoryType::Fact, "the sky is blue", ts);
        let b = record_id("u1", MemoryType::Fact, "the sky is blue", ts);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn dedup_key_ignores_timestamp() {
        let mut a = MemoryRecord::new("u1", MemoryType::Preference, "lights at 40%", MemorySource::Conversation);
        a.created_at = Utc::now();
        let b = MemoryRecord::new("u1", MemoryType::Preference, "lights at 40%", MemorySource::Conversation);
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn confidence_is_clamped() {
        let r = MemoryRecord::new("u", MemoryType::Fact, "x", MemorySource::System)
            .with_confidence(2.0);
        assert_eq!(r.confidence, 1.0);
    }
}
