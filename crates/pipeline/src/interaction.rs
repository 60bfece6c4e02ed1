//! Interaction log
//!
//! One append-only record per completed request. Feeds the COLD memory
//! path, instant recall, checkpoint expansion, and the nightly evolution
//! collaborator. Ring-bounded in memory; the persistent schema belongs to
//! the data-model collaborator.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use cortex_actions::RecentRecall;
use cortex_core::{MatchedLayer, Sentiment};

const LOG_CAPACITY: usize = 10_000;

/// One completed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub request_id: String,
    pub conversation_id: String,
    /// Turn number within the conversation, starting at 0
    pub turn_index: usize,
    pub user_id: Option<String>,
    pub speaker_id: Option<String>,
    pub message: String,
    pub matched_layer: MatchedLayer,
    pub matched_pattern_id: Option<u64>,
    pub sentiment: Sentiment,
    pub response: String,
    pub latency_ms: u64,
    pub model: Option<String>,
    pub filler_used: Option<String>,
    pub area: Option<String>,
    pub confidence: f32,
    /// Categories of guardrail events raised during the request
    pub guardrail_events: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Append-only ring of interaction records
pub struct InteractionLog {
    records: RwLock<VecDeque<InteractionRecord>>,
}

impl InteractionLog {
    pub fn new() -> Self {
        Self { records: RwLock::new(VecDeque::with_capacity(256)) }
    }

    pub fn append(&self, record: InteractionRecord) {
        let mut records = self.records.write();
        if records.len() >= LOG_CAPACITY {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Next turn index for a conversation
    pub fn next_turn_index(&self, conversation_id: &str) -> usize {
        self.records
            .read()
            .iter()
            .filter(|r| r.conversation_id == conversation_id)
            .map(|r| r.turn_index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Turns of one conversation inside an inclusive range, in order.
    /// Used to expand a checkpoint back into verbatim turns.
    pub fn turns_in_range(
        &self,
        conversation_id: &str,
        start: usize,
        end: usize,
    ) -> Vec<InteractionRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| {
                r.conversation_id == conversation_id
                    && r.turn_index >= start
                    && r.turn_index <= end
            })
            .cloned()
            .collect()
    }

    /// Most recent records for a conversation, newest last
    pub fn recent_for_conversation(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Vec<InteractionRecord> {
        let records = self.records.read();
        let mut matching: Vec<InteractionRecord> = records
            .iter()
            .filter(|r| r.conversation_id == conversation_id)
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.drain(..skip);
        matching
    }

    /// Aggregate counts for the admin surface
    pub fn layer_counts(&self) -> std::collections::HashMap<String, usize> {
        let mut counts = std::collections::HashMap::new();
        for record in self.records.read().iter() {
            *counts.entry(record.matched_layer.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for InteractionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RecentRecall for InteractionLog {
    fn recent(&self, user_id: &str, limit: usize) -> Vec<(String, String)> {
        let records = self.records.read();
        records
            .iter()
            .rev()
            .filter(|r| r.user_id.as_deref() == Some(user_id))
            .take(limit)
            .map(|r| (r.message.clone(), r.response.clone()))
            .collect()
    }
}

#[cfg(test)]
pub(crate) fn test_record(
    conversation_id: &str,
    turn_index: usize,
    message: &str,
    response: &str,
) -> InteractionRecord {
    InteractionRecord {
        request_id: format!("req-{}", turn_index),
        conversation_id: conversation_id.to_string(),
        turn_index,
        user_id: Some("u1".to_string()),
        speaker_id: None,
        message: message.to_string(),
        matched_layer: MatchedLayer::Llm,
        matched_pattern_id: None,
        sentiment: Sentiment::neutral(),
        response: response.to_string(),
        latency_ms: 10,
        model: None,
        filler_used: None,
        area: None,
        confidence: 1.0,
        guardrail_events: Vec::new(),
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_indexes_are_monotonic_per_conversation() {
        let log = InteractionLog::new();
        assert_eq!(log.next_turn_index("c1"), 0);
        log.append(test_record("c1", 0, "hi", "hello"));
        log.append(test_record("c2", 0, "hey", "hi"));
        assert_eq!(log.next_turn_index("c1"), 1);
        log.append(test_record("c1", 1, "more", "sure"));
        assert_eq!(log.next_turn_index("c1"), 2);
        assert_eq!(log.next_turn_index("c2"), 1);
    }

    #[test]
    fn range_query_returns_verbatim_turns() {
        let log = InteractionLog::new();
        for i in 0..10 {
            log.append(test_record("c1", i, &format!("q{}", i), &format!("a{}", i)));
        }
        let window = log.turns_in_range("c1", 2, 4);
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].message, "q2");
        assert_eq!(window[2].message, "q4");
    }

    #[test]
    fn recall_is_per_user_and_newest_first() {
        let log = InteractionLog::new();
        log.append(test_record("c1", 0, "about the moon", "384,400 km"));
        let mut other = test_record("c1", 1, "other user", "reply");
        other.user_id = Some("u2".to_string());
        log.append(other);

        let recent = log.recent("u1", 5);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].0, "about the moon");
    }
}
