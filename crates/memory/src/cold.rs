//! COLD write path
//!
//! A single long-lived consumer drains the queue: redact, classify,
//! dedup, embed, upsert. Events are journaled before processing and
//! marked committed after the upsert, so replaying any prefix of the
//! journal after a crash converges on the same index state.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use cortex_config::constants::memory as mem_constants;
use cortex_core::SentimentAnalyzer;

use crate::decider::MemoryDecider;
use crate::record::{content_hash, AccessLevel, MemoryRecord, MemorySource, MemoryType};
use crate::redactor::PiiRedactor;
use crate::store::MemoryStore;
use crate::MemoryError;

/// One queued write event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub user_id: String,
    /// Raw user text; redacted before it touches disk or index
    pub text: String,
    pub interaction_id: String,
    #[serde(default)]
    pub access: AccessLevel,
}

impl MemoryEvent {
    /// Stable identity for journal replay
    fn event_hash(&self) -> String {
        content_hash(&format!("{}|{}|{}", self.user_id, self.interaction_id, self.text))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum JournalLine {
    Event {
        hash: String,
        #[serde(flatten)]
        event: MemoryEvent,
    },
    Commit {
        hash: String,
    },
}

/// Append-only journal for crash-safe replay
struct Journal {
    path: PathBuf,
}

impl Journal {
    fn append(&self, line: &JournalLine) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MemoryError::Journal(e.to_string()))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| MemoryError::Journal(e.to_string()))?;
        let encoded =
            serde_json::to_string(line).map_err(|e| MemoryError::Journal(e.to_string()))?;
        writeln!(file, "{}", encoded).map_err(|e| MemoryError::Journal(e.to_string()))?;
        Ok(())
    }

    /// Events journaled but never committed
    fn uncommitted(&self) -> Vec<MemoryEvent> {
        let Ok(data) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        let mut pending: Vec<(String, MemoryEvent)> = Vec::new();
        for line in data.lines() {
            match serde_json::from_str::<JournalLine>(line) {
                Ok(JournalLine::Event { hash, event }) => pending.push((hash, event)),
                Ok(JournalLine::Commit { hash }) => {
                    pending.retain(|(h, _)| *h != hash);
                }
                Err(_) => {
                    // A torn tail line from a crash mid-write is expected.
                    continue;
                }
            }
        }
        pending.into_iter().map(|(_, e)| e).collect()
    }
}

/// COLD queue consumer
pub struct ColdWorker {
    store: Arc<MemoryStore>,
    rx: mpsc::Receiver<MemoryEvent>,
    redactor: PiiRedactor,
    decider: MemoryDecider,
    sentiment: SentimentAnalyzer,
    journal: Option<Journal>,
}

impl ColdWorker {
    pub fn new(
        store: Arc<MemoryStore>,
        rx: mpsc::Receiver<MemoryEvent>,
        journal_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            store,
            rx,
            redactor: PiiRedactor::new(),
            decider: MemoryDecider::new(),
            sentiment: SentimentAnalyzer::new(),
            journal: journal_dir.map(|dir| Journal { path: dir.join("memory").join("journal.jsonl") }),
        }
    }

    /// Replay uncommitted journal entries, then drain the queue until the
    /// sender side closes. Intended for `tokio::spawn` at startup.
    pub async fn run(mut self) {
        if let Some(journal) = &self.journal {
            let pending = journal.uncommitted();
            if !pending.is_empty() {
                tracing::info!(count = pending.len(), "replaying uncommitted memory events");
                for event in pending {
                    self.process(event, false).await;
                }
            }
        }

        tracing::debug!("COLD memory consumer started");
        while let Some(event) = self.rx.recv().await {
            self.process(event, true).await;
        }
        tracing::debug!("COLD memory consumer stopped");
    }

    async fn process(&self, event: MemoryEvent, journal_event: bool) {
        let hash = event.event_hash();

        if journal_event {
            if let Some(journal) = &self.journal {
                if let Err(e) = journal.append(&JournalLine::Event {
                    hash: hash.clone(),
                    event: MemoryEvent {
                        // Journal only redacted text; raw never touches disk.
                        text: self.redactor.redact(&event.text).text,
                        ..event.clone()
                    },
                }) {
                    tracing::warn!(error = %e, "journal append failed");
                }
            }
        }

        let mut attempts = 0;
        loop {
            match self.apply(&event).await {
                Ok(committed) => {
                    if committed {
                        if let Some(journal) = &self.journal {
                            let _ = journal.append(&JournalLine::Commit { hash: hash.clone() });
                        }
                    }
                    break;
                }
                Err(e) => {
                    attempts += 1;
                    if attempts > mem_constants::COLD_MAX_RETRIES {
                        metrics::counter!("memory_cold_failed").increment(1);
                        tracing::warn!(error = %e, attempts, "dropping COLD event after retries");
                        break;
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(50 * attempts as u64))
                        .await;
                }
            }
        }
    }

    /// Returns `Ok(true)` when a record was committed, `Ok(false)` when the
    /// decider dropped the event as low-signal.
    async fn apply(&self, event: &MemoryEvent) -> Result<bool, MemoryError> {
        let redacted = self.redactor.redact(&event.text);
        let sentiment = self.sentiment.analyze(&redacted.text);

        let Some(decision) = self.decider.decide(&redacted.text, &sentiment) else {
            return Ok(false);
        };

        let mut record = MemoryRecord::new(
            event.user_id.clone(),
            decision.memory_type,
            redacted.text.clone(),
            MemorySource::Conversation,
        )
        .with_confidence(decision.confidence)
        .with_access(event.access);

        // A correction points at the record it replaces; the target is the
        // user's most recent lexically-overlapping memory.
        if decision.memory_type == MemoryType::Correction {
            if let Some(target) = self.correction_target(&event.user_id, &redacted.text) {
                record = record.with_supersedes(target);
            }
        }

        record.embedding = self.store.embed(&record.text).await?;
        self.store.commit(record)?;
        Ok(true)
    }

    fn correction_target(&self, user_id: &str, text: &str) -> Option<String> {
        let words: std::collections::HashSet<String> = text
            .to_lowercase()
            .split_whitespace()
            .map(|w| w.to_string())
            .collect();

        let mut best: Option<(f32, String)> = None;
        for record in self.store.records_for_user(user_id) {
            if record.memory_type == MemoryType::Correction {
                continue;
            }
            let other: std::collections::HashSet<String> = record
                .text
                .to_lowercase()
                .split_whitespace()
                .map(|w| w.to_string())
                .collect();
            let intersection = words.intersection(&other).count() as f32;
            let union = words.union(&other).count() as f32;
            if union == 0.0 {
                continue;
            }
            let jaccard = intersection / union;
            if jaccard >= 0.2 && best.as_ref().map(|(s, _)| jaccard > *s).unwrap_or(true) {
                best = Some((jaccard, record.id.clone()));
            }
        }
        best.map(|(_, id)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStoreConfig;
    use cortex_config::Settings;
    use cortex_providers::build_registry;

    async fn setup(journal_dir: Option<PathBuf>) -> (Arc<MemoryStore>, ColdWorker) {
        let registry = build_registry(&Settings::default()).unwrap();
        registry.refresh_health().await;
        let (store, rx) = MemoryStore::new(MemoryStoreConfig::default(), registry).unwrap();
        let worker = ColdWorker::new(Arc::clone(&store), rx, journal_dir);
        (store, worker)
    }

    fn event(text: &str) -> MemoryEvent {
        MemoryEvent {
            user_id: "u1".to_string(),
            text: text.to_string(),
            interaction_id: "int-1".to_string(),
            access: AccessLevel::Private,
        }
    }

    #[tokio::test]
    async fn preference_is_committed() {
        let (store, worker) = setup(None).await;
        let committed = worker.apply(&event("I prefer the lights at 40% in the evening")).await.unwrap();
        assert!(committed);
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn chit_chat_is_dropped() {
        let (store, worker) = setup(None).await;
        let committed = worker.apply(&event("ok thanks")).await.unwrap();
        assert!(!committed);
        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test]
    async fn pii_never_reaches_the_index() {
        let (store, worker) = setup(None).await;
        worker
            .apply(&event("I prefer updates sent to jo@example.com every week"))
            .await
            .unwrap();
        let records = store.records_for_user("u1");
        assert_eq!(records.len(), 1);
        assert!(!records[0].text.contains("example.com"));
        assert!(records[0].text.contains("[email]"));
    }

    #[tokio::test]
    async fn correction_links_to_prior_record() {
        let (store, worker) = setup(None).await;
        worker.apply(&event("I prefer coffee in the morning")).await.unwrap();
        worker
            .apply(&event("actually I prefer tea in the morning"))
            .await
            .unwrap();

        let records = store.records_for_user("u1");
        assert_eq!(records.len(), 2);
        let correction = records
            .iter()
            .find(|r| r.memory_type == MemoryType::Correction)
            .unwrap();
        assert!(correction.supersedes.is_some());
    }

    #[tokio::test]
    async fn committed_events_are_not_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let journal_dir = dir.path().to_path_buf();

        let (store, worker) = setup(Some(journal_dir.clone())).await;
        worker
            .process(event("I prefer the lights at 40% in the evening"), true)
            .await;
        assert_eq!(store.record_count(), 1);

        let journal = Journal { path: journal_dir.join("memory").join("journal.jsonl") };
        assert!(journal.uncommitted().is_empty());
    }

    #[tokio::test]
    async fn replaying_a_prefix_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let journal_dir = dir.path().to_path_buf();
        let journal = Journal { path: journal_dir.join("memory").join("journal.jsonl") };

        // Simulate a crash after journaling but before the commit marker.
        let e = event("I prefer the lights at 40% in the evening");
        journal
            .append(&JournalLine::Event { hash: e.event_hash(), event: e })
            .unwrap();

        let (store, worker) = setup(Some(journal_dir.clone())).await;
        for pending in journal.uncommitted() {
            worker.process(pending, false).await;
        }
        assert_eq!(store.record_count(), 1);

        // Replaying the same prefix again converges on the same state.
        for pending in journal.uncommitted() {
            worker.process(pending, false).await;
        }
        assert_eq!(store.record_count(), 1);
    }
}
