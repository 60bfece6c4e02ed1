//! Memory store
//!
//! Owns the records, both indexes, the dedup table, and the COLD queue
//! sender. Shared reader / single writer: the HOT path reads under shared
//! locks, the COLD consumer performs batched atomic upserts.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use cortex_config::constants::memory as mem_constants;
use cortex_providers::{ProviderRegistry, Role};

use crate::cold::MemoryEvent;
use crate::dense::DenseIndex;
use crate::fusion::rrf_fuse;
use crate::hot::{HotQueryOptions, MemoryHit};
use crate::record::{AccessLevel, MemoryRecord};
use crate::rerank::{NoopReranker, Reranker};
use crate::sparse::{SparseConfig, SparseIndex};
use crate::MemoryError;

/// Store configuration
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Data dir for the sparse index, vector snapshot, and journal;
    /// everything stays in memory when `None`
    pub data_dir: Option<PathBuf>,
    /// Candidates per search arm before fusion
    pub candidate_top_n: usize,
    /// RRF constant
    pub rrf_k: f32,
    /// Soft deadline for the search fan-out; a branch past it is dropped
    /// and the other branch's partial result is used alone
    pub hot_soft_timeout: Duration,
    /// Hard deadline for a HOT query
    pub hot_hard_timeout: Duration,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            candidate_top_n: mem_constants::CANDIDATE_TOP_N,
            rrf_k: mem_constants::RRF_K,
            hot_soft_timeout: Duration::from_millis(mem_constants::HOT_SOFT_TIMEOUT_MS),
            hot_hard_timeout: Duration::from_millis(mem_constants::HOT_HARD_TIMEOUT_MS),
        }
    }
}

/// Hybrid retrieval memory store
pub struct MemoryStore {
    config: MemoryStoreConfig,
    registry: Arc<ProviderRegistry>,
    records: RwLock<HashMap<String, MemoryRecord>>,
    /// dedup key → record id
    dedup: RwLock<HashMap<String, String>>,
    /// Ids that a later correction supersedes
    superseded: RwLock<HashSet<String>>,
    dense: Arc<DenseIndex>,
    sparse: Arc<SparseIndex>,
    reranker: Arc<dyn Reranker>,
    cold_tx: mpsc::Sender<MemoryEvent>,
}

impl MemoryStore {
    /// Create the store and hand back the COLD queue receiver for the
    /// worker. The caller spawns [`crate::ColdWorker::run`] with it.
    pub fn new(
        config: MemoryStoreConfig,
        registry: Arc<ProviderRegistry>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<MemoryEvent>), MemoryError> {
        let sparse_config = SparseConfig {
            index_path: config
                .data_dir
                .as_ref()
                .map(|d| d.join("sparse").to_string_lossy().into_owned()),
            ..Default::default()
        };
        let sparse = Arc::new(SparseIndex::new(sparse_config)?);

        let dense = match config.data_dir.as_ref() {
            Some(dir) => {
                let path = dir.join("vectors").join("index.json");
                if path.exists() {
                    Arc::new(DenseIndex::load(&path)?)
                } else {
                    Arc::new(DenseIndex::new())
                }
            }
            None => Arc::new(DenseIndex::new()),
        };

        let (cold_tx, cold_rx) = mpsc::channel(mem_constants::COLD_QUEUE_CAPACITY);

        let store = Arc::new(Self {
            config,
            registry,
            records: RwLock::new(HashMap::new()),
            dedup: RwLock::new(HashMap::new()),
            superseded: RwLock::new(HashSet::new()),
            dense,
            sparse,
            reranker: Arc::new(NoopReranker),
            cold_tx,
        });

        Ok((store, cold_rx))
    }

    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    /// Embed via the registry's embed role
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let binding = self
            .registry
            .for_role(Role::Embed)
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        binding
            .provider
            .embed(&binding.model, text)
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))
    }

    /// Enqueue a COLD event, best effort. A full queue drops the event.
    pub fn enqueue(&self, event: MemoryEvent) {
        match self.cold_tx.try_send(event) {
            Ok(()) => {
                metrics::counter!("memory_cold_enqueued").increment(1);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::counter!("memory_cold_dropped").increment(1);
                tracing::warn!("COLD queue full, dropping memory event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("COLD queue closed, dropping memory event");
            }
        }
    }

    /// Commit a record to every index. Dedup on (owner, type, content):
    /// an existing record only gets its `last_seen` bumped. Returns the id
    /// the content lives under.
    pub fn commit(&self, mut record: MemoryRecord) -> Result<String, MemoryError> {
        let key = record.dedup_key();

        if let Some(existing_id) = self.dedup.read().get(&key).cloned() {
            if let Some(existing) = self.records.write().get_mut(&existing_id) {
                existing.last_seen = chrono::Utc::now();
                metrics::counter!("memory_dedup_bumps").increment(1);
                return Ok(existing_id);
            }
        }

        if record.embedding.is_empty() {
            return Err(MemoryError::Embedding("record committed without embedding".into()));
        }

        if let Some(superseded_id) = record.supersedes.clone() {
            self.superseded.write().insert(superseded_id);
        }

        let id = record.id.clone();
        self.sparse.upsert(std::slice::from_ref(&record))?;
        self.dense.upsert(&id, record.embedding.clone());
        self.dedup.write().insert(key, id.clone());
        self.records.write().insert(id.clone(), record);
        metrics::counter!("memory_records_committed").increment(1);
        Ok(id)
    }

    /// HOT query. Never fails: any error or a missed deadline returns an
    /// empty hit list and a log line.
    pub async fn hot_query(&self, query: &str, options: &HotQueryOptions) -> Vec<MemoryHit> {
        let deadline = self.config.hot_hard_timeout;
        match tokio::time::timeout(deadline, self.hot_query_inner(query, options)).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                metrics::counter!("memory_hot_errors").increment(1);
                tracing::warn!(error = %e, "HOT query failed, degrading to empty context");
                Vec::new()
            }
            Err(_) => {
                metrics::counter!("memory_hot_timeouts").increment(1);
                tracing::warn!(timeout_ms = deadline.as_millis() as u64, "HOT query deadline missed");
                Vec::new()
            }
        }
    }

    async fn hot_query_inner(
        &self,
        query: &str,
        options: &HotQueryOptions,
    ) -> Result<Vec<MemoryHit>, MemoryError> {
        let embedding = self.embed(query).await?;

        let sparse = Arc::clone(&self.sparse);
        let query_owned = query.to_string();
        let top_n = self.config.candidate_top_n;

        // Dense and sparse search concurrently; sparse hits the Tantivy
        // searcher on a blocking thread. Past the soft deadline the dense
        // partial stands alone rather than failing the whole query.
        let sparse_task = tokio::task::spawn_blocking(move || sparse.search(&query_owned, top_n));
        let dense_results = self.dense.search(&embedding, top_n);
        let sparse_results =
            match tokio::time::timeout(self.config.hot_soft_timeout, sparse_task).await {
                Ok(Ok(Ok(results))) => results,
                Ok(Ok(Err(e))) => {
                    tracing::warn!(error = %e, "sparse search failed, dense-only fusion");
                    Vec::new()
                }
                Ok(Err(e)) => {
                    return Err(MemoryError::Search(format!("sparse task: {}", e)));
                }
                Err(_) => {
                    metrics::counter!("memory_hot_soft_timeouts").increment(1);
                    tracing::warn!("sparse search missed the soft deadline, dense-only fusion");
                    Vec::new()
                }
            };

        let dense_scores: HashMap<String, f32> =
            dense_results.iter().map(|r| (r.id.clone(), r.score)).collect();
        let sparse_scores: HashMap<String, f32> =
            sparse_results.iter().map(|r| (r.id.clone(), r.score)).collect();

        let fused = rrf_fuse(
            &[
                dense_results.into_iter().map(|r| r.id).collect(),
                sparse_results.into_iter().map(|r| r.id).collect(),
            ],
            self.config.rrf_k,
        );

        let hits = {
            let records = self.records.read();
            let superseded = self.superseded.read();

            let mut hits = Vec::new();
            for (id, fused_score) in fused {
                // Walk the correction DAG at query time: superseded tails are
                // invisible, their corrections rank on their own.
                if superseded.contains(&id) {
                    continue;
                }
                let Some(record) = records.get(&id) else { continue };
                if !Self::access_allowed(record, options) {
                    continue;
                }
                hits.push(MemoryHit {
                    record: record.clone(),
                    dense_score: dense_scores.get(&id).copied(),
                    sparse_score: sparse_scores.get(&id).copied(),
                    fused_score,
                    rank: 0,
                });
            }
            hits
        };

        let mut hits = self.reranker.rerank(query, hits).await;
        hits.truncate(options.top_k);
        for (i, hit) in hits.iter_mut().enumerate() {
            hit.rank = i + 1;
        }
        Ok(hits)
    }

    /// Access filter: owner match requires a confident identity; everyone
    /// else sees household and public records only.
    fn access_allowed(record: &MemoryRecord, options: &HotQueryOptions) -> bool {
        match record.access {
            AccessLevel::Public | AccessLevel::Household => true,
            AccessLevel::Private => match &options.requester {
                Some(requester)
                    if options.identity_confidence
                        > cortex_core::IDENTITY_CONFIDENCE_FLOOR =>
                {
                    record.owner_id == *requester
                }
                _ => false,
            },
        }
    }

    /// Persist the dense snapshot, if a data dir is configured
    pub fn snapshot(&self) -> Result<(), MemoryError> {
        if let Some(dir) = self.config.data_dir.as_ref() {
            self.dense.snapshot(&dir.join("vectors").join("index.json"))?;
        }
        Ok(())
    }

    /// Records owned by a user, newest first (admin surface)
    pub fn records_for_user(&self, user_id: &str) -> Vec<MemoryRecord> {
        let mut records: Vec<MemoryRecord> = self
            .records
            .read()
            .values()
            .filter(|r| r.owner_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MemorySource, MemoryType};
    use cortex_config::Settings;
    use cortex_providers::build_registry;

    async fn store() -> Arc<MemoryStore> {
        let registry = build_registry(&Settings::default()).unwrap();
        // Knock the network embedder out so the hash embedder answers.
        registry.refresh_health().await;
        let (store, _rx) = MemoryStore::new(MemoryStoreConfig::default(), registry).unwrap();
        store
    }

    async fn committed(store: &Arc<MemoryStore>, record: MemoryRecord) -> String {
        let mut record = record;
        record.embedding = store.embed(&record.text).await.unwrap();
        store.commit(record).unwrap()
    }

    #[tokio::test]
    async fn round_trip_preference() {
        let store = store().await;
        let record = MemoryRecord::new(
            "u1",
            MemoryType::Preference,
            "prefers the lights at 40% in the evening",
            MemorySource::Conversation,
        );
        committed(&store, record).await;

        let options = HotQueryOptions::for_user("u1", 0.95);
        let hits = store.hot_query("set the lights", &options).await;
        assert!(!hits.is_empty());
        assert!(hits[0].record.text.contains("40%"));
        assert_eq!(hits[0].rank, 1);
    }

    #[tokio::test]
    async fn dedup_bumps_last_seen() {
        let store = store().await;
        let r1 = MemoryRecord::new("u1", MemoryType::Fact, "lives in Zurich", MemorySource::Conversation);
        let first_id = committed(&store, r1).await;

        let r2 = MemoryRecord::new("u1", MemoryType::Fact, "lives in  zurich", MemorySource::Conversation);
        let second_id = committed(&store, r2).await;

        assert_eq!(first_id, second_id);
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn access_filter_hides_foreign_private_records() {
        let store = store().await;
        let record = MemoryRecord::new(
            "owner",
            MemoryType::Preference,
            "secret preference about morning alarms",
            MemorySource::Conversation,
        );
        committed(&store, record).await;

        let other = HotQueryOptions::for_user("someone-else", 0.95);
        let hits = store.hot_query("morning alarms", &other).await;
        assert!(hits.is_empty());

        let anonymous = HotQueryOptions::default();
        let hits = store.hot_query("morning alarms", &anonymous).await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn low_confidence_identity_sees_household_only() {
        let store = store().await;
        let private = MemoryRecord::new(
            "u1",
            MemoryType::Preference,
            "private note about the thermostat",
            MemorySource::Conversation,
        );
        committed(&store, private).await;
        let shared = MemoryRecord::new(
            "u1",
            MemoryType::Fact,
            "the thermostat is in the hallway",
            MemorySource::Conversation,
        )
        .with_access(AccessLevel::Household);
        committed(&store, shared).await;

        // Confidence exactly at the floor counts as low.
        let low = HotQueryOptions::for_user("u1", 0.6);
        let hits = store.hot_query("thermostat", &low).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.access, AccessLevel::Household);
    }

    #[tokio::test]
    async fn correction_supersedes_original() {
        let store = store().await;
        let original = MemoryRecord::new(
            "u1",
            MemoryType::Preference,
            "prefers coffee in the morning",
            MemorySource::Conversation,
        );
        let original_id = committed(&store, original).await;

        let mut correction = MemoryRecord::new(
            "u1",
            MemoryType::Correction,
            "prefers tea in the morning, not coffee",
            MemorySource::Conversation,
        )
        .with_supersedes(original_id.clone());
        correction.embedding = store.embed(&correction.text).await.unwrap();
        store.commit(correction).unwrap();

        let options = HotQueryOptions::for_user("u1", 0.95);
        let hits = store.hot_query("morning coffee preference", &options).await;
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.record.id != original_id));
        assert!(hits[0].record.text.contains("tea"));
    }

    #[tokio::test]
    async fn hot_query_never_fails_on_empty_store() {
        let store = store().await;
        let hits = store.hot_query("anything at all", &HotQueryOptions::default()).await;
        assert!(hits.is_empty());
    }
}
