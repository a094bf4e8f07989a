//! In-memory memory store for tests and single-process deployments.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::core::config::RetrievalConfig;
use crate::core::errors::EngineResult;
use crate::core::ids::CompanionId;
use crate::memory::ranking::{RankedMemory, rank_records};
use crate::memory::record::MemoryRecord;
use crate::memory::store::{DecayParams, MemoryStore, StoreFuture};

/// DashMap-backed memory store.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    records: DashMap<CompanionId, Vec<MemoryRecord>>,
    config: RetrievalConfig,
}

impl InMemoryMemoryStore {
    /// Create an empty store with default scoring weights.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with the given scoring weights.
    #[must_use]
    pub fn with_config(config: RetrievalConfig) -> Self {
        Self {
            records: DashMap::new(),
            config,
        }
    }
}

impl MemoryStore for InMemoryMemoryStore {
    fn insert(&self, record: MemoryRecord) -> StoreFuture<'_, EngineResult<()>> {
        Box::pin(async move {
            record.validate()?;
            self.records
                .entry(record.companion_id)
                .or_default()
                .push(record);
            Ok(())
        })
    }

    fn retrieve(
        &self,
        companion_id: CompanionId,
        query_embedding: Vec<f32>,
        k: usize,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, EngineResult<Vec<RankedMemory>>> {
        Box::pin(async move {
            let Some(mut entry) = self.records.get_mut(&companion_id) else {
                return Ok(Vec::new());
            };

            let candidates: Vec<MemoryRecord> = entry
                .iter()
                .filter(|record| !record.is_expired(now))
                .cloned()
                .collect();

            let mut ranked = rank_records(candidates, &query_embedding, &self.config, now);
            ranked.truncate(k);

            for hit in &mut ranked {
                hit.record.record_access(now);
                if let Some(stored) = entry.iter_mut().find(|r| r.id == hit.record.id) {
                    stored.record_access(now);
                }
            }

            Ok(ranked)
        })
    }

    fn decay(
        &self,
        companion_id: CompanionId,
        params: DecayParams,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, EngineResult<usize>> {
        Box::pin(async move {
            let Some(mut entry) = self.records.get_mut(&companion_id) else {
                return Ok(0);
            };

            let cutoff = now - chrono::Duration::seconds(params.older_than_seconds as i64);
            let mut touched = 0;
            for record in entry.iter_mut() {
                if record.recency_anchor() <= cutoff {
                    record.importance =
                        (record.importance * params.factor).max(params.importance_floor);
                    touched += 1;
                }
            }

            Ok(touched)
        })
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, EngineResult<usize>> {
        Box::pin(async move {
            let mut removed = 0;
            for mut entry in self.records.iter_mut() {
                let before = entry.len();
                entry.retain(|record| !record.is_expired(now));
                removed += before - entry.len();
            }
            Ok(removed)
        })
    }

    fn count(&self, companion_id: CompanionId) -> StoreFuture<'_, EngineResult<u64>> {
        Box::pin(async move {
            Ok(self
                .records
                .get(&companion_id)
                .map_or(0, |entry| entry.len() as u64))
        })
    }

    fn companion_ids(&self) -> StoreFuture<'_, EngineResult<Vec<CompanionId>>> {
        Box::pin(async move {
            Ok(self
                .records
                .iter()
                .filter(|entry| !entry.is_empty())
                .map(|entry| *entry.key())
                .collect())
        })
    }
}
