//! Memory store abstraction.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};

use crate::core::errors::EngineResult;
use crate::core::ids::CompanionId;
use crate::memory::ranking::RankedMemory;
use crate::memory::record::MemoryRecord;

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Parameters for an importance decay pass.
#[derive(Clone, Copy, Debug)]
pub struct DecayParams {
    /// Only records untouched for longer than this are decayed.
    pub older_than_seconds: u64,
    /// Multiplier applied to stale importance (< 1).
    pub factor: f64,
    /// Importance never decays below this floor.
    pub importance_floor: f64,
}

/// Persistence and ranked retrieval of memory records per companion.
///
/// `retrieve` is a read with a side effect: every returned record's access
/// count is incremented and its last-accessed timestamp refreshed, and the
/// returned copies reflect the touch.
pub trait MemoryStore: Send + Sync {
    /// Insert a validated record. Atomic: either fully written or not at all.
    ///
    /// # Errors
    /// Returns a storage error if the record cannot be persisted.
    fn insert(&self, record: MemoryRecord) -> StoreFuture<'_, EngineResult<()>>;

    /// Rank the companion's non-expired memories against a query embedding
    /// and return the top `k`, most relevant first, after touching them.
    ///
    /// # Errors
    /// Returns a storage error if the query cannot be executed.
    fn retrieve(
        &self,
        companion_id: CompanionId,
        query_embedding: Vec<f32>,
        k: usize,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, EngineResult<Vec<RankedMemory>>>;

    /// Decay the importance of stale records. Returns the number touched.
    ///
    /// # Errors
    /// Returns a storage error if the update fails.
    fn decay(
        &self,
        companion_id: CompanionId,
        params: DecayParams,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, EngineResult<usize>>;

    /// Delete records past their soft expiry. Returns the number removed.
    ///
    /// # Errors
    /// Returns a storage error if the deletion fails.
    fn purge_expired(&self, now: DateTime<Utc>) -> StoreFuture<'_, EngineResult<usize>>;

    /// Count all records owned by a companion, expired included.
    ///
    /// # Errors
    /// Returns a storage error if the count fails.
    fn count(&self, companion_id: CompanionId) -> StoreFuture<'_, EngineResult<u64>>;

    /// Companion ids that currently own at least one record.
    ///
    /// # Errors
    /// Returns a storage error if the scan fails.
    fn companion_ids(&self) -> StoreFuture<'_, EngineResult<Vec<CompanionId>>>;
}
