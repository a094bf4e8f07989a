//! Per-companion exclusive generation locks.
//!
//! An in-process lock table: correct for a single-process deployment only.
//! Serving the same companion from multiple processes requires a shared
//! lock service in place of this table.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;

use crate::core::errors::{EngineError, EngineResult};
use crate::core::ids::CompanionId;

/// Lock entry for one in-flight generation.
#[derive(Clone, Debug)]
pub struct GenerationSession {
    /// Companion being generated for.
    pub companion_id: CompanionId,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// Cancellation token threaded through the turn.
    pub cancel: CancellationToken,
}

/// Lock table guaranteeing at most one generation per companion.
#[derive(Clone, Default)]
pub struct CompanionLocks {
    sessions: Arc<DashMap<CompanionId, GenerationSession>>,
}

impl CompanionLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the companion's exclusive lock, or reject with `Busy`.
    ///
    /// Contended requests are never queued: a stale client must not be able
    /// to block new turns indefinitely. The returned guard releases the lock
    /// on drop, so every exit path returns the companion to idle.
    ///
    /// # Errors
    /// Returns `Busy` if a generation is already in flight.
    pub fn try_acquire(&self, companion_id: CompanionId) -> EngineResult<SessionGuard> {
        let cancel = CancellationToken::new();
        match self.sessions.entry(companion_id) {
            Entry::Occupied(_) => Err(EngineError::Busy),
            Entry::Vacant(slot) => {
                slot.insert(GenerationSession {
                    companion_id,
                    acquired_at: Utc::now(),
                    cancel: cancel.clone(),
                });
                Ok(SessionGuard {
                    sessions: Arc::clone(&self.sessions),
                    companion_id,
                    cancel,
                })
            }
        }
    }

    /// Whether a generation is currently in flight for the companion.
    #[must_use]
    pub fn is_busy(&self, companion_id: CompanionId) -> bool {
        self.sessions.contains_key(&companion_id)
    }
}

/// RAII guard for an acquired generation session.
pub struct SessionGuard {
    sessions: Arc<DashMap<CompanionId, GenerationSession>>,
    companion_id: CompanionId,
    cancel: CancellationToken,
}

impl SessionGuard {
    /// The cancellation token for this turn.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.companion_id);
    }
}
