//! Background importance decay and garbage collection.
//!
//! Periodically decays the importance of memories untouched for longer than
//! the recency half-life and purges records past their soft expiry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::config::{DecayConfig, RetrievalConfig};
use crate::core::errors::EngineResult;
use crate::memory::store::{DecayParams, MemoryStore};

/// Statistics from a maintenance run.
#[derive(Debug, Clone, Default)]
pub struct DecayStats {
    /// Number of records whose importance was decayed.
    pub decayed: usize,
    /// Number of expired records purged.
    pub purged: usize,
    /// Total run duration in milliseconds.
    pub duration_ms: u64,
}

/// Background decay worker for memory maintenance.
pub struct DecayWorker {
    store: Arc<dyn MemoryStore>,
    config: DecayConfig,
    half_life_seconds: u64,
    shutdown: Arc<Notify>,
}

impl DecayWorker {
    /// Create a new decay worker.
    #[must_use]
    pub fn new(store: Arc<dyn MemoryStore>, config: DecayConfig, retrieval: &RetrievalConfig) -> Self {
        Self {
            store,
            config,
            half_life_seconds: retrieval.recency_half_life_seconds,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a shutdown notifier to stop the worker.
    #[must_use]
    pub fn shutdown_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Spawn the worker as a tokio task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("Memory decay worker is disabled");
            return;
        }

        let interval = Duration::from_secs(self.config.interval_seconds);
        info!(?interval, "Starting memory decay worker");

        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    match self.run_once().await {
                        Ok(stats) => {
                            if stats.decayed > 0 || stats.purged > 0 {
                                info!(
                                    decayed = stats.decayed,
                                    purged = stats.purged,
                                    duration_ms = stats.duration_ms,
                                    "Decay pass completed"
                                );
                            } else {
                                debug!("Decay pass completed with nothing to do");
                            }
                        }
                        Err(err) => {
                            warn!(?err, "Decay pass failed");
                        }
                    }
                }
                () = self.shutdown.notified() => {
                    info!("Memory decay worker shutting down");
                    break;
                }
            }
        }
    }

    /// Run a single maintenance pass across all companions.
    ///
    /// # Errors
    /// Returns an error if store operations fail.
    pub async fn run_once(&self) -> EngineResult<DecayStats> {
        let start = std::time::Instant::now();
        let now = Utc::now();
        let mut stats = DecayStats::default();

        let params = DecayParams {
            older_than_seconds: self.half_life_seconds,
            factor: self.config.factor,
            importance_floor: self.config.importance_floor,
        };

        for companion_id in self.store.companion_ids().await? {
            stats.decayed += self.store.decay(companion_id, params, now).await?;
        }

        stats.purged = self.store.purge_expired(now).await?;

        #[allow(clippy::cast_possible_truncation)]
        {
            stats.duration_ms = start.elapsed().as_millis() as u64;
        }
        Ok(stats)
    }
}
