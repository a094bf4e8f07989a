//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::companion::registry::CompanionRegistry;
use crate::companion::store::SqliteCompanionStore;
use crate::core::config::EngineConfig;
use crate::core::errors::EngineResult;
use crate::memory::sqlite_store::SqliteMemoryStore;
use crate::memory::store::MemoryStore;
use crate::providers::embedding::OllamaEmbeddingProvider;
use crate::providers::generation::OllamaGenerationProvider;
use crate::session::coordinator::SessionCoordinator;

/// Shared application state.
pub struct AppState {
    /// Companion registry.
    pub registry: Arc<CompanionRegistry>,
    /// Generation session coordinator.
    pub coordinator: SessionCoordinator,
    /// Memory store handle, shared with the decay worker.
    pub memory: Arc<dyn MemoryStore>,
    /// Engine configuration.
    pub config: EngineConfig,
}

impl AppState {
    /// Build the full component graph over `SQLite` stores and Ollama
    /// providers. No hidden globals: everything is constructed here and
    /// injected explicitly.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or a store cannot
    /// be initialized.
    pub async fn new(config: EngineConfig) -> EngineResult<Arc<Self>> {
        config.validate()?;

        let embedding = Arc::new(OllamaEmbeddingProvider::new(&config.embedding)?);
        let generation = Arc::new(OllamaGenerationProvider::new(&config.generation)?);

        let companion_store = Arc::new(SqliteCompanionStore::new(&config.storage).await?);
        let memory: Arc<dyn MemoryStore> = Arc::new(
            SqliteMemoryStore::new(&config.storage, config.retrieval.clone()).await?,
        );

        let registry = Arc::new(CompanionRegistry::new(companion_store, generation.clone())?);
        let coordinator = SessionCoordinator::new(
            registry.clone(),
            memory.clone(),
            embedding,
            generation,
            config.clone(),
        );

        Ok(Arc::new(Self {
            registry,
            coordinator,
            memory,
            config,
        }))
    }
}
