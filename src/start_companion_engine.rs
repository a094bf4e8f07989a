//! Startup helpers for the companion engine server.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;

use crate::core::config::EngineConfig;
use crate::memory::decay::DecayWorker;
use crate::server::{self, AppState};

/// Environment variable for the Ollama endpoint.
const OLLAMA_URL_ENV: &str = "COMPANION_OLLAMA_URL";

/// Environment variable for the server port.
const PORT_ENV: &str = "COMPANION_PORT";

/// Environment variable for the `SQLite` database path.
const SQLITE_PATH_ENV: &str = "COMPANION_SQLITE_PATH";

/// Run the server.
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting companion engine v{}", env!("CARGO_PKG_VERSION"));

    let config = config_from_env();
    let port = get_port();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    rt.block_on(async move {
        let state = match AppState::new(config).await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("Failed to create state: {e}");
                return ExitCode::from(1);
            }
        };

        let worker = DecayWorker::new(
            state.memory.clone(),
            state.config.decay.clone(),
            &state.config.retrieval,
        );
        let shutdown = worker.shutdown_notifier();
        let worker_handle = worker.spawn();

        let result = server::run_server(state, port).await;
        shutdown.notify_one();
        let _ = worker_handle.await;

        if let Err(e) = result {
            tracing::error!("Server error: {e}");
            return ExitCode::from(1);
        }
        ExitCode::SUCCESS
    })
}

/// Build engine configuration from environment overrides.
#[must_use]
pub fn config_from_env() -> EngineConfig {
    let mut config = EngineConfig::default();

    if let Ok(url) = std::env::var(OLLAMA_URL_ENV) {
        config.embedding.base_url = Some(url.clone());
        config.generation.base_url = Some(url);
    }

    if let Ok(path) = std::env::var(SQLITE_PATH_ENV) {
        config.storage.sqlite_path = path.into();
    }

    config
}

/// Initialize application state without starting the server.
///
/// # Errors
/// Returns an error if state creation fails.
pub async fn initialize(config: EngineConfig) -> anyhow::Result<Arc<AppState>> {
    AppState::new(config)
        .await
        .context("failed to create application state")
}

/// Get the configured server port.
#[must_use]
pub fn get_port() -> u16 {
    std::env::var(PORT_ENV)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(server::DEFAULT_PORT)
}
