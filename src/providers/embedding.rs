//! Embedding provider abstraction and Ollama implementation.

use std::future::Future;
use std::pin::Pin;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::config::EmbeddingConfig;
use crate::core::errors::{EngineError, EngineResult};

/// Boxed future type for embedding operations.
pub type EmbedFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait abstraction over embedding models.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string.
    ///
    /// # Errors
    /// Returns an embedding failure if the request fails.
    fn embed(&self, text: &str) -> EmbedFuture<'_, EngineResult<Vec<f32>>>;

    /// Return embedding dimensionality.
    fn ndims(&self) -> usize;
}

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

/// Ollama embedder over `POST /api/embeddings`.
#[derive(Clone)]
pub struct OllamaEmbeddingProvider {
    client: Client,
    base_url: String,
    model: String,
    ndims: usize,
}

impl OllamaEmbeddingProvider {
    /// Create a new Ollama embedding provider from config.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &EmbeddingConfig) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config.model.clone(),
            ndims: config.ndims,
        })
    }
}

impl EmbeddingProvider for OllamaEmbeddingProvider {
    fn embed(&self, text: &str) -> EmbedFuture<'_, EngineResult<Vec<f32>>> {
        let text = text.to_string();
        Box::pin(async move {
            let url = format!("{}/api/embeddings", self.base_url);
            let request = EmbeddingsRequest {
                model: &self.model,
                prompt: &text,
            };
            let response = self
                .client
                .post(&url)
                .json(&request)
                .send()
                .await
                .map_err(|err| EngineError::Embedding(err.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(EngineError::Embedding(format!(
                    "embedding endpoint returned {status}"
                )));
            }

            let parsed: EmbeddingsResponse = response
                .json()
                .await
                .map_err(|err| EngineError::Embedding(err.to_string()))?;

            if parsed.embedding.is_empty() {
                return Err(EngineError::Embedding(
                    "embedding endpoint returned an empty vector".to_string(),
                ));
            }

            Ok(parsed.embedding)
        })
    }

    fn ndims(&self) -> usize {
        self.ndims
    }
}
