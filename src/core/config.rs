//! Configuration for the companion engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::errors::{EngineError, EngineResult};

/// Top-level configuration for the engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retrieval and scoring settings.
    pub retrieval: RetrievalConfig,
    /// Importance decay settings.
    pub decay: DecayConfig,
    /// Conversation window settings.
    pub conversation: ConversationConfig,
    /// Embedding provider settings.
    pub embedding: EmbeddingConfig,
    /// Generation provider settings.
    pub generation: GenerationConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Prompt construction settings.
    pub prompt: PromptConfig,
}

impl EngineConfig {
    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> EngineResult<()> {
        if self.retrieval.top_k == 0 {
            return Err(EngineError::InvalidConfig(
                "retrieval.top_k must be > 0".to_string(),
            ));
        }

        if self.retrieval.recency_half_life_seconds == 0 {
            return Err(EngineError::InvalidConfig(
                "retrieval.recency_half_life_seconds must be > 0".to_string(),
            ));
        }

        for (name, weight) in [
            ("alpha_similarity", self.retrieval.alpha_similarity),
            ("beta_importance", self.retrieval.beta_importance),
            ("gamma_recency", self.retrieval.gamma_recency),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(EngineError::InvalidConfig(format!(
                    "retrieval.{name} must be in [0, 1]"
                )));
            }
        }

        if !(0.0..1.0).contains(&self.decay.factor) {
            return Err(EngineError::InvalidConfig(
                "decay.factor must be in [0, 1)".to_string(),
            ));
        }

        if self.decay.importance_floor < 0.0 {
            return Err(EngineError::InvalidConfig(
                "decay.importance_floor must be >= 0".to_string(),
            ));
        }

        if self.conversation.window == 0 {
            return Err(EngineError::InvalidConfig(
                "conversation.window must be > 0".to_string(),
            ));
        }

        if self.embedding.ndims == 0 {
            return Err(EngineError::InvalidConfig(
                "embedding.ndims must be > 0".to_string(),
            ));
        }

        if self.prompt.max_chars == 0 {
            return Err(EngineError::InvalidConfig(
                "prompt.max_chars must be > 0".to_string(),
            ));
        }

        if let Some(base_url) = &self.embedding.base_url {
            Url::parse(base_url)?;
        }

        if let Some(base_url) = &self.generation.base_url {
            Url::parse(base_url)?;
        }

        Ok(())
    }
}

/// Retrieval and hybrid-scoring settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of memories to retrieve per turn.
    pub top_k: usize,
    /// Weight of cosine similarity in the hybrid score.
    pub alpha_similarity: f64,
    /// Weight of normalized importance in the hybrid score.
    pub beta_importance: f64,
    /// Weight of recency decay in the hybrid score.
    pub gamma_recency: f64,
    /// Half-life in seconds for recency decay.
    pub recency_half_life_seconds: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            alpha_similarity: 0.6,
            beta_importance: 0.25,
            gamma_recency: 0.15,
            recency_half_life_seconds: 60 * 60 * 24 * 7,
        }
    }
}

/// Importance decay settings for the maintenance worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecayConfig {
    /// Multiplier applied to stale memories (< 1).
    pub factor: f64,
    /// Importance never decays below this floor.
    pub importance_floor: f64,
    /// Interval between decay runs (in seconds).
    pub interval_seconds: u64,
    /// Whether the background worker is enabled.
    pub enabled: bool,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            factor: 0.9,
            importance_floor: 0.05,
            interval_seconds: 3600,
            enabled: true,
        }
    }
}

/// Conversation window settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Number of recent turns passed into generation.
    pub window: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self { window: 10 }
    }
}

/// Embedding provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding model name.
    pub model: String,
    /// Embedding vector dimensions.
    pub ndims: usize,
    /// Optional custom base URL.
    pub base_url: Option<String>,
    /// Deadline for a single embed call (in seconds).
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "nomic-embed-text".to_string(),
            ndims: 768,
            base_url: None,
            timeout_seconds: 15,
        }
    }
}

/// Generation provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Completion model name.
    pub model: String,
    /// Temperature for generation.
    pub temperature: f64,
    /// Token budget for a single response.
    pub max_tokens: u32,
    /// Optional custom base URL.
    pub base_url: Option<String>,
    /// Deadline for a generation call (in seconds).
    pub timeout_seconds: u64,
    /// Deadline for the secondary sentiment call (in seconds).
    pub sentiment_timeout_seconds: u64,
    /// Deadline for the tertiary suggestion call (in seconds).
    pub suggestion_timeout_seconds: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "mistral:7b-instruct-q8_0".to_string(),
            temperature: 0.7,
            max_tokens: 512,
            base_url: None,
            timeout_seconds: 120,
            sentiment_timeout_seconds: 10,
            suggestion_timeout_seconds: 10,
        }
    }
}

/// Storage configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Companion table name.
    pub companion_table: String,
    /// Memory table name.
    pub memory_table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("companions.sqlite"),
            companion_table: "companions".to_string(),
            memory_table: "companion_memories".to_string(),
        }
    }
}

/// Prompt construction settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Maximum prompt size in characters.
    pub max_chars: usize,
    /// Maximum memory content size in characters.
    pub max_memory_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_chars: 6000,
            max_memory_chars: 1200,
        }
    }
}
