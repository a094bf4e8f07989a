//! Memory record model with validation helpers.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{EngineError, EngineResult};
use crate::core::ids::{CompanionId, MemoryId};

/// Default importance assigned to new memories.
pub const DEFAULT_IMPORTANCE: f64 = 1.0;

/// A persisted memory record owned by one companion.
///
/// Content is immutable once written; the only sanctioned mutations are the
/// retrieval touch (`access_count`, `last_accessed_at`) and importance decay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique memory identifier.
    pub id: MemoryId,
    /// Companion that owns this memory.
    pub companion_id: CompanionId,
    /// The stored fact or exchange summary.
    pub content: String,
    /// Embedding of the content, fixed dimension.
    pub embedding: Vec<f32>,
    /// Long-term relevance weight, never negative.
    pub importance: f64,
    /// Optional category tag.
    pub category: Option<String>,
    /// Structured metadata (e.g. the sentiment estimate for the turn).
    pub metadata: serde_json::Value,
    /// Number of times this memory has been retrieved.
    pub access_count: u32,
    /// Timestamp of the last retrieval touch.
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Optional soft-expiry timestamp.
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryRecord {
    /// Create a new memory record with defaults.
    ///
    /// # Errors
    /// Returns an error if the content or importance is invalid.
    pub fn new(
        companion_id: CompanionId,
        content: impl Into<String>,
        embedding: Vec<f32>,
        importance: f64,
        category: Option<String>,
        metadata: serde_json::Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> EngineResult<Self> {
        let content = content.into();
        let record = Self {
            id: MemoryId::new(),
            companion_id,
            content: content.trim().to_string(),
            embedding,
            importance,
            category,
            metadata,
            access_count: 0,
            last_accessed_at: None,
            created_at: Utc::now(),
            expires_at,
        };
        record.validate()?;
        Ok(record)
    }

    /// Validate the record content and invariants.
    ///
    /// # Errors
    /// Returns an error if the content is empty, the importance is negative,
    /// or the content looks like a credential.
    pub fn validate(&self) -> EngineResult<()> {
        if self.content.trim().is_empty() {
            return Err(EngineError::Validation(
                "memory content is empty".to_string(),
            ));
        }

        if self.importance < 0.0 || !self.importance.is_finite() {
            return Err(EngineError::Validation(
                "importance must be a finite value >= 0".to_string(),
            ));
        }

        if self.embedding.is_empty() {
            return Err(EngineError::Validation(
                "embedding must not be empty".to_string(),
            ));
        }

        if contains_sensitive(&self.content)? {
            return Err(EngineError::Validation(
                "memory content looks like a secret".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether this record is past its soft expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }

    /// The timestamp recency decay is measured from.
    #[must_use]
    pub fn recency_anchor(&self) -> DateTime<Utc> {
        self.last_accessed_at.unwrap_or(self.created_at)
    }

    /// Apply the retrieval touch.
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = Some(now);
    }
}

fn contains_sensitive(text: &str) -> EngineResult<bool> {
    let pattern = r"(?i)(api[_-]?key|secret|password|token|bearer\s+[a-z0-9\-_]+|sk-[a-z0-9]{10,})";
    let regex = Regex::new(pattern)
        .map_err(|err| EngineError::InvalidConfig(format!("invalid regex: {err}")))?;
    Ok(regex.is_match(text))
}
