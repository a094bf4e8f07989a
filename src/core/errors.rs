//! Error types for the companion engine.

use thiserror::Error;

use crate::core::ids::CompanionId;

/// Engine-wide error type.
///
/// The first group is the caller-facing taxonomy; the rest are carriers for
/// infrastructure failures that map onto it at the HTTP boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input, rejected before any provider call.
    #[error("validation error: {0}")]
    Validation(String),
    /// Unknown (or inactive) companion.
    #[error("companion not found: {0}")]
    NotFound(CompanionId),
    /// The companion already has a generation in flight.
    #[error("companion is busy with another generation")]
    Busy,
    /// Embedding provider failure, fatal to the current turn.
    #[error("embedding failure: {0}")]
    Embedding(String),
    /// Generation provider failure, fatal to the current turn.
    #[error("generation failure: {0}")]
    Generation(String),
    /// A provider call exceeded its deadline.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    /// Memory/companion store failure.
    #[error("storage failure: {0}")]
    Storage(String),
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// HTTP client error.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Stable machine-readable error code for the HTTP surface.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::NotFound(_) => "NotFound",
            Self::Busy => "Busy",
            Self::Embedding(_) => "EmbeddingFailure",
            Self::Generation(_) => "GenerationFailure",
            Self::Timeout(_) => "Timeout",
            Self::Storage(_)
            | Self::Sqlite(_)
            | Self::TokioSqlite(_)
            | Self::Serialization(_)
            | Self::Io(_) => "StorageFailure",
            Self::InvalidConfig(_) | Self::Url(_) => "InvalidConfig",
            Self::Http(_) => "GenerationFailure",
        }
    }
}

/// Convenience result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(EngineError::Busy.code(), "Busy");
        assert_eq!(
            EngineError::Validation("bad".to_string()).code(),
            "ValidationError"
        );
        assert_eq!(EngineError::Timeout("generation").code(), "Timeout");
        assert_eq!(
            EngineError::Storage("disk full".to_string()).code(),
            "StorageFailure"
        );
    }
}
