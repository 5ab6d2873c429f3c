//! Unified error types for the retrieval engine.

use thiserror::Error;

use crate::models::ContentKind;

/// Errors returned by the embedding provider collaborator.
///
/// Providers are external services; the engine never retries them
/// internally. `RateLimited` and `ModelUnavailable` are retryable by the
/// caller with backoff, `InvalidInput` is not.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The provider rejected the call due to rate limiting.
    #[error("embedding provider rate limited")]
    RateLimited,

    /// The requested model is unavailable or the provider is unreachable.
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    /// The input text was rejected by the provider.
    #[error("invalid embedding input: {0}")]
    InvalidInput(String),
}

/// Top-level error for all engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid configuration (bad weights, bad chunk parameters). Always
    /// fatal; the caller must fix the configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed caller input (empty location, empty query vector).
    /// Reported to the caller, not retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Query or stored vector length does not match the configured
    /// embedding dimensionality.
    #[error("invalid vector dimension: got {got}, want {want}")]
    InvalidVectorDimension { got: usize, want: usize },

    /// Embedding provider failure, propagated untouched.
    #[error("provider error: {0}")]
    Provider(#[from] EmbedError),

    /// Two embedding writes raced for the same owner. The caller must
    /// serialize writes per `(owner_kind, owner_id)` and may retry.
    #[error("concurrent embedding write for owner {kind}/{owner_id}")]
    ConcurrentWrite {
        kind: ContentKind,
        owner_id: String,
    },

    /// Underlying persistence failure.
    #[error("store error: {0}")]
    Store(String),

    /// The operation's cancellation token fired. Distinguishable from an
    /// empty result set.
    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Wrap an arbitrary persistence error.
    pub fn store(err: impl std::fmt::Display) -> Self {
        EngineError::Store(err.to_string())
    }
}

/// Convenience alias used across both crates.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = EngineError::InvalidVectorDimension { got: 3, want: 8 };
        assert_eq!(e.to_string(), "invalid vector dimension: got 3, want 8");

        let e = EngineError::Provider(EmbedError::RateLimited);
        assert!(e.to_string().contains("rate limited"));
    }

    #[test]
    fn test_store_wraps_display() {
        let e = EngineError::store("disk full");
        assert_eq!(e.to_string(), "store error: disk full");
    }
}
