//! Error taxonomy for the engine
//!
//! Selection, feedback and storage paths fail fast with a typed [`EngineError`].
//! The generative capability has its own [`GenerationError`] so a failed
//! crossover or mutation can be skipped without touching the rest of a run.

use thiserror::Error;

/// Errors surfaced by engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// A precondition on caller input was violated
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The durable store rejected a read or write
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The store has been closed and can no longer serve requests
    #[error("storage error: store is closed")]
    StoreClosed,

    /// The store's files could not be created or accessed
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted column could not be encoded or decoded
    #[error("storage error: malformed record: {0}")]
    Codec(#[from] serde_json::Error),

    /// A numeric routine would produce NaN or an out-of-range value
    #[error("statistically undefined: {0}")]
    StatisticalUndefined(String),

    /// The generative capability failed
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// A background worker panicked or was cancelled
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::TaskJoin(err.to_string())
    }
}

impl EngineError {
    /// True for failures of the durable store
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            EngineError::Storage(_)
                | EngineError::StoreClosed
                | EngineError::Io(_)
                | EngineError::Codec(_)
        )
    }
}

/// Failures of the external crossover/mutation capability
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("provider returned status {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("provider returned no content")]
    EmptyResponse,

    #[error("generator is not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        GenerationError::Request(err.to_string())
    }
}

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::InvalidArgument("empty candidate list".to_string());
        assert_eq!(err.to_string(), "invalid argument: empty candidate list");
        assert_eq!(EngineError::StoreClosed.to_string(), "storage error: store is closed");
    }

    #[test]
    fn test_is_storage() {
        assert!(EngineError::StoreClosed.is_storage());
        assert!(!EngineError::StatisticalUndefined("nan".into()).is_storage());
        let gen: EngineError = GenerationError::EmptyResponse.into();
        assert!(!gen.is_storage());
    }
}
