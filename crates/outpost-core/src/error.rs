//! Error types for domain-level operations.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for payload construction and parsing.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Payload could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Feature name not recognized.
    #[error("unknown feature: {0}")]
    UnknownFeature(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
