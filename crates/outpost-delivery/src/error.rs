//! Error types for delivery operations.
//!
//! Defines the failures a backend or the engine itself can report. None of
//! these escape to the instrumented application: workers log them and move
//! on, and the producer-facing API only ever returns `bool`.

use std::fmt;

use outpost_core::{CoreError, Feature};
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error types for delivery operations.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// Request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// Payload could not be encoded for the wire.
    #[error("serialization failed: {message}")]
    SerializationError {
        /// Encoder error message
        message: String,
    },

    /// Invalid engine configuration.
    #[error("invalid delivery configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// The worker thread for a feature could not be spawned.
    #[error("failed to spawn {feature} worker: {message}")]
    SpawnError {
        /// Feature whose worker failed to start
        feature: Feature,
        /// OS error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates a spawn error.
    pub fn spawn(feature: Feature, message: impl Into<String>) -> Self {
        Self::SpawnError { feature, message: message.into() }
    }

    /// Whether the failure is expected to clear on its own.
    ///
    /// Transient errors are logged at `warn`, everything else at `error`.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkError { .. } | Self::Timeout { .. } => true,

            Self::SerializationError { .. }
            | Self::ConfigurationError { .. }
            | Self::SpawnError { .. } => false,
        }
    }
}

impl From<CoreError> for DeliveryError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Serialization(message) => Self::SerializationError { message },
            CoreError::UnknownFeature(name) => {
                Self::ConfigurationError { message: format!("unknown feature: {name}") }
            },
        }
    }
}

/// Category of delivery error for logging and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues.
    Network,
    /// Encoding problems.
    Serialization,
    /// Configuration problems.
    Configuration,
    /// Failures inside the engine itself.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::SerializationError { .. } => Self::Serialization,
            DeliveryError::ConfigurationError { .. } => Self::Configuration,
            DeliveryError::SpawnError { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Serialization => write!(f, "serialization"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
