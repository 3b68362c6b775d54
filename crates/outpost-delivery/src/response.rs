//! Maps delivery responses to control actions.
//!
//! | Response                  | Action              |
//! |---------------------------|---------------------|
//! | 2xx                       | `DecreaseThrottle`  |
//! | 429, 503                  | `IncreaseThrottle`  |
//! | 402                       | `Suspend`           |
//! | 403                       | `Suspend` (or `DisableFeature` for errors when escalation is on) |
//! | 413                       | `LogOnly`           |
//! | stubbed                   | `None`              |
//! | transport error / other   | `LogOnly`           |

use std::{fmt, time::Duration};

use outpost_core::{Feature, Response, ResponseCode};

use crate::config::DeliveryConfig;

/// Why a response only warrants a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogReason {
    /// The service rejected the batch as too large; it is dropped.
    PayloadTooLarge,
    /// No status was received.
    TransportError,
    /// A status the engine has no policy for.
    UnexpectedStatus,
}

impl fmt::Display for LogReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PayloadTooLarge => write!(f, "payload_too_large"),
            Self::TransportError => write!(f, "transport_error"),
            Self::UnexpectedStatus => write!(f, "unexpected_status"),
        }
    }
}

/// Control action a worker applies after one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to change.
    None,
    /// Rate limited: back off one more step.
    IncreaseThrottle,
    /// Accepted: relax the backoff by one step.
    DecreaseThrottle,
    /// Fatal for now: stop delivering and discard the backlog.
    Suspend(Duration),
    /// Fatal for good: stop accepting data for the feature.
    DisableFeature,
    /// Record the outcome and carry on.
    LogOnly(LogReason),
}

/// Pure mapping from `(feature, response)` to an `Action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseInterpreter {
    suspend_duration: Duration,
    stop_on_unauthorized: bool,
}

impl ResponseInterpreter {
    /// Creates an interpreter with an explicit suspension window.
    pub fn new(suspend_duration: Duration, stop_on_unauthorized: bool) -> Self {
        Self { suspend_duration, stop_on_unauthorized }
    }

    /// Creates an interpreter from engine configuration.
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self::new(config.suspend_duration(), config.stop_on_unauthorized)
    }

    /// Decides what a worker should do after `response`.
    pub fn interpret(&self, feature: Feature, response: &Response) -> Action {
        match response.code {
            ResponseCode::Status(200..=299) => Action::DecreaseThrottle,
            ResponseCode::Status(429 | 503) => Action::IncreaseThrottle,
            ResponseCode::Status(402) => Action::Suspend(self.suspend_duration),
            ResponseCode::Status(403) => {
                if self.stop_on_unauthorized && feature == Feature::Errors {
                    Action::DisableFeature
                } else {
                    Action::Suspend(self.suspend_duration)
                }
            },
            ResponseCode::Status(413) => Action::LogOnly(LogReason::PayloadTooLarge),
            ResponseCode::Status(_) => Action::LogOnly(LogReason::UnexpectedStatus),
            ResponseCode::Stubbed => Action::None,
            ResponseCode::Error => Action::LogOnly(LogReason::TransportError),
        }
    }
}

impl Default for ResponseInterpreter {
    fn default() -> Self {
        Self::new(Duration::from_secs(crate::DEFAULT_SUSPEND_SECONDS), false)
    }
}
