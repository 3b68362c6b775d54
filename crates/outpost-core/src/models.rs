//! Core domain models and strongly-typed identifiers.
//!
//! Defines the telemetry feature taxonomy, the opaque payloads producers
//! enqueue, the sealed batches workers hand to a backend, and the response a
//! backend reports for one delivery attempt.

use std::{fmt, str::FromStr};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// One class of telemetry data.
///
/// Each feature owns an independent queue, worker thread, and throttle state.
/// Ordering is only guaranteed within a single feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    /// Application errors (notices).
    Errors,
    /// Metric samples.
    Metrics,
    /// Trace spans.
    Traces,
    /// Structured events.
    Events,
}

impl Feature {
    /// Every feature, in a stable order.
    pub const ALL: [Feature; 4] = [Self::Errors, Self::Metrics, Self::Traces, Self::Events];

    /// Wire name of the feature.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Errors => "errors",
            Self::Metrics => "metrics",
            Self::Traces => "traces",
            Self::Events => "events",
        }
    }

    /// Dense index usable for fixed-size per-feature tables.
    pub fn index(self) -> usize {
        match self {
            Self::Errors => 0,
            Self::Metrics => 1,
            Self::Traces => 2,
            Self::Events => 3,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "errors" | "notices" => Ok(Self::Errors),
            "metrics" => Ok(Self::Metrics),
            "traces" => Ok(Self::Traces),
            "events" => Ok(Self::Events),
            other => Err(CoreError::UnknownFeature(other.to_string())),
        }
    }
}

/// Strongly-typed payload identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadId(pub Uuid);

impl PayloadId {
    /// Creates a new random payload ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PayloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PayloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque unit of work tagged with the feature it belongs to.
///
/// Immutable once constructed. The body is reference counted so cloning a
/// payload for inspection never copies the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    id: PayloadId,
    feature: Feature,
    body: Bytes,
    captured_at: DateTime<Utc>,
}

impl Payload {
    /// Creates a payload from raw bytes.
    pub fn new(feature: Feature, body: impl Into<Bytes>) -> Self {
        Self { id: PayloadId::new(), feature, body: body.into(), captured_at: Utc::now() }
    }

    /// Serializes `value` as JSON into a new payload.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Serialization` if `value` cannot be encoded.
    pub fn json<T: Serialize + ?Sized>(feature: Feature, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(feature, body))
    }

    /// Unique identifier of this payload.
    pub fn id(&self) -> PayloadId {
        self.id
    }

    /// Feature this payload is routed to.
    pub fn feature(&self) -> Feature {
        self.feature
    }

    /// Raw body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// When the payload was captured.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Body size in bytes.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Whether the body is empty.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Ordered group of payloads sealed by one worker and sent in one call.
///
/// A batch is never mutated after it is sealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    feature: Feature,
    items: Vec<Payload>,
    sealed_at: DateTime<Utc>,
}

impl Batch {
    /// Seals `items` into a batch.
    pub fn seal(feature: Feature, items: Vec<Payload>, sealed_at: DateTime<Utc>) -> Self {
        Self { feature, items, sealed_at }
    }

    /// Feature the batch belongs to.
    pub fn feature(&self) -> Feature {
        self.feature
    }

    /// Payloads in enqueue order.
    pub fn items(&self) -> &[Payload] {
        &self.items
    }

    /// When the batch was sealed.
    pub fn sealed_at(&self) -> DateTime<Utc> {
        self.sealed_at
    }

    /// Number of payloads.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the batch carries no payloads.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates payloads in enqueue order.
    pub fn iter(&self) -> std::slice::Iter<'_, Payload> {
        self.items.iter()
    }

    /// Concatenates payload bodies, one per line.
    ///
    /// Used by backends that ship a whole batch as newline-delimited JSON.
    pub fn to_ndjson(&self) -> Bytes {
        let capacity = self.items.iter().map(|p| p.len() + 1).sum();
        let mut out = Vec::with_capacity(capacity);
        for payload in &self.items {
            out.extend_from_slice(payload.body());
            out.push(b'\n');
        }
        Bytes::from(out)
    }

    /// Consumes the batch, returning its payloads.
    pub fn into_items(self) -> Vec<Payload> {
        self.items
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Payload;
    type IntoIter = std::slice::Iter<'a, Payload>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Outcome class of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseCode {
    /// HTTP-style status code returned by the ingestion service.
    Status(u16),
    /// Delivery was intentionally skipped (development mode, no network).
    Stubbed,
    /// Transport failed before a status was received.
    Error,
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(code) => write!(f, "{code}"),
            Self::Stubbed => f.write_str("stubbed"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Result of one delivery attempt as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Outcome class.
    pub code: ResponseCode,
    /// Human readable message (status reason or transport error).
    pub message: String,
    /// Response body, possibly truncated by the backend.
    pub body: String,
}

impl Response {
    /// Response carrying an HTTP-style status code.
    pub fn status(code: u16) -> Self {
        Self { code: ResponseCode::Status(code), message: String::new(), body: String::new() }
    }

    /// Stubbed response returned when no data leaves the process.
    pub fn stubbed() -> Self {
        Self { code: ResponseCode::Stubbed, message: String::new(), body: String::new() }
    }

    /// Transport-level failure.
    pub fn error(message: impl Into<String>) -> Self {
        Self { code: ResponseCode::Error, message: message.into(), body: String::new() }
    }

    /// Attaches a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Attaches a body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Status code, if the service answered.
    pub fn status_code(&self) -> Option<u16> {
        match self.code {
            ResponseCode::Status(code) => Some(code),
            ResponseCode::Stubbed | ResponseCode::Error => None,
        }
    }

    /// Whether the service accepted the data (2xx).
    pub fn is_success(&self) -> bool {
        matches!(self.code, ResponseCode::Status(200..=299))
    }
}
