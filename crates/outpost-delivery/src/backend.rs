//! The seam between the delivery engine and the network.
//!
//! A backend turns one sealed batch into one `Response`. It is called only
//! from worker threads and may block on I/O. A single backend instance is
//! shared by every worker, so implementations must be `Sync` and serialize
//! internally if their transport is not thread-safe.

use std::{fmt, sync::Arc};

use outpost_core::{Batch, Feature, Response};
use tracing::debug;

use crate::error::Result;

/// Delivers sealed batches to the ingestion service.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Delivers one batch for `feature`.
    ///
    /// # Errors
    ///
    /// Returns a `DeliveryError` when the transport fails before a response
    /// is received. The worker treats this like a transport error response.
    fn deliver(&self, feature: Feature, batch: &Batch) -> Result<Response>;
}

impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn deliver(&self, feature: Feature, batch: &Batch) -> Result<Response> {
        (**self).deliver(feature, batch)
    }
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn deliver(&self, feature: Feature, batch: &Batch) -> Result<Response> {
        (**self).deliver(feature, batch)
    }
}

/// Backend that sends nothing and answers `Stubbed`.
///
/// Used when reporting is disabled, e.g. in development.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackend;

impl Backend for NullBackend {
    fn deliver(&self, _feature: Feature, _batch: &Batch) -> Result<Response> {
        Ok(Response::stubbed())
    }
}

/// Logs every batch before handing it to the wrapped backend.
#[derive(Debug, Clone, Default)]
pub struct DebugBackend<B> {
    inner: B,
}

impl<B: Backend> DebugBackend<B> {
    /// Wraps `inner`.
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }
}

impl<B: Backend> Backend for DebugBackend<B> {
    fn deliver(&self, feature: Feature, batch: &Batch) -> Result<Response> {
        let bytes: usize = batch.iter().map(|payload| payload.len()).sum();
        debug!(
            feature = %feature,
            batch_size = batch.len(),
            bytes,
            sealed_at = %batch.sealed_at(),
            "delivering batch"
        );

        let result = self.inner.deliver(feature, batch);
        match &result {
            Ok(response) => debug!(
                feature = %feature,
                code = %response.code,
                message = %response.message,
                "backend responded"
            ),
            Err(error) => debug!(feature = %feature, error = %error, "backend failed"),
        }
        result
    }
}
