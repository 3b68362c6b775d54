//! Backends for driving workers through scripted delivery outcomes.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use outpost_core::{Batch, Feature, Payload, Response};
use outpost_delivery::{Backend, DeliveryError, Result};
use parking_lot::{Condvar, Mutex};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::fixtures::sequence_of;

/// Failures a test backend can inject.
///
/// Covers the outcomes a delivery worker must survive without losing its
/// thread: error statuses, transport failures, and panics.
#[derive(Debug, Clone)]
pub enum FailureKind {
    /// The service answers with this HTTP status.
    Status(u16),
    /// HTTP 429 Too Many Requests
    RateLimited,
    /// HTTP 402 Payment Required
    PaymentRequired,
    /// HTTP 403 Forbidden
    Forbidden,
    /// HTTP 413 Payload Too Large
    PayloadTooLarge,
    /// Connection refused before any response
    ConnectionRefused,
    /// Request timed out
    Timeout {
        /// Timeout that elapsed
        timeout_seconds: u64,
    },
    /// The backend panics mid-delivery
    Panic(String),
}

impl FailureKind {
    fn produce(&self) -> Result<Response> {
        match self {
            Self::Status(code) => Ok(Response::status(*code)),
            Self::RateLimited => Ok(Response::status(429)),
            Self::PaymentRequired => Ok(Response::status(402)),
            Self::Forbidden => Ok(Response::status(403)),
            Self::PayloadTooLarge => Ok(Response::status(413)),
            Self::ConnectionRefused => Err(DeliveryError::network("connection refused")),
            Self::Timeout { timeout_seconds } => Err(DeliveryError::timeout(*timeout_seconds)),
            Self::Panic(message) => panic!("{message}"),
        }
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Respond(Response),
    Fail(FailureKind),
}

/// One recorded backend call.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Feature the batch was delivered for.
    pub feature: Feature,
    /// Payloads in delivery order.
    pub payloads: Vec<Payload>,
    /// When the backend was called.
    pub delivered_at: Instant,
}

impl Delivery {
    /// Number of payloads in the batch.
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    /// Whether the batch was empty.
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

/// Records every batch and answers from a script.
///
/// Scripted replies are consumed in order, one per call. Once the script
/// runs dry every call gets the fallback response (201 by default).
#[derive(Debug)]
pub struct RecordingBackend {
    script: Mutex<VecDeque<Reply>>,
    fallback: Response,
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingBackend {
    /// Accepts everything with 201.
    pub fn new() -> Self {
        Self::with_fallback(Response::status(201))
    }

    /// Answers `fallback` whenever the script is empty.
    pub fn with_fallback(fallback: Response) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            deliveries: Mutex::new(Vec::new()),
        }
    }

    /// Queues one scripted response.
    pub fn respond(&self, response: Response) -> &Self {
        self.script.lock().push_back(Reply::Respond(response));
        self
    }

    /// Queues the same response `times` times.
    pub fn respond_times(&self, response: Response, times: usize) -> &Self {
        let mut script = self.script.lock();
        script.extend(std::iter::repeat(Reply::Respond(response)).take(times));
        drop(script);
        self
    }

    /// Queues one injected failure.
    pub fn fail(&self, failure: FailureKind) -> &Self {
        self.script.lock().push_back(Reply::Fail(failure));
        self
    }

    /// Every call so far, in call order.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    /// Number of backend calls.
    pub fn delivery_count(&self) -> usize {
        self.deliveries.lock().len()
    }

    /// Sizes of the delivered batches, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.deliveries.lock().iter().map(Delivery::len).collect()
    }

    /// Total payloads seen across all calls.
    pub fn total_items(&self) -> usize {
        self.deliveries.lock().iter().map(Delivery::len).sum()
    }

    /// Payloads delivered for `feature`, flattened in delivery order.
    pub fn payloads(&self, feature: Feature) -> Vec<Payload> {
        self.deliveries
            .lock()
            .iter()
            .filter(|delivery| delivery.feature == feature)
            .flat_map(|delivery| delivery.payloads.iter().cloned())
            .collect()
    }

    /// Sequence numbers of `numbered` payloads delivered for `feature`.
    pub fn sequence(&self, feature: Feature) -> Vec<u32> {
        sequence_of(&self.payloads(feature))
    }
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for RecordingBackend {
    fn deliver(&self, feature: Feature, batch: &Batch) -> Result<Response> {
        self.deliveries.lock().push(Delivery {
            feature,
            payloads: batch.items().to_vec(),
            delivered_at: Instant::now(),
        });

        let reply = self.script.lock().pop_front();
        match reply {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail(failure)) => failure.produce(),
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Blocks every delivery until the gate is opened.
///
/// Holding the gate closed pins the worker thread inside `deliver`, which
/// lets tests fill the queue or stop the worker mid-delivery.
#[derive(Debug)]
pub struct GateBackend<B = RecordingBackend> {
    inner: B,
    open: Mutex<bool>,
    changed: Condvar,
    entered: AtomicUsize,
}

impl<B: Backend> GateBackend<B> {
    /// Wraps `inner` behind a closed gate.
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            open: Mutex::new(false),
            changed: Condvar::new(),
            entered: AtomicUsize::new(0),
        }
    }

    /// Lets blocked and future deliveries through.
    pub fn open(&self) {
        *self.open.lock() = true;
        self.changed.notify_all();
    }

    /// Blocks future deliveries.
    pub fn close(&self) {
        *self.open.lock() = false;
    }

    /// Number of calls that reached the gate.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` calls have reached the gate.
    pub fn wait_entered(&self, count: usize, timeout: Duration) -> bool {
        crate::wait_until(timeout, || self.entered() >= count)
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }
}

impl<B: Backend> Backend for GateBackend<B> {
    fn deliver(&self, feature: Feature, batch: &Batch) -> Result<Response> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        {
            let mut open = self.open.lock();
            while !*open {
                self.changed.wait(&mut open);
            }
        }
        self.inner.deliver(feature, batch)
    }
}

/// Fails a seeded random fraction of deliveries.
#[derive(Debug)]
pub struct FlakyBackend<B = RecordingBackend> {
    inner: B,
    failure: FailureKind,
    failure_rate: f64,
    rng: Mutex<StdRng>,
    failures: AtomicUsize,
}

impl<B: Backend> FlakyBackend<B> {
    /// Injects `failure` with probability `failure_rate` per call.
    ///
    /// The same seed always yields the same failure pattern.
    pub fn new(inner: B, failure: FailureKind, failure_rate: f64, seed: u64) -> Self {
        Self {
            inner,
            failure,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            failures: AtomicUsize::new(0),
        }
    }

    /// Number of injected failures so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }
}

impl<B: Backend> Backend for FlakyBackend<B> {
    fn deliver(&self, feature: Feature, batch: &Batch) -> Result<Response> {
        let fail = self.rng.lock().random_bool(self.failure_rate);
        if fail {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return self.failure.produce();
        }
        self.inner.deliver(feature, batch)
    }
}
