//! Background reporting of application errors, metrics, traces and events.
//!
//! The `Agent` is the single owner of the delivery machinery. Construct it
//! once at startup, hand it to whatever captures telemetry, and stop it
//! before the process exits:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use outpost::{Agent, Config};
//! use outpost_delivery::NullBackend;
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let agent = Agent::new(&config, Arc::new(NullBackend))?;
//!
//! agent.event(&json!({ "event_type": "user.signup", "plan": "pro" }));
//! agent.stop(false);
//! # Ok(())
//! # }
//! ```
//!
//! Pushing never blocks on the network: payloads go into a bounded
//! per-feature queue and a dedicated thread delivers them in batches.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use outpost_core::{Feature, Payload};
use outpost_delivery::{
    Backend, DebugBackend, NullBackend, Scope, WorkerEnv, WorkerStats, WorkerSupervisor,
};
use serde::Serialize;
use tracing::{info, warn};

pub mod config;

pub use config::Config;

/// Owns the worker supervisor for the lifetime of the application.
///
/// Dropping the agent without calling `stop` drains the queues first.
#[derive(Debug)]
pub struct Agent {
    supervisor: WorkerSupervisor,
    stopped: AtomicBool,
}

impl Agent {
    /// Builds an agent from loaded configuration.
    ///
    /// With `report_data` off the backend is replaced by `NullBackend`; with
    /// `debug` on every batch is logged before delivery.
    pub fn new(config: &Config, backend: Arc<dyn Backend>) -> Result<Self> {
        let backend: Arc<dyn Backend> = if config.report_data {
            backend
        } else {
            info!("data reporting disabled, payloads will not leave the process");
            Arc::new(NullBackend)
        };
        let backend: Arc<dyn Backend> =
            if config.debug { Arc::new(DebugBackend::new(backend)) } else { backend };

        Self::with_env(config, WorkerEnv::new(backend))
    }

    /// Builds an agent around explicit worker collaborators.
    ///
    /// The backend in `env` is used as is; `report_data` and `debug` are not
    /// applied.
    pub fn with_env(config: &Config, env: WorkerEnv) -> Result<Self> {
        let supervisor = WorkerSupervisor::new(config.to_delivery_config(), env)?;
        Ok(Self { supervisor, stopped: AtomicBool::new(false) })
    }

    /// Enqueues a payload for background delivery.
    ///
    /// Returns `false` if the payload was not accepted.
    pub fn push(&self, payload: Payload) -> bool {
        self.supervisor.push(payload)
    }

    /// Reports an error notice serialized as JSON.
    pub fn notify<T: Serialize + ?Sized>(&self, notice: &T) -> bool {
        self.push_json(Feature::Errors, notice)
    }

    /// Reports a structured event serialized as JSON.
    pub fn event<T: Serialize + ?Sized>(&self, event: &T) -> bool {
        self.push_json(Feature::Events, event)
    }

    fn push_json<T: Serialize + ?Sized>(&self, feature: Feature, value: &T) -> bool {
        match Payload::json(feature, value) {
            Ok(payload) => self.push(payload),
            Err(e) => {
                warn!(
                    feature = %feature,
                    error = %e,
                    "payload could not be serialized, dropping it"
                );
                false
            },
        }
    }

    /// Blocks until everything pushed so far has been handed to the backend.
    pub fn flush(&self) {
        self.supervisor.flush(Scope::All);
    }

    /// Flushes one feature only.
    pub fn flush_feature(&self, feature: Feature) {
        self.supervisor.flush(Scope::Feature(feature));
    }

    /// Flushes every feature, giving up after `timeout`.
    pub fn flush_timeout(&self, timeout: Duration) -> bool {
        self.supervisor.flush_timeout(Scope::All, timeout)
    }

    /// Stops delivery. See `WorkerSupervisor::stop` for `force`.
    pub fn stop(&self, force: bool) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.supervisor.stop(force);
    }

    /// Accepts pushes again after `stop`.
    pub fn start(&self) {
        self.stopped.store(false, Ordering::Release);
        self.supervisor.start();
    }

    /// Call in the child process right after `fork()`.
    pub fn fork(&self) {
        self.supervisor.fork();
    }

    /// Applies the feature flags advertised by the ingestion service.
    pub fn apply_ping<I>(&self, features: I)
    where
        I: IntoIterator<Item = (Feature, bool)>,
    {
        self.supervisor.apply_ping(features);
    }

    /// Per-feature delivery statistics.
    pub fn stats(&self) -> Vec<WorkerStats> {
        self.supervisor.stats()
    }

    /// The underlying supervisor.
    pub fn supervisor(&self) -> &WorkerSupervisor {
        &self.supervisor
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.stop(false);
    }
}
