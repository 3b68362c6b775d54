//! Owns one delivery worker per feature and fans operations out to them.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use outpost_core::{Feature, Payload};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::{
    config::DeliveryConfig,
    error::Result,
    features::FeatureFlags,
    worker::{DeliveryWorker, WorkerEnv, WorkerState, WorkerStats},
};

/// Which workers a flush applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Every feature.
    All,
    /// One feature.
    Feature(Feature),
}

impl From<Feature> for Scope {
    fn from(feature: Feature) -> Self {
        Self::Feature(feature)
    }
}

/// Routes payloads to per-feature workers and coordinates their lifecycle.
///
/// Workers are created on first use. Feature enablement is checked here,
/// before a payload reaches its worker.
#[derive(Debug)]
pub struct WorkerSupervisor {
    config: DeliveryConfig,
    env: WorkerEnv,
    workers: RwLock<BTreeMap<Feature, Arc<DeliveryWorker>>>,
    stopped: AtomicBool,
}

impl WorkerSupervisor {
    /// Creates a supervisor with no running threads.
    ///
    /// Local enablement from `config` is written into the shared flags.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if `config` is invalid.
    pub fn new(config: DeliveryConfig, env: WorkerEnv) -> Result<Self> {
        config.validate()?;
        env.flags.apply_config(&config);

        Ok(Self {
            config,
            env,
            workers: RwLock::new(BTreeMap::new()),
            stopped: AtomicBool::new(false),
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Shared enablement table.
    pub fn flags(&self) -> &Arc<FeatureFlags> {
        &self.env.flags
    }

    /// Worker for `feature`, created if it does not exist yet.
    pub fn worker(&self, feature: Feature) -> Arc<DeliveryWorker> {
        if let Some(worker) = self.workers.read().get(&feature) {
            return worker.clone();
        }

        self.workers
            .write()
            .entry(feature)
            .or_insert_with(|| {
                Arc::new(DeliveryWorker::new(feature, &self.config, self.env.clone()))
            })
            .clone()
    }

    fn existing(&self, scope: Scope) -> Vec<Arc<DeliveryWorker>> {
        let workers = self.workers.read();
        match scope {
            Scope::All => workers.values().cloned().collect(),
            Scope::Feature(feature) => workers.get(&feature).cloned().into_iter().collect(),
        }
    }

    /// Enqueues a payload on its feature's worker without blocking.
    ///
    /// Returns `false` if the supervisor is stopped, the feature is disabled,
    /// or the worker refused the payload.
    pub fn push(&self, payload: Payload) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        let feature = payload.feature();
        if !self.env.flags.is_enabled(feature) {
            return false;
        }
        let worker = self.worker(feature);
        // A stop racing with the first push may have missed this worker.
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        worker.push(payload)
    }

    /// Blocks until everything pushed before the call has been handed to the
    /// backend.
    pub fn flush(&self, scope: Scope) {
        for worker in self.existing(scope) {
            worker.flush();
        }
    }

    /// Like `flush`, bounded by `timeout` across all workers in scope.
    ///
    /// Returns whether every worker finished in time.
    pub fn flush_timeout(&self, scope: Scope, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        self.existing(scope).iter().all(|worker| {
            let remaining = deadline
                .map_or(timeout, |deadline| deadline.saturating_duration_since(Instant::now()));
            worker.flush_timeout(remaining)
        })
    }

    /// Stops every worker. No push succeeds until `start`.
    ///
    /// Workers shut down concurrently; a graceful stop returns once all of
    /// them have drained.
    pub fn stop(&self, force: bool) {
        self.stopped.store(true, Ordering::Release);
        let workers = self.existing(Scope::All);
        info!(workers = workers.len(), force, "stopping delivery workers");

        thread::scope(|scope| {
            for worker in &workers {
                scope.spawn(move || worker.shutdown(force));
            }
        });
    }

    /// Resumes accepting pushes after `stop`.
    ///
    /// Workers that were stopped are replaced with fresh instances. Suspended
    /// workers keep their suspension window.
    pub fn start(&self) {
        self.stopped.store(false, Ordering::Release);
        let mut workers = self.workers.write();
        for (feature, worker) in workers.iter_mut() {
            if worker.state() == WorkerState::Stopped && !worker.is_alive() {
                debug!(feature = %feature, "replacing stopped worker");
                let replacement = DeliveryWorker::new(*feature, &self.config, self.env.clone());
                replacement.inherit_suspension(worker.resume_at());
                *worker = Arc::new(replacement);
            }
        }
    }

    /// Re-initializes every worker after the process was forked.
    pub fn fork(&self) {
        for worker in self.existing(Scope::All) {
            worker.fork();
        }
    }

    /// Records which features the ingestion service enables.
    pub fn apply_ping<I>(&self, features: I)
    where
        I: IntoIterator<Item = (Feature, bool)>,
    {
        for (feature, enabled) in features {
            if !enabled && self.env.flags.is_enabled(feature) {
                info!(feature = %feature, "feature disabled by the ingestion service");
            }
            self.env.flags.set_server_enabled(feature, enabled);
        }
    }

    /// Whether `feature` currently accepts data.
    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.env.flags.is_enabled(feature)
    }

    /// Pid recorded by the worker for `feature`, if it has started.
    pub fn worker_pid(&self, feature: Feature) -> Option<u32> {
        self.existing(Scope::Feature(feature)).first().and_then(|worker| worker.pid())
    }

    /// Statistics for every worker created so far, ordered by feature.
    pub fn stats(&self) -> Vec<WorkerStats> {
        self.existing(Scope::All).iter().map(|worker| worker.stats()).collect()
    }
}
