//! One background delivery thread per feature.
//!
//! A `DeliveryWorker` owns a bounded queue, a batch accumulator, and a
//! throttle. Producers push into the queue from any thread; exactly one
//! worker thread pops, batches, calls the backend, and applies the action the
//! response maps to.
//!
//! # Lifecycle
//!
//! ```text
//!   Stopped ──start──▶ Starting ──▶ Running ──shutdown──▶ Draining ──▶ Stopped
//!                                    │   ▲
//!                         402 / 403  │   │ start() after the window
//!                                    ▼   │
//!                                  Suspended
//! ```
//!
//! The thread records the pid that spawned it. A worker whose recorded pid
//! differs from the live pid (the process was forked) is treated as stale:
//! its thread handle is abandoned without joining and fresh queue and
//! throttle state are created before a new thread starts.

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use outpost_core::{Clock, CurrentProcess, Feature, Payload, ProcessInfo, RealClock, Response};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    backend::Backend,
    batch::BatchAccumulator,
    config::{DeliveryConfig, FeatureConfig},
    error::{DeliveryError, ErrorCategory},
    features::FeatureFlags,
    queue::{BoundedQueue, FlushMarker, Message},
    response::{Action, LogReason, ResponseInterpreter},
    throttle::ThrottleController,
};

/// Longest single sleep while throttled, so a forced stop is noticed quickly.
const PAUSE_SLICE: Duration = Duration::from_millis(50);

/// How often a blocked `flush()` re-checks that the worker is still alive.
const LIVENESS_CHECK: Duration = Duration::from_millis(100);

/// Stand-in for a deadline `Instant` cannot represent.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Lifecycle state of a delivery worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// No thread; pushes are refused after an explicit stop.
    Stopped,
    /// A thread is being spawned.
    Starting,
    /// The thread is consuming the queue.
    Running,
    /// A fatal response halted delivery until the cool-down elapses.
    Suspended,
    /// Shutdown requested; the thread is delivering what is left.
    Draining,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Suspended => write!(f, "suspended"),
            Self::Draining => write!(f, "draining"),
        }
    }
}

/// Point-in-time statistics for one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerStats {
    /// Feature the worker delivers.
    pub feature: Feature,
    /// Lifecycle state.
    pub state: WorkerState,
    /// Payloads waiting in the queue.
    pub queue_size: usize,
    /// Payloads rejected because the queue was full.
    pub dropped_items: u64,
    /// Batches the backend accepted.
    pub delivered_batches: u64,
    /// Payloads in accepted batches.
    pub delivered_items: u64,
    /// Batches lost to throttling, oversize, transport errors or panics.
    pub failed_batches: u64,
    /// Payloads discarded by suspension or a forced stop.
    pub abandoned_items: u64,
    /// Current throttle level.
    pub throttle_level: u32,
    /// Current pause between deliveries.
    pub throttle_interval: Duration,
}

/// Collaborators a worker needs besides its configuration.
#[derive(Debug, Clone)]
pub struct WorkerEnv {
    /// Destination for sealed batches.
    pub backend: Arc<dyn Backend>,
    /// Time source for batch ages, throttle pauses and suspension windows.
    pub clock: Arc<dyn Clock>,
    /// Source of the live process id.
    pub process: Arc<dyn ProcessInfo>,
    /// Enablement table consulted before every enqueue.
    pub flags: Arc<FeatureFlags>,
}

impl WorkerEnv {
    /// Production collaborators around `backend`.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            clock: Arc::new(RealClock),
            process: Arc::new(CurrentProcess),
            flags: Arc::new(FeatureFlags::all_enabled()),
        }
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the process id source.
    #[must_use]
    pub fn with_process(mut self, process: Arc<dyn ProcessInfo>) -> Self {
        self.process = process;
        self
    }

    /// Replaces the enablement table.
    #[must_use]
    pub fn with_flags(mut self, flags: Arc<FeatureFlags>) -> Self {
        self.flags = flags;
        self
    }
}

#[derive(Debug, Clone, Default)]
struct Counters {
    delivered_batches: u64,
    delivered_items: u64,
    failed_batches: u64,
    abandoned_items: u64,
}

#[derive(Debug)]
struct WorkerThread {
    handle: JoinHandle<()>,
    halt: Arc<AtomicBool>,
    pid: u32,
}

impl WorkerThread {
    fn is_live(&self) -> bool {
        !self.handle.is_finished() && !self.halt.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: WorkerState,
    resume_at: Option<Instant>,
    shutdown: bool,
    queue: Arc<BoundedQueue>,
    thread: Option<WorkerThread>,
    pid: Option<u32>,
}

impl Lifecycle {
    fn owns(&self, halt: &Arc<AtomicBool>) -> bool {
        self.thread.as_ref().is_some_and(|thread| Arc::ptr_eq(&thread.halt, halt))
    }
}

#[derive(Debug)]
struct Shared {
    feature: Feature,
    lifecycle: Mutex<Lifecycle>,
    throttle: Mutex<ThrottleController>,
    counters: Mutex<Counters>,
}

impl Shared {
    fn abandon(&self, count: usize) {
        if count > 0 {
            self.counters.lock().abandoned_items += count as u64;
        }
    }
}

/// Background delivery for one feature.
#[derive(Debug)]
pub struct DeliveryWorker {
    shared: Arc<Shared>,
    limits: FeatureConfig,
    idle_tick: Duration,
    interpreter: ResponseInterpreter,
    env: WorkerEnv,
}

impl DeliveryWorker {
    /// Creates a stopped worker. The thread starts on the first push.
    pub fn new(feature: Feature, config: &DeliveryConfig, env: WorkerEnv) -> Self {
        let limits = config.feature(feature).clone();
        let lifecycle = Lifecycle {
            state: WorkerState::Stopped,
            resume_at: None,
            shutdown: false,
            queue: Arc::new(BoundedQueue::new(feature, limits.max_queue_size)),
            thread: None,
            pid: None,
        };

        Self {
            shared: Arc::new(Shared {
                feature,
                lifecycle: Mutex::new(lifecycle),
                throttle: Mutex::new(ThrottleController::new(config.throttle_base)),
                counters: Mutex::new(Counters::default()),
            }),
            limits,
            idle_tick: config.idle_tick(),
            interpreter: ResponseInterpreter::from_config(config),
            env,
        }
    }

    /// Feature this worker delivers.
    pub fn feature(&self) -> Feature {
        self.shared.feature
    }

    /// Ensures a live worker thread exists for the current process.
    ///
    /// Returns `false` after an explicit stop, while a suspension window is
    /// still open, or if the thread cannot be spawned.
    pub fn start(&self) -> bool {
        let mut lifecycle = self.shared.lifecycle.lock();
        self.start_locked(&mut lifecycle)
    }

    /// Enqueues a payload without blocking.
    ///
    /// Returns `false` without enqueueing when the feature is disabled, the
    /// worker is stopped or suspended, or the queue is full.
    pub fn push(&self, payload: Payload) -> bool {
        let feature = self.feature();
        if payload.feature() != feature {
            warn!(
                feature = %feature,
                payload_feature = %payload.feature(),
                "payload routed to the wrong worker, ignoring"
            );
            return false;
        }
        if !self.env.flags.is_enabled(feature) {
            return false;
        }

        let queue = {
            let mut lifecycle = self.shared.lifecycle.lock();
            if !self.start_locked(&mut lifecycle) {
                return false;
            }
            lifecycle.queue.clone()
        };
        queue.push(payload)
    }

    /// Blocks until every payload pushed before the call has been handed to
    /// the backend.
    pub fn flush(&self) {
        self.flush_until(None);
    }

    /// Like `flush`, but gives up after `timeout`.
    ///
    /// Returns whether the flush completed.
    pub fn flush_timeout(&self, timeout: Duration) -> bool {
        // An unrepresentable deadline means no deadline.
        self.flush_until(Instant::now().checked_add(timeout))
    }

    fn flush_until(&self, deadline: Option<Instant>) -> bool {
        let queue = {
            let lifecycle = self.shared.lifecycle.lock();
            if !self.is_live_locked(&lifecycle) {
                return lifecycle.queue.is_empty();
            }
            lifecycle.queue.clone()
        };

        let marker = Arc::new(FlushMarker::new());
        queue.push_control(Message::Flush);
        queue.push_control(Message::Marker(marker.clone()));

        loop {
            let slice = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return marker.is_reached();
                    }
                    remaining.min(LIVENESS_CHECK)
                },
                None => LIVENESS_CHECK,
            };

            if marker.wait_timeout(slice) {
                return true;
            }
            if !self.is_alive() {
                return marker.is_reached();
            }
        }
    }

    /// Stops the worker. No push succeeds afterwards.
    ///
    /// With `force`, or when the worker is suspended, or throttled with a
    /// backlog, the queue is abandoned and the call returns promptly.
    /// Otherwise the remaining queue is delivered and the call blocks until
    /// the thread has exited.
    pub fn shutdown(&self, force: bool) {
        let feature = self.feature();
        let mut lifecycle = self.shared.lifecycle.lock();
        lifecycle.shutdown = true;
        let queue = lifecycle.queue.clone();

        let Some(thread) = lifecycle.thread.take() else {
            lifecycle.state = WorkerState::Stopped;
            drop(lifecycle);
            self.shared.abandon(queue.clear());
            return;
        };

        if thread.pid != self.env.process.pid() {
            thread.halt.store(true, Ordering::Release);
            lifecycle.state = WorkerState::Stopped;
            drop(lifecycle);
            // The thread does not exist in this process; joining would hang.
            std::mem::forget(thread.handle);
            self.shared.abandon(queue.clear());
            return;
        }

        if thread.handle.is_finished() {
            lifecycle.state = WorkerState::Stopped;
            drop(lifecycle);
            join_thread(feature, thread.handle);
            self.shared.abandon(queue.clear());
            return;
        }

        let backlog = queue.size();
        let throttled = self.shared.throttle.lock().is_throttled();
        let suspended = lifecycle.state == WorkerState::Suspended;

        if force || suspended || (throttled && backlog > 0) {
            thread.halt.store(true, Ordering::Release);
            lifecycle.state = WorkerState::Stopped;
            drop(lifecycle);

            let abandoned = queue.clear();
            queue.interrupt();
            self.shared.abandon(abandoned);
            warn!(
                feature = %feature,
                abandoned,
                forced = force,
                throttled,
                "worker stopped without draining its queue"
            );
            return;
        }

        lifecycle.state = WorkerState::Draining;
        drop(lifecycle);

        info!(feature = %feature, backlog, "draining worker queue before shutdown");
        queue.push_control(Message::Flush);
        queue.push_control(Message::Shutdown);
        join_thread(feature, thread.handle);

        self.shared.lifecycle.lock().state = WorkerState::Stopped;
        self.shared.abandon(queue.clear());
        info!(feature = %feature, "delivery worker stopped");
    }

    /// Halts delivery for `duration` and discards the backlog.
    pub fn suspend(&self, duration: Duration) {
        let resume_at = deadline_after(self.env.clock.now(), duration);
        let queue = {
            let mut lifecycle = self.shared.lifecycle.lock();
            lifecycle.state = WorkerState::Suspended;
            lifecycle.resume_at = Some(resume_at);
            if let Some(thread) = &lifecycle.thread {
                thread.halt.store(true, Ordering::Release);
            }
            lifecycle.queue.clone()
        };

        let discarded = queue.clear();
        queue.interrupt();
        self.shared.abandon(discarded);
        warn!(
            feature = %self.feature(),
            discarded,
            suspend_secs = duration.as_secs(),
            "delivery suspended"
        );
    }

    /// Carries an open suspension window over from a worker this one
    /// replaces. A window that already elapsed is ignored.
    pub(crate) fn inherit_suspension(&self, resume_at: Option<Instant>) {
        let Some(resume_at) = resume_at.filter(|at| self.env.clock.now() < *at) else {
            return;
        };
        let mut lifecycle = self.shared.lifecycle.lock();
        lifecycle.state = WorkerState::Suspended;
        lifecycle.resume_at = Some(resume_at);
        debug!(feature = %self.feature(), "suspension window carried over");
    }

    /// Re-initializes the worker in a forked child process.
    ///
    /// When the live pid differs from the one recorded at the last start,
    /// the inherited thread handle is abandoned without joining, queue and
    /// throttle state are replaced, and a fresh thread is started. Without a
    /// pid change this is a no-op.
    pub fn fork(&self) -> bool {
        let mut lifecycle = self.shared.lifecycle.lock();
        let pid = self.env.process.pid();
        match lifecycle.pid {
            Some(recorded) if recorded != pid => {
                self.reset_for_process(&mut lifecycle, pid);
                self.start_locked(&mut lifecycle)
            },
            Some(_) => {
                debug!(feature = %self.feature(), pid, "fork hook called without a pid change");
                self.is_live_locked(&lifecycle)
            },
            None => self.start_locked(&mut lifecycle),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.shared.lifecycle.lock().state
    }

    /// Pid recorded when the current thread was started.
    pub fn pid(&self) -> Option<u32> {
        self.shared.lifecycle.lock().pid
    }

    /// When a suspended worker may resume.
    pub fn resume_at(&self) -> Option<Instant> {
        self.shared.lifecycle.lock().resume_at
    }

    /// Whether a worker thread owned by this process is consuming the queue.
    pub fn is_alive(&self) -> bool {
        let lifecycle = self.shared.lifecycle.lock();
        self.is_live_locked(&lifecycle)
    }

    /// Payloads waiting in the queue.
    pub fn queue_size(&self) -> usize {
        self.shared.lifecycle.lock().queue.size()
    }

    /// Payloads rejected because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.lifecycle.lock().queue.dropped()
    }

    /// Current throttle level.
    pub fn throttle_level(&self) -> u32 {
        self.shared.throttle.lock().level()
    }

    /// Current throttle pause in milliseconds.
    pub fn throttle_interval_ms(&self) -> f64 {
        self.shared.throttle.lock().current_interval_ms()
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> WorkerStats {
        let (state, queue) = {
            let lifecycle = self.shared.lifecycle.lock();
            (lifecycle.state, lifecycle.queue.clone())
        };
        let throttle = self.shared.throttle.lock().clone();
        let counters = self.shared.counters.lock().clone();

        WorkerStats {
            feature: self.feature(),
            state,
            queue_size: queue.size(),
            dropped_items: queue.dropped(),
            delivered_batches: counters.delivered_batches,
            delivered_items: counters.delivered_items,
            failed_batches: counters.failed_batches,
            abandoned_items: counters.abandoned_items,
            throttle_level: throttle.level(),
            throttle_interval: throttle.current_interval(),
        }
    }

    fn is_live_locked(&self, lifecycle: &Lifecycle) -> bool {
        let pid = self.env.process.pid();
        lifecycle.thread.as_ref().is_some_and(|thread| thread.pid == pid && thread.is_live())
    }

    fn start_locked(&self, lifecycle: &mut Lifecycle) -> bool {
        let feature = self.feature();
        if lifecycle.shutdown {
            return false;
        }

        let pid = self.env.process.pid();
        if let Some(recorded) = lifecycle.pid.filter(|recorded| *recorded != pid) {
            warn!(
                feature = %feature,
                recorded_pid = recorded,
                pid,
                "worker belongs to a parent process, replacing it"
            );
            self.reset_for_process(lifecycle, pid);
        }

        if lifecycle.state == WorkerState::Suspended {
            match lifecycle.resume_at {
                Some(resume_at) if self.env.clock.now() < resume_at => return false,
                _ => {
                    info!(feature = %feature, "suspension window elapsed, resuming delivery");
                    lifecycle.resume_at = None;
                    lifecycle.state = WorkerState::Stopped;
                },
            }
        }

        if let Some(thread) = &lifecycle.thread {
            if thread.is_live() {
                return true;
            }
            if lifecycle.state == WorkerState::Running && !thread.halt.load(Ordering::Acquire) {
                error!(feature = %feature, "worker thread exited unexpectedly, restarting it");
            }
        }

        if let Some(stale) = lifecycle.thread.take() {
            stale.halt.store(true, Ordering::Release);
            if stale.handle.is_finished() {
                join_thread(feature, stale.handle);
            }
        }

        self.spawn_locked(lifecycle, pid)
    }

    fn reset_for_process(&self, lifecycle: &mut Lifecycle, pid: u32) {
        if let Some(inherited) = lifecycle.thread.take() {
            inherited.halt.store(true, Ordering::Release);
            // Threads do not survive fork(); the handle refers to nothing here.
            std::mem::forget(inherited.handle);
        }
        lifecycle.queue.interrupt();
        lifecycle.queue =
            Arc::new(BoundedQueue::new(self.feature(), self.limits.max_queue_size));
        if lifecycle.state != WorkerState::Suspended {
            lifecycle.state = WorkerState::Stopped;
        }
        lifecycle.pid = None;
        self.shared.throttle.lock().reset();
        *self.shared.counters.lock() = Counters::default();
        info!(feature = %self.feature(), pid, "worker state reinitialized for new process");
    }

    fn spawn_locked(&self, lifecycle: &mut Lifecycle, pid: u32) -> bool {
        let feature = self.feature();
        lifecycle.state = WorkerState::Starting;

        let halt = Arc::new(AtomicBool::new(false));
        let worker_loop = WorkerLoop {
            shared: self.shared.clone(),
            queue: lifecycle.queue.clone(),
            halt: halt.clone(),
            accumulator: BatchAccumulator::new(
                feature,
                self.limits.batch_max_count,
                self.limits.batch_max_age(),
                self.env.clock.clone(),
            ),
            backend: self.env.backend.clone(),
            clock: self.env.clock.clone(),
            flags: self.env.flags.clone(),
            interpreter: self.interpreter,
            idle_tick: self.idle_tick,
        };

        let spawned = thread::Builder::new()
            .name(format!("outpost-{feature}"))
            .spawn(move || worker_loop.run());

        match spawned {
            Ok(handle) => {
                lifecycle.thread = Some(WorkerThread { handle, halt, pid });
                lifecycle.pid = Some(pid);
                lifecycle.state = WorkerState::Running;
                info!(feature = %feature, pid, "delivery worker started");
                true
            },
            Err(e) => {
                let error = DeliveryError::spawn(feature, e.to_string());
                error!(
                    feature = %feature,
                    category = %ErrorCategory::from(&error),
                    error = %error,
                    "worker thread could not be started"
                );
                lifecycle.state = WorkerState::Stopped;
                false
            },
        }
    }
}

impl Drop for DeliveryWorker {
    fn drop(&mut self) {
        let lifecycle = self.shared.lifecycle.lock();
        if let Some(thread) = &lifecycle.thread {
            thread.halt.store(true, Ordering::Release);
            lifecycle.queue.interrupt();
        }
    }
}

fn deadline_after(now: Instant, duration: Duration) -> Instant {
    now.checked_add(duration).or_else(|| now.checked_add(FAR_FUTURE)).unwrap_or(now)
}

fn join_thread(feature: Feature, handle: JoinHandle<()>) {
    if let Err(panic) = handle.join() {
        error!(
            feature = %feature,
            panic = %panic_message(panic.as_ref()),
            "worker thread panicked"
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// State owned by the worker thread.
struct WorkerLoop {
    shared: Arc<Shared>,
    queue: Arc<BoundedQueue>,
    halt: Arc<AtomicBool>,
    accumulator: BatchAccumulator,
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
    flags: Arc<FeatureFlags>,
    interpreter: ResponseInterpreter,
    idle_tick: Duration,
}

impl WorkerLoop {
    fn feature(&self) -> Feature {
        self.shared.feature
    }

    fn run(mut self) {
        debug!(feature = %self.feature(), "worker loop entered");

        while !self.halt.load(Ordering::Acquire) {
            let wait = self
                .accumulator
                .time_until_due()
                .map_or(self.idle_tick, |due| due.min(self.idle_tick));

            let flow = match self.queue.pop_timeout(wait) {
                Some(Message::Item(payload)) => {
                    self.accumulator.add(payload);
                    let flow = if self.accumulator.should_flush() {
                        self.deliver()
                    } else {
                        Flow::Continue
                    };
                    if flow == Flow::Continue {
                        self.pause_if_throttled();
                    }
                    flow
                },
                Some(Message::Flush) => self.deliver(),
                Some(Message::Shutdown) => {
                    self.deliver();
                    Flow::Exit
                },
                Some(Message::Marker(marker)) => {
                    marker.signal();
                    Flow::Continue
                },
                None => {
                    if self.accumulator.should_flush() {
                        self.deliver()
                    } else {
                        Flow::Continue
                    }
                },
            };

            if flow == Flow::Exit {
                break;
            }
        }

        self.finish();
    }

    /// Seals whatever is buffered and hands it to the backend.
    fn deliver(&mut self) -> Flow {
        if self.accumulator.is_empty() {
            self.queue.end_cycle();
            return Flow::Continue;
        }

        let feature = self.feature();
        let batch = self.accumulator.drain_and_reset();
        let batch_size = batch.len();

        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| self.backend.deliver(feature, &batch)));
        self.queue.end_cycle();

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                let category = ErrorCategory::from(&error);
                if error.is_transient() {
                    warn!(
                        feature = %feature,
                        batch_size,
                        category = %category,
                        error = %error,
                        "backend delivery failed"
                    );
                } else {
                    error!(
                        feature = %feature,
                        batch_size,
                        category = %category,
                        error = %error,
                        "backend delivery failed"
                    );
                }
                Response::error(error.to_string())
            },
            Err(panic) => {
                error!(
                    feature = %feature,
                    batch_size,
                    panic = %panic_message(panic.as_ref()),
                    "backend panicked while delivering batch"
                );
                self.shared.counters.lock().failed_batches += 1;
                return Flow::Continue;
            },
        };

        let action = self.interpreter.interpret(feature, &response);
        self.apply(action, &response, batch_size)
    }

    fn apply(&mut self, action: Action, response: &Response, batch_size: usize) -> Flow {
        let feature = self.feature();
        match action {
            Action::None => {
                debug!(feature = %feature, batch_size, code = %response.code, "batch accepted");
                self.record_delivered(batch_size);
                Flow::Continue
            },
            Action::DecreaseThrottle => {
                let level = self.shared.throttle.lock().decrease();
                if let Some(level) = level {
                    debug!(feature = %feature, throttle_level = level, "throttle relaxed");
                }
                debug!(feature = %feature, batch_size, code = %response.code, "batch delivered");
                self.record_delivered(batch_size);
                Flow::Continue
            },
            Action::IncreaseThrottle => {
                let (level, interval_ms) = {
                    let mut throttle = self.shared.throttle.lock();
                    let level = throttle.increase();
                    (level, throttle.current_interval_ms())
                };
                warn!(
                    feature = %feature,
                    batch_size,
                    status = %response.code,
                    throttle_level = level,
                    interval_ms,
                    "rate limited, throttling deliveries"
                );
                self.record_failed();
                Flow::Continue
            },
            Action::Suspend(duration) => {
                self.record_failed();
                let reason = match response.status_code() {
                    Some(402) => "payment required",
                    Some(403) => "api key rejected",
                    _ => "fatal response",
                };
                let discarded = self.suspend(duration);
                error!(
                    feature = %feature,
                    status = %response.code,
                    reason,
                    discarded,
                    suspend_secs = duration.as_secs(),
                    "delivery suspended, data will not be reported until the window elapses"
                );
                Flow::Exit
            },
            Action::DisableFeature => {
                self.record_failed();
                self.flags.revoke(feature);
                let discarded = {
                    let mut lifecycle = self.shared.lifecycle.lock();
                    if lifecycle.owns(&self.halt) {
                        lifecycle.shutdown = true;
                    }
                    self.queue.clear()
                };
                self.shared.abandon(discarded);
                error!(
                    feature = %feature,
                    status = %response.code,
                    discarded,
                    "api key rejected, feature disabled"
                );
                Flow::Exit
            },
            Action::LogOnly(reason) => {
                self.record_failed();
                match reason {
                    LogReason::PayloadTooLarge => warn!(
                        feature = %feature,
                        batch_size,
                        "payload exceeds the maximum size accepted by the service, batch dropped"
                    ),
                    LogReason::TransportError | LogReason::UnexpectedStatus => warn!(
                        feature = %feature,
                        batch_size,
                        code = %response.code,
                        message = %response.message,
                        reason = %reason,
                        "batch was not accepted"
                    ),
                }
                Flow::Continue
            },
        }
    }

    fn suspend(&mut self, duration: Duration) -> usize {
        let resume_at = deadline_after(self.clock.now(), duration);
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.owns(&self.halt) {
                lifecycle.state = WorkerState::Suspended;
                lifecycle.resume_at = Some(resume_at);
            }
        }
        self.halt.store(true, Ordering::Release);
        let discarded = self.queue.clear();
        self.shared.abandon(discarded);
        discarded
    }

    fn pause_if_throttled(&self) {
        let mut remaining = self.shared.throttle.lock().current_interval();
        while !remaining.is_zero() && !self.halt.load(Ordering::Acquire) {
            let step = remaining.min(PAUSE_SLICE);
            self.clock.sleep(step);
            remaining -= step;
        }
    }

    fn record_delivered(&self, batch_size: usize) {
        let mut counters = self.shared.counters.lock();
        counters.delivered_batches += 1;
        counters.delivered_items += batch_size as u64;
    }

    fn record_failed(&self) {
        self.shared.counters.lock().failed_batches += 1;
    }

    fn finish(&mut self) {
        let feature = self.feature();
        let leftover = self.accumulator.discard();
        if leftover > 0 {
            self.shared.abandon(leftover);
            warn!(feature = %feature, abandoned = leftover, "buffered payloads abandoned");
        }

        let owned = {
            let mut lifecycle = self.shared.lifecycle.lock();
            let owned = lifecycle.owns(&self.halt);
            if owned && lifecycle.state != WorkerState::Suspended {
                lifecycle.state = WorkerState::Stopped;
            }
            owned
        };

        // Release flush waiters queued behind a shutdown or suspension.
        if owned {
            self.shared.abandon(self.queue.clear());
        }

        debug!(feature = %feature, "worker loop exited");
    }
}
