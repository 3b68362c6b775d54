//! Test infrastructure for deterministic delivery tests.
//!
//! Provides scripted backends, a fake process id source for fork
//! simulation, payload fixtures, and polling helpers for assertions on
//! work that happens on background worker threads.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{
    sync::Once,
    thread,
    time::{Duration, Instant},
};

use anyhow::{bail, Result};

pub mod backend;
pub mod fixtures;
pub mod process;

pub use backend::{Delivery, FailureKind, FlakyBackend, GateBackend, RecordingBackend};
pub use fixtures::numbered;
pub use outpost_core::TestClock;
pub use process::FakeProcess;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per test binary.
///
/// Honors `RUST_LOG`; defaults to `error` so passing tests stay quiet.
pub fn init_tracing() {
    TRACING.call_once(|| {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("error"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_thread_names(true)
            .with_target(true)
            .try_init();
    });
}

/// Polls `condition` until it holds or `timeout` elapses.
///
/// Returns whether the condition held.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Like `wait_until`, but fails with a message naming what never happened.
pub fn wait_for(what: &str, timeout: Duration, condition: impl FnMut() -> bool) -> Result<()> {
    if wait_until(timeout, condition) {
        Ok(())
    } else {
        bail!("timed out after {timeout:?} waiting for {what}")
    }
}
