//! Fake process id source for simulating `fork()`.

use std::sync::atomic::{AtomicU32, Ordering};

use outpost_core::ProcessInfo;

/// Process id that tests can change at will.
///
/// A worker started under one pid and then asked to start again after
/// `simulate_fork` sees exactly what it would see in a forked child.
#[derive(Debug)]
pub struct FakeProcess {
    pid: AtomicU32,
}

impl FakeProcess {
    /// Starts out reporting `pid`.
    pub fn new(pid: u32) -> Self {
        Self { pid: AtomicU32::new(pid) }
    }

    /// Reports a new pid, as a child process would. Returns it.
    pub fn simulate_fork(&self) -> u32 {
        self.pid.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Reports `pid` from now on.
    pub fn set_pid(&self, pid: u32) {
        self.pid.store(pid, Ordering::SeqCst);
    }
}

impl Default for FakeProcess {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl ProcessInfo for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid.load(Ordering::SeqCst)
    }
}
