//! Process identity used to detect `fork()`.
//!
//! OS threads do not survive `fork()`. Workers record the pid that spawned
//! their thread and compare it against the live pid before reusing it.

/// Source of the current process id.
pub trait ProcessInfo: Send + Sync + std::fmt::Debug {
    /// Returns the id of the running process.
    fn pid(&self) -> u32;
}

/// Reads the pid of the running process.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentProcess;

impl ProcessInfo for CurrentProcess {
    fn pid(&self) -> u32 {
        std::process::id()
    }
}
