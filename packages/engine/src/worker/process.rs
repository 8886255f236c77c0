// packages/engine/src/worker/process.rs
//! Process handle: ownership of one external OS process
//!
//! The pool never touches raw pids; everything goes through this capability
//! so tests can substitute a fake process. The OS-backed implementation
//! wraps `tokio::process::Child` and reads RSS from `/proc/<pid>/statm`.

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::utils::errors::{EngineError, Result};

/// How the process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited on its own with the given code.
    Exited(i32),
    /// Terminated by a signal.
    Killed,
}

impl ExitOutcome {
    pub fn is_clean(self) -> bool {
        matches!(self, ExitOutcome::Exited(0))
    }
}

/// Capability over one external worker process.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> u32;

    /// Signal-0 style liveness probe.
    fn is_alive(&self) -> bool;

    /// SIGKILL-equivalent. Always succeeds from the caller's viewpoint and
    /// is idempotent on already-dead processes.
    fn kill(&self);

    /// Block until the process is reaped. Subsequent calls return the cached
    /// outcome.
    async fn wait(&self) -> ExitOutcome;

    /// Resident set size in MiB. 0 means unknown; the supervisor skips the
    /// memory rule for that tick.
    fn rss_mib(&self) -> u64;
}

struct ChildSlot {
    child: Option<Child>,
    outcome: Option<ExitOutcome>,
}

/// OS-backed process handle.
pub struct OsProcess {
    pid: u32,
    slot: Mutex<ChildSlot>,
}

impl OsProcess {
    pub fn new(child: Child) -> Result<Self> {
        let pid = child
            .id()
            .ok_or_else(|| EngineError::WorkerAllocate("process exited before startup".into()))?;
        Ok(Self {
            pid,
            slot: Mutex::new(ChildSlot {
                child: Some(child),
                outcome: None,
            }),
        })
    }
}

#[async_trait]
impl ProcessHandle for OsProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&self) -> bool {
        kill(Pid::from_raw(self.pid as i32), None).is_ok()
    }

    fn kill(&self) {
        match kill(Pid::from_raw(self.pid as i32), Signal::SIGKILL) {
            Ok(()) => debug!(pid = self.pid, "sent SIGKILL"),
            // ESRCH: already gone, which is what we wanted.
            Err(errno) => debug!(pid = self.pid, %errno, "SIGKILL skipped"),
        }
    }

    async fn wait(&self) -> ExitOutcome {
        let mut slot = self.slot.lock().await;
        if let Some(outcome) = slot.outcome {
            return outcome;
        }

        let outcome = match slot.child.take() {
            Some(mut child) => match child.wait().await {
                Ok(status) => match status.code() {
                    Some(code) => ExitOutcome::Exited(code),
                    None => ExitOutcome::Killed,
                },
                Err(e) => {
                    warn!(pid = self.pid, error = %e, "wait failed, treating as killed");
                    ExitOutcome::Killed
                }
            },
            None => ExitOutcome::Killed,
        };

        slot.outcome = Some(outcome);
        debug!(pid = self.pid, ?outcome, "process reaped");
        outcome
    }

    fn rss_mib(&self) -> u64 {
        read_rss_mib(self.pid).unwrap_or(0)
    }
}

impl Drop for OsProcess {
    fn drop(&mut self) {
        // A dropped handle must not leak its process.
        if self.is_alive() {
            self.kill();
        }
    }
}

/// Read RSS of a process in MiB from `/proc/<pid>/statm`.
///
/// statm format: size resident shared text lib data dt, all in pages.
#[cfg(target_os = "linux")]
fn read_rss_mib(pid: u32) -> Option<u64> {
    let contents = std::fs::read_to_string(format!("/proc/{}/statm", pid)).ok()?;
    let resident_pages: u64 = contents.split_whitespace().nth(1)?.parse().ok()?;
    let page_size_kb = 4;
    Some(resident_pages * page_size_kb / 1024)
}

#[cfg(not(target_os = "linux"))]
fn read_rss_mib(_pid: u32) -> Option<u64> {
    None
}
