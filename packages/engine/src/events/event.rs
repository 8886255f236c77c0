// packages/engine/src/events/event.rs
//! Event data model

use std::time::SystemTime;

/// Stable identifiers for pool and supervisor notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The pool finished construction.
    PoolConstructed,
    /// A worker passed its handshake and joined the pool.
    WorkerConstructed,
    /// A worker was removed from the pool.
    WorkerDestruct,
    /// Supervisor: absolute lifetime budget hit.
    Ttl,
    /// Supervisor: idle budget hit while Ready.
    IdleTtl,
    /// Supervisor: exec wall-time budget hit; the exec was preempted.
    ExecTtl,
    /// Supervisor: RSS budget hit.
    MaxMemory,
    /// A request failed on a worker.
    WorkerError,
}

/// One published notification.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    /// Pid of the affected worker, where applicable.
    pub pid: Option<u32>,
    pub at: SystemTime,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            pid: None,
            at: SystemTime::now(),
        }
    }

    pub fn worker(kind: EventKind, pid: u32) -> Self {
        Self {
            kind,
            pid: Some(pid),
            at: SystemTime::now(),
        }
    }
}
