// packages/engine/src/utils/errors.rs
//! Error types for the worker-pool runtime

use std::time::Duration;
use thiserror::Error;

use crate::ipc::relay::RelayError;

/// Convenience result type used across the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error taxonomy
///
/// Request-scoped failures are split into soft errors (the worker stays
/// recyclable and is replaced in the background) and hard errors (the worker
/// process is dead). Errors that invalidate a worker never reach the free
/// queue; callers always see a clean error while the pool recycles.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The allocate timeout elapsed with no worker available. No worker is
    /// affected.
    #[error("no free workers after {0:?}")]
    NoFreeWorkers(Duration),

    /// Spawn or pid handshake failed. Retried by the background allocator.
    #[error("worker allocation failed: {0}")]
    WorkerAllocate(String),

    /// The worker returned a malformed reply or the relay failed without the
    /// process dying. The worker is marked invalid and replaced.
    #[error("soft job error: {0}")]
    SoftJob(RelayError),

    /// The worker process died mid-exec. Replacement is scheduled.
    #[error("hard job error: {0}")]
    HardJob(String),

    /// The supervisor preempted this exec; the worker is being replaced.
    #[error("exec wall-time budget exceeded, worker preempted")]
    ExecTtlExceeded,

    /// Exec was called on a pool that is shutting down or destroyed.
    #[error("worker pool is stopped")]
    PoolStopped,

    /// Invalid pool configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the failure is scoped to a single request and the caller may
    /// simply retry against the pool.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::NoFreeWorkers(_)
                | EngineError::SoftJob(_)
                | EngineError::HardJob(_)
                | EngineError::ExecTtlExceeded
        )
    }
}
