// packages/engine/src/pool/config.rs
//! Pool and supervisor configuration

use std::time::Duration;

use crate::utils::errors::{EngineError, Result};

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Steady-state worker count (>= 1).
    pub num_workers: usize,

    /// Max wait for a free worker and for spawn + handshake of a new one.
    pub allocate_timeout: Duration,

    /// Max wait per worker during graceful stop before escalating to kill.
    pub destroy_timeout: Duration,

    /// Debug mode: no persistent workers, one fresh worker per exec.
    pub debug: bool,

    /// Budget enforcement; None disables the supervisor entirely.
    pub supervisor: Option<SupervisorConfig>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get(),
            allocate_timeout: Duration::from_secs(60),
            destroy_timeout: Duration::from_secs(60),
            debug: false,
            supervisor: None,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(EngineError::Config("num_workers must be >= 1".into()));
        }
        if self.allocate_timeout.is_zero() {
            return Err(EngineError::Config("allocate_timeout must be non-zero".into()));
        }
        if self.destroy_timeout.is_zero() {
            return Err(EngineError::Config("destroy_timeout must be non-zero".into()));
        }
        if let Some(supervisor) = &self.supervisor {
            if supervisor.watch_tick.is_zero() {
                return Err(EngineError::Config("watch_tick must be non-zero".into()));
            }
        }
        Ok(())
    }
}

/// Per-worker budgets enforced by the supervisor. A zero value disables the
/// corresponding rule.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Sweep period.
    pub watch_tick: Duration,

    /// Absolute worker lifetime.
    pub ttl: Duration,

    /// Max idle time in Ready.
    pub idle_ttl: Duration,

    /// Max wall time of a single exec.
    pub exec_ttl: Duration,

    /// RSS cap in MiB.
    pub max_worker_memory_mb: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            watch_tick: Duration::from_secs(1),
            ttl: Duration::ZERO,
            idle_ttl: Duration::ZERO,
            exec_ttl: Duration::ZERO,
            max_worker_memory_mb: 0,
        }
    }
}
