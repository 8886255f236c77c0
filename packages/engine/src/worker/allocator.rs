// packages/engine/src/worker/allocator.rs
//! Worker allocation: factory invocation plus the pid handshake
//!
//! The factory is the injected capability that actually spawns an external
//! process and wires a relay to it (pipes, sockets, ...). The allocator owns
//! everything after the spawn: the handshake, the allocate timeout, and the
//! retry loop used for background replacement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::ipc::protocol;
use crate::ipc::relay::Relay;
use crate::utils::errors::{EngineError, Result};

use super::handle::Worker;
use super::process::ProcessHandle;

const RETRY_BASE: Duration = Duration::from_millis(100);
const RETRY_CAP: Duration = Duration::from_secs(5);

/// Capability that spawns one external worker process and returns its
/// process handle and relay. Implementations must make sure a dropped
/// handle does not leak its process.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    async fn spawn(&self) -> Result<(Box<dyn ProcessHandle>, Arc<dyn Relay>)>;
}

/// Spawns workers through the factory and brings them to Ready.
pub struct Allocator {
    factory: Arc<dyn WorkerFactory>,
    allocate_timeout: Duration,
}

impl Allocator {
    pub fn new(factory: Arc<dyn WorkerFactory>, allocate_timeout: Duration) -> Self {
        Self {
            factory,
            allocate_timeout,
        }
    }

    /// Spawn one worker and run the pid handshake, all bounded by the
    /// allocate timeout. On any failure the partial child is killed.
    pub async fn allocate(&self) -> Result<Arc<Worker>> {
        match timeout(self.allocate_timeout, self.spawn_and_handshake()).await {
            Ok(result) => result,
            // The in-flight future is dropped here; the process handle's
            // Drop reaps the partial child.
            Err(_) => Err(EngineError::WorkerAllocate(format!(
                "allocation timed out after {:?}",
                self.allocate_timeout
            ))),
        }
    }

    async fn spawn_and_handshake(&self) -> Result<Arc<Worker>> {
        let (process, relay) = self.factory.spawn().await?;
        let pid = process.pid();

        match protocol::fetch_pid(relay.as_ref(), std::process::id()).await {
            Ok(child_pid) => {
                debug!(pid, child_pid, "pid handshake complete");
                let worker = Worker::new(process, relay);
                worker.activate();
                Ok(Arc::new(worker))
            }
            Err(e) => {
                warn!(pid, error = %e, "pid handshake failed, killing child");
                relay.close();
                process.kill();
                let _ = process.wait().await;
                Err(EngineError::WorkerAllocate(e.to_string()))
            }
        }
    }

    /// Allocate with exponential backoff (100 ms doubling, capped at 5 s),
    /// forever while the pool is not shutting down. Returns None once the
    /// shutdown flag is observed.
    pub async fn allocate_with_retry(&self, stopping: &AtomicBool) -> Option<Arc<Worker>> {
        let mut delay = RETRY_BASE;
        loop {
            if stopping.load(Ordering::Acquire) {
                return None;
            }
            match self.allocate().await {
                Ok(worker) => return Some(worker),
                Err(e) => {
                    warn!(error = %e, retry_in = ?delay, "worker allocation failed");
                    sleep(delay).await;
                    delay = (delay * 2).min(RETRY_CAP);
                }
            }
        }
    }
}
