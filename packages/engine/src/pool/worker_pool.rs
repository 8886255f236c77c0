// packages/engine/src/pool/worker_pool.rs
//! Worker pool: checkout, execution, recycling and teardown
//!
//! The pool owns a fleet of external worker processes and multiplexes
//! request execution across them. A request pops a worker from the free
//! queue, runs exactly one frame round-trip on it and pushes it back. Any
//! worker that leaves the queue for a reason other than a successful exec is
//! replaced on a detached task so callers never wait on spawn latency.
//!
//! # Architecture
//!
//! ```text
//! WorkerPool
//! ├─ free:    [W1, W2, ...]   (Ready workers, LIFO + semaphore)
//! ├─ workers: [W1, W2, W3]    (live set, snapshot for the supervisor)
//! └─ exec() ──pop──> W3 (Working) ──frame round-trip──> push back
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::events::{Bus, Event, EventKind};
use crate::ipc::payload::Payload;
use crate::utils::errors::{EngineError, Result};
use crate::worker::allocator::{Allocator, WorkerFactory};
use crate::worker::handle::Worker;
use crate::worker::state::WorkerState;

use super::config::PoolConfig;
use super::supervisor;

/// Bounded LIFO of Ready workers. The semaphore's permit count mirrors the
/// slot count, so a popped permit always corresponds to one worker.
struct FreeQueue {
    slots: Mutex<Vec<Arc<Worker>>>,
    capacity: Semaphore,
}

impl FreeQueue {
    fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            capacity: Semaphore::new(0),
        }
    }

    async fn push(&self, worker: Arc<Worker>) {
        self.slots.lock().await.push(worker);
        self.capacity.add_permits(1);
    }

    async fn pop(&self, wait: Duration) -> Result<Arc<Worker>> {
        let permit = match timeout(wait, self.capacity.acquire()).await {
            Err(_) => return Err(EngineError::NoFreeWorkers(wait)),
            Ok(Err(_)) => return Err(EngineError::PoolStopped),
            Ok(Ok(permit)) => permit,
        };
        permit.forget();
        // permits == slots.len(), so a held permit guarantees an element
        self.slots.lock().await.pop().ok_or(EngineError::PoolStopped)
    }

    /// Pull a specific worker out of the queue, consuming its permit. None
    /// if the worker is not queued or was just claimed by a checkout.
    async fn remove(&self, pid: u32) -> Option<Arc<Worker>> {
        let mut slots = self.slots.lock().await;
        let idx = slots.iter().position(|w| w.pid() == pid)?;
        match self.capacity.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(_) => return None,
        }
        Some(slots.remove(idx))
    }

    fn close(&self) {
        self.capacity.close();
    }

    async fn clear(&self) {
        self.slots.lock().await.clear();
    }

    async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }
}

enum RetireMode {
    /// Stop frame + relay close, kill only after the destroy timeout.
    Graceful,
    /// Straight to kill.
    Forced,
}

/// Pool-level counters, point in time.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub workers: usize,
    pub ready: usize,
    pub working: usize,
    pub invalid: usize,
    pub free: usize,
}

/// A pool of external worker processes behind a framed IPC channel.
pub struct WorkerPool {
    /// Self-reference for detached recycle tasks; never owning.
    me: Weak<WorkerPool>,
    cfg: PoolConfig,
    allocator: Allocator,
    free: FreeQueue,
    workers: Mutex<Vec<Arc<Worker>>>,
    stopping: AtomicBool,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    events: Bus,
}

impl WorkerPool {
    /// Build the pool, spawn the steady-state workers and start the
    /// supervisor. The event bus is an explicit dependency; tests pass a
    /// capturing one through the same path.
    pub async fn new(
        factory: Arc<dyn WorkerFactory>,
        cfg: PoolConfig,
        events: Bus,
    ) -> Result<Arc<Self>> {
        cfg.validate()?;

        let allocator = Allocator::new(factory, cfg.allocate_timeout);
        let pool = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            allocator,
            free: FreeQueue::new(),
            workers: Mutex::new(Vec::new()),
            stopping: AtomicBool::new(false),
            supervisor: Mutex::new(None),
            events,
            cfg,
        });

        if !pool.cfg.debug {
            for _ in 0..pool.cfg.num_workers {
                let worker = pool.allocator.allocate().await?;
                pool.adopt(worker).await;
            }
        }

        if let Some(sup_cfg) = pool.cfg.supervisor.clone() {
            let handle = supervisor::spawn(Arc::downgrade(&pool), sup_cfg);
            *pool.supervisor.lock().await = Some(handle);
        }

        pool.events.publish(Event::new(EventKind::PoolConstructed));
        info!(
            workers = pool.cfg.num_workers,
            debug = pool.cfg.debug,
            "worker pool constructed"
        );
        Ok(pool)
    }

    /// Run one request on a free worker.
    pub async fn exec(&self, request: &Payload) -> Result<Payload> {
        if self.stopping.load(Ordering::Acquire) {
            return Err(EngineError::PoolStopped);
        }
        if self.cfg.debug {
            return self.exec_debug(request).await;
        }

        loop {
            let worker = self.free.pop(self.cfg.allocate_timeout).await?;

            if !worker.transition(WorkerState::Ready, WorkerState::Working) {
                // The supervisor invalidated the worker while it sat in the
                // queue; recycle it and take the next one.
                debug!(pid = worker.pid(), state = ?worker.state(), "worker unusable at checkout");
                self.spawn_retire(worker, RetireMode::Graceful);
                continue;
            }

            worker.begin_exec();
            let result = worker.exec(request).await;
            worker.end_exec();

            return match result {
                Ok(reply) => {
                    worker.record_success();
                    if worker.transition(WorkerState::Working, WorkerState::Ready) {
                        self.free.push(worker).await;
                    } else {
                        // Invalidated mid-flight (TTL or memory budget); the
                        // reply is still good, only the worker is retired.
                        debug!(pid = worker.pid(), "worker invalidated mid-exec, recycling");
                        self.spawn_retire(worker, RetireMode::Graceful);
                    }
                    Ok(reply)
                }
                Err(err) => {
                    if worker.take_preempted() {
                        self.spawn_retire(worker, RetireMode::Forced);
                        return Err(EngineError::ExecTtlExceeded);
                    }
                    self.events
                        .publish(Event::worker(EventKind::WorkerError, worker.pid()));
                    match &err {
                        EngineError::SoftJob(_) => {
                            worker.transition(WorkerState::Working, WorkerState::Invalid);
                            self.spawn_retire(worker, RetireMode::Graceful);
                        }
                        _ => self.spawn_retire(worker, RetireMode::Forced),
                    }
                    Err(err)
                }
            };
        }
    }

    /// Debug mode: one fresh worker per request, destroyed right after.
    async fn exec_debug(&self, request: &Payload) -> Result<Payload> {
        let worker = self.allocator.allocate().await?;
        self.events
            .publish(Event::worker(EventKind::WorkerConstructed, worker.pid()));

        worker.transition(WorkerState::Ready, WorkerState::Working);
        worker.begin_exec();
        let result = worker.exec(request).await;
        worker.end_exec();

        worker.stop(self.cfg.destroy_timeout).await;
        worker.mark_destroyed();
        self.events
            .publish(Event::worker(EventKind::WorkerDestruct, worker.pid()));
        result
    }

    /// Stable snapshot of all live workers.
    pub async fn workers(&self) -> Vec<Arc<Worker>> {
        self.workers.lock().await.clone()
    }

    pub async fn stats(&self) -> PoolStats {
        let snapshot = self.workers().await;
        let mut stats = PoolStats {
            workers: snapshot.len(),
            ready: 0,
            working: 0,
            invalid: 0,
            free: self.free.len().await,
        };
        for worker in &snapshot {
            match worker.state() {
                WorkerState::Ready => stats.ready += 1,
                WorkerState::Working => stats.working += 1,
                WorkerState::Invalid => stats.invalid += 1,
                _ => {}
            }
        }
        stats
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Tear the pool down: stop every worker gracefully, escalating to kill
    /// per worker after the destroy timeout. Idempotent; new exec calls fail
    /// with `PoolStopped` immediately.
    pub async fn destroy(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("destroying worker pool");

        self.free.close();
        if let Some(handle) = self.supervisor.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }

        let workers: Vec<Arc<Worker>> = {
            let mut guard = self.workers.lock().await;
            guard.drain(..).collect()
        };
        self.free.clear().await;

        let mut tasks = Vec::with_capacity(workers.len());
        for worker in workers {
            let destroy_timeout = self.cfg.destroy_timeout;
            let events = self.events.clone();
            tasks.push(tokio::spawn(async move {
                worker.stop(destroy_timeout).await;
                worker.mark_destroyed();
                events.publish(Event::worker(EventKind::WorkerDestruct, worker.pid()));
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
        info!("worker pool destroyed");
    }

    /// Register a fresh worker: live set, construct event, free queue.
    async fn adopt(&self, worker: Arc<Worker>) {
        {
            let mut workers = self.workers.lock().await;
            if self.stopping.load(Ordering::Acquire) {
                drop(workers);
                // Lost the race with destroy; don't leak the fresh process.
                worker.kill().await;
                return;
            }
            workers.push(Arc::clone(&worker));
        }
        debug!(pid = worker.pid(), "worker joined the pool");
        self.events
            .publish(Event::worker(EventKind::WorkerConstructed, worker.pid()));
        self.free.push(worker).await;
    }

    async fn remove_live(&self, pid: u32) -> Option<Arc<Worker>> {
        let mut workers = self.workers.lock().await;
        let idx = workers.iter().position(|w| w.pid() == pid)?;
        Some(workers.remove(idx))
    }

    /// Retire a worker and allocate its replacement, all off the caller's
    /// path. Exactly one retire task runs per departed worker: whoever moved
    /// it out of Ready owns its afterlife.
    fn spawn_retire(&self, worker: Arc<Worker>, mode: RetireMode) {
        let Some(pool) = self.me.upgrade() else { return };
        tokio::spawn(async move {
            pool.retire_and_replace(worker, mode).await;
        });
    }

    async fn retire_and_replace(&self, worker: Arc<Worker>, mode: RetireMode) {
        let Some(worker) = self.remove_live(worker.pid()).await else {
            // Destroy drained it first.
            return;
        };

        match mode {
            RetireMode::Graceful => {
                worker.stop(self.cfg.destroy_timeout).await;
            }
            RetireMode::Forced => worker.kill().await,
        }
        worker.mark_destroyed();
        self.events
            .publish(Event::worker(EventKind::WorkerDestruct, worker.pid()));

        if self.stopping.load(Ordering::Acquire) {
            return;
        }
        if let Some(fresh) = self.allocator.allocate_with_retry(&self.stopping).await {
            self.adopt(fresh).await;
        }
    }

    /// Supervisor entry for TTL, IdleTTL and MaxMemory hits: soft-stop the
    /// worker and replace it. A busy worker is only flagged; the recycler
    /// picks it up when its exec returns.
    pub(crate) async fn supervisor_soft_retire(&self, worker: &Arc<Worker>, kind: EventKind) {
        if let Some(owned) = self.free.remove(worker.pid()).await {
            owned.transition(WorkerState::Ready, WorkerState::Invalid);
            self.events.publish(Event::worker(kind, owned.pid()));
            self.spawn_retire(owned, RetireMode::Graceful);
        } else if worker.transition(WorkerState::Working, WorkerState::Invalid) {
            self.events.publish(Event::worker(kind, worker.pid()));
        }
    }

    /// Supervisor entry for ExecTTL: cancel the in-flight exec by closing
    /// the relay from under its reader. The pool surfaces `ExecTtlExceeded`
    /// to the blocked caller and schedules the replacement.
    pub(crate) fn supervisor_preempt(&self, worker: &Arc<Worker>) {
        if worker.transition(WorkerState::Working, WorkerState::Invalid) {
            worker.mark_preempted();
            worker.close_relay();
            self.events
                .publish(Event::worker(EventKind::ExecTtl, worker.pid()));
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("num_workers", &self.cfg.num_workers)
            .field("debug", &self.cfg.debug)
            .field("stopping", &self.stopping)
            .finish()
    }
}
