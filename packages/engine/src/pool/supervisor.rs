// packages/engine/src/pool/supervisor.rs
//! Supervisor: periodic enforcement of per-worker budgets
//!
//! A single task wakes every watch tick, snapshots the pool and checks each
//! worker against the configured budgets. Rules are evaluated in a fixed
//! order and the first hit wins. The tick never blocks on a worker: stop
//! and replace run on detached tasks owned by the pool.
//!
//! The task holds only a weak pool reference, so a dropped pool takes its
//! supervisor down with it.

use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::events::EventKind;
use crate::worker::state::WorkerState;

use super::config::SupervisorConfig;
use super::worker_pool::WorkerPool;

pub(crate) fn spawn(pool: Weak<WorkerPool>, cfg: SupervisorConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(cfg.watch_tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // interval yields immediately once; burn that so the first sweep
        // lands a full period after construction
        tick.tick().await;

        loop {
            tick.tick().await;
            let Some(pool) = pool.upgrade() else { break };
            if pool.is_stopping() {
                break;
            }
            sweep(&pool, &cfg).await;
        }
        debug!("supervisor loop exited");
    })
}

async fn sweep(pool: &Arc<WorkerPool>, cfg: &SupervisorConfig) {
    for worker in pool.workers().await {
        let state = worker.state();
        // Workers already on their way out are not ours to touch.
        if !state.is_active() {
            continue;
        }

        if !cfg.ttl.is_zero() && worker.age() >= cfg.ttl {
            debug!(pid = worker.pid(), age = ?worker.age(), "worker exceeded lifetime budget");
            pool.supervisor_soft_retire(&worker, EventKind::Ttl).await;
            continue;
        }

        if !cfg.idle_ttl.is_zero()
            && state == WorkerState::Ready
            && worker.idle_for() >= cfg.idle_ttl
        {
            debug!(pid = worker.pid(), idle = ?worker.idle_for(), "worker exceeded idle budget");
            pool.supervisor_soft_retire(&worker, EventKind::IdleTtl).await;
            continue;
        }

        if !cfg.exec_ttl.is_zero() && state == WorkerState::Working {
            if let Some(busy) = worker.busy_for() {
                if busy >= cfg.exec_ttl {
                    warn!(pid = worker.pid(), ?busy, "exec over wall-time budget, preempting");
                    pool.supervisor_preempt(&worker);
                    continue;
                }
            }
        }

        if cfg.max_worker_memory_mb > 0 {
            let rss = worker.rss_mib();
            // 0 means the lookup failed; skip the rule for this tick.
            if rss > 0 && rss >= cfg.max_worker_memory_mb {
                warn!(
                    pid = worker.pid(),
                    rss_mib = rss,
                    limit_mib = cfg.max_worker_memory_mb,
                    "worker over memory budget"
                );
                pool.supervisor_soft_retire(&worker, EventKind::MaxMemory).await;
            }
        }
    }
}
