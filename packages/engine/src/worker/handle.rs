// packages/engine/src/worker/handle.rs
//! Worker handle: one external process plus its relay
//!
//! The worker exclusively owns both the OS process and the relay. It has no
//! back-pointer to the pool; failures travel through return values and the
//! pool's event bus, which keeps the ownership graph a tree.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::ipc::frame::{Frame, MAX_PAYLOAD};
use crate::ipc::payload::Payload;
use crate::ipc::protocol;
use crate::ipc::relay::{Relay, RelayError};
use crate::utils::errors::{EngineError, Result};

use super::process::{ExitOutcome, ProcessHandle};
use super::state::{StateCell, WorkerState};

/// How a graceful stop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process exited within the deadline.
    Graceful,
    /// The deadline elapsed and the process was killed.
    Forced,
}

/// Point-in-time view of one worker, used by `WorkerPool::stats` and tests.
#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub pid: u32,
    pub state: WorkerState,
    pub num_execs: u64,
    pub age: Duration,
    pub idle_for: Duration,
}

/// Handle to one pooled worker process.
pub struct Worker {
    process: Box<dyn ProcessHandle>,
    relay: Arc<dyn Relay>,
    state: StateCell,
    created_at: Instant,
    /// Milliseconds since `created_at` of the last return to Ready.
    last_used_ms: AtomicU64,
    /// Milliseconds since `created_at` when the in-flight exec started,
    /// offset by one; 0 means no exec in flight.
    exec_started_ms: AtomicU64,
    num_execs: AtomicU64,
    /// Set by the supervisor when it cancels an exec over its wall-time
    /// budget, so the pool can tell preemption apart from a transport fault.
    preempted: AtomicBool,
}

impl Worker {
    pub(crate) fn new(process: Box<dyn ProcessHandle>, relay: Arc<dyn Relay>) -> Self {
        Self {
            process,
            relay,
            state: StateCell::new(WorkerState::Inactive),
            created_at: Instant::now(),
            last_used_ms: AtomicU64::new(0),
            exec_started_ms: AtomicU64::new(0),
            num_execs: AtomicU64::new(0),
            preempted: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Attempt a lifecycle edge; see [`StateCell::transition`].
    pub fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        self.state.transition(from, to)
    }

    pub fn num_execs(&self) -> u64 {
        self.num_execs.load(Ordering::Acquire)
    }

    /// Time since the worker was allocated.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the last return to Ready (or allocation, if never used).
    pub fn idle_for(&self) -> Duration {
        let since_create = self.created_at.elapsed().as_millis() as u64;
        let last_used = self.last_used_ms.load(Ordering::Acquire);
        Duration::from_millis(since_create.saturating_sub(last_used))
    }

    /// Wall time of the in-flight exec, if one is running.
    pub fn busy_for(&self) -> Option<Duration> {
        let started = self.exec_started_ms.load(Ordering::Acquire);
        if started == 0 {
            return None;
        }
        let since_create = self.created_at.elapsed().as_millis() as u64 + 1;
        Some(Duration::from_millis(since_create.saturating_sub(started)))
    }

    /// RSS of the owned process in MiB; 0 when unknown.
    pub fn rss_mib(&self) -> u64 {
        self.process.rss_mib()
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            pid: self.pid(),
            state: self.state(),
            num_execs: self.num_execs(),
            age: self.age(),
            idle_for: self.idle_for(),
        }
    }

    /// Handshake done: the worker may enter the free queue.
    pub(crate) fn activate(&self) -> bool {
        self.touch();
        self.state.transition(WorkerState::Inactive, WorkerState::Ready)
    }

    pub(crate) fn touch(&self) {
        let since_create = self.created_at.elapsed().as_millis() as u64;
        self.last_used_ms.store(since_create, Ordering::Release);
    }

    pub(crate) fn begin_exec(&self) {
        let since_create = self.created_at.elapsed().as_millis() as u64 + 1;
        self.exec_started_ms.store(since_create, Ordering::Release);
    }

    pub(crate) fn end_exec(&self) {
        self.exec_started_ms.store(0, Ordering::Release);
    }

    /// One request completed with a valid reply; bump the counters that the
    /// Working -> Ready transition publishes.
    pub(crate) fn record_success(&self) {
        self.num_execs.fetch_add(1, Ordering::AcqRel);
        self.touch();
    }

    pub(crate) fn mark_preempted(&self) {
        self.preempted.store(true, Ordering::Release);
    }

    /// Consume the preemption flag.
    pub(crate) fn take_preempted(&self) -> bool {
        self.preempted.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn close_relay(&self) {
        self.relay.close();
    }

    /// Run one request: write one data frame, read one reply frame.
    ///
    /// Pre: state is Working (set by the caller). A relay failure while the
    /// process is still alive is a soft error; a dead process is hard.
    pub async fn exec(&self, request: &Payload) -> Result<Payload> {
        if request.len() as u64 > MAX_PAYLOAD {
            return Err(EngineError::SoftJob(RelayError::PayloadTooLarge));
        }

        let frame = Frame::data(&request.context, &request.body);
        if let Err(e) = self.relay.send(frame).await {
            return Err(self.classify(e));
        }

        let reply = match self.relay.receive().await {
            Ok(frame) => frame,
            Err(e) => return Err(self.classify(e)),
        };
        if reply.is_control() {
            return Err(EngineError::SoftJob(RelayError::InvalidControl(
                "unexpected control frame in reply".into(),
            )));
        }

        let (context, body) = reply.split();
        Ok(Payload { context, body })
    }

    fn classify(&self, err: RelayError) -> EngineError {
        if self.process.is_alive() {
            EngineError::SoftJob(err)
        } else {
            EngineError::HardJob(format!(
                "worker process {} died during exec: {}",
                self.pid(),
                err
            ))
        }
    }

    /// Graceful stop: send `{"stop": true}`, close the relay and wait for
    /// the process to exit on its own. Escalates to kill when the deadline
    /// fires. Fire-and-forget: the child is not expected to acknowledge.
    pub async fn stop(&self, deadline: Duration) -> StopOutcome {
        let current = self.state.get();
        let _ = self.state.transition(current, WorkerState::Stopping);

        if let Err(e) = protocol::send_stop(self.relay.as_ref()).await {
            debug!(pid = self.pid(), error = %e, "stop frame not delivered");
        }
        self.relay.close();

        match timeout(deadline, self.process.wait()).await {
            Ok(outcome) => {
                self.settle(outcome);
                StopOutcome::Graceful
            }
            Err(_) => {
                warn!(pid = self.pid(), ?deadline, "destroy timeout exceeded, killing worker");
                let _ = self.state.transition(WorkerState::Stopping, WorkerState::Killing);
                self.process.kill();
                let _ = self.process.wait().await;
                let _ = self.state.transition(WorkerState::Killing, WorkerState::Errored);
                StopOutcome::Forced
            }
        }
    }

    /// Forced termination. Always succeeds from the caller's viewpoint.
    pub async fn kill(&self) {
        let current = self.state.get();
        let _ = self.state.transition(current, WorkerState::Killing);
        self.relay.close();
        self.process.kill();
        let _ = self.process.wait().await;
        let _ = self.state.transition(WorkerState::Killing, WorkerState::Errored);
    }

    /// Block until the process is reaped and record the exit reason.
    pub async fn wait(&self) -> ExitOutcome {
        let outcome = self.process.wait().await;
        self.settle(outcome);
        outcome
    }

    fn settle(&self, outcome: ExitOutcome) {
        let target = if outcome.is_clean() {
            WorkerState::Stopped
        } else {
            WorkerState::Errored
        };
        let _ = self.state.transition(WorkerState::Stopping, target);
        let _ = self.state.transition(WorkerState::Killing, WorkerState::Errored);
    }

    /// Final transition once the pool forgets the worker.
    pub(crate) fn mark_destroyed(&self) {
        let _ = self
            .state
            .transition(WorkerState::Stopped, WorkerState::Destroyed);
        let _ = self
            .state
            .transition(WorkerState::Errored, WorkerState::Destroyed);
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Last line of defence; the pool normally stops workers explicitly.
        if !self.state.get().is_terminal() {
            self.relay.close();
            self.process.kill();
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("pid", &self.pid())
            .field("state", &self.state())
            .field("num_execs", &self.num_execs())
            .finish()
    }
}
