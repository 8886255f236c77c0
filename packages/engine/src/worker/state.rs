// packages/engine/src/worker/state.rs
//! Worker lifecycle state machine
//!
//! The state value is the single source of truth for "is this worker
//! usable". Transitions are CAS-based so concurrent observers only ever see
//! legal moves; the only backward edge is Working -> Ready, which completes
//! a request.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle states of a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Spawned, handshake not finished.
    Inactive = 0,
    /// In the free queue, able to take a request.
    Ready,
    /// Checked out, one exec in flight.
    Working,
    /// Flagged unhealthy; will be stopped and replaced.
    Invalid,
    /// Graceful stop requested, waiting for the process to exit.
    Stopping,
    /// Process exited after a graceful stop. Terminal.
    Stopped,
    /// Forced kill dispatched.
    Killing,
    /// Process was killed or exited abnormally. Terminal.
    Errored,
    /// Removed from the pool. Terminal.
    Destroyed,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkerState::Stopped | WorkerState::Errored | WorkerState::Destroyed
        )
    }

    /// Ready or Working: the process is serving the pool.
    pub fn is_active(self) -> bool {
        matches!(self, WorkerState::Ready | WorkerState::Working)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Inactive,
            1 => WorkerState::Ready,
            2 => WorkerState::Working,
            3 => WorkerState::Invalid,
            4 => WorkerState::Stopping,
            5 => WorkerState::Stopped,
            6 => WorkerState::Killing,
            7 => WorkerState::Errored,
            _ => WorkerState::Destroyed,
        }
    }
}

fn legal(from: WorkerState, to: WorkerState) -> bool {
    use WorkerState::*;
    matches!(
        (from, to),
        (Inactive, Ready)
            | (Ready, Working)
            | (Working, Ready)
            | (Ready, Invalid)
            | (Working, Invalid)
            | (Inactive, Stopping)
            | (Ready, Stopping)
            | (Working, Stopping)
            | (Invalid, Stopping)
            | (Stopping, Stopped)
            | (Stopping, Errored)
            | (Inactive, Killing)
            | (Ready, Killing)
            | (Working, Killing)
            | (Invalid, Killing)
            | (Stopping, Killing)
            | (Killing, Errored)
            | (Stopped, Destroyed)
            | (Errored, Destroyed)
    )
}

/// Atomic holder for a [`WorkerState`].
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: WorkerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Attempt the `from -> to` edge. Returns false if the edge is illegal
    /// or another party moved the state first.
    pub fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        if !legal(from, to) {
            return false;
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
