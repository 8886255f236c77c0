// packages/engine/src/lib.rs
//! Shoal worker-pool engine
//!
//! Hosts a fleet of external interpreter processes and multiplexes request
//! execution across them. Callers submit an opaque payload; the pool picks a
//! free worker, runs one framed request/reply round-trip on it and returns
//! the worker to service, while a supervisor enforces lifetime, idle,
//! exec-time and memory budgets and replaces misbehaving workers
//! transparently.
//!
//! # Architecture
//!
//! - **ipc**: the consumed frame/relay interface and the control protocol
//! - **worker**: process ownership, lifecycle state machine, allocation
//! - **pool**: checkout/checkin, recycling, the supervisor
//! - **events**: lifecycle and supervisor notifications
//! - **utils**: error taxonomy
//!
//! The byte-level codec, the transports that spawn processes and any config
//! parsing live outside this crate; they are injected as capabilities
//! ([`WorkerFactory`], [`ipc::Relay`], [`Bus`]).

pub mod events;
pub mod ipc;
pub mod pool;
pub mod utils;
pub mod worker;

#[cfg(test)]
pub(crate) mod testkit;

// Re-export commonly used types
pub use events::{Bus, Event, EventKind};
pub use ipc::payload::Payload;
pub use pool::config::{PoolConfig, SupervisorConfig};
pub use pool::worker_pool::{PoolStats, WorkerPool};
pub use utils::errors::{EngineError, Result};
pub use worker::allocator::WorkerFactory;
pub use worker::handle::{Worker, WorkerStats};
pub use worker::state::WorkerState;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
