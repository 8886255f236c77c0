// packages/engine/src/worker/mod.rs
//! Worker processes and their lifecycle
//!
//! - **state**: atomic lifecycle state machine
//! - **process**: process-handle capability and the OS-backed implementation
//! - **handle**: the worker itself (exec, stop, kill, wait, stats)
//! - **allocator**: factory invocation, pid handshake, retry backoff

pub mod allocator;
pub mod handle;
pub mod process;
pub mod state;

pub use allocator::{Allocator, WorkerFactory};
pub use handle::{StopOutcome, Worker, WorkerStats};
pub use process::{ExitOutcome, OsProcess, ProcessHandle};
pub use state::{StateCell, WorkerState};
