// packages/engine/src/pool/mod.rs
//! Worker pool and its supervisor
//!
//! - **config**: pool and supervisor budgets
//! - **worker_pool**: checkout, execution, recycling, teardown
//! - **supervisor**: periodic TTL / idle / exec-time / memory enforcement

pub mod config;
pub mod supervisor;
pub mod worker_pool;

pub use config::{PoolConfig, SupervisorConfig};
pub use worker_pool::{PoolStats, WorkerPool};
