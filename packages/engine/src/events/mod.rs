// packages/engine/src/events/mod.rs
//! Runtime events: types and broadcast bus
//!
//! Publishers: the pool (worker lifecycle) and the supervisor (budget
//! enforcement). Consumers subscribe through [`Bus::subscribe`]; tests use
//! the same path to assert which rules fired.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
