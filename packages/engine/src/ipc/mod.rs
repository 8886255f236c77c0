// packages/engine/src/ipc/mod.rs
//! IPC surface consumed by the pool
//!
//! The byte-level codec and the transports that produce relays live outside
//! this crate; what the pool consumes is the [`Frame`] interface, the
//! [`Relay`] capability and the two-document control protocol.

pub mod frame;
pub mod payload;
pub mod protocol;
pub mod relay;

pub use frame::Frame;
pub use payload::Payload;
pub use relay::{Relay, RelayError};
