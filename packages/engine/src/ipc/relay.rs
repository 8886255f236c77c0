// packages/engine/src/ipc/relay.rs
//! Relay capability: a bidirectional frame channel to one worker process
//!
//! Each worker exclusively owns its relay. The only component allowed to
//! touch it besides the current exec holder is the supervisor, which closes
//! it to preempt an exec that blew its wall-time budget.

use async_trait::async_trait;
use thiserror::Error;

use super::frame::Frame;

/// Transport-level failures surfaced by a relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay i/o error: {0}")]
    Io(String),

    /// The received frame header failed its CRC check.
    #[error("frame header CRC mismatch")]
    CrcMismatch,

    /// The relay was closed, locally or by the peer.
    #[error("relay closed")]
    Closed,

    /// Payload length does not fit the frame header.
    #[error("payload exceeds the 4 GiB frame limit")]
    PayloadTooLarge,

    /// A control frame was malformed or arrived where data was expected.
    #[error("invalid control frame: {0}")]
    InvalidControl(String),
}

impl RelayError {
    /// Whether the error means the byte channel itself is gone, as opposed
    /// to a single bad frame.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, RelayError::Io(_) | RelayError::Closed)
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Io(err.to_string())
    }
}

/// Bidirectional framed channel between the host and one worker process.
///
/// `close` must be idempotent and must unblock a pending `receive` with
/// [`RelayError::Closed`]; the supervisor relies on this to cancel an
/// in-flight exec from under its caller.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Write one frame to the worker.
    async fn send(&self, frame: Frame) -> std::result::Result<(), RelayError>;

    /// Read exactly one frame from the worker.
    async fn receive(&self) -> std::result::Result<Frame, RelayError>;

    /// Tear the channel down. Idempotent.
    fn close(&self);
}
