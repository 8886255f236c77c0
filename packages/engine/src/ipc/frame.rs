// packages/engine/src/ipc/frame.rs
//! Frame interface consumed from the IPC codec
//!
//! A frame is the unit the relay carries: a small header (version, flags,
//! payload length) plus an opaque payload. Data frames carry a request or
//! reply split into two byte ranges (context and body); control frames carry
//! a small JSON document. The byte-level encoding and CRC live in the relay
//! implementation; a corrupt header surfaces as `RelayError::CrcMismatch`
//! from `Relay::receive`.

/// Current protocol version.
pub const VERSION_1: u8 = 1;

/// Header flag bits.
pub mod flags {
    /// The frame payload is a control document, not request data.
    pub const CONTROL: u8 = 0x04;
}

/// Payload length travels as a u32, so a frame tops out at 4 GiB.
pub const MAX_PAYLOAD: u64 = u32::MAX as u64;

/// One framed IPC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    version: u8,
    flags: u8,
    context_len: u32,
    payload: Vec<u8>,
}

impl Frame {
    /// Build a control frame carrying a small document.
    pub fn control(payload: Vec<u8>) -> Self {
        Self {
            version: VERSION_1,
            flags: flags::CONTROL,
            context_len: 0,
            payload,
        }
    }

    /// Build a data frame from a context/body pair. The context length is
    /// carried in the header so the receiver can split the payload back.
    pub fn data(context: &[u8], body: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(context.len() + body.len());
        payload.extend_from_slice(context);
        payload.extend_from_slice(body);
        Self {
            version: VERSION_1,
            flags: 0,
            context_len: context.len() as u32,
            payload,
        }
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn is_control(&self) -> bool {
        self.flags & flags::CONTROL != 0
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_len(&self) -> u32 {
        self.payload.len() as u32
    }

    /// Split a data frame payload back into (context, body).
    pub fn split(mut self) -> (Vec<u8>, Vec<u8>) {
        let cut = (self.context_len as usize).min(self.payload.len());
        let body = self.payload.split_off(cut);
        (self.payload, body)
    }
}
