// packages/engine/src/ipc/payload.rs
//! Request/reply payload carried over data frames

/// An opaque request or reply: a context byte range (metadata the worker
/// runtime interprets) and a body byte range (the actual job input/output).
/// One payload travels in exactly one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub context: Vec<u8>,
    pub body: Vec<u8>,
}

impl Payload {
    pub fn new(context: impl Into<Vec<u8>>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            context: context.into(),
            body: body.into(),
        }
    }

    /// Payload with an empty context.
    pub fn from_body(body: impl Into<Vec<u8>>) -> Self {
        Self::new(Vec::new(), body)
    }

    /// Total number of bytes across context and body.
    pub fn len(&self) -> usize {
        self.context.len() + self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.context.is_empty() && self.body.is_empty()
    }
}
