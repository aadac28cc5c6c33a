//! Message and source types shared by every adapter.

use std::time::Duration;

/// One raw transport message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Position in the originating stream
    pub offset: u64,
    /// Opaque payload bytes, passed through unchanged
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(offset: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            offset,
            payload: payload.into(),
        }
    }
}

/// Errors returned while waiting for the next message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Nothing arrived within the timeout; the stream is still open
    Timeout,
    /// The stream has ended and will deliver nothing more
    Disconnected,
    /// The source failed and cannot continue
    Io(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Timeout => write!(f, "Timed out waiting for a message"),
            SourceError::Disconnected => write!(f, "Message source disconnected"),
            SourceError::Io(e) => write!(f, "Message source failed: {e}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// An ordered pull source of messages.
///
/// `recv_timeout` is the only place the consume loop blocks.
pub trait MessageSource {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Message, SourceError>;
}

impl<S: MessageSource + ?Sized> MessageSource for Box<S> {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Message, SourceError> {
        (**self).recv_timeout(timeout)
    }
}
