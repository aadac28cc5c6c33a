//! Ordered message sources feeding the aggregation engine.
//!
//! The broker itself is out of scope; these adapters only present an
//! ordered, possibly redelivering stream of raw payloads behind
//! [`MessageSource`].

pub mod channel;
pub mod replay;
pub mod types;

// Re-export commonly used types
pub use channel::{channel_source, ChannelSource, IterSource, MessageSender};
pub use replay::{JsonlReplayer, ReplayConfig, ReplayHandle, ReplayStats};
pub use types::{Message, MessageSource, SourceError};
