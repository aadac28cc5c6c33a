//! In-process message sources.

use crate::source::types::{Message, MessageSource, SourceError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Producer half of a channel source; assigns offsets in send order.
#[derive(Debug, Clone)]
pub struct MessageSender {
    sender: Sender<Message>,
}

impl MessageSender {
    /// Send a message, blocking while the channel is full.
    ///
    /// Returns `false` once the consuming side has been dropped.
    pub fn send(&self, message: Message) -> bool {
        self.sender.send(message).is_ok()
    }
}

/// Consumer half backed by a bounded crossbeam channel.
#[derive(Debug)]
pub struct ChannelSource {
    receiver: Receiver<Message>,
}

impl ChannelSource {
    pub fn new(receiver: Receiver<Message>) -> Self {
        Self { receiver }
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    /// Number of messages waiting.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl MessageSource for ChannelSource {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Message, SourceError> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => SourceError::Timeout,
            RecvTimeoutError::Disconnected => SourceError::Disconnected,
        })
    }
}

/// Create a bounded channel source.
pub fn channel_source(capacity: usize) -> (MessageSender, ChannelSource) {
    let (sender, receiver) = bounded(capacity);
    (MessageSender { sender }, ChannelSource::new(receiver))
}

/// Source over a finite sequence of payloads; disconnects when exhausted.
#[derive(Debug)]
pub struct IterSource<I> {
    payloads: I,
    next_offset: u64,
}

impl<I> IterSource<I>
where
    I: Iterator,
    I::Item: Into<Vec<u8>>,
{
    pub fn new(payloads: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            payloads: payloads.into_iter(),
            next_offset: 0,
        }
    }
}

impl<I> MessageSource for IterSource<I>
where
    I: Iterator,
    I::Item: Into<Vec<u8>>,
{
    fn recv_timeout(&mut self, _timeout: Duration) -> Result<Message, SourceError> {
        let payload = self.payloads.next().ok_or(SourceError::Disconnected)?;
        let message = Message::new(self.next_offset, payload);
        self.next_offset += 1;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_source_delivers_in_order() {
        let (sender, mut source) = channel_source(4);
        assert!(sender.send(Message::new(0, "a")));
        assert!(sender.send(Message::new(1, "b")));
        assert_eq!(source.pending(), 2);

        let first = source.recv_timeout(Duration::from_millis(10)).unwrap();
        let second = source.recv_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(first.payload, b"a");
        assert_eq!(second.offset, 1);
    }

    #[test]
    fn test_channel_source_timeout_and_disconnect() {
        let (sender, mut source) = channel_source(1);
        assert_eq!(
            source.recv_timeout(Duration::from_millis(5)),
            Err(SourceError::Timeout)
        );
        drop(sender);
        assert_eq!(
            source.recv_timeout(Duration::from_millis(5)),
            Err(SourceError::Disconnected)
        );
    }

    #[test]
    fn test_sender_reports_dropped_consumer() {
        let (sender, source) = channel_source(1);
        drop(source);
        assert!(!sender.send(Message::new(0, "x")));
    }

    #[test]
    fn test_iter_source_assigns_offsets() {
        let mut source = IterSource::new(vec!["one", "two"]);
        assert_eq!(source.recv_timeout(Duration::ZERO).unwrap().offset, 0);
        assert_eq!(source.recv_timeout(Duration::ZERO).unwrap().offset, 1);
        assert_eq!(
            source.recv_timeout(Duration::ZERO),
            Err(SourceError::Disconnected)
        );
    }
}
