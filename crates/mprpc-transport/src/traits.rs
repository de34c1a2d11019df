use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;

/// Outbound half of a message channel.
///
/// `send` hands off one complete message and returns without waiting for the
/// peer. Implementations queue the message for a writer, so it is safe to
/// call from synchronous code such as cancellation.
pub trait MessageSink: Send + Sync + 'static {
    /// Queue one complete message for delivery.
    fn send(&self, message: Bytes) -> Result<()>;
}

impl<S: MessageSink + ?Sized> MessageSink for Arc<S> {
    fn send(&self, message: Bytes) -> Result<()> {
        (**self).send(message)
    }
}

impl<S: MessageSink + ?Sized> MessageSink for Box<S> {
    fn send(&self, message: Bytes) -> Result<()> {
        (**self).send(message)
    }
}

/// Inbound half of a message channel.
///
/// Every item is one complete message. `Ok(None)` means the peer closed the
/// channel cleanly.
pub trait MessageSource: Send {
    /// Wait for the next complete message.
    fn recv(&mut self) -> impl Future<Output = Result<Option<Bytes>>> + Send;
}
