use std::future::Future;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};
use crate::traits::{MessageSink, MessageSource};

/// Create a connected in-process channel pair.
///
/// Messages sent on one end's sender arrive on the other end's receiver, in
/// order, with boundaries preserved.
pub fn memory_pair() -> (MemoryChannel, MemoryChannel) {
    let (left_tx, right_rx) = mpsc::unbounded_channel();
    let (right_tx, left_rx) = mpsc::unbounded_channel();

    let left = MemoryChannel {
        sender: MemorySender { tx: left_tx },
        receiver: MemoryReceiver { rx: left_rx },
    };
    let right = MemoryChannel {
        sender: MemorySender { tx: right_tx },
        receiver: MemoryReceiver { rx: right_rx },
    };
    (left, right)
}

/// One end of an in-process channel.
#[derive(Debug)]
pub struct MemoryChannel {
    pub sender: MemorySender,
    pub receiver: MemoryReceiver,
}

impl MemoryChannel {
    pub fn split(self) -> (MemorySender, MemoryReceiver) {
        (self.sender, self.receiver)
    }
}

#[derive(Debug, Clone)]
pub struct MemorySender {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl MemorySender {
    /// True once the receiving end has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl MessageSink for MemorySender {
    fn send(&self, message: Bytes) -> Result<()> {
        self.tx.send(message).map_err(|_| TransportError::Closed)
    }
}

#[derive(Debug)]
pub struct MemoryReceiver {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryReceiver {
    /// Take a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Drain every message queued so far.
    pub fn drain(&mut self) -> Vec<Bytes> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Stop accepting messages; subsequent sends on the peer fail with `Closed`.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl MessageSource for MemoryReceiver {
    fn recv(&mut self) -> impl Future<Output = Result<Option<Bytes>>> + Send {
        async move { Ok(self.rx.recv().await) }
    }
}
