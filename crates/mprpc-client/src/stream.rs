use std::sync::Arc;

use futures_core::Stream;
use futures_util::stream::{BoxStream, StreamExt};
use rmpv::Value;

use crate::error::{Result, RpcError};
use crate::queue::MessageQueue;

/// Reader over a call's inbound chunks.
#[derive(Debug, Clone)]
pub struct ResponseStream {
    queue: Arc<MessageQueue<Value>>,
}

impl ResponseStream {
    pub(crate) fn new(queue: Arc<MessageQueue<Value>>) -> Self {
        Self { queue }
    }

    /// Next chunk; `None` after the server ends the stream.
    pub async fn next(&mut self) -> Option<Result<Value>> {
        self.queue.next().await
    }

    /// Items buffered and not yet read, counting a queued end marker.
    pub fn buffered(&self) -> usize {
        self.queue.len()
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Value>> + Send + 'static {
        self.queue.into_stream()
    }

    /// Read chunks until the stream ends, stopping at the first error.
    pub async fn collect(mut self) -> Result<Vec<Value>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next().await {
            chunks.push(chunk?);
        }
        Ok(chunks)
    }
}

/// Argument chunks sent to the server after a request.
pub struct RequestStream {
    source: Source,
}

enum Source {
    Iter(Box<dyn Iterator<Item = Value> + Send>),
    Stream(BoxStream<'static, Value>),
    Queue(Arc<MessageQueue<Value>>),
}

pub(crate) enum Drain {
    /// Sent inline before `invoke` returns.
    Sync(Box<dyn Iterator<Item = Value> + Send>),
    /// Sent from a spawned task.
    Async(BoxStream<'static, Result<Value>>),
}

impl RequestStream {
    /// Chunks available up front; sent before `invoke` returns.
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: Send + 'static,
    {
        Self {
            source: Source::Iter(Box::new(chunks.into_iter())),
        }
    }

    /// Chunks produced asynchronously.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Value> + Send + 'static,
    {
        Self {
            source: Source::Stream(stream.boxed()),
        }
    }

    /// Chunks the caller pushes after invoking; [`MessageQueue::close`] sends
    /// the stream end.
    pub fn from_queue(queue: Arc<MessageQueue<Value>>) -> Self {
        Self {
            source: Source::Queue(queue),
        }
    }

    pub fn is_async(&self) -> bool {
        !matches!(self.source, Source::Iter(_))
    }

    pub(crate) fn into_drain(self) -> Drain {
        match self.source {
            Source::Iter(iter) => Drain::Sync(iter),
            Source::Stream(stream) => Drain::Async(stream.map(Ok::<_, RpcError>).boxed()),
            Source::Queue(queue) => Drain::Async(queue.into_stream().boxed()),
        }
    }
}

impl From<Vec<Value>> for RequestStream {
    fn from(chunks: Vec<Value>) -> Self {
        Self::from_chunks(chunks)
    }
}

impl From<Arc<MessageQueue<Value>>> for RequestStream {
    fn from(queue: Arc<MessageQueue<Value>>) -> Self {
        Self::from_queue(queue)
    }
}

impl std::fmt::Debug for RequestStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.source {
            Source::Iter(_) => "iter",
            Source::Stream(_) => "stream",
            Source::Queue(_) => "queue",
        };
        f.debug_struct("RequestStream").field("source", &kind).finish()
    }
}
