//! Per-call state and the caller-facing handle.
//!
//! A [`Call`] is shared between the pending table (where the dispatcher finds
//! it) and the [`CallHandle`] returned to the caller. Every transition is
//! decided under the call's own lock, so a call reaches a terminal state once.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rmpv::Value;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::client::ClientShared;
use crate::error::{Result, RpcError};
use crate::queue::{MessageQueue, QueueItem};
use crate::stream::ResponseStream;

type Outcome = Result<Option<Value>>;

/// Lifecycle of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    /// Request sent, nothing received yet.
    Pending,
    /// At least one response chunk has arrived.
    StreamingResponse,
    Completed,
    Failed,
    Cancelled,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::StreamingResponse => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub struct Call {
    id: u32,
    method: String,
    stream_capacity: usize,
    // fired by the first terminal transition
    done: CancellationToken,
    inner: Mutex<CallInner>,
}

struct CallInner {
    state: CallState,
    resolver: Option<oneshot::Sender<Outcome>>,
    stream: Option<Arc<MessageQueue<Value>>>,
    failure: Option<RpcError>,
}

impl Call {
    /// `stream_capacity` sizes the inbound stream queue; 0 means unbounded.
    pub fn new(id: u32, method: impl Into<String>, stream_capacity: usize) -> Self {
        Self::with_outcome(id, method, stream_capacity).0
    }

    /// Like [`new`](Self::new), also returning the receiver of the unary
    /// outcome.
    pub(crate) fn with_outcome(
        id: u32,
        method: impl Into<String>,
        stream_capacity: usize,
    ) -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let call = Self {
            id,
            method: method.into(),
            stream_capacity,
            done: CancellationToken::new(),
            inner: Mutex::new(CallInner {
                state: CallState::Pending,
                resolver: Some(tx),
                stream: None,
                failure: None,
            }),
        };
        (call, rx)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn state(&self) -> CallState {
        self.inner.lock().state
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == CallState::Cancelled
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Resolves once the call has completed, failed, or been cancelled.
    pub async fn terminated(&self) {
        self.done.cancelled().await
    }

    /// Resolve with a unary result, closing any active stream.
    ///
    /// Returns false if the call had already reached a terminal state.
    pub fn complete(&self, result: Value) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = CallState::Completed;
        self.done.cancel();
        if let Some(stream) = &inner.stream {
            stream.close();
        }
        inner.resolve(Ok(Some(result)));
        true
    }

    /// Reject the call and deliver the error to an active stream.
    pub fn fail(&self, err: RpcError) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = CallState::Failed;
        self.done.cancel();
        if let Some(stream) = &inner.stream {
            stream.fail(err.clone());
        }
        inner.failure = Some(err.clone());
        inner.resolve(Err(err));
        true
    }

    /// Forced-push one response chunk, creating the stream if needed.
    pub fn push_chunk(&self, chunk: Value) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = CallState::StreamingResponse;
        let capacity = self.stream_capacity;
        let stream = inner
            .stream
            .get_or_insert_with(|| Arc::new(MessageQueue::new(capacity)));
        stream.put(QueueItem::Value(chunk), true);
        true
    }

    /// Terminate the response stream and resolve with no value.
    pub fn end_stream(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = CallState::Completed;
        self.done.cancel();
        if let Some(stream) = &inner.stream {
            stream.close();
        }
        inner.resolve(Ok(None));
        true
    }

    /// Mark the call cancelled locally.
    ///
    /// Stream consumers see [`RpcError::Cancelled`]; the unary outcome
    /// resolves with no value. Returns false if there was nothing to cancel.
    pub fn cancel(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = CallState::Cancelled;
        self.done.cancel();
        if let Some(stream) = &inner.stream {
            stream.fail(RpcError::Cancelled);
        }
        inner.resolve(Ok(None));
        true
    }

    /// The inbound stream, created on first request.
    ///
    /// A stream first requested after the call ended is already terminated
    /// the way the call ended.
    pub fn stream(&self) -> Arc<MessageQueue<Value>> {
        let mut inner = self.inner.lock();
        if let Some(stream) = &inner.stream {
            return Arc::clone(stream);
        }

        let stream = Arc::new(MessageQueue::new(self.stream_capacity));
        match inner.state {
            CallState::Pending | CallState::StreamingResponse => {}
            CallState::Completed => stream.close(),
            CallState::Failed => {
                let err = inner.failure.clone().unwrap_or(RpcError::Disconnected);
                stream.fail(err);
            }
            CallState::Cancelled => stream.fail(RpcError::Cancelled),
        }
        inner.stream = Some(Arc::clone(&stream));
        stream
    }
}

impl CallInner {
    fn resolve(&mut self, outcome: Outcome) {
        if let Some(tx) = self.resolver.take() {
            // receiver gone: nobody is awaiting the handle
            let _ = tx.send(outcome);
        }
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("state", &inner.state)
            .field("has_stream", &inner.stream.is_some())
            .finish()
    }
}

/// Handle to one in-flight call.
///
/// Await it (or call [`result`](Self::result)) for the unary result, or
/// iterate [`stream`](Self::stream) for streamed chunks. Dropping the handle
/// does not cancel the call.
///
/// Response chunks are buffered whether or not anyone reads the stream, so
/// awaiting only the unary result of a streaming method holds every chunk in
/// memory until the stream ends.
pub struct CallHandle {
    client: Arc<ClientShared>,
    call: Arc<Call>,
    outcome: oneshot::Receiver<Outcome>,
}

impl CallHandle {
    pub(crate) fn new(
        client: Arc<ClientShared>,
        call: Arc<Call>,
        outcome: oneshot::Receiver<Outcome>,
    ) -> Self {
        Self {
            client,
            call,
            outcome,
        }
    }

    pub fn id(&self) -> u32 {
        self.call.id()
    }

    pub fn method(&self) -> &str {
        self.call.method()
    }

    pub fn state(&self) -> CallState {
        self.call.state()
    }

    pub fn is_cancelled(&self) -> bool {
        self.call.is_cancelled()
    }

    /// The inbound response stream.
    ///
    /// Every call to this returns a reader over the same queue.
    pub fn stream(&self) -> ResponseStream {
        ResponseStream::new(self.call.stream())
    }

    /// Cancel the call and notify the server.
    ///
    /// Returns true if this invocation did the cancelling; repeated calls and
    /// calls on finished calls do nothing.
    pub fn cancel(&self) -> bool {
        self.client.cancel_call(&self.call)
    }

    /// Wait for the unary result.
    ///
    /// `Ok(None)` for calls finished by a stream end or cancelled by the
    /// client.
    pub async fn result(self) -> Result<Option<Value>> {
        self.outcome.await.unwrap_or(Err(RpcError::Disconnected))
    }

    /// Like [`result`](Self::result), cancelling the call if nothing arrives
    /// within `timeout`.
    pub async fn result_timeout(mut self, timeout: Duration) -> Result<Option<Value>> {
        match tokio::time::timeout(timeout, &mut self.outcome).await {
            Ok(outcome) => outcome.unwrap_or(Err(RpcError::Disconnected)),
            Err(_) => {
                if self.cancel() {
                    tracing::debug!(
                        id = self.id(),
                        method = self.method(),
                        ?timeout,
                        "call timed out"
                    );
                    return Err(RpcError::Timeout(timeout));
                }
                // finished while the timer fired
                match self.outcome.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(RpcError::Timeout(timeout)),
                }
            }
        }
    }

    /// Wait for the result and deserialize it. A missing result decodes from nil.
    pub async fn result_as<T: DeserializeOwned>(self) -> Result<T> {
        let value = self.result().await?.unwrap_or(Value::Nil);
        decode_value(value)
    }
}

pub(crate) fn decode_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    rmpv::ext::from_value(value).map_err(|err| RpcError::Decode(err.to_string()))
}

impl IntoFuture for CallHandle {
    type Output = Result<Option<Value>>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.result())
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle").field("call", &self.call).finish()
    }
}
