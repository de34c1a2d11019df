//! The RPC client engine.
//!
//! [`RpcClient`] owns the pending call table and an outbound [`MessageSink`].
//! Inbound messages are fed in either by the embedder
//! ([`RpcClient::handle_message`]) or by a reader loop over a
//! [`MessageSource`] ([`RpcClient::run`]).

use std::sync::Arc;

use futures_util::stream::{BoxStream, StreamExt};
use mprpc_frame::{Frame, Value};
use mprpc_transport::{MessageSink, MessageSource, TransportError};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use crate::call::{decode_value, Call, CallHandle};
use crate::config::{ClientConfig, InvokeOptions};
use crate::dispatcher::{Dispatch, Dispatcher};
use crate::error::{Result, RpcError};
use crate::pending::PendingCalls;
use crate::stream::Drain;

pub(crate) struct ClientShared {
    pending: Arc<Mutex<PendingCalls>>,
    sink: Box<dyn MessageSink>,
    config: ClientConfig,
}

/// Multiplexes calls over one message channel. Cheap to clone.
#[derive(Clone)]
pub struct RpcClient {
    shared: Arc<ClientShared>,
    dispatcher: Dispatcher,
}

impl RpcClient {
    pub fn new(sink: impl MessageSink) -> Self {
        Self::with_config(sink, ClientConfig::default())
    }

    pub fn with_config(sink: impl MessageSink, config: ClientConfig) -> Self {
        let pending = Arc::new(Mutex::new(PendingCalls::new()));
        let dispatcher = Dispatcher::new(Arc::clone(&pending), config.max_frame_size);
        Self {
            shared: Arc::new(ClientShared {
                pending,
                sink: Box::new(sink),
                config,
            }),
            dispatcher,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Start a call with no request stream.
    pub fn invoke(&self, method: &str, params: Vec<Value>) -> Result<CallHandle> {
        self.invoke_with(method, params, InvokeOptions::default())
    }

    /// Start a call.
    ///
    /// The call is registered before REQUEST is sent, so a response can never
    /// race ahead of it. Request stream chunks from an iterator are sent
    /// before this returns; asynchronous sources are drained on a spawned
    /// task and require a tokio runtime.
    pub fn invoke_with(
        &self,
        method: &str,
        params: Vec<Value>,
        options: InvokeOptions,
    ) -> Result<CallHandle> {
        let drain = options.request_stream.map(|stream| stream.into_drain());
        if matches!(drain, Some(Drain::Async(_)))
            && tokio::runtime::Handle::try_current().is_err()
        {
            return Err(RpcError::NoRuntime);
        }

        let capacity = options
            .stream_buffer_size
            .unwrap_or(self.shared.config.stream_buffer_size);
        let (call, outcome) = {
            let mut pending = self.shared.pending.lock();
            let max = self.shared.config.max_pending;
            if pending.len() >= max {
                return Err(RpcError::TooManyPending(max));
            }
            let id = pending.next_id();
            let (call, outcome) = Call::with_outcome(id, method, capacity);
            let call = Arc::new(call);
            pending.insert(Arc::clone(&call));
            (call, outcome)
        };
        let id = call.id();
        tracing::debug!(id, method, params = params.len(), "invoking");

        let request = Frame::Request {
            id,
            method: method.to_owned(),
            params,
        };
        if let Err(err) = self.shared.send_frame(&request) {
            self.shared.pending.lock().remove(&call);
            tracing::warn!(id, method, error = %err, "failed to send request");
            return Err(err);
        }

        match drain {
            None => {}
            Some(Drain::Sync(chunks)) => self.shared.drain_sync(&call, chunks),
            Some(Drain::Async(chunks)) => {
                let shared = Arc::clone(&self.shared);
                let call = Arc::clone(&call);
                tokio::spawn(async move { shared.drain_async(&call, chunks).await });
            }
        }

        Ok(CallHandle::new(Arc::clone(&self.shared), call, outcome))
    }

    /// Invoke and deserialize the unary result.
    ///
    /// Applies [`ClientConfig::call_timeout`] when set.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let handle = self.invoke(method, params)?;
        let value = match self.shared.config.call_timeout {
            Some(timeout) => handle.result_timeout(timeout).await?,
            None => handle.result().await?,
        };
        decode_value(value.unwrap_or(Value::Nil))
    }

    /// Cancel a pending call by id.
    ///
    /// Same as [`CallHandle::cancel`]; false if no such call is pending.
    pub fn cancel(&self, id: u32) -> bool {
        let found = self.shared.pending.lock().lookup(id);
        match found {
            Some(call) => self.shared.cancel_call(&call),
            None => false,
        }
    }

    /// Feed one inbound message to the dispatcher.
    pub fn handle_message(&self, message: &[u8]) -> Dispatch {
        self.dispatcher.handle_message(message)
    }

    /// A dispatcher sharing this client's pending table.
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Dispatch messages from `source` until it closes.
    ///
    /// Every call still pending when the loop ends fails with
    /// [`RpcError::Disconnected`].
    pub async fn run<S: MessageSource>(&self, mut source: S) -> mprpc_transport::Result<()> {
        let result = loop {
            match source.recv().await {
                Ok(Some(message)) => {
                    self.dispatcher.handle_message(&message);
                }
                Ok(None) => {
                    tracing::debug!("inbound channel closed");
                    break Ok(());
                }
                Err(err) => {
                    tracing::warn!(error = %err, "inbound channel failed");
                    break Err(err);
                }
            }
        };
        self.connection_lost();
        result
    }

    /// Run [`run`](Self::run) on a spawned task.
    pub fn spawn_reader<S>(&self, source: S) -> JoinHandle<std::result::Result<(), TransportError>>
    where
        S: MessageSource + 'static,
    {
        let client = self.clone();
        tokio::spawn(async move { client.run(source).await })
    }

    /// Fail every pending call with [`RpcError::Disconnected`].
    ///
    /// Returns the number of calls failed.
    pub fn connection_lost(&self) -> usize {
        let calls = self.shared.pending.lock().drain();
        let mut failed = 0;
        for call in &calls {
            if call.fail(RpcError::Disconnected) {
                failed += 1;
            }
        }
        if failed > 0 {
            tracing::debug!(failed, "failed pending calls after disconnect");
        }
        failed
    }

    /// Ids of calls awaiting a terminal frame, ascending.
    pub fn pending_ids(&self) -> Vec<u32> {
        self.shared.pending.lock().ids()
    }

    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("pending", &self.pending_len())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl ClientShared {
    fn send_frame(&self, frame: &Frame) -> Result<()> {
        let message = frame.encode()?;
        tracing::trace!(
            id = frame.id(),
            kind = %frame.message_type(),
            len = message.len(),
            "outbound frame"
        );
        self.sink.send(message)?;
        Ok(())
    }

    /// Cancel locally, forget the call, and tell the server.
    pub(crate) fn cancel_call(&self, call: &Call) -> bool {
        if !call.cancel() {
            return false;
        }
        let id = call.id();
        self.pending.lock().remove(call);
        tracing::debug!(id, method = call.method(), "call cancelled");

        if let Err(err) = self.send_frame(&Frame::RequestCancel { id }) {
            tracing::warn!(id, error = %err, "failed to send cancel");
        }
        true
    }

    fn fail_call(&self, call: &Call, err: RpcError) {
        self.pending.lock().remove(call);
        call.fail(err);
    }

    fn drain_sync(&self, call: &Call, chunks: Box<dyn Iterator<Item = Value> + Send>) {
        for chunk in chunks {
            if !self.send_chunk(call, chunk) {
                return;
            }
        }
        self.send_end(call);
    }

    // Returns as soon as the call is terminal, dropping the producer even if
    // it never yields again.
    async fn drain_async(&self, call: &Call, mut chunks: BoxStream<'static, Result<Value>>) {
        loop {
            let next = tokio::select! {
                biased;
                () = call.terminated() => {
                    tracing::debug!(
                        id = call.id(),
                        state = %call.state(),
                        "call finished, request stream abandoned"
                    );
                    return;
                }
                next = chunks.next() => next,
            };
            match next {
                None => break,
                Some(Ok(chunk)) => {
                    if !self.send_chunk(call, chunk) {
                        return;
                    }
                }
                Some(Err(err)) => {
                    tracing::warn!(
                        id = call.id(),
                        error = %err,
                        "request stream failed, cancelling call"
                    );
                    self.cancel_call(call);
                    return;
                }
            }
        }
        self.send_end(call);
    }

    // False once draining should stop.
    fn send_chunk(&self, call: &Call, chunk: Value) -> bool {
        let id = call.id();
        if call.is_terminal() {
            tracing::debug!(
                id,
                state = %call.state(),
                "call finished, request stream abandoned"
            );
            return false;
        }
        match self.send_frame(&Frame::RequestStreamChunk { id, chunk }) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(id, error = %err, "failed to send request chunk");
                self.fail_call(call, err);
                false
            }
        }
    }

    fn send_end(&self, call: &Call) {
        let id = call.id();
        if call.is_terminal() {
            return;
        }
        if let Err(err) = self.send_frame(&Frame::RequestStreamEnd { id }) {
            tracing::warn!(id, error = %err, "failed to send request stream end");
            self.fail_call(call, err);
        }
    }
}
