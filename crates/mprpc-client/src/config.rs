use std::time::Duration;

use mprpc_frame::DEFAULT_MAX_FRAME_SIZE;

use crate::pending::MAX_CALL_ID;
use crate::stream::RequestStream;

/// Controls client engine behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Capacity of each call's inbound stream queue. 0 means unbounded.
    pub stream_buffer_size: usize,
    /// Inbound frames larger than this are dropped as protocol errors.
    pub max_frame_size: usize,
    /// Maximum number of calls outstanding at once.
    pub max_pending: usize,
    /// Timeout applied by [`RpcClient::call`](crate::RpcClient::call).
    pub call_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            stream_buffer_size: 0,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_pending: MAX_CALL_ID as usize,
            call_timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn with_stream_buffer_size(mut self, size: usize) -> Self {
        self.stream_buffer_size = size;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Clamped to the id space so id allocation always finds a free id.
    pub fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending = max.min(MAX_CALL_ID as usize);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}

/// Per-call options for [`RpcClient::invoke_with`](crate::RpcClient::invoke_with).
#[derive(Default)]
pub struct InvokeOptions {
    pub(crate) request_stream: Option<RequestStream>,
    pub(crate) stream_buffer_size: Option<usize>,
}

impl InvokeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream argument chunks to the server after the request.
    pub fn request_stream(mut self, stream: impl Into<RequestStream>) -> Self {
        self.request_stream = Some(stream.into());
        self
    }

    /// Override the client's inbound stream capacity for this call.
    pub fn stream_buffer_size(mut self, size: usize) -> Self {
        self.stream_buffer_size = Some(size);
        self
    }
}

impl std::fmt::Debug for InvokeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvokeOptions")
            .field("request_stream", &self.request_stream.is_some())
            .field("stream_buffer_size", &self.stream_buffer_size)
            .finish()
    }
}
