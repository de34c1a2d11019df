use std::sync::Arc;
use std::time::Duration;

use mprpc_transport::TransportError;

/// Errors surfaced to RPC callers.
///
/// Cloneable so one failure can reach both a call's result and its stream.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// The server reported a failure for this call.
    #[error("remote error: {0}")]
    Remote(String),

    /// The call was cancelled by the client.
    #[error("cancelled by client")]
    Cancelled,

    /// A frame could not be sent.
    #[error("transport error: {0}")]
    Transport(#[source] Arc<TransportError>),

    /// A frame could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] mprpc_frame::FrameError),

    /// The inbound channel ended while the call was outstanding.
    #[error("connection closed before the call finished")]
    Disconnected,

    /// No result arrived in time; the call has been cancelled.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The pending call table is full.
    #[error("too many pending calls (max {0})")]
    TooManyPending(usize),

    /// An asynchronous request stream needs a tokio runtime to drain it.
    #[error("no tokio runtime available to drain the request stream")]
    NoRuntime,

    /// A result could not be converted to the requested type.
    #[error("result decode failed: {0}")]
    Decode(String),
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        Self::Transport(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
