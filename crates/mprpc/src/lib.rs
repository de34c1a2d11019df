//! Streaming MessagePack RPC over a single message-oriented connection.
//!
//! mprpc multiplexes unary calls, server-to-client result streams,
//! client-to-server argument streams, and cancellation over one connection,
//! with every message a compact MessagePack tuple.
//!
//! # Crate Structure
//!
//! - [`transport`]: Message channels (in-process pair, Unix domain sockets)
//! - [`frame`]: Wire frames and their MessagePack codec
//! - [`client`]: The call engine: pending calls, stream queues, dispatch

/// Re-export transport types.
pub mod transport {
    pub use mprpc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use mprpc_frame::*;
}

/// Re-export client engine types.
pub mod client {
    pub use mprpc_client::*;
}

pub use mprpc_client::{
    CallHandle, ClientConfig, InvokeOptions, RequestStream, ResponseStream, RpcClient, RpcError,
    Value,
};
