//! Streaming RPC client engine.
//!
//! Multiplexes unary calls, server-to-client result streams,
//! client-to-server argument streams, and cancellation over one
//! message-oriented connection.
//!
//! ```no_run
//! # async fn demo() -> mprpc_client::Result<()> {
//! use mprpc_client::{RpcClient, Value};
//! use mprpc_transport::memory_pair;
//!
//! let (local, _remote) = memory_pair();
//! let (sender, receiver) = local.split();
//! let client = RpcClient::new(sender);
//! client.spawn_reader(receiver);
//!
//! let sum = client.invoke("add", vec![Value::from(2), Value::from(3)])?.await?;
//!
//! let mut count = client.invoke("count", vec![Value::from(3)])?.stream();
//! while let Some(n) = count.next().await {
//!     println!("{}", n?);
//! }
//! # let _ = sum;
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod pending;
pub mod queue;
pub mod stream;

pub use call::{Call, CallHandle, CallState};
pub use client::RpcClient;
pub use config::{ClientConfig, InvokeOptions};
pub use dispatcher::{Dispatch, Dispatcher};
pub use error::{Result, RpcError};
pub use pending::{PendingCalls, MAX_CALL_ID};
pub use queue::{MessageQueue, PutOutcome, QueueItem};
pub use stream::{RequestStream, ResponseStream};

pub use mprpc_frame::Value;
