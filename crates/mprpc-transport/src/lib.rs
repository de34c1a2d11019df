//! Message-oriented duplex channels for mprpc.
//!
//! The RPC engine only needs two things from a connection:
//! - a way to hand off one complete outbound message ([`MessageSink`])
//! - a source of complete inbound messages ([`MessageSource`])
//!
//! This crate provides both halves for an in-process pair (tests, embedding)
//! and for Unix domain sockets, where each message travels inside a small
//! length-prefixed envelope ([`MessageCodec`]).

pub mod codec;
pub mod error;
pub mod memory;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use codec::{
    decode_message, encode_message, MessageCodec, DEFAULT_MAX_MESSAGE, HEADER_SIZE, MAGIC,
};
pub use error::{Result, TransportError};
pub use memory::{memory_pair, MemoryChannel, MemoryReceiver, MemorySender};
pub use traits::{MessageSink, MessageSource};
