//! MessagePack wire frames for the mprpc streaming RPC protocol.
//!
//! Every frame is a MessagePack array whose first two fields are the message
//! type and the call id:
//! - `[0, id, method, params]` starts a call
//! - `[1, id, error, result]` finishes it
//! - chunk / end / cancel frames carry streams and cancellation
//!
//! The transport delivers one complete frame per message, so frames carry no
//! length prefix of their own.

pub mod codec;
pub mod error;
pub mod kind;

pub use codec::{decode_frame, encode_frame, Frame, DEFAULT_MAX_FRAME_SIZE};
pub use error::{FrameError, Result};
pub use kind::MessageType;

/// Dynamic MessagePack value used for params, results and chunks.
pub use rmpv::Value;
