//! Routes inbound frames to pending calls.

use std::sync::Arc;

use mprpc_frame::{decode_frame, Frame, MessageType};
use parking_lot::Mutex;

use crate::error::RpcError;
use crate::pending::PendingCalls;

/// What [`Dispatcher::dispatch`] did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Applied to a pending call.
    Delivered,
    /// No live call with that id; dropped.
    Orphaned,
    /// Undecodable, reserved, or not meant for a client; dropped.
    Ignored,
}

/// Single entry point for inbound frames.
#[derive(Clone)]
pub struct Dispatcher {
    pending: Arc<Mutex<PendingCalls>>,
    max_frame_size: usize,
}

impl Dispatcher {
    pub(crate) fn new(pending: Arc<Mutex<PendingCalls>>, max_frame_size: usize) -> Self {
        Self {
            pending,
            max_frame_size,
        }
    }

    /// Decode one inbound message and dispatch it.
    ///
    /// Protocol errors are logged and the message dropped; they never reach a
    /// call.
    pub fn handle_message(&self, message: &[u8]) -> Dispatch {
        match decode_frame(message, self.max_frame_size) {
            Ok(frame) => self.dispatch(frame),
            Err(err) => {
                tracing::warn!(len = message.len(), error = %err, "dropping undecodable frame");
                Dispatch::Ignored
            }
        }
    }

    pub fn dispatch(&self, frame: Frame) -> Dispatch {
        let kind = frame.message_type();
        let id = frame.id();
        tracing::trace!(id, %kind, "inbound frame");

        match frame {
            Frame::Response { id, error, result } => {
                let popped = self.pending.lock().pop(id);
                let Some(call) = popped else {
                    return orphan(id, kind);
                };
                let applied = match error {
                    Some(message) => {
                        tracing::debug!(id, method = call.method(), error = %message, "call failed");
                        call.fail(RpcError::Remote(message))
                    }
                    None => {
                        tracing::debug!(id, method = call.method(), "call completed");
                        call.complete(result)
                    }
                };
                delivered(applied, id, kind)
            }
            Frame::ResponseStreamChunk { id, chunk } => {
                let found = self.pending.lock().lookup(id);
                let Some(call) = found else {
                    return orphan(id, kind);
                };
                delivered(call.push_chunk(chunk), id, kind)
            }
            Frame::ResponseStreamEnd { id } => {
                let popped = self.pending.lock().pop(id);
                let Some(call) = popped else {
                    return orphan(id, kind);
                };
                tracing::debug!(id, method = call.method(), "response stream ended");
                delivered(call.end_stream(), id, kind)
            }
            Frame::ResponseCancel { id } => {
                tracing::debug!(id, "server acknowledged cancel");
                Dispatch::Ignored
            }
            Frame::Notify { id, .. } => {
                tracing::debug!(id, "ignoring reserved NOTIFY frame");
                Dispatch::Ignored
            }
            Frame::Request { .. }
            | Frame::RequestStreamChunk { .. }
            | Frame::RequestStreamEnd { .. }
            | Frame::RequestCancel { .. } => {
                tracing::warn!(id, %kind, "ignoring client-originated frame from server");
                Dispatch::Ignored
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.pending.lock().len())
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

fn orphan(id: u32, kind: MessageType) -> Dispatch {
    tracing::debug!(id, %kind, "no pending call for frame");
    Dispatch::Orphaned
}

// A call found in the table can still have been cancelled concurrently.
fn delivered(applied: bool, id: u32, kind: MessageType) -> Dispatch {
    if applied {
        Dispatch::Delivered
    } else {
        orphan(id, kind)
    }
}
