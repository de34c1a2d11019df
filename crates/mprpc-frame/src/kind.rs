//! Message type tags.
//!
//! Stream and cancel kinds come in pairs; the `REQUEST_`/`RESPONSE_` prefix
//! names the side that sends them.

use crate::error::FrameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Response = 1,
    /// Reserved; not produced or consumed by the client engine.
    Notify = 2,
    RequestStreamChunk = 3,
    ResponseStreamChunk = 4,
    RequestStreamEnd = 5,
    ResponseStreamEnd = 6,
    RequestCancel = 7,
    ResponseCancel = 8,
}

impl MessageType {
    /// Returns the protocol name of this message type.
    pub fn name(self) -> &'static str {
        match self {
            Self::Request => "REQUEST",
            Self::Response => "RESPONSE",
            Self::Notify => "NOTIFY",
            Self::RequestStreamChunk => "REQUEST_STREAM_CHUNK",
            Self::ResponseStreamChunk => "RESPONSE_STREAM_CHUNK",
            Self::RequestStreamEnd => "REQUEST_STREAM_END",
            Self::ResponseStreamEnd => "RESPONSE_STREAM_END",
            Self::RequestCancel => "REQUEST_CANCEL",
            Self::ResponseCancel => "RESPONSE_CANCEL",
        }
    }

    /// Returns true for kinds a client sends to a server.
    pub fn is_client_originated(self) -> bool {
        matches!(
            self,
            Self::Request | Self::RequestStreamChunk | Self::RequestStreamEnd | Self::RequestCancel
        )
    }
}

impl From<MessageType> for u8 {
    fn from(kind: MessageType) -> Self {
        kind as u8
    }
}

impl TryFrom<u64> for MessageType {
    type Error = FrameError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Request,
            1 => Self::Response,
            2 => Self::Notify,
            3 => Self::RequestStreamChunk,
            4 => Self::ResponseStreamChunk,
            5 => Self::RequestStreamEnd,
            6 => Self::ResponseStreamEnd,
            7 => Self::RequestCancel,
            8 => Self::ResponseCancel,
            other => return Err(FrameError::UnknownType(other)),
        })
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
