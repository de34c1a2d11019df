use bytes::Bytes;
use rmpv::Value;

use crate::error::{FrameError, Result};
use crate::kind::MessageType;

/// Default maximum encoded frame size: 16 MiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// One protocol message, tagged with its call id.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request {
        id: u32,
        method: String,
        params: Vec<Value>,
    },
    Response {
        id: u32,
        error: Option<String>,
        result: Value,
    },
    /// Reserved kind; remaining fields are kept as-is.
    Notify { id: u32, fields: Vec<Value> },
    RequestStreamChunk { id: u32, chunk: Value },
    ResponseStreamChunk { id: u32, chunk: Value },
    RequestStreamEnd { id: u32 },
    ResponseStreamEnd { id: u32 },
    RequestCancel { id: u32 },
    ResponseCancel { id: u32 },
}

impl Frame {
    /// The call id this frame belongs to.
    pub fn id(&self) -> u32 {
        match self {
            Self::Request { id, .. }
            | Self::Response { id, .. }
            | Self::Notify { id, .. }
            | Self::RequestStreamChunk { id, .. }
            | Self::ResponseStreamChunk { id, .. }
            | Self::RequestStreamEnd { id }
            | Self::ResponseStreamEnd { id }
            | Self::RequestCancel { id }
            | Self::ResponseCancel { id } => *id,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Request { .. } => MessageType::Request,
            Self::Response { .. } => MessageType::Response,
            Self::Notify { .. } => MessageType::Notify,
            Self::RequestStreamChunk { .. } => MessageType::RequestStreamChunk,
            Self::ResponseStreamChunk { .. } => MessageType::ResponseStreamChunk,
            Self::RequestStreamEnd { .. } => MessageType::RequestStreamEnd,
            Self::ResponseStreamEnd { .. } => MessageType::ResponseStreamEnd,
            Self::RequestCancel { .. } => MessageType::RequestCancel,
            Self::ResponseCancel { .. } => MessageType::ResponseCancel,
        }
    }

    /// The wire tuple as a MessagePack array.
    pub fn to_value(&self) -> Value {
        let mut fields = vec![
            Value::from(u8::from(self.message_type())),
            Value::from(self.id()),
        ];
        match self {
            Self::Request { method, params, .. } => {
                fields.push(Value::from(method.as_str()));
                fields.push(Value::Array(params.clone()));
            }
            Self::Response { error, result, .. } => {
                fields.push(error.as_deref().map_or(Value::Nil, Value::from));
                fields.push(result.clone());
            }
            Self::Notify { fields: rest, .. } => fields.extend(rest.iter().cloned()),
            Self::RequestStreamChunk { chunk, .. } | Self::ResponseStreamChunk { chunk, .. } => {
                fields.push(chunk.clone());
            }
            Self::RequestStreamEnd { .. }
            | Self::ResponseStreamEnd { .. }
            | Self::RequestCancel { .. }
            | Self::ResponseCancel { .. } => {}
        }
        Value::Array(fields)
    }

    /// Encode with [`encode_frame`].
    pub fn encode(&self) -> Result<Bytes> {
        encode_frame(self)
    }

    /// Decode with [`decode_frame`] and the default size limit.
    pub fn decode(src: &[u8]) -> Result<Self> {
        decode_frame(src, DEFAULT_MAX_FRAME_SIZE)
    }
}

/// Serialize a frame to MessagePack.
pub fn encode_frame(frame: &Frame) -> Result<Bytes> {
    let mut buf = Vec::with_capacity(32);
    rmpv::encode::write_value(&mut buf, &frame.to_value())
        .map_err(|err| FrameError::Encode(err.to_string()))?;
    Ok(Bytes::from(buf))
}

/// Parse one complete frame.
///
/// `src` must hold exactly one frame; leftover bytes are rejected. Fields past
/// the ones a kind defines are ignored.
pub fn decode_frame(src: &[u8], max_frame_size: usize) -> Result<Frame> {
    if src.len() > max_frame_size {
        return Err(FrameError::TooLarge {
            size: src.len(),
            max: max_frame_size,
        });
    }

    let mut rd = src;
    let value =
        rmpv::decode::read_value(&mut rd).map_err(|err| FrameError::Malformed(err.to_string()))?;
    if !rd.is_empty() {
        return Err(FrameError::TrailingBytes(rd.len()));
    }

    let Value::Array(fields) = value else {
        return Err(FrameError::NotAnArray);
    };
    let mut fields = fields.into_iter();

    let tag = take(&mut fields, "type")?
        .as_u64()
        .ok_or(FrameError::InvalidField("type"))?;
    let kind = MessageType::try_from(tag)?;
    let id = take(&mut fields, "id")?
        .as_u64()
        .and_then(|id| u32::try_from(id).ok())
        .ok_or(FrameError::InvalidField("id"))?;

    let frame = match kind {
        MessageType::Request => Frame::Request {
            id,
            method: string_field(take(&mut fields, "method")?, "method")?,
            params: params_field(take(&mut fields, "params")?)?,
        },
        MessageType::Response => Frame::Response {
            id,
            error: error_field(take(&mut fields, "error")?),
            result: take(&mut fields, "result")?,
        },
        MessageType::Notify => Frame::Notify {
            id,
            fields: fields.collect(),
        },
        MessageType::RequestStreamChunk => Frame::RequestStreamChunk {
            id,
            chunk: take(&mut fields, "chunk")?,
        },
        MessageType::ResponseStreamChunk => Frame::ResponseStreamChunk {
            id,
            chunk: take(&mut fields, "chunk")?,
        },
        MessageType::RequestStreamEnd => Frame::RequestStreamEnd { id },
        MessageType::ResponseStreamEnd => Frame::ResponseStreamEnd { id },
        MessageType::RequestCancel => Frame::RequestCancel { id },
        MessageType::ResponseCancel => Frame::ResponseCancel { id },
    };

    Ok(frame)
}

fn take(fields: &mut impl Iterator<Item = Value>, name: &'static str) -> Result<Value> {
    fields.next().ok_or(FrameError::MissingField(name))
}

fn string_field(value: Value, name: &'static str) -> Result<String> {
    match value {
        Value::String(s) => s.into_str().ok_or(FrameError::InvalidField(name)),
        _ => Err(FrameError::InvalidField(name)),
    }
}

fn params_field(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(params) => Ok(params),
        Value::Nil => Ok(Vec::new()),
        _ => Err(FrameError::InvalidField("params")),
    }
}

// Servers in the wild send error strings, but any non-nil value means failure.
fn error_field(value: Value) -> Option<String> {
    match value {
        Value::Nil => None,
        Value::String(s) => Some(match s.as_str() {
            Some(text) => text.to_owned(),
            None => String::from_utf8_lossy(s.as_bytes()).into_owned(),
        }),
        other => Some(other.to_string()),
    }
}
