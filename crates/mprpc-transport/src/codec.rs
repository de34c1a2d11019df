use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Result, TransportError};

/// Envelope header: magic (2) + length (4) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Magic bytes: "MP" (0x4D 0x50).
pub const MAGIC: [u8; 2] = [0x4D, 0x50];

/// Default maximum message size: 16 MiB.
pub const DEFAULT_MAX_MESSAGE: usize = 16 * 1024 * 1024;

/// Wrap one message in the stream envelope.
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────┬─────────────────┐
/// │ Magic (2B)   │ Length    │ Message          │
/// │ 0x4D 0x50    │ (4B LE)  │ (Length bytes)   │
/// │ "MP"         │          │                  │
/// └──────────────┴───────────┴─────────────────┘
/// ```
///
/// Message-oriented transports (WebSocket, the in-memory pair) carry message
/// boundaries themselves and never see this envelope.
pub fn encode_message(message: &[u8], dst: &mut BytesMut) -> Result<()> {
    if message.len() > u32::MAX as usize {
        return Err(TransportError::MessageTooLarge {
            size: message.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + message.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(message.len() as u32);
    dst.put_slice(message);
    Ok(())
}

/// Take one enveloped message off the front of `src`.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete message yet.
pub fn decode_message(src: &mut BytesMut, max_message: usize) -> Result<Option<Bytes>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(TransportError::InvalidMagic);
    }

    let len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    if len > max_message {
        return Err(TransportError::MessageTooLarge {
            size: len,
            max: max_message,
        });
    }

    if src.len() < HEADER_SIZE + len {
        src.reserve(HEADER_SIZE + len - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(len).freeze()))
}

/// `tokio_util` codec for enveloped messages on a byte stream.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_message_size: usize,
}

impl MessageCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE)
    }
}

impl Decoder for MessageCodec {
    type Item = Bytes;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        decode_message(src, self.max_message_size)
    }
}

impl Encoder<Bytes> for MessageCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: item.len(),
                max: self.max_message_size,
            });
        }
        encode_message(&item, dst)
    }
}
