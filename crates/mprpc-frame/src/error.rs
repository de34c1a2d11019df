/// Protocol errors raised while encoding or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The bytes are not valid MessagePack.
    #[error("malformed msgpack: {0}")]
    Malformed(String),

    /// The top-level value is not an array.
    #[error("frame is not an array")]
    NotAnArray,

    /// A required field is missing.
    #[error("frame is missing the {0} field")]
    MissingField(&'static str),

    /// A field has the wrong type or is out of range.
    #[error("frame has an invalid {0} field")]
    InvalidField(&'static str),

    /// The message type is not one of the nine known kinds.
    #[error("unknown message type {0}")]
    UnknownType(u64),

    /// Bytes remain after the frame array.
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),

    /// The frame exceeds the configured maximum size.
    #[error("frame too large ({size} bytes, max {max})")]
    TooLarge { size: usize, max: usize },

    /// Serialization failed.
    #[error("frame encode failed: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, FrameError>;
