use std::fmt;
use std::io;

use mprpc_client::RpcError;
use mprpc_frame::FrameError;
use mprpc_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const REMOTE_ERROR: i32 = 2;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;
pub const CANCELLED: i32 = 130;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: &io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: &TransportError) -> CliError {
    match err {
        TransportError::Connect { source, .. } => {
            let mut cli = io_error(context, source);
            cli.message = format!("{context}: {err}");
            cli
        }
        TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidMagic | TransportError::MessageTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        TransportError::Closed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
    }
}

pub fn frame_error(context: &str, err: &FrameError) -> CliError {
    match err {
        FrameError::Encode(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
        _ => CliError::new(DATA_INVALID, format!("{context}: {err}")),
    }
}

pub fn rpc_error(context: &str, err: &RpcError) -> CliError {
    match err {
        RpcError::Remote(_) => CliError::new(REMOTE_ERROR, format!("{context}: {err}")),
        RpcError::Cancelled => CliError::new(CANCELLED, format!("{context}: {err}")),
        RpcError::Transport(source) => transport_error(context, source),
        RpcError::Protocol(source) => frame_error(context, source),
        RpcError::Disconnected => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        RpcError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        RpcError::Decode(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        RpcError::TooManyPending(_) | RpcError::NoRuntime => {
            CliError::new(INTERNAL, format!("{context}: {err}"))
        }
    }
}
