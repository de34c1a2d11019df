use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use mprpc_transport::DEFAULT_MAX_MESSAGE;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod decode;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Invoke a remote method and print its result or stream.
    Call(CallArgs),
    /// Decode a msgpack frame and print it.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Call(args) => call::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Method name.
    pub method: String,
    /// Parameters as a JSON array.
    #[arg(long, short = 'p', default_value = "[]")]
    pub params: String,
    /// Argument chunks to stream to the server, as a JSON array.
    #[arg(long, value_name = "JSON")]
    pub upload: Option<String>,
    /// Print response stream chunks as they arrive.
    #[arg(long)]
    pub stream: bool,
    /// Response stream buffer size (0 = unbounded).
    #[arg(long, default_value = "0")]
    pub buffer: usize,
    /// Maximum wait for the result, or between stream chunks (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Maximum message size in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE)]
    pub max_message: usize,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Read the frame from a file instead of stdin.
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,
    /// Input is one or more enveloped messages as sent on a socket.
    #[arg(long)]
    pub enveloped: bool,
    /// Maximum frame size in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE)]
    pub max_size: usize,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
