use std::io::Read;

use bytes::BytesMut;
use mprpc_frame::{decode_frame, Frame};
use mprpc_transport::decode_message;

use crate::cmd::DecodeArgs;
use crate::exit::{
    frame_error, io_error, transport_error, CliError, CliResult, DATA_INVALID, SUCCESS,
};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let input = read_input(&args)?;
    let frames = if args.enveloped {
        decode_enveloped(&input, args.max_size)?
    } else {
        let frame = decode_frame(&input, args.max_size)
            .map_err(|err| frame_error("decode failed", &err))?;
        vec![frame]
    };

    for frame in &frames {
        print_frame(frame, format);
    }
    Ok(SUCCESS)
}

fn read_input(args: &DecodeArgs) -> CliResult<Vec<u8>> {
    match &args.file {
        Some(path) => std::fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), &err)),
        None => {
            let mut input = Vec::new();
            std::io::stdin()
                .read_to_end(&mut input)
                .map_err(|err| io_error("failed reading stdin", &err))?;
            Ok(input)
        }
    }
}

fn decode_enveloped(input: &[u8], max_size: usize) -> CliResult<Vec<Frame>> {
    let mut buf = BytesMut::from(input);
    let mut frames = Vec::new();
    while let Some(message) =
        decode_message(&mut buf, max_size).map_err(|err| transport_error("decode failed", &err))?
    {
        let frame =
            decode_frame(&message, max_size).map_err(|err| frame_error("decode failed", &err))?;
        frames.push(frame);
    }
    if !buf.is_empty() {
        return Err(CliError::new(
            DATA_INVALID,
            format!("decode failed: {} bytes of incomplete message", buf.len()),
        ));
    }
    Ok(frames)
}
