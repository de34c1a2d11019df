use std::time::Duration;

use mprpc_client::{CallHandle, ClientConfig, InvokeOptions, RpcClient, Value};
use mprpc_transport::uds;

use crate::cmd::{parse_duration, CallArgs};
use crate::exit::{
    io_error, rpc_error, transport_error, CliError, CliResult, CANCELLED, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_result, ChunkPrinter, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let params = parse_json_array("--params", &args.params)?;
    let upload = args
        .upload
        .as_deref()
        .map(|json| parse_json_array("--upload", json))
        .transpose()?;
    let timeout = parse_duration(&args.timeout)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start runtime", &err))?;
    runtime.block_on(call(args, params, upload, timeout, format))
}

async fn call(
    args: CallArgs,
    params: Vec<Value>,
    upload: Option<Vec<Value>>,
    timeout: Duration,
    format: OutputFormat,
) -> CliResult<i32> {
    let (sender, receiver) = uds::connect_with_limit(&args.path, args.max_message)
        .await
        .map_err(|err| transport_error("connect failed", &err))?;

    let config = ClientConfig::default()
        .with_stream_buffer_size(args.buffer)
        .with_max_frame_size(args.max_message);
    let flusher = sender.clone();
    let client = RpcClient::with_config(sender, config);
    let reader = client.spawn_reader(receiver);

    let mut options = InvokeOptions::new();
    if let Some(chunks) = upload {
        options = options.request_stream(chunks);
    }
    let handle = client
        .invoke_with(&args.method, params, options)
        .map_err(|err| rpc_error("invoke failed", &err))?;
    tracing::debug!(id = handle.id(), method = %args.method, "call started");

    let result = if args.stream {
        print_stream(handle, timeout, format).await
    } else {
        print_unary(&client, handle, timeout, format).await
    };

    if let Err(err) = flusher.flush().await {
        tracing::debug!(error = %err, "outbound flush failed");
    }
    reader.abort();
    result
}

async fn print_unary(
    client: &RpcClient,
    handle: CallHandle,
    timeout: Duration,
    format: OutputFormat,
) -> CliResult<i32> {
    let (id, method) = (handle.id(), handle.method().to_string());
    let result = tokio::select! {
        result = handle.result_timeout(timeout) => result,
        _ = tokio::signal::ctrl_c() => {
            client.cancel(id);
            tracing::info!(id, "cancelled by user");
            return Err(CliError::new(CANCELLED, "call cancelled by user"));
        }
    };

    let value = result.map_err(|err| rpc_error("call failed", &err))?;
    print_result(id, &method, &value.unwrap_or(Value::Nil), format);
    Ok(SUCCESS)
}

async fn print_stream(
    handle: CallHandle,
    timeout: Duration,
    format: OutputFormat,
) -> CliResult<i32> {
    let mut stream = handle.stream();
    let mut printer = ChunkPrinter::new(format);

    loop {
        let next = tokio::select! {
            next = tokio::time::timeout(timeout, stream.next()) => next,
            _ = tokio::signal::ctrl_c() => {
                handle.cancel();
                printer.finish();
                tracing::info!(id = handle.id(), "cancelled by user");
                return Err(CliError::new(CANCELLED, "call cancelled by user"));
            }
        };

        match next {
            Ok(Some(Ok(chunk))) => printer.push(&chunk),
            Ok(Some(Err(err))) => {
                printer.finish();
                return Err(rpc_error("stream failed", &err));
            }
            Ok(None) => break,
            Err(_) => {
                handle.cancel();
                printer.finish();
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no stream chunk within {timeout:?}"),
                ));
            }
        }
    }

    let received = printer.count();
    printer.finish();
    tracing::debug!(id = handle.id(), chunks = received, "response stream finished");

    // a plain RESPONSE also closes the stream; show its value
    let (id, method) = (handle.id(), handle.method().to_string());
    if let Ok(Some(value)) = handle.result().await {
        print_result(id, &method, &value, format);
    }
    Ok(SUCCESS)
}

fn parse_json_array(flag: &str, input: &str) -> CliResult<Vec<Value>> {
    let json: serde_json::Value = serde_json::from_str(input)
        .map_err(|err| CliError::new(USAGE, format!("{flag} is not valid JSON: {err}")))?;
    let serde_json::Value::Array(items) = json else {
        return Err(CliError::new(USAGE, format!("{flag} must be a JSON array")));
    };
    items
        .iter()
        .map(|item| {
            rmpv::ext::to_value(item).map_err(|err| {
                CliError::new(USAGE, format!("{flag} has an unsupported value: {err}"))
            })
        })
        .collect()
}
