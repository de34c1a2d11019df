//! In-process client and server over a memory channel.
//!
//! Run with:
//!   cargo run --example loopback
//!
//! The server knows three methods: `add` (unary), `count` (streams 0..n) and
//! `sum_upload` (sums the argument stream).

use std::collections::HashMap;

use mprpc::frame::Frame;
use mprpc::transport::{memory_pair, MemoryReceiver, MemorySender, MessageSink, MessageSource};
use mprpc::{InvokeOptions, RpcClient, Value};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

async fn serve(mut rx: MemoryReceiver, tx: MemorySender) -> Result<(), BoxError> {
    let mut uploads: HashMap<u32, i64> = HashMap::new();

    while let Some(message) = rx.recv().await? {
        let reply = match Frame::decode(&message)? {
            Frame::Request { id, method, params } => match method.as_str() {
                "add" => {
                    let sum: i64 = params.iter().filter_map(Value::as_i64).sum();
                    vec![Frame::Response {
                        id,
                        error: None,
                        result: Value::from(sum),
                    }]
                }
                "count" => {
                    let n = params.first().and_then(Value::as_i64).unwrap_or(0);
                    let mut frames: Vec<Frame> = (0..n)
                        .map(|i| Frame::ResponseStreamChunk {
                            id,
                            chunk: Value::from(i),
                        })
                        .collect();
                    frames.push(Frame::ResponseStreamEnd { id });
                    frames
                }
                "sum_upload" => {
                    uploads.insert(id, 0);
                    Vec::new()
                }
                other => vec![Frame::Response {
                    id,
                    error: Some(format!("unknown method {other}")),
                    result: Value::Nil,
                }],
            },
            Frame::RequestStreamChunk { id, chunk } => {
                if let Some(total) = uploads.get_mut(&id) {
                    *total += chunk.as_i64().unwrap_or(0);
                }
                Vec::new()
            }
            Frame::RequestStreamEnd { id } => match uploads.remove(&id) {
                Some(total) => vec![Frame::Response {
                    id,
                    error: None,
                    result: Value::from(total),
                }],
                None => Vec::new(),
            },
            Frame::RequestCancel { id } => {
                uploads.remove(&id);
                vec![Frame::ResponseCancel { id }]
            }
            _ => Vec::new(),
        };

        for frame in reply {
            tx.send(frame.encode()?)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let (local, remote) = memory_pair();
    let (server_tx, server_rx) = remote.split();
    let server = tokio::spawn(serve(server_rx, server_tx));

    let (sender, receiver) = local.split();
    let client = RpcClient::new(sender);
    let reader = client.spawn_reader(receiver);

    let sum: i64 = client
        .call("add", vec![Value::from(2), Value::from(3)])
        .await?;
    println!("add(2, 3) = {sum}");

    let mut count = client.invoke("count", vec![Value::from(3)])?.stream();
    while let Some(n) = count.next().await {
        println!("count chunk: {}", n?);
    }

    let options = InvokeOptions::new().request_stream(vec![
        Value::from(1),
        Value::from(2),
        Value::from(3),
    ]);
    let total = client.invoke_with("sum_upload", vec![], options)?.await?;
    println!("sum_upload([1, 2, 3]) = {}", total.unwrap_or(Value::Nil));

    match client.invoke("divide", vec![Value::from(1), Value::from(0)])?.await {
        Ok(value) => println!("divide returned {value:?}"),
        Err(err) => println!("divide failed: {err}"),
    }

    drop(client);
    server.abort();
    reader.abort();
    Ok(())
}
