//! End-to-end call scenarios against a scripted server over the in-memory
//! transport.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use mprpc_client::{
    CallState, ClientConfig, Dispatch, InvokeOptions, MessageQueue, RequestStream, RpcClient,
    RpcError, Value,
};
use mprpc_frame::Frame;
use mprpc_transport::{memory_pair, MemoryReceiver, MemorySender, MessageSink, MessageSource};

/// Server side of a connection, driven by the test body.
struct Server {
    rx: MemoryReceiver,
    tx: MemorySender,
}

impl Server {
    async fn recv(&mut self) -> Frame {
        let message = tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("transport error")
            .expect("client closed the channel");
        Frame::decode(&message).expect("client sent a malformed frame")
    }

    fn send(&self, frame: Frame) {
        self.tx.send(frame.encode().unwrap()).unwrap();
    }

    fn respond(&self, id: u32, result: Value) {
        self.send(Frame::Response {
            id,
            error: None,
            result,
        });
    }

    fn chunk(&self, id: u32, chunk: Value) {
        self.send(Frame::ResponseStreamChunk { id, chunk });
    }

    fn queued(&mut self) -> Vec<Frame> {
        self.rx
            .drain()
            .iter()
            .map(|message| Frame::decode(message).unwrap())
            .collect()
    }
}

/// Client with a reader task dispatching server frames.
fn connected(config: ClientConfig) -> (RpcClient, Server) {
    let (local, remote) = memory_pair();
    let (sender, receiver) = local.split();
    let client = RpcClient::with_config(sender, config);
    client.spawn_reader(receiver);
    let (tx, rx) = remote.split();
    (client, Server { rx, tx })
}

/// Client without a reader; the test feeds inbound messages by hand.
fn manual() -> (RpcClient, Server) {
    let (local, remote) = memory_pair();
    let (sender, _receiver) = local.split();
    let client = RpcClient::new(sender);
    let (tx, rx) = remote.split();
    (client, Server { rx, tx })
}

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::from).collect()
}

#[tokio::test]
async fn unary_add() {
    let (client, mut server) = connected(ClientConfig::default());
    let handle = client.invoke("add", ints(&[2, 3])).unwrap();

    let request = server.recv().await;
    assert_eq!(
        request,
        Frame::Request {
            id: 1,
            method: "add".into(),
            params: ints(&[2, 3]),
        }
    );
    assert_eq!(
        request.encode().unwrap()[..],
        [0x94, 0x00, 0x01, 0xa3, b'a', b'd', b'd', 0x92, 0x02, 0x03]
    );

    server.respond(1, Value::from(5));
    assert_eq!(handle.await.unwrap(), Some(Value::from(5)));
    assert_eq!(client.pending_len(), 0);
}

#[tokio::test]
async fn typed_call() {
    let (client, mut server) = connected(ClientConfig::default());
    let server_task = tokio::spawn(async move {
        let request = server.recv().await;
        server.respond(request.id(), Value::from(42));
        server
    });

    let answer: i64 = client.call("answer", vec![]).await.unwrap();
    assert_eq!(answer, 42);
    server_task.await.unwrap();
}

#[tokio::test]
async fn streaming_count() {
    let (client, mut server) = connected(ClientConfig::default());
    let handle = client.invoke("count", ints(&[3])).unwrap();
    let stream = handle.stream();

    let id = server.recv().await.id();
    for n in 0..3 {
        server.chunk(id, Value::from(n));
    }
    server.send(Frame::ResponseStreamEnd { id });

    assert_eq!(stream.collect().await.unwrap(), ints(&[0, 1, 2]));
    assert_eq!(handle.await.unwrap(), None);
}

#[tokio::test]
async fn chunks_before_stream_requested_are_kept() {
    let (client, _server) = manual();
    let handle = client.invoke("count", ints(&[2])).unwrap();
    let id = handle.id();

    for n in 0..2 {
        let chunk = Frame::ResponseStreamChunk {
            id,
            chunk: Value::from(n),
        };
        assert_eq!(
            client.handle_message(&chunk.encode().unwrap()),
            Dispatch::Delivered
        );
    }
    assert_eq!(handle.state(), CallState::StreamingResponse);

    client.handle_message(&Frame::ResponseStreamEnd { id }.encode().unwrap());
    assert_eq!(handle.stream().collect().await.unwrap(), ints(&[0, 1]));
}

#[tokio::test]
async fn remote_failure() {
    let (client, mut server) = connected(ClientConfig::default());
    let handle = client.invoke("divide", ints(&[1, 0])).unwrap();
    let mut stream = handle.stream();

    let id = server.recv().await.id();
    server.send(Frame::Response {
        id,
        error: Some("division by zero".into()),
        result: Value::Nil,
    });

    match handle.await {
        Err(RpcError::Remote(message)) => assert_eq!(message, "division by zero"),
        other => panic!("expected remote error, got {other:?}"),
    }
    assert!(matches!(stream.next().await, Some(Err(RpcError::Remote(_)))));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn cancel_mid_stream() {
    let (client, mut server) = connected(ClientConfig::default());
    let handle = client.invoke("count", ints(&[100])).unwrap();
    let mut stream = handle.stream();

    let id = server.recv().await.id();
    server.chunk(id, Value::from(0));
    server.chunk(id, Value::from(1));
    assert_eq!(stream.next().await.unwrap().unwrap(), Value::from(0));
    assert_eq!(stream.next().await.unwrap().unwrap(), Value::from(1));

    assert!(handle.cancel());
    assert!(matches!(stream.next().await, Some(Err(RpcError::Cancelled))));
    assert!(stream.next().await.is_none());
    assert_eq!(server.recv().await, Frame::RequestCancel { id });

    // late frames for the id go nowhere
    server.chunk(id, Value::from(2));
    server.send(Frame::ResponseCancel { id });
    assert!(stream.next().await.is_none());
    assert_eq!(handle.state(), CallState::Cancelled);
    assert_eq!(handle.await.unwrap(), None);
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let (client, mut server) = manual();
    let handle = client.invoke("count", ints(&[10])).unwrap();
    let id = handle.id();

    assert!(handle.cancel());
    assert!(!handle.cancel());
    assert!(!handle.cancel());

    let cancels = server
        .queued()
        .into_iter()
        .filter(|frame| matches!(frame, Frame::RequestCancel { .. }))
        .count();
    assert_eq!(cancels, 1);
    assert!(client.pending_ids().is_empty());

    // post-cancel silence
    let chunk = Frame::ResponseStreamChunk {
        id,
        chunk: Value::from(1),
    };
    assert_eq!(
        client.handle_message(&chunk.encode().unwrap()),
        Dispatch::Orphaned
    );
    let response = Frame::Response {
        id,
        error: None,
        result: Value::from(1),
    };
    assert_eq!(
        client.handle_message(&response.encode().unwrap()),
        Dispatch::Orphaned
    );
}

#[tokio::test]
async fn cancel_after_completion_sends_nothing() {
    let (client, mut server) = manual();
    let handle = client.invoke("add", ints(&[1, 1])).unwrap();
    let id = handle.id();
    server.queued();

    let response = Frame::Response {
        id,
        error: None,
        result: Value::from(2),
    };
    client.handle_message(&response.encode().unwrap());
    assert!(!handle.cancel());
    assert!(server.queued().is_empty());
    assert_eq!(handle.await.unwrap(), Some(Value::from(2)));
}

#[tokio::test]
async fn upload_from_iterator() {
    let (client, mut server) = connected(ClientConfig::default());
    let options = InvokeOptions::new().request_stream(ints(&[1, 2, 3]));
    let handle = client.invoke_with("sum_upload", vec![], options).unwrap();

    let id = handle.id();
    assert_eq!(
        server.recv().await,
        Frame::Request {
            id,
            method: "sum_upload".into(),
            params: vec![],
        }
    );
    for n in 1..=3 {
        assert_eq!(
            server.recv().await,
            Frame::RequestStreamChunk {
                id,
                chunk: Value::from(n),
            }
        );
    }
    assert_eq!(server.recv().await, Frame::RequestStreamEnd { id });

    server.respond(id, Value::from(6));
    assert_eq!(handle.await.unwrap(), Some(Value::from(6)));
}

#[tokio::test]
async fn upload_from_async_stream() {
    let (client, mut server) = connected(ClientConfig::default());
    let chunks = futures_util::stream::iter(ints(&[4, 5]));
    let options = InvokeOptions::new().request_stream(RequestStream::from_stream(chunks));
    let handle = client.invoke_with("sum_upload", vec![], options).unwrap();
    let id = handle.id();

    assert!(matches!(server.recv().await, Frame::Request { .. }));
    assert_eq!(
        server.recv().await,
        Frame::RequestStreamChunk {
            id,
            chunk: Value::from(4),
        }
    );
    assert_eq!(
        server.recv().await,
        Frame::RequestStreamChunk {
            id,
            chunk: Value::from(5),
        }
    );
    assert_eq!(server.recv().await, Frame::RequestStreamEnd { id });

    server.respond(id, Value::from(9));
    assert_eq!(handle.await.unwrap(), Some(Value::from(9)));
}

#[tokio::test]
async fn upload_from_caller_fed_queue() {
    let (client, mut server) = connected(ClientConfig::default());
    let queue = Arc::new(MessageQueue::unbounded());
    let options = InvokeOptions::new().request_stream(Arc::clone(&queue));
    let handle = client.invoke_with("record", vec![], options).unwrap();
    let id = handle.id();
    assert!(matches!(server.recv().await, Frame::Request { .. }));

    queue.put_value(Value::from("first"));
    assert_eq!(
        server.recv().await,
        Frame::RequestStreamChunk {
            id,
            chunk: Value::from("first"),
        }
    );
    queue.put_value(Value::from("second"));
    queue.close();
    assert_eq!(
        server.recv().await,
        Frame::RequestStreamChunk {
            id,
            chunk: Value::from("second"),
        }
    );
    assert_eq!(server.recv().await, Frame::RequestStreamEnd { id });
}

#[tokio::test]
async fn cancel_stops_upload_without_stream_end() {
    let (client, mut server) = connected(ClientConfig::default());
    let queue = Arc::new(MessageQueue::unbounded());
    let options = InvokeOptions::new().request_stream(Arc::clone(&queue));
    let handle = client.invoke_with("record", vec![], options).unwrap();
    let id = handle.id();
    assert!(matches!(server.recv().await, Frame::Request { .. }));

    queue.put_value(Value::from(1));
    assert!(matches!(server.recv().await, Frame::RequestStreamChunk { .. }));

    assert!(handle.cancel());
    assert_eq!(server.recv().await, Frame::RequestCancel { id });

    queue.put_value(Value::from(2));
    queue.close();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(server.queued().is_empty());
}

async fn wait_until_released<T>(held: &Arc<T>) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while Arc::strong_count(held) > 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("upload task still holds the request stream source");
}

#[tokio::test]
async fn cancel_releases_idle_upload_source() {
    let (client, mut server) = connected(ClientConfig::default());
    let queue = Arc::new(MessageQueue::<Value>::unbounded());
    let options = InvokeOptions::new().request_stream(Arc::clone(&queue));
    let handle = client.invoke_with("record", vec![], options).unwrap();
    assert!(matches!(server.recv().await, Frame::Request { .. }));

    assert!(handle.cancel());
    drop(handle);
    wait_until_released(&queue).await;
}

#[tokio::test]
async fn remote_failure_releases_silent_producer() {
    let (client, mut server) = connected(ClientConfig::default());
    let marker = Arc::new(());
    let held = Arc::clone(&marker);
    let chunks = futures_util::stream::pending::<Value>().map(move |chunk| {
        let _ = &held;
        chunk
    });
    let options = InvokeOptions::new().request_stream(RequestStream::from_stream(chunks));
    let handle = client.invoke_with("record", vec![], options).unwrap();
    let id = server.recv().await.id();

    server.send(Frame::Response {
        id,
        error: Some("rejected".into()),
        result: Value::Nil,
    });
    assert!(matches!(handle.await, Err(RpcError::Remote(_))));
    wait_until_released(&marker).await;
}

#[tokio::test]
async fn early_response_stops_upload() {
    let (client, mut server) = connected(ClientConfig::default());
    let queue = Arc::new(MessageQueue::unbounded());
    let options = InvokeOptions::new().request_stream(Arc::clone(&queue));
    let handle = client.invoke_with("record", vec![], options).unwrap();
    let id = server.recv().await.id();

    server.respond(id, Value::from("enough"));
    assert_eq!(handle.await.unwrap(), Some(Value::from("enough")));

    queue.put_value(Value::from(1));
    queue.close();
    wait_until_released(&queue).await;
    assert!(server.queued().is_empty());
}

#[tokio::test]
async fn open_upload_does_not_block_other_calls() {
    let (client, mut server) = connected(ClientConfig::default());
    let queue = Arc::new(MessageQueue::unbounded());
    let options = InvokeOptions::new().request_stream(Arc::clone(&queue));
    let upload = client.invoke_with("record", vec![], options).unwrap();
    let upload_id = upload.id();
    assert!(matches!(server.recv().await, Frame::Request { .. }));

    queue.put_value(Value::from(1));
    assert_eq!(
        server.recv().await,
        Frame::RequestStreamChunk {
            id: upload_id,
            chunk: Value::from(1),
        }
    );

    let add = client.invoke("add", ints(&[2, 3])).unwrap();
    let add_id = add.id();
    assert_ne!(add_id, upload_id);
    assert_eq!(server.recv().await.id(), add_id);
    server.respond(add_id, Value::from(5));

    let sum = tokio::time::timeout(Duration::from_secs(1), add.result())
        .await
        .expect("unary call blocked behind an open upload")
        .unwrap();
    assert_eq!(sum, Some(Value::from(5)));
    assert_eq!(upload.state(), CallState::Pending);
    assert_eq!(client.pending_ids(), vec![upload_id]);

    queue.put_value(Value::from(2));
    queue.close();
    assert_eq!(
        server.recv().await,
        Frame::RequestStreamChunk {
            id: upload_id,
            chunk: Value::from(2),
        }
    );
    assert_eq!(server.recv().await, Frame::RequestStreamEnd { id: upload_id });

    server.respond(upload_id, Value::from(3));
    assert_eq!(upload.await.unwrap(), Some(Value::from(3)));
}

#[tokio::test]
async fn every_stream_reader_sees_the_end() {
    let (client, mut server) = connected(ClientConfig::default());
    let handle = client.invoke("count", ints(&[0])).unwrap();
    let id = server.recv().await.id();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let mut stream = handle.stream();
            tokio::spawn(async move { stream.next().await.is_none() })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(20)).await;

    server.send(Frame::ResponseStreamEnd { id });
    for reader in readers {
        let ended = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("stream reader left waiting after the end")
            .unwrap();
        assert!(ended);
    }
}

#[tokio::test]
async fn per_call_buffer_keeps_forced_chunks() {
    let (client, mut server) = connected(ClientConfig::default().with_stream_buffer_size(1));
    let options = InvokeOptions::new().stream_buffer_size(1);
    let handle = client.invoke_with("count", ints(&[3]), options).unwrap();
    let stream = handle.stream();

    let id = server.recv().await.id();
    for n in 0..3 {
        server.chunk(id, Value::from(n));
    }
    server.send(Frame::ResponseStreamEnd { id });

    // chunks are forced past the capacity
    assert_eq!(stream.collect().await.unwrap(), ints(&[0, 1, 2]));
}

#[tokio::test]
async fn interleaved_calls_keep_per_id_order() {
    let (client, mut server) = connected(ClientConfig::default());
    let first = client.invoke("count", ints(&[3])).unwrap();
    let second = client.invoke("count", ints(&[3])).unwrap();
    let (first_stream, second_stream) = (first.stream(), second.stream());

    let a = server.recv().await.id();
    let b = server.recv().await.id();
    assert_ne!(a, b);
    for n in 0..3 {
        server.chunk(b, Value::from(n * 10));
        server.chunk(a, Value::from(n));
    }
    server.send(Frame::ResponseStreamEnd { id: a });
    server.send(Frame::ResponseStreamEnd { id: b });

    assert_eq!(first_stream.collect().await.unwrap(), ints(&[0, 1, 2]));
    assert_eq!(second_stream.collect().await.unwrap(), ints(&[0, 10, 20]));
}

#[tokio::test]
async fn ids_unique_among_pending() {
    let (client, _server) = manual();
    let handles: Vec<_> = (0..500)
        .map(|_| client.invoke("noop", vec![]).unwrap())
        .collect();
    let ids: HashSet<u32> = handles.iter().map(|handle| handle.id()).collect();
    assert_eq!(ids.len(), handles.len());
    assert_eq!(client.pending_len(), 500);
}

#[tokio::test]
async fn second_response_is_orphaned() {
    let (client, _server) = manual();
    let handle = client.invoke("add", ints(&[1, 2])).unwrap();
    let response = Frame::Response {
        id: handle.id(),
        error: None,
        result: Value::from(3),
    }
    .encode()
    .unwrap();

    assert_eq!(client.handle_message(&response), Dispatch::Delivered);
    assert_eq!(client.handle_message(&response), Dispatch::Orphaned);
    assert_eq!(handle.await.unwrap(), Some(Value::from(3)));
}

#[tokio::test]
async fn garbage_does_not_disturb_calls() {
    let (client, mut server) = connected(ClientConfig::default());
    let handle = client.invoke("add", ints(&[2, 2])).unwrap();
    let id = server.recv().await.id();

    server.tx.send(bytes::Bytes::from_static(b"\x94\x00")).unwrap();
    server.tx.send(bytes::Bytes::from_static(b"not msgpack")).unwrap();
    server.respond(id, Value::from(4));
    assert_eq!(handle.await.unwrap(), Some(Value::from(4)));
}

#[tokio::test]
async fn result_timeout_cancels_call() {
    let (client, mut server) = connected(ClientConfig::default());
    let handle = client.invoke("slow", vec![]).unwrap();
    let id = server.recv().await.id();

    let timeout = Duration::from_millis(20);
    assert!(matches!(
        handle.result_timeout(timeout).await,
        Err(RpcError::Timeout(d)) if d == timeout
    ));
    assert_eq!(server.recv().await, Frame::RequestCancel { id });
    assert_eq!(client.pending_len(), 0);
}

#[tokio::test]
async fn disconnect_fails_pending_calls() {
    let (client, mut server) = connected(ClientConfig::default());
    let unary = client.invoke("add", ints(&[1, 2])).unwrap();
    let streaming = client.invoke("count", ints(&[5])).unwrap();
    let mut stream = streaming.stream();
    server.recv().await;
    server.recv().await;

    drop(server);
    assert!(matches!(unary.await, Err(RpcError::Disconnected)));
    assert!(matches!(stream.next().await, Some(Err(RpcError::Disconnected))));
    assert_eq!(client.pending_len(), 0);
}

#[tokio::test]
async fn reader_returns_after_peer_closes() {
    let (local, remote) = memory_pair();
    let (sender, receiver) = local.split();
    let client = RpcClient::new(sender);
    let reader = client.spawn_reader(receiver);

    drop(remote);
    reader.await.unwrap().unwrap();
}
