#![cfg(all(unix, feature = "cli"))]

use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::process::{Command, Output};
use std::thread::{self, JoinHandle};

use mprpc_frame::{Frame, Value};
use mprpc_transport::{HEADER_SIZE, MAGIC};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/mprpc-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn read_frame(stream: &mut UnixStream) -> io::Result<Option<Frame>> {
    let mut header = [0u8; HEADER_SIZE];
    match stream.read_exact(&mut header) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    assert_eq!(header[..2], MAGIC, "client sent a bad envelope");
    let len = u32::from_le_bytes([header[2], header[3], header[4], header[5]]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok(Some(Frame::decode(&payload).expect("client sent a malformed frame")))
}

fn write_frame(stream: &mut UnixStream, frame: Frame) -> io::Result<()> {
    let payload = frame.encode().expect("frame should encode");
    let mut message = MAGIC.to_vec();
    message.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    message.extend_from_slice(&payload);
    stream.write_all(&message)
}

/// Serve one connection; returns every frame the client sent.
fn spawn_server(listener: UnixListener) -> JoinHandle<Vec<Frame>> {
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("client should connect");
        let mut received = Vec::new();
        let mut upload_total = 0i64;

        while let Ok(Some(frame)) = read_frame(&mut stream) {
            received.push(frame.clone());
            let replies = match frame {
                Frame::Request { id, method, params } => match method.as_str() {
                    "add" => vec![Frame::Response {
                        id,
                        error: None,
                        result: Value::from(params.iter().filter_map(Value::as_i64).sum::<i64>()),
                    }],
                    "count" => {
                        let n = params.first().and_then(Value::as_i64).unwrap_or(0);
                        let mut frames: Vec<_> = (0..n)
                            .map(|i| Frame::ResponseStreamChunk {
                                id,
                                chunk: Value::from(i),
                            })
                            .collect();
                        frames.push(Frame::ResponseStreamEnd { id });
                        frames
                    }
                    "divide" => vec![Frame::Response {
                        id,
                        error: Some("division by zero".into()),
                        result: Value::Nil,
                    }],
                    _ => Vec::new(),
                },
                Frame::RequestStreamChunk { chunk, .. } => {
                    upload_total += chunk.as_i64().unwrap_or(0);
                    Vec::new()
                }
                Frame::RequestStreamEnd { id } => vec![Frame::Response {
                    id,
                    error: None,
                    result: Value::from(upload_total),
                }],
                _ => Vec::new(),
            };
            for reply in replies {
                if write_frame(&mut stream, reply).is_err() {
                    return received;
                }
            }
        }
        received
    })
}

fn run_call(tag: &str, args: &[&str]) -> (Output, Vec<Frame>) {
    let dir = unique_temp_dir(tag);
    let sock_path = dir.join("rpc.sock");
    let listener = UnixListener::bind(&sock_path).expect("socket should bind");
    let server = spawn_server(listener);

    let output = Command::new(env!("CARGO_BIN_EXE_mprpc"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("json")
        .arg("call")
        .arg(&sock_path)
        .args(args)
        .output()
        .expect("call command should run");

    let received = server.join().expect("server thread should not panic");
    let _ = std::fs::remove_dir_all(&dir);
    (output, received)
}

fn stdout_json_lines(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each stdout line should be json"))
        .collect()
}

#[test]
fn unary_call_prints_result() {
    let (output, received) = run_call("unary", &["add", "--params", "[2, 3]"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let lines = stdout_json_lines(&output);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["method"], "add");
    assert_eq!(lines[0]["result"], 5);
    assert_eq!(
        received.first(),
        Some(&Frame::Request {
            id: 1,
            method: "add".into(),
            params: vec![Value::from(2), Value::from(3)],
        })
    );
}

#[test]
fn streaming_call_prints_each_chunk() {
    let (output, _) = run_call("stream", &["count", "--params", "[3]", "--stream"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let chunks: Vec<_> = stdout_json_lines(&output)
        .into_iter()
        .map(|line| line["chunk"].clone())
        .collect();
    assert_eq!(chunks, vec![0, 1, 2]);
}

#[test]
fn upload_streams_arguments() {
    let (output, received) = run_call("upload", &["sum_upload", "--upload", "[1, 2, 3]"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(stdout_json_lines(&output)[0]["result"], 6);
    let chunks = received
        .iter()
        .filter(|frame| matches!(frame, Frame::RequestStreamChunk { .. }))
        .count();
    assert_eq!(chunks, 3);
    assert!(matches!(received.last(), Some(Frame::RequestStreamEnd { id: 1 })));
}

#[test]
fn remote_error_sets_exit_code() {
    let (output, _) = run_call("remote-error", &["divide", "--params", "[1, 0]"]);

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("division by zero"), "stderr: {stderr}");
}

#[test]
fn missing_socket_is_transport_error() {
    let dir = unique_temp_dir("missing");
    let output = Command::new(env!("CARGO_BIN_EXE_mprpc"))
        .arg("call")
        .arg(dir.join("nobody.sock"))
        .arg("add")
        .output()
        .expect("call command should run");
    let _ = std::fs::remove_dir_all(&dir);

    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("nobody.sock"), "stderr: {stderr}");
}

#[test]
fn unanswered_call_times_out_and_cancels() {
    let (output, received) = run_call("timeout", &["sleep", "--timeout", "200ms"]);

    assert_eq!(output.status.code(), Some(124));
    assert!(received
        .iter()
        .any(|frame| matches!(frame, Frame::RequestCancel { id: 1 })));
}
