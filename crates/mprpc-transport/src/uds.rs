//! Unix domain socket message channel.
//!
//! Each message travels inside the [`MessageCodec`] envelope. Outbound
//! messages are queued and written by a background task, so
//! [`UnixMessageSender::send`] never blocks the caller.

use std::future::Future;
use std::path::Path;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::{MessageCodec, DEFAULT_MAX_MESSAGE};
use crate::error::{Result, TransportError};
use crate::traits::{MessageSink, MessageSource};

/// Connect to a listening socket and split it into message halves.
pub async fn connect(path: impl AsRef<Path>) -> Result<(UnixMessageSender, UnixMessageReceiver)> {
    connect_with_limit(path, DEFAULT_MAX_MESSAGE).await
}

/// Connect with an explicit maximum message size.
pub async fn connect_with_limit(
    path: impl AsRef<Path>,
    max_message_size: usize,
) -> Result<(UnixMessageSender, UnixMessageReceiver)> {
    let path = path.as_ref();
    let stream = UnixStream::connect(path)
        .await
        .map_err(|source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        })?;
    tracing::debug!(path = %path.display(), "connected message channel");
    Ok(from_stream(stream, max_message_size))
}

/// Wrap an already connected stream.
///
/// Must be called from within a tokio runtime: the writer half runs as a
/// spawned task.
pub fn from_stream(
    stream: UnixStream,
    max_message_size: usize,
) -> (UnixMessageSender, UnixMessageReceiver) {
    let codec = MessageCodec::new(max_message_size);
    let (read_half, write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    let mut writer = FramedWrite::new(write_half, codec.clone());
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            match item {
                Outbound::Message(message) => {
                    if let Err(err) = writer.send(message).await {
                        tracing::warn!(error = %err, "message channel writer stopped");
                        break;
                    }
                }
                Outbound::Flush(done) => {
                    let _ = done.send(SinkExt::<Bytes>::flush(&mut writer).await);
                }
            }
        }
        tracing::trace!("message channel writer finished");
    });

    (
        UnixMessageSender { tx },
        UnixMessageReceiver {
            inner: FramedRead::new(read_half, codec),
        },
    )
}

#[derive(Debug)]
enum Outbound {
    Message(Bytes),
    Flush(oneshot::Sender<Result<()>>),
}

#[derive(Debug, Clone)]
pub struct UnixMessageSender {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl UnixMessageSender {
    /// Wait until every message queued before this call has been written.
    pub async fn flush(&self) -> Result<()> {
        let (done, written) = oneshot::channel();
        self.tx
            .send(Outbound::Flush(done))
            .map_err(|_| TransportError::Closed)?;
        written.await.map_err(|_| TransportError::Closed)?
    }
}

impl MessageSink for UnixMessageSender {
    fn send(&self, message: Bytes) -> Result<()> {
        self.tx
            .send(Outbound::Message(message))
            .map_err(|_| TransportError::Closed)
    }
}

#[derive(Debug)]
pub struct UnixMessageReceiver {
    inner: FramedRead<OwnedReadHalf, MessageCodec>,
}

impl MessageSource for UnixMessageReceiver {
    fn recv(&mut self) -> impl Future<Output = Result<Option<Bytes>>> + Send {
        async move { self.inner.next().await.transpose() }
    }
}
