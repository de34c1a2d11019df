//! Producer/consumer queue bridging frame dispatch and stream consumers.
//!
//! Plain puts respect the capacity and are dropped when a bounded queue is
//! full; forced puts always land. Control signals (end of stream, errors,
//! cancellation) are forced so they get through even when a slow consumer has
//! stopped draining data.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_core::Stream;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Result, RpcError};

/// One slot in a [`MessageQueue`].
#[derive(Debug, Clone)]
pub enum QueueItem<T> {
    Value(T),
    /// Terminates iteration with an error.
    Failed(RpcError),
    /// End-of-stream sentinel.
    End,
}

/// What happened to a put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Handed straight to a waiting getter.
    Delivered,
    /// Appended to the buffer.
    Buffered,
    /// Discarded: the queue was full, or its consumer already saw the end.
    Dropped,
}

pub struct MessageQueue<T> {
    capacity: usize,
    state: Mutex<QueueState<T>>,
}

struct QueueState<T> {
    buffer: VecDeque<QueueItem<T>>,
    getters: VecDeque<oneshot::Sender<QueueItem<T>>>,
    finished: bool,
}

impl<T> MessageQueue<T> {
    /// Create a queue. `capacity == 0` means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState {
                buffer: VecDeque::new(),
                getters: VecDeque::new(),
                finished: false,
            }),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.len() >= self.capacity
    }

    /// True once a consumer has observed the end sentinel or an error.
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Offer an item to the queue.
    ///
    /// A waiting getter receives it directly. Otherwise it is buffered if
    /// `force` is set, the queue is unbounded, or there is room; else dropped.
    pub fn put(&self, item: QueueItem<T>, force: bool) -> PutOutcome {
        let mut state = self.state.lock();
        if state.finished {
            return PutOutcome::Dropped;
        }

        let item = match hand_off(&mut state.getters, item) {
            None => return PutOutcome::Delivered,
            Some(item) => item,
        };

        if force || self.capacity == 0 || state.buffer.len() < self.capacity {
            state.buffer.push_back(item);
            PutOutcome::Buffered
        } else {
            tracing::trace!(capacity = self.capacity, "queue full, dropping item");
            PutOutcome::Dropped
        }
    }

    /// Non-forced put of a value.
    pub fn put_value(&self, value: T) -> PutOutcome {
        self.put(QueueItem::Value(value), false)
    }

    /// Push the end-of-stream sentinel (forced).
    pub fn close(&self) {
        self.put(QueueItem::End, true);
    }

    /// Push an error marker (forced).
    pub fn fail(&self, err: RpcError) {
        self.put(QueueItem::Failed(err), true);
    }

    /// Take the next item, waiting for a put if the buffer is empty.
    ///
    /// Cancellation safe: dropping the returned future never loses an item.
    ///
    /// Once a reader has observed the end, every later `get` returns
    /// [`QueueItem::End`] immediately.
    pub async fn get(&self) -> QueueItem<T> {
        loop {
            let rx = {
                let mut state = self.state.lock();
                if let Some(item) = state.buffer.pop_front() {
                    return item;
                }
                if state.finished {
                    return QueueItem::End;
                }
                let (tx, rx) = oneshot::channel();
                state.getters.push_back(tx);
                rx
            };

            let mut waiter = Waiter {
                queue: self,
                rx,
                settled: false,
            };
            if let Some(item) = waiter.wait().await {
                return item;
            }
        }
    }

    /// Next value of the stream.
    ///
    /// `None` once the end sentinel is seen; an error marker comes back as
    /// `Some(Err(..))` and ends iteration too.
    pub async fn next(&self) -> Option<Result<T>> {
        let finished = self.state.lock().finished;
        if finished {
            return None;
        }

        match self.get().await {
            QueueItem::Value(value) => Some(Ok(value)),
            QueueItem::Failed(err) => {
                self.finish();
                Some(Err(err))
            }
            QueueItem::End => {
                self.finish();
                None
            }
        }
    }

    // Other readers still waiting see the end too.
    fn finish(&self) {
        let mut state = self.state.lock();
        state.finished = true;
        state.buffer.clear();
        for getter in state.getters.drain(..) {
            let _ = getter.send(QueueItem::End);
        }
    }

    // Put back an item a cancelled getter was handed but never returned.
    fn requeue(&self, item: QueueItem<T>) {
        let mut state = self.state.lock();
        if state.finished {
            return;
        }
        if let Some(item) = hand_off(&mut state.getters, item) {
            state.buffer.push_front(item);
        }
    }
}

impl<T: Send + 'static> MessageQueue<T> {
    /// Iterate the queue as a [`Stream`].
    pub fn into_stream(self: Arc<Self>) -> impl Stream<Item = Result<T>> + Send + 'static {
        futures_util::stream::unfold(self, |queue| async move {
            let item = queue.next().await?;
            Some((item, queue))
        })
    }
}

impl<T> std::fmt::Debug for MessageQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MessageQueue")
            .field("capacity", &self.capacity)
            .field("len", &state.buffer.len())
            .field("waiting", &state.getters.len())
            .field("finished", &state.finished)
            .finish()
    }
}

// Returns the item back if no live getter took it.
fn hand_off<T>(
    getters: &mut VecDeque<oneshot::Sender<QueueItem<T>>>,
    mut item: QueueItem<T>,
) -> Option<QueueItem<T>> {
    while let Some(getter) = getters.pop_front() {
        match getter.send(item) {
            Ok(()) => return None,
            Err(returned) => item = returned,
        }
    }
    Some(item)
}

struct Waiter<'a, T> {
    queue: &'a MessageQueue<T>,
    rx: oneshot::Receiver<QueueItem<T>>,
    settled: bool,
}

impl<T> Waiter<'_, T> {
    async fn wait(&mut self) -> Option<QueueItem<T>> {
        let result = (&mut self.rx).await;
        self.settled = true;
        result.ok()
    }
}

impl<T> Drop for Waiter<'_, T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.rx.close();
        if let Ok(item) = self.rx.try_recv() {
            self.queue.requeue(item);
        }
    }
}
