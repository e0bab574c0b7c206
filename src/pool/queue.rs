/*!
 * Completion Queue
 *
 * The channel of posted (callback, state) pairs consumed by the worker
 * pool. Each item is dequeued by exactly one worker; delivery order is
 * whatever the underlying channel returns and is not guaranteed FIFO
 * across contending consumers.
 */

use crate::core::errors::{PoolError, PoolResult};
use std::any::Any;
use std::time::Duration;

/// Opaque state handed to a posted callback.
pub type WorkState = Option<Box<dyn Any + Send>>;

/// Posted callback; consumed by exactly one worker thread.
pub type WorkCallback = Box<dyn FnOnce(WorkState) + Send>;

/// One (callback, state) pair submitted to the queue.
pub struct PostedWorkItem {
    pub(crate) callback: WorkCallback,
    pub(crate) state: WorkState,
}

impl PostedWorkItem {
    pub fn new(callback: WorkCallback, state: WorkState) -> Self {
        Self { callback, state }
    }

    /// Invoke the callback, consuming the item.
    pub(crate) fn invoke(self) {
        (self.callback)(self.state);
    }
}

/// Outcome of a timed dequeue.
pub(crate) enum Dequeue {
    Item(PostedWorkItem),
    TimedOut,
    Disconnected,
}

/// Unbounded completion queue over a multi-producer/multi-consumer channel.
pub struct CompletionQueue {
    tx: flume::Sender<PostedWorkItem>,
    rx: flume::Receiver<PostedWorkItem>,
}

impl CompletionQueue {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    /// Enqueue one work item.
    pub fn post(&self, item: PostedWorkItem) -> PoolResult<()> {
        self.tx
            .send(item)
            .map_err(|_| PoolError::QueueDisconnected)
    }

    /// Block for up to `timeout` waiting for an item.
    pub(crate) fn dequeue(&self, timeout: Duration) -> Dequeue {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Dequeue::Item(item),
            Err(flume::RecvTimeoutError::Timeout) => Dequeue::TimedOut,
            Err(flume::RecvTimeoutError::Disconnected) => Dequeue::Disconnected,
        }
    }

    /// Number of items currently queued (diagnostic; stale under contention).
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}
