/*!
 * Completion Pool
 *
 * Worker threads pull posted work items from the completion queue. The pool
 * self-sizes: posting to an empty pool spawns one worker synchronously;
 * a worker that dequeues an item while every other worker is busy spawns
 * one more (up to the configured ceiling); a worker that sees no work for
 * the idle timeout retires.
 *
 * # Counters
 *
 * busy, live, max-ever, posted and processed are independent atomics bumped
 * with fetch-add; no multi-counter transactional consistency is required.
 * `pending = posted - processed` is always observable and non-negative.
 *
 * # Panic Containment
 *
 * A panicking callback never kills its worker: each invocation runs under
 * `catch_unwind`, the payload is logged, and the worker continues serving
 * subsequent items. Callers that need the fault itself attach an
 * async-result, whose completion path captures the panic instead.
 */

use super::observer::{PoolEvent, PoolObserver};
use super::queue::{CompletionQueue, Dequeue, PostedWorkItem, WorkState};
use crate::core::errors::{PoolError, PoolResult};
use crate::core::limits::{POOL_DEFAULT_IDLE_TIMEOUT, POOL_THREAD_NAME};
use log::{debug, error, trace, warn};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Pool sizing configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Ceiling on worker threads; `None` means unbounded.
    pub max_threads: Option<usize>,
    /// How long an idle worker waits for work before retiring.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_threads: None,
            idle_timeout: POOL_DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl PoolConfig {
    /// Unbounded pool with the default idle timeout.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Pool capped at `max` worker threads.
    pub fn bounded(max: usize) -> Self {
        Self {
            max_threads: Some(max),
            ..Self::default()
        }
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

/// Read-only instrumentation snapshot.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PoolStats {
    pub threads: usize,
    pub max_ever_threads: usize,
    pub busy: usize,
    pub posted: usize,
    pub processed: usize,
    pub pending: usize,
}

/// Self-sizing completion-queue thread pool.
pub struct CompletionPool {
    queue: CompletionQueue,
    config: PoolConfig,
    live: AtomicUsize,
    busy: AtomicUsize,
    max_ever: AtomicUsize,
    posted: AtomicUsize,
    processed: AtomicUsize,
    observer: Option<Arc<dyn PoolObserver>>,
}

impl CompletionPool {
    pub fn new(config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            queue: CompletionQueue::new(),
            config,
            live: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            max_ever: AtomicUsize::new(0),
            posted: AtomicUsize::new(0),
            processed: AtomicUsize::new(0),
            observer: None,
        })
    }

    /// Pool with a lifecycle observer attached.
    pub fn with_observer(config: PoolConfig, observer: Arc<dyn PoolObserver>) -> Arc<Self> {
        Arc::new(Self {
            queue: CompletionQueue::new(),
            config,
            live: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            max_ever: AtomicUsize::new(0),
            posted: AtomicUsize::new(0),
            processed: AtomicUsize::new(0),
            observer: Some(observer),
        })
    }

    /// Post a (callback, state) pair.
    ///
    /// If the pool currently has zero worker threads, one is spawned
    /// synchronously before this returns.
    pub fn queue_work_item<F>(self: &Arc<Self>, callback: F, state: WorkState) -> PoolResult<()>
    where
        F: FnOnce(WorkState) + Send + 'static,
    {
        self.posted.fetch_add(1, Ordering::AcqRel);
        self.queue
            .post(PostedWorkItem::new(Box::new(callback), state))?;
        // Enqueue before the live check: a retiring worker decrements live
        // first and then re-checks the queue, so one side always sees the
        // other and the item is never stranded.
        if self.live.load(Ordering::SeqCst) == 0 {
            self.spawn_worker()?;
        }
        Ok(())
    }

    /// Post a stateless closure.
    pub fn spawn<F>(self: &Arc<Self>, f: F) -> PoolResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue_work_item(move |_| f(), None)
    }

    /// Instrumentation snapshot.
    pub fn stats(&self) -> PoolStats {
        let posted = self.posted.load(Ordering::Acquire);
        let processed = self.processed.load(Ordering::Acquire);
        PoolStats {
            threads: self.live.load(Ordering::Acquire),
            max_ever_threads: self.max_ever.load(Ordering::Acquire),
            busy: self.busy.load(Ordering::Acquire),
            posted,
            processed,
            pending: posted.saturating_sub(processed),
        }
    }

    /// Worker threads currently alive.
    pub fn threads(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Items posted but not yet processed.
    pub fn pending(&self) -> usize {
        let posted = self.posted.load(Ordering::Acquire);
        let processed = self.processed.load(Ordering::Acquire);
        posted.saturating_sub(processed)
    }

    fn notify(&self, event: PoolEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(event);
        }
    }

    /// Spawn one worker. New workers start counted as both live and busy;
    /// the worker loop gives the busy slot back when it blocks on the queue.
    fn spawn_worker(self: &Arc<Self>) -> PoolResult<()> {
        let live = self.live.fetch_add(1, Ordering::AcqRel) + 1;
        self.busy.fetch_add(1, Ordering::AcqRel);
        self.max_ever.fetch_max(live, Ordering::AcqRel);

        let pool = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(POOL_THREAD_NAME.to_string())
            .spawn(move || pool.worker_loop());

        match spawned {
            Ok(_) => {
                trace!("pool worker spawned, live={live}");
                self.notify(PoolEvent::ThreadAdded { threads: live });
                Ok(())
            }
            Err(e) => {
                self.live.fetch_sub(1, Ordering::AcqRel);
                self.busy.fetch_sub(1, Ordering::AcqRel);
                error!("failed to spawn pool worker: {e}");
                Err(PoolError::SpawnFailed(e.to_string()))
            }
        }
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            self.busy.fetch_sub(1, Ordering::AcqRel);

            match self.queue.dequeue(self.config.idle_timeout) {
                Dequeue::Item(item) => {
                    let now_busy = self.busy.fetch_add(1, Ordering::AcqRel) + 1;
                    let live = self.live.load(Ordering::Acquire);
                    let below_max = self.config.max_threads.map_or(true, |max| live < max);
                    if now_busy == live && below_max {
                        // Every worker is occupied; grow before invoking so
                        // the next posted item finds a free thread.
                        if let Err(e) = self.spawn_worker() {
                            warn!("pool growth failed, continuing degraded: {e}");
                        }
                    }

                    self.notify(PoolEvent::AboutToInvoke {
                        pending: self.pending(),
                    });
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| item.invoke())) {
                        let msg = payload
                            .downcast_ref::<&str>()
                            .map(|s| (*s).to_string())
                            .or_else(|| payload.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "non-string panic payload".to_string());
                        error!("pool callback panicked: {msg}");
                    }
                    let processed = self.processed.fetch_add(1, Ordering::AcqRel) + 1;
                    self.notify(PoolEvent::Invoked { processed });
                }
                Dequeue::TimedOut => {
                    // Idle long enough; retire and shrink the pool.
                    let live = self.live.fetch_sub(1, Ordering::SeqCst) - 1;
                    // A post racing this retirement may have observed the
                    // old live count and skipped spawning. If the queue is
                    // non-empty with no workers left, re-register and keep
                    // serving instead of stranding the item.
                    if live == 0 && !self.queue.is_empty() {
                        self.live.fetch_add(1, Ordering::SeqCst);
                        self.busy.fetch_add(1, Ordering::AcqRel);
                        continue;
                    }
                    debug!("pool worker retiring, live={live}");
                    self.notify(PoolEvent::ThreadRemoved { threads: live });
                    return;
                }
                Dequeue::Disconnected => {
                    let live = self.live.fetch_sub(1, Ordering::SeqCst) - 1;
                    debug!("pool worker retiring, live={live}");
                    self.notify(PoolEvent::ThreadRemoved { threads: live });
                    return;
                }
            }
        }
    }
}
