/*!
 * SoaLock - Continuation Read-Write Lock
 *
 * A read-write lock that never blocks the requesting thread. A grantable
 * request runs its continuation inline; a conflicting request is queued
 * and its continuation runs later on a pool thread when a release grants
 * it the lock. Writer preference matches the blocking locks: readers
 * arriving behind a queued writer queue too.
 *
 * # State Machine
 *
 * One packed word holds a mode tag plus the active-reader count. The
 * transient `QueueBusy` mode is the queue mutation guard: a thread CASes
 * the current mode into `QueueBusy`, mutates the waiter queues, then
 * stores the successor mode. Everyone else spins briefly and retries, so
 * queue operations and grant decisions never interleave.
 *
 * # Dispatch
 *
 * Releases never run continuations inline; granted waiters are posted to
 * the completion pool. A continuation linked to an async result completes
 * it exactly once after running, capturing any panic as the fault.
 */

use crate::asyncop::{AsyncOpResult, CompletionKind, PanicFault};
use crate::atomic::AtomicField;
use crate::core::errors::{LockError, LockResult};
use crate::core::limits::BACKOFF_SPIN_ITERS;
use crate::pool::{CompletionPool, WorkState};
use crossbeam_queue::SegQueue;
use log::{trace, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering::{AcqRel, Acquire, Release};
use std::sync::Arc;

/// Mode tag in the low bits of the packed word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum SoaMode {
    Free = 0,
    /// One writer's continuation holds the lock.
    Writer = 1,
    /// One or more reader continuations hold the lock.
    Readers = 2,
    /// Readers hold the lock and at least one writer is queued.
    ReadersWriterPending = 3,
    /// Transient: a thread is mutating the waiter queues.
    QueueBusy = 4,
}

impl SoaMode {
    #[inline]
    fn from_bits(bits: usize) -> Self {
        match bits {
            0 => Self::Free,
            1 => Self::Writer,
            2 => Self::Readers,
            3 => Self::ReadersWriterPending,
            4 => Self::QueueBusy,
            other => unreachable!("invalid continuation lock mode bits: {other}"),
        }
    }
}

const MODE_BITS: u32 = 3;
const MODE_MASK: usize = (1 << MODE_BITS) - 1;

#[inline]
fn pack(mode: SoaMode, active: usize) -> usize {
    (mode as usize) | (active << MODE_BITS)
}

#[inline]
fn unpack(word: usize) -> (SoaMode, usize) {
    (SoaMode::from_bits(word & MODE_MASK), word >> MODE_BITS)
}

#[inline]
fn spin_wait(iteration: &mut u32) {
    if *iteration < BACKOFF_SPIN_ITERS {
        std::hint::spin_loop();
    } else {
        std::thread::yield_now();
    }
    *iteration += 1;
}

/// Whether a queued continuation wants the lock shared or exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationKind {
    Read,
    Write,
}

/// Continuation invoked once the lock is granted.
pub type SoaCallback = Box<dyn FnOnce(SoaReleaser, WorkState) + Send>;

struct QueuedContinuation {
    kind: ContinuationKind,
    callback: SoaCallback,
    state: WorkState,
    linked: Option<Arc<AsyncOpResult>>,
}

/// Read-write lock granting via continuations instead of blocking.
pub struct SoaLock {
    state: AtomicField,
    pool: Arc<CompletionPool>,
    queued_readers: SegQueue<QueuedContinuation>,
    queued_writers: SegQueue<QueuedContinuation>,
}

impl SoaLock {
    pub fn new(pool: Arc<CompletionPool>) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicField::new(pack(SoaMode::Free, 0)),
            pool,
            queued_readers: SegQueue::new(),
            queued_writers: SegQueue::new(),
        })
    }

    /// Current mode tag (diagnostic).
    pub fn mode(&self) -> SoaMode {
        unpack(self.state.load(Acquire)).0
    }

    /// Reader continuations currently holding the lock (diagnostic).
    pub fn active_readers(&self) -> usize {
        unpack(self.state.load(Acquire)).1
    }

    /// Request the lock exclusively. Returns `true` if the continuation ran
    /// inline on the calling thread, `false` if it was queued.
    pub fn begin_write<F>(
        self: &Arc<Self>,
        callback: F,
        state: WorkState,
        linked: Option<Arc<AsyncOpResult>>,
    ) -> bool
    where
        F: FnOnce(SoaReleaser, WorkState) + Send + 'static,
    {
        let callback: SoaCallback = Box::new(callback);
        let mut iteration = 0;
        loop {
            let word = self.state.load(Acquire);
            let (mode, active) = unpack(word);
            match mode {
                SoaMode::Free => {
                    if self
                        .state
                        .compare_exchange(word, pack(SoaMode::Writer, 0), AcqRel, Acquire)
                        .is_ok()
                    {
                        self.run_granted(ContinuationKind::Write, callback, state, linked, true);
                        return true;
                    }
                }
                SoaMode::Writer | SoaMode::Readers | SoaMode::ReadersWriterPending => {
                    if self
                        .state
                        .compare_exchange(word, pack(SoaMode::QueueBusy, active), AcqRel, Acquire)
                        .is_ok()
                    {
                        self.queued_writers.push(QueuedContinuation {
                            kind: ContinuationKind::Write,
                            callback,
                            state,
                            linked,
                        });
                        // A writer queued behind readers flips them to
                        // writer-pending so later readers queue as well.
                        let successor = match mode {
                            SoaMode::Readers => SoaMode::ReadersWriterPending,
                            other => other,
                        };
                        self.state.store(pack(successor, active), Release);
                        trace!("continuation writer queued");
                        return false;
                    }
                }
                SoaMode::QueueBusy => spin_wait(&mut iteration),
            }
        }
    }

    /// Request the lock shared; same inline-or-queued contract as
    /// [`begin_write`](Self::begin_write).
    pub fn begin_read<F>(
        self: &Arc<Self>,
        callback: F,
        state: WorkState,
        linked: Option<Arc<AsyncOpResult>>,
    ) -> bool
    where
        F: FnOnce(SoaReleaser, WorkState) + Send + 'static,
    {
        let callback: SoaCallback = Box::new(callback);
        self.begin_read_boxed(callback, state, linked)
    }

    fn begin_read_boxed(
        self: &Arc<Self>,
        callback: SoaCallback,
        state: WorkState,
        linked: Option<Arc<AsyncOpResult>>,
    ) -> bool {
        let mut iteration = 0;
        loop {
            let word = self.state.load(Acquire);
            let (mode, active) = unpack(word);
            match mode {
                SoaMode::Free => {
                    if self
                        .state
                        .compare_exchange(word, pack(SoaMode::Readers, 1), AcqRel, Acquire)
                        .is_ok()
                    {
                        self.run_granted(ContinuationKind::Read, callback, state, linked, true);
                        return true;
                    }
                }
                SoaMode::Readers => {
                    if self
                        .state
                        .compare_exchange(word, pack(SoaMode::Readers, active + 1), AcqRel, Acquire)
                        .is_ok()
                    {
                        self.run_granted(ContinuationKind::Read, callback, state, linked, true);
                        return true;
                    }
                }
                SoaMode::Writer | SoaMode::ReadersWriterPending => {
                    if self
                        .state
                        .compare_exchange(word, pack(SoaMode::QueueBusy, active), AcqRel, Acquire)
                        .is_ok()
                    {
                        self.queued_readers.push(QueuedContinuation {
                            kind: ContinuationKind::Read,
                            callback,
                            state,
                            linked,
                        });
                        self.state.store(pack(mode, active), Release);
                        trace!("continuation reader queued");
                        return false;
                    }
                }
                SoaMode::QueueBusy => spin_wait(&mut iteration),
            }
        }
    }

    /// Release one grant; called from `SoaReleaser`.
    fn release(self: &Arc<Self>, kind: ContinuationKind) {
        let mut iteration = 0;
        loop {
            let word = self.state.load(Acquire);
            let (mode, active) = unpack(word);
            match (kind, mode) {
                (ContinuationKind::Write, SoaMode::Writer) => {
                    if self
                        .state
                        .compare_exchange(word, pack(SoaMode::QueueBusy, 0), AcqRel, Acquire)
                        .is_ok()
                    {
                        self.grant_next();
                        return;
                    }
                }
                (ContinuationKind::Read, SoaMode::Readers)
                | (ContinuationKind::Read, SoaMode::ReadersWriterPending) => {
                    debug_assert!(active >= 1, "read release without active readers");
                    if active > 1 {
                        if self
                            .state
                            .compare_exchange(word, pack(mode, active - 1), AcqRel, Acquire)
                            .is_ok()
                        {
                            return;
                        }
                    } else if self
                        .state
                        .compare_exchange(word, pack(SoaMode::QueueBusy, 0), AcqRel, Acquire)
                        .is_ok()
                    {
                        // Last reader out decides the handoff.
                        self.grant_next();
                        return;
                    }
                }
                (_, SoaMode::QueueBusy) => spin_wait(&mut iteration),
                (k, m) => unreachable!("release {k:?} observed mode {m:?}"),
            }
        }
    }

    /// Runs with the word held at QueueBusy; stores the successor mode and
    /// dispatches every newly granted continuation onto the pool.
    fn grant_next(self: &Arc<Self>) {
        if let Some(writer) = self.queued_writers.pop() {
            self.state.store(pack(SoaMode::Writer, 0), Release);
            self.dispatch(writer);
            return;
        }

        let mut granted = Vec::new();
        while let Some(reader) = self.queued_readers.pop() {
            granted.push(reader);
        }
        if granted.is_empty() {
            self.state.store(pack(SoaMode::Free, 0), Release);
            return;
        }
        self.state
            .store(pack(SoaMode::Readers, granted.len()), Release);
        for reader in granted {
            self.dispatch(reader);
        }
    }

    fn dispatch(self: &Arc<Self>, queued: QueuedContinuation) {
        let QueuedContinuation {
            kind,
            callback,
            state,
            linked,
        } = queued;
        let lock = Arc::clone(self);
        let posted = self.pool.queue_work_item(
            move |state| {
                lock.run_granted(kind, callback, state, linked, false);
            },
            state,
        );
        if let Err(e) = posted {
            // The grant already landed in the state word; the item stays
            // queued in the pool and runs once a worker is available.
            warn!("continuation dispatch degraded: {e}");
        }
    }

    /// Invoke a granted continuation, releasing on panic and completing any
    /// linked result exactly once.
    fn run_granted(
        self: &Arc<Self>,
        kind: ContinuationKind,
        callback: SoaCallback,
        state: WorkState,
        linked: Option<Arc<AsyncOpResult>>,
        inline: bool,
    ) {
        let releaser = SoaReleaser {
            lock: Arc::clone(self),
            kind,
            released: false,
        };
        let completion = if inline {
            CompletionKind::CompletedSync
        } else {
            CompletionKind::CompletedAsync
        };
        // An unwinding callback drops the releaser, so the lock is freed
        // before the panic is converted into a fault.
        match catch_unwind(AssertUnwindSafe(move || callback(releaser, state))) {
            Ok(()) => {
                if let Some(result) = linked {
                    result.complete(completion);
                }
            }
            Err(payload) => {
                let fault = PanicFault::from_payload(payload);
                warn!("continuation panicked: {fault}");
                if let Some(result) = linked {
                    result.complete_with_fault(completion, Box::new(fault));
                } else if inline {
                    // No fault channel on the calling thread; resume the
                    // panic rather than swallow it.
                    std::panic::panic_any(fault.0);
                }
            }
        }
    }
}

/// Owned release handle passed to each granted continuation.
///
/// Releases on drop; explicit `release()` surfaces double-release.
#[must_use = "dropping the releaser frees the lock immediately"]
pub struct SoaReleaser {
    lock: Arc<SoaLock>,
    kind: ContinuationKind,
    released: bool,
}

impl SoaReleaser {
    /// Which grant this releaser undoes.
    pub fn kind(&self) -> ContinuationKind {
        self.kind
    }

    /// Release the grant.
    ///
    /// Returns `Err(LockError::AlreadyReleased)` on a second call.
    pub fn release(&mut self) -> LockResult<()> {
        if self.released {
            return Err(LockError::AlreadyReleased);
        }
        self.released = true;
        self.lock.release(self.kind);
        Ok(())
    }
}

impl Drop for SoaReleaser {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.lock.release(self.kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn test_lock() -> Arc<SoaLock> {
        SoaLock::new(CompletionPool::new(
            PoolConfig::bounded(2).idle_timeout(Duration::from_millis(300)),
        ))
    }

    fn wait_for(cond: impl Fn() -> bool) {
        let mut waited = Duration::ZERO;
        while !cond() {
            assert!(waited < Duration::from_secs(5), "condition never held");
            thread::sleep(Duration::from_millis(5));
            waited += Duration::from_millis(5);
        }
    }

    #[test]
    fn test_uncontended_write_runs_inline() {
        let lock = test_lock();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        let inline = lock.begin_write(
            move |releaser, _state| {
                ran_clone.fetch_add(1, Ordering::Relaxed);
                drop(releaser);
            },
            None,
            None,
        );
        assert!(inline);
        assert_eq!(ran.load(Ordering::Relaxed), 1);
        assert_eq!(lock.mode(), SoaMode::Free);
    }

    #[test]
    fn test_readers_share_inline() {
        let lock = test_lock();
        let depth = Arc::new(AtomicUsize::new(0));

        let depth_outer = depth.clone();
        let lock_inner = lock.clone();
        let inline = lock.begin_read(
            move |outer, _state| {
                depth_outer.fetch_add(1, Ordering::Relaxed);
                let depth_inner = depth_outer.clone();
                // A second reader is grantable while the first is held
                let nested = lock_inner.begin_read(
                    move |inner, _state| {
                        depth_inner.fetch_add(1, Ordering::Relaxed);
                        drop(inner);
                    },
                    None,
                    None,
                );
                assert!(nested);
                drop(outer);
            },
            None,
            None,
        );
        assert!(inline);
        assert_eq!(depth.load(Ordering::Relaxed), 2);
        assert_eq!(lock.mode(), SoaMode::Free);
    }

    #[test]
    fn test_conflicting_writer_queued_then_dispatched() {
        let lock = test_lock();
        let order = Arc::new(AtomicUsize::new(0));

        // Hold a read grant open across the queued write
        let (holder_tx, holder_rx) = flume::bounded::<SoaReleaser>(1);
        let inline = lock.begin_read(
            move |releaser, _state| {
                holder_tx.send(releaser).ok();
            },
            None,
            None,
        );
        assert!(inline);
        let held = holder_rx.recv().unwrap();

        let order_clone = order.clone();
        let queued_inline = lock.begin_write(
            move |releaser, _state| {
                order_clone.store(1, Ordering::SeqCst);
                drop(releaser);
            },
            None,
            None,
        );
        assert!(!queued_inline);
        assert_eq!(lock.mode(), SoaMode::ReadersWriterPending);
        assert_eq!(order.load(Ordering::SeqCst), 0);

        drop(held);
        wait_for(|| order.load(Ordering::SeqCst) == 1);
        wait_for(|| lock.mode() == SoaMode::Free);
    }

    #[test]
    fn test_reader_queues_behind_pending_writer() {
        let lock = test_lock();
        let (holder_tx, holder_rx) = flume::bounded::<SoaReleaser>(1);
        assert!(lock.begin_read(
            move |releaser, _state| {
                holder_tx.send(releaser).ok();
            },
            None,
            None,
        ));
        let held = holder_rx.recv().unwrap();

        let writer_ran = Arc::new(AtomicUsize::new(0));
        let writer_ran_clone = writer_ran.clone();
        assert!(!lock.begin_write(
            move |releaser, _state| {
                writer_ran_clone.fetch_add(1, Ordering::SeqCst);
                drop(releaser);
            },
            None,
            None,
        ));

        // Writer preference: this reader must not barge past the writer
        let reader_ran = Arc::new(AtomicUsize::new(0));
        let reader_ran_clone = reader_ran.clone();
        assert!(!lock.begin_read(
            move |releaser, _state| {
                reader_ran_clone.fetch_add(1, Ordering::SeqCst);
                drop(releaser);
            },
            None,
            None,
        ));

        drop(held);
        wait_for(|| writer_ran.load(Ordering::SeqCst) == 1);
        wait_for(|| reader_ran.load(Ordering::SeqCst) == 1);
        wait_for(|| lock.mode() == SoaMode::Free);
    }

    #[test]
    fn test_linked_result_completes_with_panic_fault() {
        let lock = test_lock();
        let result = Arc::new(AsyncOpResult::new());

        let (holder_tx, holder_rx) = flume::bounded::<SoaReleaser>(1);
        assert!(lock.begin_write(
            move |releaser, _state| {
                holder_tx.send(releaser).ok();
            },
            None,
            None,
        ));
        let held = holder_rx.recv().unwrap();

        // Queued so the panic is captured on a pool thread
        assert!(!lock.begin_write(
            |_releaser, _state| panic!("continuation blew up"),
            None,
            Some(result.clone()),
        ));
        drop(held);

        let fault = result.end_invoke().unwrap_err();
        assert!(fault.to_string().contains("continuation blew up"));
        wait_for(|| lock.mode() == SoaMode::Free);
    }

    #[test]
    fn test_state_payload_delivered_to_continuation() {
        let lock = test_lock();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        assert!(lock.begin_write(
            move |releaser, state| {
                let boxed = state.expect("state was posted");
                seen_clone.store(
                    *boxed.downcast::<usize>().expect("typed state"),
                    Ordering::Relaxed,
                );
                drop(releaser);
            },
            Some(Box::new(17usize)),
            None,
        ));
        assert_eq!(seen.load(Ordering::Relaxed), 17);
    }

    #[test]
    fn test_double_release_rejected() {
        let lock = test_lock();
        let (tx, rx) = flume::bounded::<LockResult<()>>(1);
        assert!(lock.begin_write(
            move |mut releaser, _state| {
                releaser.release().unwrap();
                tx.send(releaser.release()).ok();
            },
            None,
            None,
        ));
        assert_eq!(rx.recv().unwrap(), Err(LockError::AlreadyReleased));
    }
}
