/*!
 * Async Operation Result
 *
 * The begin/end handshake object. A producer completes the result exactly
 * once, synchronously or from a pool thread; the consumer calls
 * `end_invoke()` to block until completion and to receive any captured
 * fault. Faults are deferred: a panic or error on the producing thread is
 * stored here and surfaces on the consuming thread, never in between.
 *
 * # Exactly-Once Completion
 *
 * The completion flag moves `Pending -> Completed{Sync,Async}` by a single
 * atomic exchange. A second completion is a fatal programming error and
 * panics immediately rather than silently overwriting the first outcome.
 *
 * # Lazy Wait Handle
 *
 * Most results are completed before anyone waits on them. The condvar-based
 * wait handle is created on the first `end_invoke()`, so the fast path
 * allocates nothing beyond the result itself.
 */

use crate::pool::WorkState;
use log::trace;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;
use thiserror::Error;

/// Boxed fault captured from a producing thread.
pub type Fault = Box<dyn std::error::Error + Send + Sync>;

/// A panic captured from a producing thread, carried as a fault.
#[derive(Debug, Error)]
#[error("operation panicked: {0}")]
pub struct PanicFault(pub String);

impl PanicFault {
    /// Convert a `catch_unwind` payload into a displayable fault.
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self(msg)
    }
}

/// How (and whether) a result has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompletionKind {
    /// Not completed yet.
    Pending = 0,
    /// Completed on the thread that began the operation.
    CompletedSync = 1,
    /// Completed on a pool thread.
    CompletedAsync = 2,
}

impl CompletionKind {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::Pending,
            1 => Self::CompletedSync,
            2 => Self::CompletedAsync,
            other => unreachable!("invalid completion kind bits: {other}"),
        }
    }
}

/// Condvar pair created lazily on first wait.
struct WaitHandle {
    guard: Mutex<()>,
    completed: Condvar,
}

/// Callback invoked once when the result completes, receiving the opaque
/// state captured at construction.
pub type CompletionCallback = Box<dyn FnOnce(WorkState) + Send>;

/// Exactly-once completion cell with deferred fault propagation.
pub struct AsyncOpResult {
    flag: AtomicU8,
    callback: Mutex<Option<(CompletionCallback, WorkState)>>,
    fault: Mutex<Option<Fault>>,
    wait: OnceLock<WaitHandle>,
}

impl Default for AsyncOpResult {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncOpResult {
    pub fn new() -> Self {
        Self {
            flag: AtomicU8::new(CompletionKind::Pending as u8),
            callback: Mutex::new(None),
            fault: Mutex::new(None),
            wait: OnceLock::new(),
        }
    }

    /// Result that invokes `callback(state)` once on completion.
    pub fn with_callback(callback: CompletionCallback, state: WorkState) -> Self {
        let result = Self::new();
        *result.callback.lock() = Some((callback, state));
        result
    }

    /// Whether the result has completed (either kind).
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.flag.load(Ordering::Acquire) != CompletionKind::Pending as u8
    }

    /// Current completion kind.
    pub fn completion_kind(&self) -> CompletionKind {
        CompletionKind::from_bits(self.flag.load(Ordering::Acquire))
    }

    /// Complete the result without a fault.
    ///
    /// # Panics
    ///
    /// Panics if the result was already completed. Completing twice means
    /// two code paths both believe they own the operation's outcome, which
    /// is unrecoverable.
    pub fn complete(&self, kind: CompletionKind) {
        debug_assert_ne!(kind, CompletionKind::Pending);
        let prev = self.flag.swap(kind as u8, Ordering::AcqRel);
        if prev != CompletionKind::Pending as u8 {
            panic!("async result completed twice (previous kind: {prev})");
        }
        trace!("async result completed: {kind:?}");

        if let Some((callback, state)) = self.callback.lock().take() {
            callback(state);
        }
        if let Some(handle) = self.wait.get() {
            let _guard = handle.guard.lock();
            handle.completed.notify_all();
        }
    }

    /// Complete the result carrying a fault for the consumer.
    pub fn complete_with_fault(&self, kind: CompletionKind, fault: Fault) {
        *self.fault.lock() = Some(fault);
        self.complete(kind);
    }

    /// Block until completion; return the captured fault if one exists.
    ///
    /// The fault is taken, so only the first caller receives it.
    pub fn end_invoke(&self) -> Result<CompletionKind, Fault> {
        if !self.is_complete() {
            let handle = self.wait.get_or_init(|| WaitHandle {
                guard: Mutex::new(()),
                completed: Condvar::new(),
            });
            let mut guard = handle.guard.lock();
            // Re-check under the lock: the completer signals only after the
            // flag is set, so a set flag here means no notification is coming
            while !self.is_complete() {
                handle.completed.wait(&mut guard);
            }
        }

        match self.fault.lock().take() {
            Some(fault) => Err(fault),
            None => Ok(self.completion_kind()),
        }
    }

    /// Non-blocking fault check; takes the fault if present.
    pub fn take_fault(&self) -> Option<Fault> {
        self.fault.lock().take()
    }
}
