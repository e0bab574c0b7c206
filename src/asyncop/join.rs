/*!
 * Join Point - Fan-Out/Join Aggregation
 *
 * One coordinator registers N independent operations, each owning a slot,
 * then waits for "all complete" or "cancelled", whichever wins. The
 * outcome moves `Pending -> Done` or `Pending -> Cancelled` by a single
 * compare-and-exchange; normal completion, deadline fire and explicit
 * cancellation all race against that one transition, so exactly one wins
 * and late slot writes are accepted without disturbing the result.
 *
 * # Token Accounting
 *
 * An internal token count starts at one (the coordinator's own token) and
 * grows by one per registered operation. Slot completion and
 * `done_queueing` each resolve one token; the resolver that drops the
 * count to zero attempts the Done transition. Starting at one guarantees a
 * join with zero registered operations still completes, while the exposed
 * completed-count reflects slot completions only.
 *
 * # Partial Failure
 *
 * A failing slot never aborts the join. Failures are recorded per slot and
 * in an aggregate failed-count; the coordinator inspects all outcomes
 * after `end_join` returns.
 */

use super::result::{AsyncOpResult, CompletionKind, Fault};
use super::timer::DeadlineTimer;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Final state of a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JoinOutcome {
    Pending = 0,
    /// All registered operations completed.
    Done = 1,
    /// Deadline fired or a caller cancelled before all operations finished.
    Cancelled = 2,
}

impl JoinOutcome {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::Pending,
            1 => Self::Done,
            2 => Self::Cancelled,
            other => unreachable!("invalid join outcome bits: {other}"),
        }
    }
}

/// Per-slot result state, inspectable after the join completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    Pending,
    Completed,
    Failed,
}

/// Opaque value an operation owner reports into its slot.
pub type SlotValue = Option<Box<dyn Any + Send>>;

struct Slot {
    outcome: SlotOutcome,
    value: SlotValue,
    fault: Option<Fault>,
}

/// Aggregation point for many independently-completing operations.
pub struct JoinPoint {
    outcome: AtomicU8,
    /// Unresolved tokens; see the module docs for the accounting scheme.
    pending_tokens: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    queueing_done: AtomicBool,
    slots: Mutex<Vec<Slot>>,
    timer: Mutex<Option<DeadlineTimer>>,
    /// Completed exactly once by whichever outcome transition wins.
    done: AsyncOpResult,
}

impl JoinPoint {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            outcome: AtomicU8::new(JoinOutcome::Pending as u8),
            pending_tokens: AtomicUsize::new(1),
            queued: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            queueing_done: AtomicBool::new(false),
            slots: Mutex::new(Vec::new()),
            timer: Mutex::new(None),
            done: AsyncOpResult::new(),
        })
    }

    /// Register one operation; the returned handle reports into its slot.
    ///
    /// # Panics
    ///
    /// Panics if called after `done_queueing`. Registering into a join
    /// whose bookkeeping is sealed is a programmer error and fails loudly.
    pub fn create_operation(self: &Arc<Self>) -> PendingOp {
        if self.queueing_done.load(Ordering::Acquire) {
            panic!("operation registered after done_queueing");
        }
        let index = {
            let mut slots = self.slots.lock();
            slots.push(Slot {
                outcome: SlotOutcome::Pending,
                value: None,
                fault: None,
            });
            slots.len() - 1
        };
        self.queued.fetch_add(1, Ordering::AcqRel);
        self.pending_tokens.fetch_add(1, Ordering::AcqRel);
        trace!("join slot {index} registered");
        PendingOp {
            join: Arc::clone(self),
            index,
        }
    }

    /// Seal registration and start the deadline, if any.
    ///
    /// Resolves the coordinator's token, so a join with zero registered
    /// operations completes here.
    ///
    /// # Panics
    ///
    /// Panics on a second call. Sealing twice would resolve a token the
    /// coordinator never held and could declare the join Done while a
    /// registered operation is still outstanding.
    pub fn done_queueing(self: &Arc<Self>, timeout: Option<Duration>) {
        if self.queueing_done.swap(true, Ordering::AcqRel) {
            panic!("done_queueing called twice");
        }
        if let Some(deadline) = timeout {
            let join = Arc::clone(self);
            match DeadlineTimer::start(deadline, move || join.cancel()) {
                Ok(timer) => *self.timer.lock() = Some(timer),
                // Without a timer thread the join still completes normally;
                // it just cannot time out.
                Err(e) => warn!("join deadline timer unavailable: {e}"),
            }
        }
        self.resolve_token();
    }

    /// Move the outcome to Cancelled unless Done already won.
    pub fn cancel(&self) {
        if self
            .outcome
            .compare_exchange(
                JoinOutcome::Pending as u8,
                JoinOutcome::Cancelled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            debug!("join cancelled");
            self.timer.lock().take();
            self.done.complete(CompletionKind::CompletedAsync);
        }
    }

    /// Block until the outcome is decided; `true` means cancelled.
    pub fn end_join(&self) -> bool {
        // The done cell never carries a fault; completion is the signal.
        let _ = self.done.end_invoke();
        self.outcome() == JoinOutcome::Cancelled
    }

    pub fn outcome(&self) -> JoinOutcome {
        JoinOutcome::from_bits(self.outcome.load(Ordering::Acquire))
    }

    /// Operations registered.
    pub fn queued_ops(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Slots reported (success or failure). Excludes the coordinator token.
    pub fn completed_ops(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    /// Slots reported as failures.
    pub fn failed_ops(&self) -> usize {
        self.failed.load(Ordering::Acquire)
    }

    /// Per-slot state, valid at and after the slot's report.
    pub fn slot_outcome(&self, index: usize) -> Option<SlotOutcome> {
        self.slots.lock().get(index).map(|s| s.outcome)
    }

    /// Take the value a completed slot reported. Moves out; first caller wins.
    pub fn take_slot_value(&self, index: usize) -> SlotValue {
        self.slots.lock().get_mut(index).and_then(|s| s.value.take())
    }

    /// Take the fault a failed slot reported. Moves out; first caller wins.
    pub fn take_slot_fault(&self, index: usize) -> Option<Fault> {
        self.slots.lock().get_mut(index).and_then(|s| s.fault.take())
    }

    fn resolve_token(&self) {
        if self.pending_tokens.fetch_sub(1, Ordering::AcqRel) == 1
            && self
                .outcome
                .compare_exchange(
                    JoinOutcome::Pending as u8,
                    JoinOutcome::Done as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            debug!("join done: {} ops", self.completed.load(Ordering::Acquire));
            self.timer.lock().take();
            self.done.complete(CompletionKind::CompletedAsync);
        }
    }

    fn report(&self, index: usize, value: SlotValue, fault: Option<Fault>, cancel_rest: bool) {
        let failed = fault.is_some();
        {
            let mut slots = self.slots.lock();
            // Index comes from a consumed PendingOp, so the slot exists and
            // is still pending.
            if let Some(slot) = slots.get_mut(index) {
                slot.outcome = if failed {
                    SlotOutcome::Failed
                } else {
                    SlotOutcome::Completed
                };
                slot.value = value;
                slot.fault = fault;
            }
        }
        if failed {
            self.failed.fetch_add(1, Ordering::AcqRel);
        }
        self.completed.fetch_add(1, Ordering::AcqRel);
        if cancel_rest {
            self.cancel();
        }
        self.resolve_token();
    }
}

/// Handle for one registered operation. Consuming it reports the slot's
/// outcome; ownership makes a second report impossible.
pub struct PendingOp {
    join: Arc<JoinPoint>,
    index: usize,
}

impl PendingOp {
    /// Slot index within the join (registration order).
    pub fn index(&self) -> usize {
        self.index
    }

    /// Report success, optionally cancelling the rest of the join.
    pub fn set_result(self, value: SlotValue, cancel_rest: bool) {
        self.join.report(self.index, value, None, cancel_rest);
    }

    /// Report failure; the join records it and keeps going.
    pub fn set_failure(self, fault: Fault, cancel_rest: bool) {
        self.join.report(self.index, None, Some(fault), cancel_rest);
    }
}
