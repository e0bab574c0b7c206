/*!
 * Asynchronous Operation Framework
 *
 * Begin/end result objects with exactly-once completion and deferred fault
 * propagation, a fan-out/join aggregation point with deadline cancellation,
 * and the one-shot timer that backs the deadline. Producers run on the
 * completion pool; consumers block on lazily-created wait handles.
 */

mod invoke;
mod join;
mod result;
mod timer;
mod typed;

pub use invoke::{begin_operation, end_operation};
pub use join::{JoinOutcome, JoinPoint, PendingOp, SlotOutcome, SlotValue};
pub use result::{AsyncOpResult, CompletionCallback, CompletionKind, Fault, PanicFault};
pub use timer::DeadlineTimer;
pub use typed::{TypedResult, ValueTaken};
