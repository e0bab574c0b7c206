/*!
 * Completion-Queue Thread Pool
 *
 * A dynamically-sized pool of worker threads fed by a completion-queue
 * abstraction. Posting enqueues a (callback, state) pair; workers grow the
 * pool when all of them are busy (up to a configurable ceiling) and retire
 * after an idle timeout, shrinking it back toward zero.
 */

mod observer;
mod pool;
mod queue;

pub use observer::{PoolEvent, PoolObserver};
pub use pool::{CompletionPool, PoolConfig, PoolStats};
pub use queue::{CompletionQueue, PostedWorkItem, WorkCallback, WorkState};
