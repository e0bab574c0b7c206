/*!
 * concore - Process-Local Concurrency Toolkit
 *
 * Three families of primitives, layered bottom-up:
 *
 * - **Lock-free locks**: mutual-exclusion and read-write locks implemented as
 *   packed-bitfield state machines over compare-and-swap, parking contended
 *   threads on a counting semaphore only after a definitive state transition
 *   is observed. OS-backed adapters share the same `LockContract` so call
 *   sites can swap strategies without changes.
 * - **Completion-queue pool**: a self-sizing worker pool that pulls posted
 *   (callback, state) pairs from a completion queue, growing under load up to
 *   a configurable ceiling and retiring idle workers after a timeout.
 * - **Async-operation framework**: Begin/End style results with exactly-once
 *   completion and deferred fault propagation, plus a fan-out/join primitive
 *   aggregating many independently-completing operations with deadline-based
 *   cancellation and per-operation failure accounting.
 */

pub mod asyncop;
pub mod atomic;
pub mod core;
pub mod lock;
pub mod pool;

// Re-exports
pub use crate::core::errors::{LockError, LockResult, PoolError, PoolResult};
pub use asyncop::{
    begin_operation, end_operation, AsyncOpResult, CompletionKind, DeadlineTimer, Fault,
    JoinOutcome, JoinPoint, PanicFault, PendingOp, TypedResult,
};
pub use lock::{
    BitLock, CasMutex, LockContract, MonitorLock, NativeMutexLock, NativeRwLock, NoopLock, Optex,
    ReadToken, Semaphore, SemaphoreLock, SoaLock, SpinBitLock, Strategy, WriteToken,
};
pub use pool::{CompletionPool, PoolConfig, PoolEvent, PoolObserver, PoolStats};
