/*!
 * Lock Family
 *
 * Every variant implements the same object-safe [`LockContract`], so call
 * sites pick a blocking strategy at construction time and never change.
 * The CAS-based variants (`CasMutex`, `Optex`, `BitLock`, `SpinBitLock`)
 * are hand-rolled packed-word state machines; the OS-backed adapters
 * forward to platform primitives; `SoaLock` trades blocking for queued
 * continuations dispatched on the completion pool.
 */

mod continuation;
mod contract;
mod mutex;
mod optex;
mod os;
mod rwlock;
mod semaphore;
mod spin;

pub use continuation::{ContinuationKind, SoaCallback, SoaLock, SoaMode, SoaReleaser};
pub use contract::{LockContract, RawLock, ReadToken, WriteToken};
pub use mutex::CasMutex;
pub use optex::Optex;
pub use os::{MonitorLock, NativeMutexLock, NativeRwLock, NoopLock, SemaphoreLock};
pub use rwlock::{BitLock, LockMode, MAX_READERS};
pub use semaphore::Semaphore;
pub use spin::SpinBitLock;

use std::sync::Arc;

/// Blocking strategy selector for call sites that pick a variant from
/// configuration rather than at the type level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// CAS mutex with semaphore parking.
    CasMutex,
    /// Test-and-set ticket mutex.
    Optex,
    /// Packed-bitfield reader-writer lock, parked waiters.
    BitLock,
    /// Packed-bitfield reader-writer lock, spin-only.
    SpinBitLock,
    /// Platform mutex adapter.
    NativeMutex,
    /// Platform reader-writer lock adapter.
    NativeRwLock,
    /// Mutex + condvar monitor.
    Monitor,
    /// Binary counting-semaphore lock.
    Semaphore,
    /// No-op lock for single-threaded contexts.
    Noop,
}

impl Strategy {
    /// Construct the selected variant behind the shared contract.
    pub fn build(self) -> Arc<dyn LockContract> {
        match self {
            Self::CasMutex => Arc::new(CasMutex::new()),
            Self::Optex => Arc::new(Optex::new()),
            Self::BitLock => Arc::new(BitLock::new()),
            Self::SpinBitLock => Arc::new(SpinBitLock::new()),
            Self::NativeMutex => Arc::new(NativeMutexLock::new()),
            Self::NativeRwLock => Arc::new(NativeRwLock::new()),
            Self::Monitor => Arc::new(MonitorLock::new()),
            Self::Semaphore => Arc::new(SemaphoreLock::new()),
            Self::Noop => Arc::new(NoopLock::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_strategy_builds_a_working_lock() {
        let strategies = [
            Strategy::CasMutex,
            Strategy::Optex,
            Strategy::BitLock,
            Strategy::SpinBitLock,
            Strategy::NativeMutex,
            Strategy::NativeRwLock,
            Strategy::Monitor,
            Strategy::Semaphore,
            Strategy::Noop,
        ];
        for strategy in strategies {
            let lock = strategy.build();
            let token = lock.wait_to_write().unwrap();
            drop(token);
            let token = lock.wait_to_read().unwrap();
            drop(token);
        }
    }
}

