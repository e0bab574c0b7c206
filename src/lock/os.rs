/*!
 * OS-Backed Lock Adapters
 *
 * Thin variants wrapping a platform mutex, monitor, counting semaphore, or
 * reader-writer lock behind `LockContract`, plus a no-op variant for
 * single-threaded contexts. They forward to the platform primitive and add
 * no algorithmic behavior of their own; they exist so callers can swap
 * strategies without changing call sites.
 */

use super::contract::{LockContract, RawLock, ReadToken, WriteToken};
use super::semaphore::Semaphore;
use crate::core::errors::{LockError, LockResult};
use parking_lot::lock_api::{RawMutex as _, RawMutexTimed, RawRwLock as _, RawRwLockTimed};
use parking_lot::{Condvar, Mutex, RawMutex, RawRwLock};
use std::time::{Duration, Instant};

/// Adapter over the platform mutex (parking_lot's raw mutex). Readers are
/// served exclusively.
pub struct NativeMutexLock {
    raw: RawMutex,
}

impl NativeMutexLock {
    pub fn new() -> Self {
        Self {
            raw: RawMutex::INIT,
        }
    }
}

impl Default for NativeMutexLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RawLock for NativeMutexLock {
    fn release_write(&self) {
        // Token discipline guarantees the caller holds the mutex.
        unsafe { self.raw.unlock() }
    }

    fn release_read(&self) {
        unsafe { self.raw.unlock() }
    }
}

impl LockContract for NativeMutexLock {
    fn wait_to_write(&self) -> LockResult<WriteToken<'_>> {
        self.raw.lock();
        Ok(WriteToken::new(self))
    }

    fn wait_to_read(&self) -> LockResult<ReadToken<'_>> {
        self.raw.lock();
        Ok(ReadToken::new(self))
    }

    fn try_wait_to_write(&self) -> Option<WriteToken<'_>> {
        self.raw.try_lock().then(|| WriteToken::new(self))
    }

    fn try_wait_to_read(&self) -> Option<ReadToken<'_>> {
        self.raw.try_lock().then(|| ReadToken::new(self))
    }

    fn wait_to_write_for(&self, timeout: Duration) -> LockResult<WriteToken<'_>> {
        if self.raw.try_lock_for(timeout) {
            Ok(WriteToken::new(self))
        } else {
            Err(LockError::Timeout)
        }
    }

    fn wait_to_read_for(&self, timeout: Duration) -> LockResult<ReadToken<'_>> {
        if self.raw.try_lock_for(timeout) {
            Ok(ReadToken::new(self))
        } else {
            Err(LockError::Timeout)
        }
    }

    fn strategy_name(&self) -> &'static str {
        "native_mutex"
    }
}

/// Adapter over the platform reader-writer lock.
pub struct NativeRwLock {
    raw: RawRwLock,
}

impl NativeRwLock {
    pub fn new() -> Self {
        Self {
            raw: RawRwLock::INIT,
        }
    }
}

impl Default for NativeRwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RawLock for NativeRwLock {
    fn release_write(&self) {
        unsafe { self.raw.unlock_exclusive() }
    }

    fn release_read(&self) {
        unsafe { self.raw.unlock_shared() }
    }
}

impl LockContract for NativeRwLock {
    fn wait_to_write(&self) -> LockResult<WriteToken<'_>> {
        self.raw.lock_exclusive();
        Ok(WriteToken::new(self))
    }

    fn wait_to_read(&self) -> LockResult<ReadToken<'_>> {
        self.raw.lock_shared();
        Ok(ReadToken::new(self))
    }

    fn try_wait_to_write(&self) -> Option<WriteToken<'_>> {
        self.raw.try_lock_exclusive().then(|| WriteToken::new(self))
    }

    fn try_wait_to_read(&self) -> Option<ReadToken<'_>> {
        self.raw.try_lock_shared().then(|| ReadToken::new(self))
    }

    fn wait_to_write_for(&self, timeout: Duration) -> LockResult<WriteToken<'_>> {
        if self.raw.try_lock_exclusive_for(timeout) {
            Ok(WriteToken::new(self))
        } else {
            Err(LockError::Timeout)
        }
    }

    fn wait_to_read_for(&self, timeout: Duration) -> LockResult<ReadToken<'_>> {
        if self.raw.try_lock_shared_for(timeout) {
            Ok(ReadToken::new(self))
        } else {
            Err(LockError::Timeout)
        }
    }

    fn strategy_name(&self) -> &'static str {
        "native_rwlock"
    }
}

/// Classic monitor: a mutex-protected ownership flag plus a condition
/// variable. Exclusive only.
#[derive(Default)]
pub struct MonitorLock {
    owned: Mutex<bool>,
    available: Condvar,
}

impl MonitorLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self) {
        let mut owned = self.owned.lock();
        while *owned {
            self.available.wait(&mut owned);
        }
        *owned = true;
    }

    fn enter_for(&self, timeout: Duration) -> bool {
        // One absolute deadline for the whole acquisition. A wakeup that
        // loses the ownership race to a barger re-waits against the same
        // deadline; the clock never restarts.
        let deadline = Instant::now() + timeout;
        let mut owned = self.owned.lock();
        while *owned {
            if self.available.wait_until(&mut owned, deadline).timed_out() && *owned {
                return false;
            }
        }
        *owned = true;
        true
    }

    fn exit(&self) {
        let mut owned = self.owned.lock();
        debug_assert!(*owned, "monitor exit without entry");
        *owned = false;
        self.available.notify_one();
    }
}

impl RawLock for MonitorLock {
    fn release_write(&self) {
        self.exit();
    }

    fn release_read(&self) {
        self.exit();
    }
}

impl LockContract for MonitorLock {
    fn wait_to_write(&self) -> LockResult<WriteToken<'_>> {
        self.enter();
        Ok(WriteToken::new(self))
    }

    fn wait_to_read(&self) -> LockResult<ReadToken<'_>> {
        self.enter();
        Ok(ReadToken::new(self))
    }

    fn try_wait_to_write(&self) -> Option<WriteToken<'_>> {
        let mut owned = self.owned.lock();
        if *owned {
            None
        } else {
            *owned = true;
            Some(WriteToken::new(self))
        }
    }

    fn try_wait_to_read(&self) -> Option<ReadToken<'_>> {
        let mut owned = self.owned.lock();
        if *owned {
            None
        } else {
            *owned = true;
            Some(ReadToken::new(self))
        }
    }

    fn wait_to_write_for(&self, timeout: Duration) -> LockResult<WriteToken<'_>> {
        if self.enter_for(timeout) {
            Ok(WriteToken::new(self))
        } else {
            Err(LockError::Timeout)
        }
    }

    fn wait_to_read_for(&self, timeout: Duration) -> LockResult<ReadToken<'_>> {
        if self.enter_for(timeout) {
            Ok(ReadToken::new(self))
        } else {
            Err(LockError::Timeout)
        }
    }

    fn strategy_name(&self) -> &'static str {
        "monitor"
    }
}

/// Binary use of the counting semaphore as a mutual-exclusion lock.
pub struct SemaphoreLock {
    sem: Semaphore,
}

impl SemaphoreLock {
    pub fn new() -> Self {
        Self {
            sem: Semaphore::new(1),
        }
    }
}

impl Default for SemaphoreLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RawLock for SemaphoreLock {
    fn release_write(&self) {
        self.sem.release(1);
    }

    fn release_read(&self) {
        self.sem.release(1);
    }
}

impl LockContract for SemaphoreLock {
    fn wait_to_write(&self) -> LockResult<WriteToken<'_>> {
        self.sem.acquire();
        Ok(WriteToken::new(self))
    }

    fn wait_to_read(&self) -> LockResult<ReadToken<'_>> {
        self.sem.acquire();
        Ok(ReadToken::new(self))
    }

    fn try_wait_to_write(&self) -> Option<WriteToken<'_>> {
        self.sem.try_acquire().then(|| WriteToken::new(self))
    }

    fn try_wait_to_read(&self) -> Option<ReadToken<'_>> {
        self.sem.try_acquire().then(|| ReadToken::new(self))
    }

    fn wait_to_write_for(&self, timeout: Duration) -> LockResult<WriteToken<'_>> {
        if self.sem.acquire_for(timeout) {
            Ok(WriteToken::new(self))
        } else {
            Err(LockError::Timeout)
        }
    }

    fn wait_to_read_for(&self, timeout: Duration) -> LockResult<ReadToken<'_>> {
        if self.sem.acquire_for(timeout) {
            Ok(ReadToken::new(self))
        } else {
            Err(LockError::Timeout)
        }
    }

    fn strategy_name(&self) -> &'static str {
        "semaphore"
    }
}

/// No-op variant for single-threaded contexts. All acquisitions succeed
/// immediately; releases do nothing.
#[derive(Default)]
pub struct NoopLock;

impl NoopLock {
    pub fn new() -> Self {
        Self
    }
}

impl RawLock for NoopLock {
    fn release_write(&self) {}
    fn release_read(&self) {}
}

impl LockContract for NoopLock {
    fn wait_to_write(&self) -> LockResult<WriteToken<'_>> {
        Ok(WriteToken::new(self))
    }

    fn wait_to_read(&self) -> LockResult<ReadToken<'_>> {
        Ok(ReadToken::new(self))
    }

    fn try_wait_to_write(&self) -> Option<WriteToken<'_>> {
        Some(WriteToken::new(self))
    }

    fn try_wait_to_read(&self) -> Option<ReadToken<'_>> {
        Some(ReadToken::new(self))
    }

    fn wait_to_write_for(&self, _timeout: Duration) -> LockResult<WriteToken<'_>> {
        Ok(WriteToken::new(self))
    }

    fn wait_to_read_for(&self, _timeout: Duration) -> LockResult<ReadToken<'_>> {
        Ok(ReadToken::new(self))
    }

    fn strategy_name(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn adapters() -> Vec<Arc<dyn LockContract>> {
        vec![
            Arc::new(NativeMutexLock::new()),
            Arc::new(NativeRwLock::new()),
            Arc::new(MonitorLock::new()),
            Arc::new(SemaphoreLock::new()),
        ]
    }

    #[test]
    fn test_all_adapters_exclusive_write() {
        for lock in adapters() {
            let token = lock.wait_to_write().unwrap();
            assert!(
                lock.try_wait_to_write().is_none(),
                "{} allowed two writers",
                lock.strategy_name()
            );
            drop(token);
            assert!(lock.try_wait_to_write().is_some());
        }
    }

    #[test]
    fn test_all_adapters_timeout_is_normal_outcome() {
        for lock in adapters() {
            let _held = lock.wait_to_write().unwrap();
            let result = lock.wait_to_write_for(Duration::from_millis(30));
            assert_eq!(
                result.err(),
                Some(LockError::Timeout),
                "{} timeout mismatch",
                lock.strategy_name()
            );
        }
    }

    #[test]
    fn test_native_rwlock_shared_readers() {
        let lock = NativeRwLock::new();
        let r1 = lock.wait_to_read().unwrap();
        let r2 = lock.wait_to_read().unwrap();
        assert!(lock.try_wait_to_write().is_none());
        drop(r1);
        drop(r2);
        assert!(lock.try_wait_to_write().is_some());
    }

    #[test]
    fn test_monitor_handoff_across_threads() {
        let lock = Arc::new(MonitorLock::new());
        let held = lock.wait_to_write().unwrap();

        let lock2 = lock.clone();
        let waiter = thread::spawn(move || {
            let _t = lock2.wait_to_write().unwrap();
        });

        thread::sleep(Duration::from_millis(30));
        drop(held);
        waiter.join().unwrap();
    }

    #[test]
    fn test_monitor_timed_wait_holds_one_deadline_across_wakeups() {
        use std::time::Instant;

        let lock = Arc::new(MonitorLock::new());

        // Two spinning holders churn the lock for roughly 800ms: every
        // release notifies the timed waiter, but a holder usually re-grabs
        // ownership before the waiter runs. Each such lost wakeup must burn
        // down the same deadline rather than granting a fresh timeout window.
        let holders: Vec<_> = (0..2)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    let mut rounds = 0;
                    while rounds < 400 {
                        if let Some(token) = lock.try_wait_to_write() {
                            thread::sleep(Duration::from_millis(1));
                            drop(token);
                            rounds += 1;
                        }
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(10));
        let started = Instant::now();
        let result = lock.wait_to_write_for(Duration::from_millis(150));
        let elapsed = started.elapsed();
        drop(result);

        for holder in holders {
            holder.join().unwrap();
        }

        assert!(
            elapsed < Duration::from_millis(600),
            "timed wait ran {elapsed:?}; the deadline restarted on wakeup"
        );
    }

    #[test]
    fn test_noop_lock_never_blocks() {
        let lock = NoopLock::new();
        let w = lock.wait_to_write().unwrap();
        let r = lock.wait_to_read().unwrap();
        drop(w);
        drop(r);
    }
}
