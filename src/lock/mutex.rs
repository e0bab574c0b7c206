/*!
 * Single-Writer CAS Mutex
 *
 * State machine {Free, Owned} plus a waiting-writer count, packed into one
 * word: bit 0 is ownership, the remaining bits count registered waiters.
 * Entry CAS-loops Free -> Owned; on contention the thread registers as a
 * waiter and parks on the semaphore. Release clears ownership and, if
 * writers are waiting, releases exactly one.
 *
 * Wakes are advisory: a woken waiter deregisters and re-contends, so the
 * lock never hands ownership to a thread that stopped waiting (e.g. after
 * a timeout).
 */

use super::contract::{LockContract, RawLock, ReadToken, WriteToken};
use super::semaphore::Semaphore;
use crate::atomic::AtomicField;
use crate::core::errors::{LockError, LockResult};
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::time::{Duration, Instant};

/// Ownership bit.
const OWNED: usize = 1;
/// One registered waiter, in the count field above the ownership bit.
const WAITER_ONE: usize = 1 << 1;
/// Mask covering the waiter count field.
const WAITER_MASK: usize = !OWNED;

/// Single-writer mutual-exclusion lock over a packed CAS word.
#[derive(Default)]
pub struct CasMutex {
    state: AtomicField,
    waiters: Semaphore,
}

impl CasMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the lock is currently owned (diagnostic).
    pub fn is_owned(&self) -> bool {
        self.state.load(Relaxed) & OWNED != 0
    }

    /// Number of registered waiting writers (diagnostic).
    pub fn waiting_writers(&self) -> usize {
        (self.state.load(Relaxed) & WAITER_MASK) >> 1
    }

    /// One acquisition attempt: take ownership if free, otherwise register
    /// as a waiter. Returns `true` when the lock was taken, `false` after a
    /// successful waiter registration (the caller must park).
    fn contend(&self) -> bool {
        let mut s = self.state.load(Relaxed);
        loop {
            let (new, acquired) = if s & OWNED == 0 {
                (s | OWNED, true)
            } else {
                (s + WAITER_ONE, false)
            };
            let order = if acquired { Acquire } else { Relaxed };
            match self.state.compare_exchange(s, new, order, Relaxed) {
                Ok(_) => return acquired,
                Err(observed) => s = observed,
            }
        }
    }

    /// Drop this thread's waiter registration.
    fn deregister(&self) {
        self.state.update(Relaxed, |v| {
            debug_assert!(v & WAITER_MASK != 0, "waiter count underflow");
            v - WAITER_ONE
        });
    }

    fn acquire(&self) {
        loop {
            if self.contend() {
                return;
            }
            self.waiters.acquire();
            self.deregister();
        }
    }

    fn acquire_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.contend() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let woken = self.waiters.acquire_for(remaining);
            self.deregister();
            if !woken {
                return false;
            }
        }
    }

    fn try_acquire(&self) -> bool {
        let mut s = self.state.load(Relaxed);
        loop {
            if s & OWNED != 0 {
                return false;
            }
            match self.state.compare_exchange(s, s | OWNED, Acquire, Relaxed) {
                Ok(_) => return true,
                Err(observed) => s = observed,
            }
        }
    }

    fn release(&self) {
        let prev = self.state.and(!OWNED, Release);
        debug_assert!(prev & OWNED != 0, "released a lock that was not owned");
        if prev & WAITER_MASK != 0 {
            self.waiters.release(1);
        }
    }
}

impl RawLock for CasMutex {
    fn release_write(&self) {
        self.release();
    }

    // A mutex serves readers exclusively; read release equals write release.
    fn release_read(&self) {
        self.release();
    }
}

impl LockContract for CasMutex {
    fn wait_to_write(&self) -> LockResult<WriteToken<'_>> {
        self.acquire();
        Ok(WriteToken::new(self))
    }

    fn wait_to_read(&self) -> LockResult<ReadToken<'_>> {
        self.acquire();
        Ok(ReadToken::new(self))
    }

    fn try_wait_to_write(&self) -> Option<WriteToken<'_>> {
        self.try_acquire().then(|| WriteToken::new(self))
    }

    fn try_wait_to_read(&self) -> Option<ReadToken<'_>> {
        self.try_acquire().then(|| ReadToken::new(self))
    }

    fn wait_to_write_for(&self, timeout: Duration) -> LockResult<WriteToken<'_>> {
        if self.acquire_for(timeout) {
            Ok(WriteToken::new(self))
        } else {
            Err(LockError::Timeout)
        }
    }

    fn wait_to_read_for(&self, timeout: Duration) -> LockResult<ReadToken<'_>> {
        if self.acquire_for(timeout) {
            Ok(ReadToken::new(self))
        } else {
            Err(LockError::Timeout)
        }
    }

    fn strategy_name(&self) -> &'static str {
        "cas_mutex"
    }
}
