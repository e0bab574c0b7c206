/*!
 * Optex - Ticket-Style Mutex
 *
 * A single "owned" bit plus a waiter counter. Entry atomically sets the
 * owned bit via bit-test-and-set; if it was already set, the thread
 * registers as a waiter and parks. Exit clears the bit and, if waiters
 * remain, releases exactly one.
 *
 * # Fairness
 *
 * Every waiter eventually enters, but entry order follows semaphore wake
 * order, which the platform does not promise to be FIFO. This is a known,
 * accepted weaker-than-ideal fairness guarantee; use the continuation
 * lock's explicit queues where strict FIFO matters.
 */

use super::contract::{LockContract, RawLock, ReadToken, WriteToken};
use super::semaphore::Semaphore;
use crate::atomic::AtomicField;
use crate::core::errors::{LockError, LockResult};
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::time::{Duration, Instant};

/// Bit index of the ownership flag.
const OWNED_BIT: u32 = 0;
/// One registered waiter, stored above the ownership bit.
const WAITER_ONE: usize = 1 << 1;
/// Mask covering the waiter count field.
const WAITER_MASK: usize = !1;

/// Ticket-style mutual-exclusion lock: test-and-set entry, counted waiters.
#[derive(Default)]
pub struct Optex {
    state: AtomicField,
    waiters: Semaphore,
}

impl Optex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered waiters (diagnostic).
    pub fn waiting_count(&self) -> usize {
        (self.state.load(Relaxed) & WAITER_MASK) >> 1
    }

    fn acquire(&self) {
        // Fast path: one test-and-set
        if !self.state.bit_test_and_set(OWNED_BIT, Acquire) {
            return;
        }
        loop {
            self.state.masked_add(WAITER_MASK, WAITER_ONE, Relaxed);
            // Entry may have been released between the failed test-and-set
            // and the registration; re-check before parking.
            if !self.state.bit_test_and_set(OWNED_BIT, Acquire) {
                self.deregister();
                return;
            }
            self.waiters.acquire();
            self.deregister();
            if !self.state.bit_test_and_set(OWNED_BIT, Acquire) {
                return;
            }
        }
    }

    fn acquire_for(&self, timeout: Duration) -> bool {
        if !self.state.bit_test_and_set(OWNED_BIT, Acquire) {
            return true;
        }
        let deadline = Instant::now() + timeout;
        loop {
            self.state.masked_add(WAITER_MASK, WAITER_ONE, Relaxed);
            if !self.state.bit_test_and_set(OWNED_BIT, Acquire) {
                self.deregister();
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let woken = self.waiters.acquire_for(remaining);
            self.deregister();
            if !self.state.bit_test_and_set(OWNED_BIT, Acquire) {
                return true;
            }
            if !woken {
                return false;
            }
        }
    }

    fn deregister(&self) {
        self.state.update(Relaxed, |v| {
            debug_assert!(v & WAITER_MASK != 0, "waiter count underflow");
            v - WAITER_ONE
        });
    }

    fn release(&self) {
        let was_owned = self.state.bit_test_and_reset(OWNED_BIT, Release);
        debug_assert!(was_owned, "released an Optex that was not owned");
        if self.state.load(Relaxed) & WAITER_MASK != 0 {
            self.waiters.release(1);
        }
    }
}

impl RawLock for Optex {
    fn release_write(&self) {
        self.release();
    }

    fn release_read(&self) {
        self.release();
    }
}

impl LockContract for Optex {
    fn wait_to_write(&self) -> LockResult<WriteToken<'_>> {
        self.acquire();
        Ok(WriteToken::new(self))
    }

    fn wait_to_read(&self) -> LockResult<ReadToken<'_>> {
        self.acquire();
        Ok(ReadToken::new(self))
    }

    fn try_wait_to_write(&self) -> Option<WriteToken<'_>> {
        (!self.state.bit_test_and_set(OWNED_BIT, Acquire)).then(|| WriteToken::new(self))
    }

    fn try_wait_to_read(&self) -> Option<ReadToken<'_>> {
        (!self.state.bit_test_and_set(OWNED_BIT, Acquire)).then(|| ReadToken::new(self))
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
        "optex"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_entry_and_exit() {
        let o = Optex::new();
        let token = o.wait_to_write().unwrap();
        assert!(o.try_wait_to_write().is_none());
        drop(token);
        assert!(o.try_wait_to_write().is_some());
    }

    #[test]
    fn test_every_waiter_eventually_enters() {
        let o = Arc::new(Optex::new());
        let entered = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let o = o.clone();
                let entered = entered.clone();
                thread::spawn(move || {
                    let token = o.wait_to_write().unwrap();
                    // Exclusive section: flag must be clear on entry
                    assert!(!entered.swap(true, Ordering::SeqCst));
                    thread::sleep(Duration::from_millis(2));
                    entered.store(false, Ordering::SeqCst);
                    drop(token);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(o.waiting_count(), 0);
    }

    #[test]
    fn test_timed_entry_times_out() {
        let o = Arc::new(Optex::new());
        let _held = o.wait_to_write().unwrap();
        let o2 = o.clone();
        let handle =
            thread::spawn(move || o2.wait_to_write_for(Duration::from_millis(40)).is_err());
        assert!(handle.join().unwrap());
        assert_eq!(o.waiting_count(), 0);
    }
}
