/*!
 * Counting Semaphore
 *
 * Parking substrate for the lock-free lock family. Uses parking_lot_core
 * for futex-like parking on all platforms: threads park on the stable
 * address of the permit cell and are unparked by `release`.
 *
 * # Design
 *
 * The permit count is a single atomic. `acquire` takes a permit with a CAS
 * when one is available and parks otherwise; the park validation callback
 * re-checks the count so a permit released between the failed CAS and the
 * park is never missed. Wake order follows parking_lot_core's queue, which
 * is eventually fair but not contractually FIFO.
 */

use parking_lot_core::{park, unpark_all, unpark_one, ParkResult, ParkToken, UnparkToken};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counting semaphore with permit-accurate release.
#[derive(Debug, Default)]
pub struct Semaphore {
    permits: AtomicUsize,
}

impl Semaphore {
    /// Create a semaphore holding `permits` initial permits.
    pub const fn new(permits: usize) -> Self {
        Self {
            permits: AtomicUsize::new(permits),
        }
    }

    /// Stable parking address shared by acquire and release.
    #[inline]
    fn park_addr(&self) -> usize {
        &self.permits as *const AtomicUsize as usize
    }

    /// Take one permit if any are available.
    pub fn try_acquire(&self) -> bool {
        let mut current = self.permits.load(Ordering::Relaxed);
        while current > 0 {
            match self.permits.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
        false
    }

    /// Take one permit, parking the calling thread until one is released.
    pub fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            // Park only while the count is observably zero; the validation
            // callback closes the race with a concurrent release.
            let addr = self.park_addr();
            unsafe {
                park(
                    addr,
                    || self.permits.load(Ordering::Relaxed) == 0,
                    || {},
                    |_, _| {},
                    ParkToken(0),
                    None,
                );
            }
        }
    }

    /// Take one permit, giving up after `timeout`.
    ///
    /// Returns `false` on timeout. A permit released concurrently with the
    /// timeout stays in the count for the next acquirer.
    pub fn acquire_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            let addr = self.park_addr();
            let result = unsafe {
                park(
                    addr,
                    || self.permits.load(Ordering::Relaxed) == 0,
                    || {},
                    |_, _| {},
                    ParkToken(0),
                    Some(deadline),
                )
            };
            if matches!(result, ParkResult::TimedOut) {
                // One last grab in case a release raced the timeout
                return self.try_acquire();
            }
        }
    }

    /// Add `n` permits and wake up to `n` parked threads.
    pub fn release(&self, n: usize) {
        if n == 0 {
            return;
        }
        self.permits.fetch_add(n, Ordering::Release);
        let addr = self.park_addr();
        if n == 1 {
            unsafe {
                unpark_one(addr, |_| UnparkToken(0));
            }
        } else {
            // Batch wake: every waiter re-validates against the count, so
            // waking more threads than permits is safe, just not free.
            unsafe {
                unpark_all(addr, UnparkToken(0));
            }
        }
    }

    /// Current permit count (diagnostic; immediately stale under contention).
    #[inline]
    pub fn permits(&self) -> usize {
        self.permits.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_try_acquire_counts_down() {
        let sem = Semaphore::new(2);
        assert!(sem.try_acquire());
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        sem.release(1);
        assert!(sem.try_acquire());
    }

    #[test]
    fn test_acquire_parks_until_release() {
        let sem = Arc::new(Semaphore::new(0));
        let sem_clone = sem.clone();

        let handle = thread::spawn(move || {
            sem_clone.acquire();
        });

        thread::sleep(Duration::from_millis(50));
        sem.release(1);
        handle.join().unwrap();
        assert_eq!(sem.permits(), 0);
    }

    #[test]
    fn test_acquire_for_timeout() {
        let sem = Semaphore::new(0);
        let start = Instant::now();
        assert!(!sem.acquire_for(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_batch_release_wakes_all() {
        let sem = Arc::new(Semaphore::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sem = sem.clone();
                thread::spawn(move || sem.acquire())
            })
            .collect();

        thread::sleep(Duration::from_millis(100));
        sem.release(4);

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sem.permits(), 0);
    }

    #[test]
    fn test_release_before_acquire_is_not_lost() {
        let sem = Semaphore::new(0);
        sem.release(1);
        assert!(sem.acquire_for(Duration::from_millis(10)));
    }
}
