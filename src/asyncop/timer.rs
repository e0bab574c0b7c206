/*!
 * Deadline Timer
 *
 * One-shot countdown on a dedicated thread. Arming spawns a thread that
 * blocks on a timed channel receive: a message before the deadline disarms
 * it silently; a timeout fires the armed callback exactly once. Disarm and
 * fire race cleanly (whichever happens first wins), and dropping the timer
 * disarms it, so scoped owners get deterministic cleanup.
 */

use crate::core::errors::{PoolError, PoolResult};
use crate::core::limits::TIMER_THREAD_NAME;
use log::trace;
use std::thread;
use std::time::Duration;

/// One-shot deadline that invokes a callback unless disarmed first.
pub struct DeadlineTimer {
    disarm_tx: flume::Sender<()>,
}

impl DeadlineTimer {
    /// Arm a countdown; `on_fire` runs on the timer thread at the deadline.
    pub fn start<F>(timeout: Duration, on_fire: F) -> PoolResult<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (disarm_tx, disarm_rx) = flume::bounded::<()>(1);
        thread::Builder::new()
            .name(TIMER_THREAD_NAME.to_string())
            .spawn(move || match disarm_rx.recv_timeout(timeout) {
                Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => {
                    trace!("deadline timer disarmed before firing");
                }
                Err(flume::RecvTimeoutError::Timeout) => {
                    trace!("deadline timer fired after {timeout:?}");
                    on_fire();
                }
            })
            .map_err(|e| PoolError::SpawnFailed(e.to_string()))?;
        Ok(Self { disarm_tx })
    }

    /// Cancel the countdown. Idempotent; a no-op if the timer already fired.
    pub fn disarm(&self) {
        let _ = self.disarm_tx.try_send(());
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        let _ = self.disarm_tx.try_send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fires_after_deadline() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let timer = DeadlineTimer::start(Duration::from_millis(20), move || {
            fired_clone.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();

        thread::sleep(Duration::from_millis(80));
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        drop(timer);
    }

    #[test]
    fn test_disarm_prevents_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let timer = DeadlineTimer::start(Duration::from_millis(40), move || {
            fired_clone.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();

        timer.disarm();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_drop_disarms() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        {
            let _timer = DeadlineTimer::start(Duration::from_millis(40), move || {
                fired_clone.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }
        thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_disarm_after_fire_is_harmless() {
        let timer = DeadlineTimer::start(Duration::from_millis(10), || {}).unwrap();
        thread::sleep(Duration::from_millis(50));
        timer.disarm();
        timer.disarm();
    }
}
