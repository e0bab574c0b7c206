/*!
 * Pool Observability
 *
 * Thread-lifecycle notification stream for the completion pool. Observers
 * are invoked synchronously on the worker thread that produced the event,
 * so implementations must be cheap and non-blocking.
 */

/// One lifecycle event emitted by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    /// A worker thread joined the pool.
    ThreadAdded { threads: usize },
    /// A worker is about to invoke a dequeued callback.
    AboutToInvoke { pending: usize },
    /// A worker finished invoking a callback.
    Invoked { processed: usize },
    /// A worker retired after its idle timeout.
    ThreadRemoved { threads: usize },
}

/// Receiver for pool lifecycle events.
pub trait PoolObserver: Send + Sync {
    fn on_event(&self, event: PoolEvent);
}

/// Closures observe directly, matching call sites that just want a probe.
impl<F> PoolObserver for F
where
    F: Fn(PoolEvent) + Send + Sync,
{
    fn on_event(&self, event: PoolEvent) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_closure_observer() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let observer: Arc<dyn PoolObserver> = Arc::new(move |_event: PoolEvent| {
            seen_clone.fetch_add(1, Ordering::Relaxed);
        });

        observer.on_event(PoolEvent::ThreadAdded { threads: 1 });
        observer.on_event(PoolEvent::ThreadRemoved { threads: 0 });
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }
}
