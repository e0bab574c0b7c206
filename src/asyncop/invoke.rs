/*!
 * Pooled Begin/End Invocation
 *
 * `begin_operation` binds a closure to a pool thread and returns the typed
 * result handle immediately; `end_operation` joins on it. Panics on the
 * pool thread are captured as faults and surface at the join, so a failed
 * operation never takes the worker down and never goes unreported.
 */

use super::result::{CompletionKind, Fault, PanicFault};
use super::typed::TypedResult;
use crate::core::errors::PoolResult;
use crate::pool::CompletionPool;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Run `f` on a pool thread; the returned handle completes with its value.
pub fn begin_operation<R, F>(pool: &Arc<CompletionPool>, f: F) -> PoolResult<Arc<TypedResult<R>>>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let result = Arc::new(TypedResult::new());
    let completer = Arc::clone(&result);
    pool.spawn(move || match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => completer.complete_with(CompletionKind::CompletedAsync, value),
        Err(payload) => completer.fail(
            CompletionKind::CompletedAsync,
            Box::new(PanicFault::from_payload(payload)),
        ),
    })?;
    Ok(result)
}

/// Block until the operation completes; value or deferred fault.
pub fn end_operation<R: Send>(result: &TypedResult<R>) -> Result<R, Fault> {
    result.end_invoke()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use std::time::Duration;

    fn test_pool() -> Arc<CompletionPool> {
        CompletionPool::new(PoolConfig::bounded(2).idle_timeout(Duration::from_millis(200)))
    }

    #[test]
    fn test_begin_end_returns_value() {
        let pool = test_pool();
        let op = begin_operation(&pool, || 6 * 7).unwrap();
        assert_eq!(end_operation(&op).unwrap(), 42);
    }

    #[test]
    fn test_panic_surfaces_at_join() {
        let pool = test_pool();
        let op: Arc<TypedResult<()>> =
            begin_operation(&pool, || panic!("deliberate test panic")).unwrap();
        let fault = end_operation(&op).unwrap_err();
        assert!(fault.to_string().contains("deliberate test panic"));
    }

    #[test]
    fn test_operations_overlap() {
        let pool = test_pool();
        let slow = begin_operation(&pool, || {
            std::thread::sleep(Duration::from_millis(50));
            "slow"
        })
        .unwrap();
        let fast = begin_operation(&pool, || "fast").unwrap();
        assert_eq!(end_operation(&fast).unwrap(), "fast");
        assert_eq!(end_operation(&slow).unwrap(), "slow");
    }
}
