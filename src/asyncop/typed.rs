/*!
 * Typed Async Result
 *
 * `AsyncOpResult` plus a typed payload slot. The producer stores the value
 * and completes in one call; the consumer's `end_invoke()` blocks, then
 * yields either the value or the captured fault.
 */

use super::result::{AsyncOpResult, CompletionKind, Fault};
use parking_lot::Mutex;
use thiserror::Error;

/// The value was already taken by an earlier `end_invoke()`.
#[derive(Debug, Error)]
#[error("async result value already taken")]
pub struct ValueTaken;

/// Completion cell carrying a typed payload.
pub struct TypedResult<R> {
    inner: AsyncOpResult,
    value: Mutex<Option<R>>,
}

impl<R: Send> Default for TypedResult<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Send> TypedResult<R> {
    pub fn new() -> Self {
        Self {
            inner: AsyncOpResult::new(),
            value: Mutex::new(None),
        }
    }

    /// Store the payload and complete. Exactly-once discipline is inherited
    /// from [`AsyncOpResult::complete`].
    pub fn complete_with(&self, kind: CompletionKind, value: R) {
        *self.value.lock() = Some(value);
        self.inner.complete(kind);
    }

    /// Complete carrying a fault instead of a value.
    pub fn fail(&self, kind: CompletionKind, fault: Fault) {
        self.inner.complete_with_fault(kind, fault);
    }

    /// Block until completion, then take the value.
    ///
    /// The payload moves out, so only the first caller receives it; later
    /// calls get a `ValueTaken` fault.
    pub fn end_invoke(&self) -> Result<R, Fault> {
        self.inner.end_invoke()?;
        self.value.lock().take().ok_or_else(|| {
            let taken: Fault = Box::new(ValueTaken);
            taken
        })
    }

    /// The untyped completion cell (kind, fault, wait handle).
    pub fn result(&self) -> &AsyncOpResult {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asyncop::result::PanicFault;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_value_round_trip() {
        let result = TypedResult::new();
        result.complete_with(CompletionKind::CompletedSync, 42u64);
        assert_eq!(result.end_invoke().unwrap(), 42);
    }

    #[test]
    fn test_value_taken_once() {
        let result = TypedResult::new();
        result.complete_with(CompletionKind::CompletedSync, "payload".to_string());
        assert!(result.end_invoke().is_ok());
        let second = result.end_invoke().unwrap_err();
        assert!(second.to_string().contains("already taken"));
    }

    #[test]
    fn test_fault_beats_value() {
        let result: TypedResult<u32> = TypedResult::new();
        result.fail(
            CompletionKind::CompletedAsync,
            Box::new(PanicFault("producer died".into())),
        );
        let fault = result.end_invoke().unwrap_err();
        assert!(fault.to_string().contains("producer died"));
    }

    #[test]
    fn test_cross_thread_completion() {
        let result = Arc::new(TypedResult::new());
        let result2 = result.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            result2.complete_with(CompletionKind::CompletedAsync, vec![1, 2, 3]);
        });
        assert_eq!(result.end_invoke().unwrap(), vec![1, 2, 3]);
    }
}
