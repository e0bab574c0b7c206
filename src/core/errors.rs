/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for lock operations
pub type LockResult<T> = Result<T, LockError>;

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Lock-related errors with serialization support
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum LockError {
    #[error("Lock token already released")]
    #[diagnostic(
        code(lock::already_released),
        help("A release token may be released at most once. Double release indicates a logic bug in the holder.")
    )]
    AlreadyReleased,

    #[error("Lock acquisition timed out")]
    #[diagnostic(
        code(lock::timeout),
        help("The lock was not available within the deadline. This is a normal outcome, not a fault.")
    )]
    Timeout,

    #[error("Shared owner limit reached: {0}")]
    #[diagnostic(
        code(lock::too_many_readers),
        help("The packed reader count saturated. Reduce concurrent readers or widen the field.")
    )]
    TooManyReaders(usize),

    #[error("Operation not supported by lock variant: {0}")]
    #[diagnostic(
        code(lock::unsupported),
        help("Pick a lock variant that implements this operation, or adjust the call site.")
    )]
    Unsupported(String),
}

/// Thread-pool errors with serialization support
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum PoolError {
    #[error("Completion queue disconnected")]
    #[diagnostic(
        code(pool::queue_disconnected),
        help("All queue handles were dropped. The pool can no longer accept or deliver work.")
    )]
    QueueDisconnected,

    #[error("Failed to spawn worker thread: {0}")]
    #[diagnostic(
        code(pool::spawn_failed),
        help("The OS refused a new thread. Check process thread limits and available memory.")
    )]
    SpawnFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_error_display() {
        assert_eq!(
            LockError::AlreadyReleased.to_string(),
            "Lock token already released"
        );
        assert_eq!(
            LockError::TooManyReaders(1048575).to_string(),
            "Shared owner limit reached: 1048575"
        );
    }

    #[test]
    fn test_pool_error_clone_eq() {
        let err = PoolError::SpawnFailed("EAGAIN".to_string());
        assert_eq!(err.clone(), err);
        assert_ne!(err, PoolError::QueueDisconnected);
    }
}
