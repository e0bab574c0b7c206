/*!
 * Lock Contract
 *
 * The capability abstraction every lock variant exposes: acquire-for-write /
 * acquire-for-read, each returning a scoped release token. The trait is
 * object-safe so call sites can hold `&dyn LockContract` and swap strategies
 * at construction time.
 *
 * # Release Tokens
 *
 * Acquisition returns a token whose drop performs exactly the inverse
 * operation. Explicit `release()` is available for call sites that want the
 * error surfaced: releasing twice is detected and rejected with
 * `LockError::AlreadyReleased`, never silently ignored.
 */

use crate::core::errors::{LockError, LockResult};
use std::time::Duration;

/// Raw release surface backing the tokens. Implemented by every variant;
/// callers interact with it only through [`ReadToken`] / [`WriteToken`].
pub trait RawLock: Send + Sync {
    /// Undo one successful write acquisition.
    fn release_write(&self);

    /// Undo one successful read acquisition.
    fn release_read(&self);
}

/// Scoped release token for a held write lock.
///
/// Releases on drop; `release()` surfaces double-release as an error.
#[must_use = "dropping the token releases the lock immediately"]
pub struct WriteToken<'a> {
    raw: &'a dyn RawLock,
    released: bool,
}

impl<'a> WriteToken<'a> {
    /// Called by lock variants after a successful write acquisition.
    pub(crate) fn new(raw: &'a dyn RawLock) -> Self {
        Self {
            raw,
            released: false,
        }
    }

    /// Whether the token still holds the lock.
    #[inline]
    pub fn is_active(&self) -> bool {
        !self.released
    }

    /// Release the write lock.
    ///
    /// Returns `Err(LockError::AlreadyReleased)` on a second call.
    pub fn release(&mut self) -> LockResult<()> {
        if self.released {
            return Err(LockError::AlreadyReleased);
        }
        self.released = true;
        self.raw.release_write();
        Ok(())
    }
}

impl std::fmt::Debug for WriteToken<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteToken")
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Drop for WriteToken<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.raw.release_write();
        }
    }
}

/// Scoped release token for a held read lock.
#[must_use = "dropping the token releases the lock immediately"]
pub struct ReadToken<'a> {
    raw: &'a dyn RawLock,
    released: bool,
}

impl<'a> ReadToken<'a> {
    /// Called by lock variants after a successful read acquisition.
    pub(crate) fn new(raw: &'a dyn RawLock) -> Self {
        Self {
            raw,
            released: false,
        }
    }

    /// Whether the token still holds the lock.
    #[inline]
    pub fn is_active(&self) -> bool {
        !self.released
    }

    /// Release the read lock.
    ///
    /// Returns `Err(LockError::AlreadyReleased)` on a second call.
    pub fn release(&mut self) -> LockResult<()> {
        if self.released {
            return Err(LockError::AlreadyReleased);
        }
        self.released = true;
        self.raw.release_read();
        Ok(())
    }
}

impl std::fmt::Debug for ReadToken<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadToken")
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Drop for ReadToken<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.raw.release_read();
        }
    }
}

/// Capability contract shared by every blocking lock variant.
///
/// Mutual-exclusion-only variants serve `wait_to_read` by acquiring
/// exclusively, so strategies remain swappable at call sites that mix
/// readers and writers.
pub trait LockContract: RawLock {
    /// Acquire for writing, suspending the caller until granted.
    fn wait_to_write(&self) -> LockResult<WriteToken<'_>>;

    /// Acquire for reading, suspending the caller until granted.
    fn wait_to_read(&self) -> LockResult<ReadToken<'_>>;

    /// Non-blocking write acquisition attempt.
    fn try_wait_to_write(&self) -> Option<WriteToken<'_>>;

    /// Non-blocking read acquisition attempt.
    fn try_wait_to_read(&self) -> Option<ReadToken<'_>>;

    /// Write acquisition bounded by a deadline. Timeout is a normal
    /// "not yet available" outcome (`LockError::Timeout`), not a fault.
    /// Variants without a timed parking path report `Unsupported`.
    fn wait_to_write_for(&self, timeout: Duration) -> LockResult<WriteToken<'_>> {
        let _ = timeout;
        Err(LockError::Unsupported(format!(
            "{}: timed write acquire",
            self.strategy_name()
        )))
    }

    /// Read acquisition bounded by a deadline; see `wait_to_write_for`.
    fn wait_to_read_for(&self, timeout: Duration) -> LockResult<ReadToken<'_>> {
        let _ = timeout;
        Err(LockError::Unsupported(format!(
            "{}: timed read acquire",
            self.strategy_name()
        )))
    }

    /// Name of the variant (for diagnostics and logs).
    fn strategy_name(&self) -> &'static str;
}
