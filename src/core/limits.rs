/*!
 * Limits and Constants
 *
 * Centralized location for crate-wide tunables and magic numbers.
 * Values include rationale comments; performance-critical constants are
 * marked with [PERF].
 */

use std::time::Duration;

// =============================================================================
// BACKOFF PHASES
// =============================================================================

/// Iterations of tight `spin_loop` hints before escalating
/// [PERF] Best for waits under ~100ns; costs ~1-2 cycles per iteration
pub const BACKOFF_SPIN_ITERS: u32 = 10;

/// Iterations (cumulative) of `yield_now` before escalating to sleeping
/// [PERF] Yield costs ~100ns but lets same-core contenders make progress
pub const BACKOFF_YIELD_ITERS: u32 = 50;

/// Cap on exponential backoff sleep (1ms)
/// Beyond this a parked wait is always cheaper than sleeping longer
pub const BACKOFF_SLEEP_CAP_NANOS: u64 = 1_000_000;

// =============================================================================
// THREAD POOL
// =============================================================================

/// Default idle timeout before a worker retires
/// Long enough to ride out bursty posting, short enough to shrink when quiet
pub const POOL_DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Worker thread name prefix (shows up in debuggers and profilers)
pub const POOL_THREAD_NAME: &str = "concore-worker";

/// Deadline timer thread name
pub const TIMER_THREAD_NAME: &str = "concore-deadline";

// =============================================================================
// PACKED LOCK STATE
// =============================================================================

/// Bits reserved for the mode tag in a packed lock word
/// Five modes need three bits; the rest of the word splits into count fields
pub const LOCK_MODE_BITS: u32 = 3;

/// Width of each packed count field (active readers, waiting readers,
/// waiting writers). Derived from the word size so the layout is valid on
/// both 32-bit and 64-bit targets: 20 bits per field on 64-bit, 9 on 32-bit.
pub const LOCK_FIELD_BITS: u32 = (usize::BITS - LOCK_MODE_BITS) / 3;
