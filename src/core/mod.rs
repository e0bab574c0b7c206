/*!
 * Core Infrastructure
 *
 * Shared error types and compile-time tunables used by every other module.
 */

pub mod errors;
pub mod limits;

pub use errors::{LockError, LockResult, PoolError, PoolResult};
