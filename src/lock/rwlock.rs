/*!
 * BitLock - One-Writer/Many-Reader Packed-Bitfield Lock
 *
 * The full packed-state machine: one machine word encodes a mode tag plus
 * active-reader, waiting-reader, and waiting-writer counts. Every
 * transition is a single compare-and-swap on the whole word, so partial
 * updates are never visible. Contended threads park on a counting
 * semaphore only after their registration CAS has landed.
 *
 * # Policy
 *
 * Writer preference: pending writers are served before newly queued
 * readers. A releasing writer (or the last active reader) hands the lock
 * to exactly one waiting writer by moving the word to `ReservedForWriter`
 * and waking one parked writer; only when no writer waits are all waiting
 * readers batch-woken, converting the waiting-reader count into the
 * active-reader count in one CAS.
 *
 * # Fairness
 *
 * Within same-kind waiters, wake order follows semaphore wake order, which
 * is eventually fair but not contractually FIFO on all platforms.
 */

use super::contract::{LockContract, RawLock, ReadToken, WriteToken};
use super::semaphore::Semaphore;
use crate::atomic::AtomicField;
use crate::core::errors::{LockError, LockResult};
use crate::core::limits::{LOCK_FIELD_BITS, LOCK_MODE_BITS};
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

/// Mode tag stored in the low bits of the packed word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum LockMode {
    /// No owner, no waiters being served.
    Free = 0,
    /// One writer holds the lock.
    OwnedByWriter = 1,
    /// One or more readers hold the lock; no writer is waiting.
    OwnedByReaders = 2,
    /// Readers hold the lock and at least one writer has queued behind them.
    OwnedByReadersWriterPending = 3,
    /// The lock is earmarked for a woken writer that has not yet claimed it.
    /// Newly arriving threads queue instead of barging.
    ReservedForWriter = 4,
}

impl LockMode {
    #[inline]
    fn from_bits(bits: usize) -> Self {
        match bits {
            0 => Self::Free,
            1 => Self::OwnedByWriter,
            2 => Self::OwnedByReaders,
            3 => Self::OwnedByReadersWriterPending,
            4 => Self::ReservedForWriter,
            other => unreachable!("invalid lock mode bits: {other}"),
        }
    }
}

/// Bit ranges of the packed word. Field widths come from `core::limits` so
/// the layout stays valid on 32-bit targets.
const MODE_MASK: usize = (1 << LOCK_MODE_BITS) - 1;
const FIELD_MASK: usize = (1 << LOCK_FIELD_BITS) - 1;
const ACTIVE_SHIFT: u32 = LOCK_MODE_BITS;
const WAIT_READ_SHIFT: u32 = LOCK_MODE_BITS + LOCK_FIELD_BITS;
const WAIT_WRITE_SHIFT: u32 = LOCK_MODE_BITS + 2 * LOCK_FIELD_BITS;

/// Maximum simultaneous readers (active or waiting) per lock.
pub const MAX_READERS: usize = FIELD_MASK;

/// Decoded view of the packed word. Exists only on the stack; the shared
/// cell always holds the packed form.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PackedState {
    pub mode: LockMode,
    pub active_readers: usize,
    pub waiting_readers: usize,
    pub waiting_writers: usize,
}

#[inline]
pub(crate) fn unpack(word: usize) -> PackedState {
    PackedState {
        mode: LockMode::from_bits(word & MODE_MASK),
        active_readers: (word >> ACTIVE_SHIFT) & FIELD_MASK,
        waiting_readers: (word >> WAIT_READ_SHIFT) & FIELD_MASK,
        waiting_writers: (word >> WAIT_WRITE_SHIFT) & FIELD_MASK,
    }
}

#[inline]
pub(crate) fn pack(state: PackedState) -> usize {
    debug_assert!(state.active_readers <= FIELD_MASK);
    debug_assert!(state.waiting_readers <= FIELD_MASK);
    debug_assert!(state.waiting_writers <= FIELD_MASK);
    (state.mode as usize)
        | (state.active_readers << ACTIVE_SHIFT)
        | (state.waiting_readers << WAIT_READ_SHIFT)
        | (state.waiting_writers << WAIT_WRITE_SHIFT)
}

/// One-writer/many-reader lock with writer preference.
#[derive(Default)]
pub struct BitLock {
    state: AtomicField,
    /// Parked waiting readers; woken in a batch once the lock is theirs.
    reader_sem: Semaphore,
    /// Parked waiting writers; woken one at a time against a reservation.
    writer_sem: Semaphore,
}

impl BitLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current mode tag (diagnostic).
    pub fn mode(&self) -> LockMode {
        unpack(self.state.load(Relaxed)).mode
    }

    /// Number of readers currently inside the lock (diagnostic).
    pub fn active_readers(&self) -> usize {
        unpack(self.state.load(Relaxed)).active_readers
    }

    /// Number of parked waiting readers (diagnostic).
    pub fn waiting_readers(&self) -> usize {
        unpack(self.state.load(Relaxed)).waiting_readers
    }

    /// Number of parked waiting writers (diagnostic).
    pub fn waiting_writers(&self) -> usize {
        unpack(self.state.load(Relaxed)).waiting_writers
    }

    fn acquire_write(&self) {
        let mut word = self.state.load(Relaxed);
        loop {
            let st = unpack(word);
            match st.mode {
                LockMode::Free => {
                    let new = pack(PackedState {
                        mode: LockMode::OwnedByWriter,
                        active_readers: 0,
                        ..st
                    });
                    match self.state.compare_exchange(word, new, Acquire, Relaxed) {
                        Ok(_) => return,
                        Err(observed) => word = observed,
                    }
                }
                _ => {
                    // Register as a waiting writer; readers currently inside
                    // flip to the writer-pending mode so new readers queue.
                    let mode = if st.mode == LockMode::OwnedByReaders {
                        LockMode::OwnedByReadersWriterPending
                    } else {
                        st.mode
                    };
                    let new = pack(PackedState {
                        mode,
                        waiting_writers: st.waiting_writers + 1,
                        ..st
                    });
                    match self.state.compare_exchange(word, new, Relaxed, Relaxed) {
                        Ok(_) => {
                            self.writer_sem.acquire();
                            self.claim_reservation();
                            return;
                        }
                        Err(observed) => word = observed,
                    }
                }
            }
        }
    }

    /// A woken writer owns the outstanding reservation; convert it to
    /// ownership. Permits are released one per reservation, so the mode is
    /// `ReservedForWriter` here apart from momentary count updates.
    fn claim_reservation(&self) {
        let mut word = self.state.load(Relaxed);
        loop {
            let st = unpack(word);
            if st.mode == LockMode::ReservedForWriter {
                let new = pack(PackedState {
                    mode: LockMode::OwnedByWriter,
                    active_readers: 0,
                    ..st
                });
                match self.state.compare_exchange(word, new, Acquire, Relaxed) {
                    Ok(_) => return,
                    Err(observed) => word = observed,
                }
            } else {
                std::hint::spin_loop();
                word = self.state.load(Relaxed);
            }
        }
    }

    fn acquire_read(&self) -> LockResult<()> {
        let mut word = self.state.load(Relaxed);
        loop {
            let st = unpack(word);
            match st.mode {
                LockMode::Free => {
                    let new = pack(PackedState {
                        mode: LockMode::OwnedByReaders,
                        active_readers: 1,
                        ..st
                    });
                    match self.state.compare_exchange(word, new, Acquire, Relaxed) {
                        Ok(_) => return Ok(()),
                        Err(observed) => word = observed,
                    }
                }
                // OwnedByReaders implies no waiting writer; join directly.
                LockMode::OwnedByReaders => {
                    if st.active_readers == MAX_READERS {
                        return Err(LockError::TooManyReaders(MAX_READERS));
                    }
                    let new = pack(PackedState {
                        active_readers: st.active_readers + 1,
                        ..st
                    });
                    match self.state.compare_exchange(word, new, Acquire, Relaxed) {
                        Ok(_) => return Ok(()),
                        Err(observed) => word = observed,
                    }
                }
                _ => {
                    if st.waiting_readers == MAX_READERS {
                        return Err(LockError::TooManyReaders(MAX_READERS));
                    }
                    let new = pack(PackedState {
                        waiting_readers: st.waiting_readers + 1,
                        ..st
                    });
                    match self.state.compare_exchange(word, new, Relaxed, Relaxed) {
                        Ok(_) => {
                            // The batch wake converts waiting readers into
                            // active readers before releasing permits, so a
                            // woken reader already holds the lock.
                            self.reader_sem.acquire();
                            return Ok(());
                        }
                        Err(observed) => word = observed,
                    }
                }
            }
        }
    }

    fn try_acquire_write(&self) -> bool {
        let mut word = self.state.load(Relaxed);
        loop {
            let st = unpack(word);
            if st.mode != LockMode::Free {
                return false;
            }
            let new = pack(PackedState {
                mode: LockMode::OwnedByWriter,
                ..st
            });
            match self.state.compare_exchange(word, new, Acquire, Relaxed) {
                Ok(_) => return true,
                Err(observed) => word = observed,
            }
        }
    }

    fn try_acquire_read(&self) -> bool {
        let mut word = self.state.load(Relaxed);
        loop {
            let st = unpack(word);
            let new = match st.mode {
                LockMode::Free => pack(PackedState {
                    mode: LockMode::OwnedByReaders,
                    active_readers: 1,
                    ..st
                }),
                LockMode::OwnedByReaders if st.active_readers < MAX_READERS => pack(PackedState {
                    active_readers: st.active_readers + 1,
                    ..st
                }),
                _ => return false,
            };
            match self.state.compare_exchange(word, new, Acquire, Relaxed) {
                Ok(_) => return true,
                Err(observed) => word = observed,
            }
        }
    }

    /// Hand off after a release: one waiting writer wins a reservation, else
    /// all waiting readers are converted to active in one CAS, else Free.
    fn release_write_inner(&self) {
        let mut word = self.state.load(Relaxed);
        loop {
            let st = unpack(word);
            debug_assert_eq!(
                st.mode,
                LockMode::OwnedByWriter,
                "write release without write ownership"
            );
            let (new, wake) = Self::handoff(st);
            match self.state.compare_exchange(word, new, Release, Relaxed) {
                Ok(_) => {
                    self.wake(wake);
                    return;
                }
                Err(observed) => word = observed,
            }
        }
    }

    fn release_read_inner(&self) {
        let mut word = self.state.load(Relaxed);
        loop {
            let st = unpack(word);
            debug_assert!(
                matches!(
                    st.mode,
                    LockMode::OwnedByReaders | LockMode::OwnedByReadersWriterPending
                ) && st.active_readers > 0,
                "read release without read ownership"
            );
            if st.active_readers > 1 {
                let new = pack(PackedState {
                    active_readers: st.active_readers - 1,
                    ..st
                });
                match self.state.compare_exchange(word, new, Release, Relaxed) {
                    Ok(_) => return,
                    Err(observed) => word = observed,
                }
                continue;
            }
            // Last reader out performs the handoff.
            let (new, wake) = Self::handoff(PackedState {
                active_readers: 0,
                ..st
            });
            match self.state.compare_exchange(word, new, Release, Relaxed) {
                Ok(_) => {
                    self.wake(wake);
                    return;
                }
                Err(observed) => word = observed,
            }
        }
    }

    /// Compute the post-release word and the wake action for a state with no
    /// remaining owner.
    fn handoff(st: PackedState) -> (usize, Wake) {
        if st.waiting_writers > 0 {
            (
                pack(PackedState {
                    mode: LockMode::ReservedForWriter,
                    active_readers: 0,
                    waiting_writers: st.waiting_writers - 1,
                    ..st
                }),
                Wake::OneWriter,
            )
        } else if st.waiting_readers > 0 {
            (
                pack(PackedState {
                    mode: LockMode::OwnedByReaders,
                    active_readers: st.waiting_readers,
                    waiting_readers: 0,
                    waiting_writers: 0,
                }),
                Wake::Readers(st.waiting_readers),
            )
        } else {
            (
                pack(PackedState {
                    mode: LockMode::Free,
                    active_readers: 0,
                    waiting_readers: 0,
                    waiting_writers: 0,
                }),
                Wake::None,
            )
        }
    }

    fn wake(&self, wake: Wake) {
        match wake {
            Wake::None => {}
            Wake::OneWriter => self.writer_sem.release(1),
            Wake::Readers(n) => self.reader_sem.release(n),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Wake {
    None,
    OneWriter,
    Readers(usize),
}

impl RawLock for BitLock {
    fn release_write(&self) {
        self.release_write_inner();
    }

    fn release_read(&self) {
        self.release_read_inner();
    }
}

impl LockContract for BitLock {
    fn wait_to_write(&self) -> LockResult<WriteToken<'_>> {
        self.acquire_write();
        Ok(WriteToken::new(self))
    }

    fn wait_to_read(&self) -> LockResult<ReadToken<'_>> {
        self.acquire_read()?;
        Ok(ReadToken::new(self))
    }

    fn try_wait_to_write(&self) -> Option<WriteToken<'_>> {
        self.try_acquire_write().then(|| WriteToken::new(self))
    }

    fn try_wait_to_read(&self) -> Option<ReadToken<'_>> {
        self.try_acquire_read().then(|| ReadToken::new(self))
    }

    fn strategy_name(&self) -> &'static str {
        "bit_lock"
    }
}
