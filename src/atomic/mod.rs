/*!
 * Atomic Field Operations
 *
 * Masked read-modify-write helpers over a single integer-sized shared cell.
 * Foundation for every packed-bitfield lock in the crate.
 *
 * # Design
 *
 * Each operation reads the current value, computes the replacement, and
 * retries a compare-and-swap until no interleaving write is observed,
 * returning the pre-update value. `masked_exchange` replaces only the bits
 * covered by a mask and preserves the rest - the primitive on which all
 * packed-state transitions are built.
 *
 * # Progress
 *
 * No operation ever blocks; all are wait-free modulo contention. Callers
 * that need to park do so only after one of these helpers has published a
 * definitive state transition.
 */

use std::sync::atomic::{AtomicUsize, Ordering};

/// Masked compare-and-swap helpers over one `AtomicUsize` cell.
///
/// All operations return the value observed immediately before the update,
/// mirroring the `fetch_*` family in the standard library.
#[derive(Debug, Default)]
pub struct AtomicField {
    cell: AtomicUsize,
}

impl AtomicField {
    /// Create a field holding `initial`.
    #[inline]
    pub const fn new(initial: usize) -> Self {
        Self {
            cell: AtomicUsize::new(initial),
        }
    }

    /// Load the current value.
    #[inline]
    pub fn load(&self, order: Ordering) -> usize {
        self.cell.load(order)
    }

    /// Store a value directly. Only sound when the caller holds exclusive
    /// logical ownership of the cell (e.g. inside a granted write section).
    #[inline]
    pub fn store(&self, value: usize, order: Ordering) {
        self.cell.store(value, order)
    }

    /// Raw compare-exchange on the whole word.
    #[inline]
    pub fn compare_exchange(
        &self,
        current: usize,
        new: usize,
        success: Ordering,
        failure: Ordering,
    ) -> Result<usize, usize> {
        self.cell.compare_exchange(current, new, success, failure)
    }

    /// Retry loop applying `f` to the observed value until the CAS lands.
    /// Returns the pre-update value.
    #[inline]
    pub fn update<F>(&self, order: Ordering, mut f: F) -> usize
    where
        F: FnMut(usize) -> usize,
    {
        let mut current = self.cell.load(Ordering::Relaxed);
        loop {
            let new = f(current);
            match self
                .cell
                .compare_exchange_weak(current, new, order, Ordering::Relaxed)
            {
                Ok(prev) => return prev,
                Err(observed) => current = observed,
            }
        }
    }

    /// Bitwise AND, returning the pre-update value.
    #[inline]
    pub fn and(&self, operand: usize, order: Ordering) -> usize {
        self.update(order, |v| v & operand)
    }

    /// Bitwise OR, returning the pre-update value.
    #[inline]
    pub fn or(&self, operand: usize, order: Ordering) -> usize {
        self.update(order, |v| v | operand)
    }

    /// Bitwise XOR, returning the pre-update value.
    #[inline]
    pub fn xor(&self, operand: usize, order: Ordering) -> usize {
        self.update(order, |v| v ^ operand)
    }

    /// AND applied only to the bits under `mask`; bits outside are preserved.
    #[inline]
    pub fn masked_and(&self, mask: usize, operand: usize, order: Ordering) -> usize {
        self.update(order, |v| (v & !mask) | (v & operand & mask))
    }

    /// OR applied only to the bits under `mask`; bits outside are preserved.
    #[inline]
    pub fn masked_or(&self, mask: usize, operand: usize, order: Ordering) -> usize {
        self.update(order, |v| v | (operand & mask))
    }

    /// XOR applied only to the bits under `mask`; bits outside are preserved.
    #[inline]
    pub fn masked_xor(&self, mask: usize, operand: usize, order: Ordering) -> usize {
        self.update(order, |v| v ^ (operand & mask))
    }

    /// Add `delta` to the field under `mask`, wrapping within the field and
    /// preserving all bits outside it. Returns the pre-update value.
    #[inline]
    pub fn masked_add(&self, mask: usize, delta: usize, order: Ordering) -> usize {
        self.update(order, |v| {
            let field = v & mask;
            let sum = field.wrapping_add(delta) & mask;
            (v & !mask) | sum
        })
    }

    /// Replace only the bits under `mask` with `value & mask`, preserving the
    /// rest. Returns the pre-update value.
    #[inline]
    pub fn masked_exchange(&self, mask: usize, value: usize, order: Ordering) -> usize {
        self.update(order, |v| (v & !mask) | (value & mask))
    }

    /// Set the bit at `bit`, returning whether it was previously set.
    #[inline]
    pub fn bit_test_and_set(&self, bit: u32, order: Ordering) -> bool {
        let mask = 1usize << bit;
        self.or(mask, order) & mask != 0
    }

    /// Clear the bit at `bit`, returning whether it was previously set.
    #[inline]
    pub fn bit_test_and_reset(&self, bit: u32, order: Ordering) -> bool {
        let mask = 1usize << bit;
        self.and(!mask, order) & mask != 0
    }

    /// Flip the bit at `bit`, returning whether it was previously set.
    #[inline]
    pub fn bit_test_and_complement(&self, bit: u32, order: Ordering) -> bool {
        let mask = 1usize << bit;
        self.xor(mask, order) & mask != 0
    }
}
