//! Mapping of requested sizes to power-of-two size classes.
//!
//! A block of class `k` is `2^k` bytes long. The classes of an arena range
//! from `log2(MIN_BLOCK_SIZE)` to `log2(ARENA_SIZE)`.

use crate::{base::Cell, core::mem};

/// The size classes of an arena of `ARENA_SIZE` bytes whose smallest block is
/// `MIN_BLOCK_SIZE` bytes.
///
/// Both parameters must be powers of two, `MIN_BLOCK_SIZE` must be large
/// enough to hold the header of a free block, and `MIN_BLOCK_SIZE` must not
/// exceed `ARENA_SIZE`. These are checked by
/// [`assert_invariants`](Self::assert_invariants).
#[derive(Copy, Clone, Debug)]
pub struct SizeClasses<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize>;

impl<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize> SizeClasses<ARENA_SIZE, MIN_BLOCK_SIZE> {
    /// The class of the smallest block.
    pub const K_MIN: usize = MIN_BLOCK_SIZE.trailing_zeros() as usize;

    /// The class of the whole arena.
    pub const K_MAX: usize = ARENA_SIZE.trailing_zeros() as usize;

    /// Panics if the const parameters are impossible to satisfy.
    pub fn assert_invariants() {
        assert!(
            ARENA_SIZE.is_power_of_two(),
            "arena size must be a power of two"
        );
        assert!(
            MIN_BLOCK_SIZE.is_power_of_two(),
            "minimum block size must be a power of two"
        );
        assert!(
            MIN_BLOCK_SIZE >= mem::size_of::<Cell>(),
            "minimum block size must be at least mem::size_of::<Cell>() bytes"
        );
        assert!(
            MIN_BLOCK_SIZE <= ARENA_SIZE,
            "minimum block size must not exceed the arena size"
        );
    }

    /// Rounds `requested` up to the size of the smallest block that can hold
    /// it.
    ///
    /// Requests smaller than `MIN_BLOCK_SIZE` are raised to `MIN_BLOCK_SIZE`;
    /// all others are raised to the next power of two. Returns `None` if the
    /// result would exceed `ARENA_SIZE`.
    ///
    /// ```
    /// use fixed_buddy::SizeClasses;
    ///
    /// type Classes = SizeClasses<1024, 16>;
    ///
    /// assert_eq!(Classes::fix_size(1), Some(16));
    /// assert_eq!(Classes::fix_size(100), Some(128));
    /// assert_eq!(Classes::fix_size(1024), Some(1024));
    /// assert_eq!(Classes::fix_size(1025), None);
    /// ```
    #[inline]
    pub fn fix_size(requested: usize) -> Option<usize> {
        let size = if requested < MIN_BLOCK_SIZE {
            MIN_BLOCK_SIZE
        } else {
            requested.checked_next_power_of_two()?
        };

        (size <= ARENA_SIZE).then_some(size)
    }

    /// Returns the class `k` such that `size == 2^k`.
    ///
    /// # Panics
    ///
    /// Panics if `size` is not a power of two.
    #[inline]
    pub fn class_index(size: usize) -> usize {
        assert!(size.is_power_of_two(), "block size must be a power of two");

        size.trailing_zeros() as usize
    }

    /// Returns the size of a block of class `k`.
    #[inline]
    pub fn class_size(k: usize) -> usize {
        debug_assert!((Self::K_MIN..=Self::K_MAX).contains(&k));

        1 << k
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Classes = SizeClasses<1024, 16>;

    #[test]
    fn class_bounds() {
        assert_eq!(Classes::K_MIN, 4);
        assert_eq!(Classes::K_MAX, 10);
    }

    #[test]
    fn small_requests_round_to_minimum() {
        for requested in 1..=16 {
            assert_eq!(Classes::fix_size(requested), Some(16));
        }
    }

    #[test]
    fn powers_of_two_are_unchanged() {
        for k in Classes::K_MIN..=Classes::K_MAX {
            let size = Classes::class_size(k);
            assert_eq!(Classes::fix_size(size), Some(size));
            assert_eq!(Classes::class_index(size), k);
        }
    }

    #[test]
    fn oversized_requests_are_rejected() {
        assert_eq!(Classes::fix_size(1025), None);
        assert_eq!(Classes::fix_size(usize::MAX), None);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn class_index_rejects_non_power_of_two() {
        Classes::class_index(48);
    }

    #[test]
    fn valid_parameters_pass() {
        Classes::assert_invariants();
        SizeClasses::<16, 16>::assert_invariants();
    }

    #[test]
    #[should_panic(expected = "arena size must be a power of two")]
    fn arena_size_must_be_power_of_two() {
        SizeClasses::<1000, 16>::assert_invariants();
    }

    #[test]
    #[should_panic(expected = "at least mem::size_of::<Cell>()")]
    fn minimum_block_must_hold_cell() {
        SizeClasses::<1024, 1>::assert_invariants();
    }
}
