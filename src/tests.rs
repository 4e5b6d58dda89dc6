#![cfg(test)]
extern crate std;

use core::{cmp, ops::Range, ptr::NonNull, slice};

use std::{boxed::Box, vec::Vec};

use quickcheck::{Arbitrary, Gen, QuickCheck};

use crate::{ArenaError, BuddyArena, Global, SizeClasses};

enum AllocatorOpTag {
    Allocate,
    Free,
}

#[derive(Clone, Debug)]
enum AllocatorOp {
    /// Allocate a block of at least `size` bytes.
    Allocate { size: usize },
    /// Free an existing allocation.
    ///
    /// Given `n` outstanding allocations, the allocation to free is at index
    /// `index % n`.
    Free { index: usize },
}

/// Limit on allocation size, expressed in bits.
///
/// This is one bit more than the largest arena under test, so that some
/// requests exceed the arena.
const ALLOC_LIMIT_BITS: u8 = 13;

fn limited_size(g: &mut Gen) -> usize {
    let exp = u8::arbitrary(g) % (ALLOC_LIMIT_BITS + 1);
    usize::arbitrary(g) % 2_usize.pow(exp.into())
}

impl Arbitrary for AllocatorOp {
    fn arbitrary(g: &mut Gen) -> Self {
        match g
            .choose(&[AllocatorOpTag::Allocate, AllocatorOpTag::Free])
            .unwrap()
        {
            AllocatorOpTag::Allocate => AllocatorOp::Allocate {
                size: limited_size(g),
            },
            AllocatorOpTag::Free => AllocatorOp::Free {
                index: usize::arbitrary(g),
            },
        }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        match *self {
            AllocatorOp::Allocate { size } => {
                Box::new(size.shrink().map(|size| AllocatorOp::Allocate { size }))
            }
            AllocatorOp::Free { index } => {
                Box::new(index.shrink().map(|index| AllocatorOp::Free { index }))
            }
        }
    }
}

type OpId = u32;

/// An outstanding allocation, painted with the ID of the operation that made
/// it.
struct Allocation {
    id: OpId,
    block: NonNull<[u8]>,
    size: usize,
}

impl Allocation {
    fn bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.block.cast::<u8>().as_ptr(), self.block.len()) }
    }

    fn paint(&mut self) {
        let id_bytes = self.id.to_le_bytes().into_iter().cycle();
        let bytes =
            unsafe { slice::from_raw_parts_mut(self.block.cast::<u8>().as_ptr(), self.block.len()) };

        for (byte, value) in bytes.iter_mut().zip(id_bytes) {
            *byte = value;
        }
    }

    fn verify(&self) -> bool {
        let id_bytes = self.id.to_le_bytes().into_iter().cycle();

        self.bytes()
            .iter()
            .zip(id_bytes)
            .all(|(&byte, value)| byte == value)
    }
}

struct ArenaChecker<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize> {
    arena: BuddyArena<ARENA_SIZE, MIN_BLOCK_SIZE, Global>,
    allocations: Vec<Allocation>,
    num_ops: u32,
}

impl<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize> ArenaChecker<ARENA_SIZE, MIN_BLOCK_SIZE> {
    fn new() -> Self {
        let mut arena = BuddyArena::new();
        arena.init().unwrap();

        ArenaChecker {
            arena,
            allocations: Vec::new(),
            num_ops: 0,
        }
    }

    fn offset_of(&self, block: NonNull<[u8]>) -> usize {
        let base = self.arena.base().unwrap().as_ptr() as usize;
        block.cast::<u8>().as_ptr() as usize - base
    }

    fn allocated_ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.allocations.iter().map(|a| {
            let start = self.offset_of(a.block);
            start..start + a.block.len()
        })
    }

    fn sorted_free_blocks(&self) -> Vec<Range<usize>> {
        let mut blocks: Vec<_> = self.arena.free_blocks().collect();
        blocks.sort_by_key(|r| r.start);
        blocks
    }

    fn do_op(&mut self, op: AllocatorOp) -> bool {
        let op_id = self.num_ops;
        self.num_ops += 1;

        match op {
            AllocatorOp::Allocate { size } => {
                let fixed = SizeClasses::<ARENA_SIZE, MIN_BLOCK_SIZE>::fix_size(size);

                match self.arena.alloc(size) {
                    Ok(block) => {
                        if size == 0 || Some(block.len()) != fixed {
                            return false;
                        }

                        if self.offset_of(block) % block.len() != 0 {
                            return false;
                        }

                        let mut a = Allocation {
                            id: op_id,
                            block,
                            size,
                        };
                        a.paint();
                        self.allocations.push(a);

                        true
                    }

                    Err(ArenaError::InvalidSize) => size == 0,

                    Err(ArenaError::SizeExceedsArena) => size != 0 && fixed.is_none(),

                    // Out of memory is only acceptable if no free block is large
                    // enough.
                    Err(ArenaError::OutOfMemory) => match fixed {
                        Some(block_size) => self.arena.free_blocks().all(|r| r.len() < block_size),
                        None => false,
                    },

                    Err(_) => false,
                }
            }

            AllocatorOp::Free { index } => {
                if self.allocations.is_empty() {
                    return true;
                }

                let index = index % self.allocations.len();
                let a = self.allocations.swap_remove(index);

                if !a.verify() {
                    return false;
                }

                unsafe { self.arena.free(a.block.cast::<u8>().as_ptr(), a.size) }.is_ok()
            }
        }
    }

    /// Checks that the free and allocated blocks exactly tile the arena, that
    /// every block is aligned to its size, and that no two free buddies were
    /// left unmerged.
    fn tiles(&self) -> bool {
        let free = self.sorted_free_blocks();

        let mut all: Vec<_> = free.iter().cloned().chain(self.allocated_ranges()).collect();
        all.sort_by_key(|r| r.start);

        let mut expected_start = 0;
        for r in &all {
            if r.start != expected_start || !r.len().is_power_of_two() || r.start % r.len() != 0 {
                return false;
            }
            expected_start = r.end;
        }

        if expected_start != ARENA_SIZE {
            return false;
        }

        free.iter().all(|r| {
            let size = r.len();
            let buddy = r.start ^ size;
            size == ARENA_SIZE
                || free
                    .binary_search_by_key(&buddy, |f| f.start)
                    .map_or(true, |i| free[i].len() != size)
        })
    }

    fn run(&mut self, ops: Vec<AllocatorOp>) -> bool {
        if !ops.into_iter().all(|op| self.do_op(op) && self.tiles()) {
            return false;
        }

        // Free any outstanding allocations.
        for a in self.allocations.drain(..) {
            if !a.verify() {
                return false;
            }

            if unsafe { self.arena.free(a.block.cast::<u8>().as_ptr(), a.size) }.is_err() {
                return false;
            }
        }

        self.sorted_free_blocks() == [0..ARENA_SIZE]
    }
}

// Miri is substantially slower to run property tests, so the number of test
// cases is reduced to keep the runtime in check.

#[cfg(not(miri))]
const MAX_TESTS: u64 = 100;

#[cfg(miri)]
const MAX_TESTS: u64 = 20;

fn allocations_tile_arena<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize>(
    ops: Vec<AllocatorOp>,
) -> bool {
    ArenaChecker::<ARENA_SIZE, MIN_BLOCK_SIZE>::new().run(ops)
}

fn alloc_then_free_restores_free_lists<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize>(
    ops: Vec<AllocatorOp>,
    size: usize,
) -> bool {
    let mut checker = ArenaChecker::<ARENA_SIZE, MIN_BLOCK_SIZE>::new();
    if !ops.into_iter().all(|op| checker.do_op(op)) {
        return false;
    }

    let before = checker.sorted_free_blocks();

    if let Ok(block) = checker.arena.alloc(size) {
        if unsafe { checker.arena.free(block.cast::<u8>().as_ptr(), size) }.is_err() {
            return false;
        }
    }

    checker.sorted_free_blocks() == before
}

fn buddy_of_allocation_is_in_arena<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize>(
    ops: Vec<AllocatorOp>,
) -> bool {
    let mut checker = ArenaChecker::<ARENA_SIZE, MIN_BLOCK_SIZE>::new();
    if !ops.into_iter().all(|op| checker.do_op(op)) {
        return false;
    }

    let in_arena = checker.allocated_ranges().all(|r| {
        let size = r.len();
        let buddy = r.start ^ size;
        size == ARENA_SIZE || (buddy % size == 0 && buddy + size <= ARENA_SIZE)
    });

    in_arena
}

fn fix_size_is_smallest_class<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize>(
    requested: usize,
) -> bool {
    let requested = requested % ARENA_SIZE + 1;
    let floor = cmp::max(requested, MIN_BLOCK_SIZE);

    match SizeClasses::<ARENA_SIZE, MIN_BLOCK_SIZE>::fix_size(requested) {
        Some(size) => size.is_power_of_two() && size >= floor && size / 2 < floor,
        None => false,
    }
}

#[test]
fn allocations_are_mutually_exclusive_and_tile_arena() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(allocations_tile_arena::<16, 16> as fn(_) -> bool);
    qc.quickcheck(allocations_tile_arena::<1024, 16> as fn(_) -> bool);
    qc.quickcheck(allocations_tile_arena::<4096, 64> as fn(_) -> bool);
}

#[test]
fn alloc_then_free_is_identity() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(alloc_then_free_restores_free_lists::<1024, 16> as fn(_, _) -> bool);
    qc.quickcheck(alloc_then_free_restores_free_lists::<4096, 32> as fn(_, _) -> bool);
}

#[test]
fn buddies_stay_in_arena() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(buddy_of_allocation_is_in_arena::<1024, 16> as fn(_) -> bool);
    qc.quickcheck(buddy_of_allocation_is_in_arena::<4096, 64> as fn(_) -> bool);
}

#[test]
fn fix_size_normalizes_to_power_of_two() {
    let mut qc = QuickCheck::new().max_tests(MAX_TESTS);
    qc.quickcheck(fix_size_is_smallest_class::<1024, 16> as fn(_) -> bool);
    qc.quickcheck(fix_size_is_smallest_class::<65536, 32> as fn(_) -> bool);
}

// Version sync ================================================================
#[test]
fn html_root_url() {
    version_sync::assert_html_root_url_updated!("src/lib.rs");
}
