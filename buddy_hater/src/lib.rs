#![deny(unsafe_op_in_unsafe_fn)]

use std::ptr::NonNull;

use alloc_hater::Subject;
use fixed_buddy::{ArenaError, BuddyArena, Global};

pub struct BuddySubject<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize>(
    BuddyArena<ARENA_SIZE, MIN_BLOCK_SIZE, Global>,
);

impl<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize> BuddySubject<ARENA_SIZE, MIN_BLOCK_SIZE> {
    pub fn new() -> Result<Self, ArenaError> {
        let mut arena = BuddyArena::new();
        arena.init()?;
        Ok(BuddySubject(arena))
    }

    pub fn arena(&self) -> &BuddyArena<ARENA_SIZE, MIN_BLOCK_SIZE, Global> {
        &self.0
    }
}

impl<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize> Subject
    for BuddySubject<ARENA_SIZE, MIN_BLOCK_SIZE>
{
    type AllocError = ArenaError;

    fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, Self::AllocError> {
        self.0.alloc(size)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) {
        unsafe { self.0.free(ptr.as_ptr(), size) }.expect("freeing an allocated block failed");
    }
}

#[cfg(test)]
mod tests {
    use alloc_hater::{AllocatorOp, Evaluator};

    use super::*;

    #[test]
    fn mixed_sizes_leave_arena_whole() {
        let ops = vec![
            AllocatorOp::Alloc(100),
            AllocatorOp::Alloc(1),
            AllocatorOp::Alloc(512),
            AllocatorOp::Dealloc(1),
            AllocatorOp::Alloc(0),
            AllocatorOp::Alloc(2048),
            AllocatorOp::Alloc(64),
            AllocatorOp::Dealloc(0),
            AllocatorOp::Alloc(1024),
        ];

        let mut eval = Evaluator::new(BuddySubject::<1024, 16>::new().unwrap());
        eval.evaluate(ops).unwrap();

        let subject = eval.into_subject();
        assert_eq!(subject.arena().free_blocks().collect::<Vec<_>>(), vec![0..1024]);
    }
}
