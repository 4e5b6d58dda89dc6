#![no_main]
use alloc_hater::{AllocatorOp, Evaluator};
use buddy_hater::BuddySubject;
use libfuzzer_sys::fuzz_target;

const ARENA_SIZE: usize = 1 << 16;
const MIN_BLOCK_SIZE: usize = 16;

fuzz_target!(|ops: Vec<AllocatorOp>| {
    let subject = BuddySubject::<ARENA_SIZE, MIN_BLOCK_SIZE>::new().unwrap();

    let mut eval = Evaluator::new(subject);
    eval.evaluate(ops).unwrap();

    // Once every block has been freed, the arena must have coalesced back
    // into a single block.
    let subject = eval.into_subject();
    let free: Vec<_> = subject.arena().free_blocks().collect();
    assert_eq!(free, [0..ARENA_SIZE]);
});
