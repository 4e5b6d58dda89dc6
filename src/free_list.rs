use core::{marker::PhantomData, num::NonZeroUsize};

use crate::base::{BasePtr, Cell};

/// A list of free blocks of a single size class.
///
/// Blocks are appended at the tail and taken from the head, so a list hands
/// out its blocks in the order they were freed.
#[derive(Debug, Default)]
pub struct FreeList {
    head: Option<NonZeroUsize>,
    tail: Option<NonZeroUsize>,
    len: usize,
}

impl FreeList {
    pub const fn new() -> FreeList {
        FreeList {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Forgets every block in the list without touching the blocks.
    pub fn clear(&mut self) {
        *self = FreeList::new();
    }

    /// Writes a `Cell` of `size` bytes at `block` and appends it to the list.
    ///
    /// # Safety
    ///
    /// The caller must uphold the following invariants:
    /// - `block` must be within the arena of `base`, aligned for `Cell`
    ///   values and free.
    /// - `block` must not already be an element of the list.
    pub unsafe fn append(&mut self, base: BasePtr, block: NonZeroUsize, size: usize) {
        unsafe { base.init_cell_at(block, Cell { size, next: None }) };

        match self.tail {
            // Link the old tail forward to the new one.
            Some(tail) => unsafe { base.cell_mut(tail).next = Some(block) },

            // The list was empty.
            None => self.head = Some(block),
        }

        self.tail = Some(block);
        self.len += 1;
    }

    /// Removes the head of the list.
    ///
    /// If the list is empty, returns `None`.
    ///
    /// # Safety
    ///
    /// The list must belong to the arena of `base`.
    pub unsafe fn pop_front(&mut self, base: BasePtr, size: usize) -> Option<NonZeroUsize> {
        let head = self.head?;

        let cell = unsafe { base.cell(head) };
        assert_eq!(cell.size, size, "free block has the wrong size");

        self.head = cell.next;
        if self.head.is_none() {
            self.tail = None;
        }
        self.len -= 1;

        Some(head)
    }

    /// Removes `block` from the list.
    ///
    /// If the block is not present, returns `None` and leaves the list
    /// unchanged.
    ///
    /// # Safety
    ///
    /// The list must belong to the arena of `base`.
    pub unsafe fn find_remove(&mut self, base: BasePtr, block: NonZeroUsize) -> Option<NonZeroUsize> {
        let mut prev: Option<NonZeroUsize> = None;
        let mut current = self.head;

        // As in `Cells::next`, the length bounds the walk on a cyclic list.
        for _ in 0..self.len {
            let cur = current?;
            let next = unsafe { base.cell(cur).next };

            if cur == block {
                match prev {
                    // Link `prev` forward to `next`.
                    Some(p) => unsafe { base.cell_mut(p).next = next },

                    // If there's no previous block, then `block` is the head.
                    None => self.head = next,
                }

                if self.tail == Some(cur) {
                    self.tail = prev;
                }
                self.len -= 1;

                return Some(cur);
            }

            prev = current;
            current = next;
        }

        None
    }

    /// Returns an iterator over the addresses of the blocks in the list.
    ///
    /// # Safety
    ///
    /// The list must belong to the arena of `base`, and the list must not be
    /// modified while the iterator exists.
    pub unsafe fn iter(&self, base: BasePtr) -> Cells<'_> {
        Cells {
            base,
            current: self.head,
            remaining: self.len,
            phantom: PhantomData,
        }
    }
}

/// An iterator over the blocks of a [`FreeList`].
pub struct Cells<'a> {
    base: BasePtr,
    current: Option<NonZeroUsize>,
    remaining: usize,
    phantom: PhantomData<&'a FreeList>,
}

impl Iterator for Cells<'_> {
    type Item = NonZeroUsize;

    fn next(&mut self) -> Option<Self::Item> {
        // The length bounds the walk even if a double free has made the list
        // cyclic.
        if self.remaining == 0 {
            return None;
        }

        let cur = self.current?;
        self.current = unsafe { self.base.cell(cur).next };
        self.remaining -= 1;

        Some(cur)
    }
}
