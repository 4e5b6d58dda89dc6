//! A binary-buddy allocator over a single fixed-size arena.

use core::{alloc::Layout, fmt, iter::FusedIterator, num::NonZeroUsize, ops::Range, ptr::NonNull};

#[cfg(feature = "sptr")]
use crate::core::ptr::Strict;

#[cfg(any(feature = "alloc", test))]
use crate::Global;

use crate::{
    base::BasePtr,
    free_list::{Cells, FreeList},
    size_class::SizeClasses,
    ArenaError, BackingAllocator, Raw,
};

/// One free list per possible size class, indexed by the class itself.
const NUM_CLASSES: usize = usize::BITS as usize;

/// A binary-buddy allocator managing one arena of `ARENA_SIZE` bytes.
///
/// This takes two const parameters:
/// - `ARENA_SIZE` is the size of the arena, and of the largest possible
///   allocation.
/// - `MIN_BLOCK_SIZE` is the size of the smallest block the arena hands out.
///
/// These parameters are subject to the following invariants:
/// - Both must be powers of two.
/// - `MIN_BLOCK_SIZE` must be at least `2 * mem::size_of::<usize>()`, the size
///   of the header written into every free block.
/// - `MIN_BLOCK_SIZE` must not exceed `ARENA_SIZE`.
///
/// Attempting to construct a `BuddyArena` whose const parameters violate these
/// invariants will result in a panic.
///
/// An arena starts out uninitialized. [`init`](Self::init) obtains the region
/// from the backing allocator and [`destroy`](Self::destroy) returns it; the
/// arena may be initialized again afterwards.
pub struct BuddyArena<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize, A: BackingAllocator> {
    /// Pointer to the arena, if it is initialized.
    base: Option<BasePtr>,
    free_lists: [FreeList; NUM_CLASSES],
    backing_allocator: A,
}

impl<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize> BuddyArena<ARENA_SIZE, MIN_BLOCK_SIZE, Raw> {
    /// Constructs a new, uninitialized `BuddyArena` over a region supplied by
    /// the caller.
    ///
    /// # Safety
    ///
    /// The caller must uphold the following invariants:
    /// - `region` must be a pointer to a region that satisfies the [`Layout`]
    ///   returned by [`Self::region_layout()`], and it must be valid for reads
    ///   and writes for the entire size indicated by that `Layout`.
    /// - `region` must remain valid, and must not be accessed except through
    ///   blocks allocated by the arena, until the arena is dropped.
    pub unsafe fn new_raw(region: NonNull<u8>) -> BuddyArena<ARENA_SIZE, MIN_BLOCK_SIZE, Raw> {
        let layout = Self::region_layout();
        assert_eq!(
            region.as_ptr().align_offset(layout.align()),
            0,
            "region is insufficiently aligned"
        );

        Self::with_backing_allocator(unsafe { Raw::new(region) })
    }
}

#[cfg(any(feature = "alloc", test))]
impl<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize> BuddyArena<ARENA_SIZE, MIN_BLOCK_SIZE, Global> {
    /// Constructs a new, uninitialized `BuddyArena` backed by the global
    /// allocator.
    ///
    /// No memory is allocated until [`init`](Self::init) is called.
    #[cfg_attr(docs_rs, doc(cfg(feature = "alloc")))]
    pub fn new() -> BuddyArena<ARENA_SIZE, MIN_BLOCK_SIZE, Global> {
        Self::with_backing_allocator(Global)
    }
}

#[cfg(any(feature = "alloc", test))]
impl<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize> Default
    for BuddyArena<ARENA_SIZE, MIN_BLOCK_SIZE, Global>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize, A: BackingAllocator> Drop
    for BuddyArena<ARENA_SIZE, MIN_BLOCK_SIZE, A>
{
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize, A: BackingAllocator>
    BuddyArena<ARENA_SIZE, MIN_BLOCK_SIZE, A>
{
    fn with_backing_allocator(backing_allocator: A) -> Self {
        SizeClasses::<ARENA_SIZE, MIN_BLOCK_SIZE>::assert_invariants();

        const EMPTY: FreeList = FreeList::new();

        BuddyArena {
            base: None,
            free_lists: [EMPTY; NUM_CLASSES],
            backing_allocator,
        }
    }

    /// Returns the layout requirements of the region managed by an arena of
    /// this type.
    pub fn region_layout() -> Layout {
        SizeClasses::<ARENA_SIZE, MIN_BLOCK_SIZE>::assert_invariants();

        Layout::from_size_align(ARENA_SIZE, MIN_BLOCK_SIZE).unwrap()
    }

    /// Obtains the arena from the backing allocator and makes it available as
    /// a single free block.
    ///
    /// Calling this on an initialized arena does nothing.
    ///
    /// # Errors
    ///
    /// Returns `Err(ArenaError::OutOfMemory)` if the region cannot be obtained.
    pub fn init(&mut self) -> Result<(), ArenaError> {
        if self.base.is_some() {
            return Ok(());
        }

        let layout = Self::region_layout();
        let region = match self.backing_allocator.acquire(layout) {
            Some(r) => r,
            None => {
                log::debug!("init: failed to obtain {}-byte arena", ARENA_SIZE);
                return Err(ArenaError::OutOfMemory);
            }
        };

        let base = BasePtr::new(region, ARENA_SIZE);
        self.base = Some(base);

        // SAFETY: the region was just obtained, so nothing has been allocated
        // from it.
        unsafe { self.reset_free_lists(base) };

        log::debug!("init: arena of {} bytes at {:p}", ARENA_SIZE, region);

        Ok(())
    }

    /// Returns every block to the free lists as a single whole-arena block.
    ///
    /// Does nothing if the arena is not initialized.
    ///
    /// # Safety
    ///
    /// All outstanding allocations are invalidated when this method is called.
    /// No block allocated before the call may be accessed or freed afterwards.
    pub unsafe fn reset(&mut self) {
        if let Some(base) = self.base {
            unsafe { self.reset_free_lists(base) };
            log::debug!("reset: arena at {:p}", base.ptr());
        }
    }

    unsafe fn reset_free_lists(&mut self, base: BasePtr) {
        self.free_lists.iter_mut().for_each(FreeList::clear);

        unsafe { self.free_lists[Self::K_MAX].append(base, base.ptr().addr(), ARENA_SIZE) };
    }

    /// Returns the region to the backing allocator and forgets every free
    /// block.
    ///
    /// The arena returns to the uninitialized state. Calling this on an
    /// uninitialized arena does nothing.
    pub fn destroy(&mut self) {
        let base = match self.base.take() {
            Some(b) => b,
            None => return,
        };

        self.free_lists.iter_mut().for_each(FreeList::clear);

        // SAFETY: `base` was obtained from `acquire` with the same layout in
        // `init`, and `self.base` no longer refers to it.
        unsafe {
            self.backing_allocator
                .release(base.ptr(), Self::region_layout())
        };

        log::debug!("destroy: released arena at {:p}", base.ptr());
    }

    /// Returns `true` if the arena is initialized.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.base.is_some()
    }

    /// Returns a pointer to the start of the arena, if it is initialized.
    #[inline]
    pub fn base(&self) -> Option<NonNull<u8>> {
        self.base.map(BasePtr::ptr)
    }

    const K_MAX: usize = SizeClasses::<ARENA_SIZE, MIN_BLOCK_SIZE>::K_MAX;

    /// Attempts to allocate a block of at least `size` bytes.
    ///
    /// On success, returns a [`NonNull<[u8]>`] spanning the whole block, whose
    /// length is `size` rounded up to a block size. The contents of the block
    /// are uninitialized.
    ///
    /// The smallest nonempty size class at or above the requested one
    /// supplies the block; if that class is larger than requested, the block
    /// is split in halves until it has the requested size, and each upper
    /// half is made free.
    ///
    /// # Errors
    ///
    /// - `NotInitialized` if the arena is not initialized.
    /// - `InvalidSize` if `size` is zero.
    /// - `SizeExceedsArena` if `size` rounds up past `ARENA_SIZE`.
    /// - `OutOfMemory` if no free block is large enough.
    ///
    /// [`NonNull<[u8]>`]: NonNull
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<[u8]>, ArenaError> {
        let base = self.base.ok_or(ArenaError::NotInitialized)?;

        if size == 0 {
            log::debug!("alloc({size}): zero-sized request");
            return Err(ArenaError::InvalidSize);
        }

        let block_size = match SizeClasses::<ARENA_SIZE, MIN_BLOCK_SIZE>::fix_size(size) {
            Some(s) => s,
            None => {
                log::debug!("alloc({size}): larger than the arena");
                return Err(ArenaError::SizeExceedsArena);
            }
        };
        let target = SizeClasses::<ARENA_SIZE, MIN_BLOCK_SIZE>::class_index(block_size);

        // Scan increasing block sizes until a free block is found.
        let found = (target..=Self::K_MAX).find_map(|k| {
            let k_size = SizeClasses::<ARENA_SIZE, MIN_BLOCK_SIZE>::class_size(k);
            unsafe { self.free_lists[k].pop_front(base, k_size) }.map(|block| (block, k))
        });

        let (block, found_class) = match found {
            Some(f) => f,
            None => {
                log::debug!("alloc({size}): no free block of {block_size} bytes or larger");
                return Err(ArenaError::OutOfMemory);
            }
        };

        // Split the block repeatedly to obtain a suitably sized block. The
        // address of the front half does not change.
        for k in (target..found_class).rev() {
            let half_block_size = SizeClasses::<ARENA_SIZE, MIN_BLOCK_SIZE>::class_size(k);
            let back_half = base.addr_at(base.offset_to(block) + half_block_size);

            // SAFETY: the back half lies inside the block just taken from a
            // free list, so it is free and within the arena.
            unsafe { self.free_lists[k].append(base, back_half, half_block_size) };

            log::trace!(
                "alloc({size}): split off {half_block_size}-byte block at offset {}",
                base.offset_to(back_half)
            );
        }

        log::trace!(
            "alloc({size}) -> {block_size}-byte block at offset {}",
            base.offset_to(block)
        );

        // The returned block inherits the provenance of the base pointer.
        Ok(base.with_addr_and_size(block, block_size))
    }

    /// Frees the block of `size` bytes starting at `ptr`.
    ///
    /// `size` is rounded up the same way as in [`alloc`](Self::alloc), so it
    /// may be either the size originally requested or the length of the
    /// returned block. While the buddy of the freed block is also free, the
    /// two are merged into their parent block.
    ///
    /// # Errors
    ///
    /// - `InvalidPointer` if `ptr` is null, `usize::MAX`, outside the arena,
    ///   or not aligned to the rounded-up `size`. An uninitialized arena
    ///   contains no pointers, so this is also returned in that case.
    /// - `InvalidSize` if `size` is zero or larger than the arena.
    ///
    /// The free lists are left unchanged on error.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a block currently allocated from this arena with a
    /// size that rounds up to the same block size as `size`. Freeing a block
    /// twice is not detected, and corrupts the free lists.
    pub unsafe fn free(&mut self, ptr: *mut u8, size: usize) -> Result<(), ArenaError> {
        let base = self.base.ok_or(ArenaError::InvalidPointer)?;

        let addr = NonZeroUsize::new(ptr.addr())
            .filter(|&addr| addr.get() != usize::MAX && base.contains_addr(addr))
            .ok_or(ArenaError::InvalidPointer)?;

        if size == 0 {
            return Err(ArenaError::InvalidSize);
        }
        let mut block_size =
            SizeClasses::<ARENA_SIZE, MIN_BLOCK_SIZE>::fix_size(size).ok_or(ArenaError::InvalidSize)?;

        let mut block_ofs = base.offset_to(addr);
        if block_ofs % block_size != 0 {
            log::debug!("free({:p}, {size}): not aligned to {block_size} bytes", ptr);
            return Err(ArenaError::InvalidPointer);
        }

        // Merge with the buddy for as long as it is free. The whole arena has
        // no buddy.
        while block_size < ARENA_SIZE {
            let k = SizeClasses::<ARENA_SIZE, MIN_BLOCK_SIZE>::class_index(block_size);

            // Blocks only ever differ from their buddy in the bit of their
            // shared size, relative to the base.
            let buddy_ofs = block_ofs ^ block_size;
            let buddy = base.addr_at(buddy_ofs);

            if unsafe { self.free_lists[k].find_remove(base, buddy) }.is_none() {
                break;
            }

            log::trace!(
                "free: merged {block_size}-byte blocks at offsets {block_ofs} and {buddy_ofs}"
            );

            block_ofs &= !block_size;
            block_size *= 2;
        }

        let k = SizeClasses::<ARENA_SIZE, MIN_BLOCK_SIZE>::class_index(block_size);

        // SAFETY: the caller guarantees the block was allocated, and any merged
        // buddies were just removed from the free lists.
        unsafe { self.free_lists[k].append(base, base.addr_at(block_ofs), block_size) };

        log::trace!("free({:p}, {size}) -> {block_size}-byte block at offset {block_ofs}", ptr);

        Ok(())
    }

    /// Returns an iterator over the free blocks of the arena.
    ///
    /// Each block is given as the range of offsets it spans from the start of
    /// the arena. Blocks are yielded from the smallest size class to the
    /// largest, and in free-list order within a class. An uninitialized arena
    /// has no free blocks.
    pub fn free_blocks(&self) -> FreeBlocks<'_, ARENA_SIZE, MIN_BLOCK_SIZE> {
        FreeBlocks {
            base: self.base,
            free_lists: &self.free_lists,
            class: SizeClasses::<ARENA_SIZE, MIN_BLOCK_SIZE>::K_MIN,
            cells: None,
        }
    }

    /// Returns the total size of the free blocks, in bytes.
    pub fn free_bytes(&self) -> usize {
        self.free_blocks().map(|range| range.len()).sum()
    }

    /// Returns the number of free blocks of `block_size` bytes.
    ///
    /// Returns zero if `block_size` is not the size of a size class.
    pub fn free_count(&self, block_size: usize) -> usize {
        if !block_size.is_power_of_two() || block_size < MIN_BLOCK_SIZE || block_size > ARENA_SIZE {
            return 0;
        }

        if self.base.is_none() {
            return 0;
        }

        self.free_lists[SizeClasses::<ARENA_SIZE, MIN_BLOCK_SIZE>::class_index(block_size)].len()
    }
}

impl<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize, A> fmt::Debug
    for BuddyArena<ARENA_SIZE, MIN_BLOCK_SIZE, A>
where
    A: BackingAllocator + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuddyArena")
            .field("arena_size", &ARENA_SIZE)
            .field("min_block_size", &MIN_BLOCK_SIZE)
            .field("base", &self.base())
            .field("free_bytes", &self.free_bytes())
            .field("backing_allocator", &self.backing_allocator)
            .finish()
    }
}

/// An iterator over the free blocks of a [`BuddyArena`].
///
/// This type is returned by [`BuddyArena::free_blocks`].
pub struct FreeBlocks<'a, const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize> {
    base: Option<BasePtr>,
    free_lists: &'a [FreeList; NUM_CLASSES],
    class: usize,
    cells: Option<Cells<'a>>,
}

impl<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize> Iterator
    for FreeBlocks<'_, ARENA_SIZE, MIN_BLOCK_SIZE>
{
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let base = self.base?;

        loop {
            if let Some(block) = self.cells.as_mut().and_then(Iterator::next) {
                // `self.class` was advanced past the list being walked.
                let size = 1 << (self.class - 1);
                let start = base.offset_to(block);
                return Some(start..start + size);
            }

            if self.class > SizeClasses::<ARENA_SIZE, MIN_BLOCK_SIZE>::K_MAX {
                return None;
            }

            // SAFETY: the free lists are borrowed for the lifetime of the
            // iterator, so they cannot be modified while it exists.
            self.cells = Some(unsafe { self.free_lists[self.class].iter(base) });
            self.class += 1;
        }
    }
}

impl<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize> FusedIterator
    for FreeBlocks<'_, ARENA_SIZE, MIN_BLOCK_SIZE>
{
}

impl<const ARENA_SIZE: usize, const MIN_BLOCK_SIZE: usize> fmt::Debug
    for FreeBlocks<'_, ARENA_SIZE, MIN_BLOCK_SIZE>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeBlocks")
            .field("class", &self.class)
            .finish_non_exhaustive()
    }
}
