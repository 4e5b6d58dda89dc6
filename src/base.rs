use crate::core::{
    num::NonZeroUsize,
    ptr::{self, NonNull},
};

#[cfg(feature = "sptr")]
use crate::core::ptr::Strict;

/// A pointer to the base of the arena.
#[derive(Copy, Clone, Debug)]
pub struct BasePtr {
    ptr: NonNull<u8>,
    extent: usize,
}

impl BasePtr {
    /// Creates a `BasePtr` from `ptr`.
    ///
    /// The returned value assumes the provenance of `ptr`.
    #[inline]
    pub fn new(ptr: NonNull<u8>, extent: usize) -> BasePtr {
        ptr.addr()
            .get()
            .checked_add(extent)
            .expect("arena limit overflows usize");

        BasePtr { ptr, extent }
    }

    /// Returns the base pointer as a `NonNull<u8>`.
    #[inline]
    pub fn ptr(self) -> NonNull<u8> {
        self.ptr
    }

    #[inline]
    pub fn limit(self) -> NonZeroUsize {
        NonZeroUsize::new(self.ptr.addr().get() + self.extent).unwrap()
    }

    #[inline]
    pub fn contains_addr(self, addr: NonZeroUsize) -> bool {
        self.ptr.addr() <= addr && addr < self.limit()
    }

    /// Calculates the offset from `self` to `block`.
    #[inline]
    pub fn offset_to(self, block: NonZeroUsize) -> usize {
        block.get().checked_sub(self.ptr.addr().get()).unwrap()
    }

    /// Returns the address `offset` bytes past the base.
    #[inline]
    pub fn addr_at(self, offset: usize) -> NonZeroUsize {
        debug_assert!(offset < self.extent);

        // The base is non-null and `offset` lies within the extent, whose
        // limit was checked not to overflow.
        NonZeroUsize::new(self.ptr.addr().get() + offset).unwrap()
    }

    /// Writes a `Cell` at the given address.
    ///
    /// # Safety
    ///
    /// The caller must uphold the following invariants:
    /// - `addr` must be a properly aligned address for `Cell` values.
    /// - The memory at `addr` must be within the provenance of `self` and valid
    ///   for reads and writes for `size_of::<Cell>()` bytes.
    /// - The memory at `addr` must be free.
    #[inline]
    pub unsafe fn init_cell_at(self, addr: NonZeroUsize, cell: Cell) {
        debug_assert!(self.contains_addr(addr));
        debug_assert!(
            cell.next.map_or(true, |next| self.contains_addr(next)),
            "next link out of arena"
        );

        unsafe { self.with_addr(addr).cast::<Cell>().as_ptr().write(cell) };
    }

    /// Returns a mutable reference to the `Cell` at `addr`.
    ///
    /// # Safety
    ///
    /// The caller must uphold the following invariants:
    /// - `addr` must be a properly aligned address for `Cell` values.
    /// - The memory at `addr` must contain a properly initialized `Cell` value.
    /// - The memory at `addr` must be within the provenance of `self` and
    ///   free.
    #[inline]
    pub unsafe fn cell_mut<'a>(self, addr: NonZeroUsize) -> &'a mut Cell {
        debug_assert!(self.contains_addr(addr));

        unsafe { self.with_addr(addr).cast::<Cell>().as_mut() }
    }

    /// Returns a shared reference to the `Cell` at `addr`.
    ///
    /// # Safety
    ///
    /// The same invariants as [`BasePtr::cell_mut`] apply.
    #[inline]
    pub unsafe fn cell<'a>(self, addr: NonZeroUsize) -> &'a Cell {
        debug_assert!(self.contains_addr(addr));

        unsafe { self.with_addr(addr).cast::<Cell>().as_ref() }
    }

    /// Creates a new pointer with the given address.
    ///
    /// The returned pointer has the provenance of this pointer.
    #[inline]
    pub fn with_addr(self, addr: NonZeroUsize) -> NonNull<u8> {
        debug_assert!(self.contains_addr(addr));

        self.ptr.with_addr(addr)
    }

    #[inline]
    pub fn with_addr_and_size(self, addr: NonZeroUsize, len: usize) -> NonNull<[u8]> {
        debug_assert!(self.contains_addr(addr));

        let ptr = self.ptr.as_ptr().with_addr(addr.get());
        let raw_slice = ptr::slice_from_raw_parts_mut(ptr, len);

        unsafe { NonNull::new_unchecked(raw_slice) }
    }
}

// Rather than using pointers, store only the address of the next cell. This
// avoids accidentally violating stacked borrows; the cells "point to" other
// blocks, but by forgoing actual pointers, no borrow is implied.
//
// NOTE: Using this method, any actual pointer to a block must be acquired via
// the arena base pointer, and NOT by casting these addresses directly!

/// The header of a free block.
///
/// This type is written in place at the start of every free block, forming an
/// intrusive singly linked list. It is logically destroyed as soon as the
/// block is allocated or split.
#[repr(C)]
#[derive(Debug)]
pub struct Cell {
    /// The size of the block, in bytes.
    pub size: usize,
    pub next: Option<NonZeroUsize>,
}
