//! A fixed-arena binary-buddy allocator.
//!
//! A [`BuddyArena`] carves one statically sized region into power-of-two
//! blocks. Free blocks are tracked by intrusive singly linked lists, one per
//! size class, whose links live in the first bytes of the free blocks
//! themselves. Allocation splits larger blocks on demand; deallocation merges
//! a block with its buddy for as long as the buddy is free.
//!
//! ```
//! use core::ptr::NonNull;
//!
//! use fixed_buddy::{ArenaError, BuddyArena, Raw};
//!
//! #[repr(C, align(1024))]
//! struct Region([u8; 1024]);
//!
//! let mut region = Region([0; 1024]);
//! let ptr = NonNull::new(region.0.as_mut_ptr()).unwrap();
//!
//! // SAFETY: `region` outlives the arena and satisfies its layout.
//! let mut arena: BuddyArena<1024, 16, Raw> = unsafe { BuddyArena::new_raw(ptr) };
//! assert_eq!(arena.alloc(100), Err(ArenaError::NotInitialized));
//!
//! arena.init().unwrap();
//! let block = arena.alloc(100).unwrap();
//! assert_eq!(block.len(), 128);
//!
//! unsafe { arena.free(block.as_ptr().cast(), 100).unwrap() };
//! assert_eq!(arena.free_count(1024), 1);
//! ```

#![doc(html_root_url = "https://docs.rs/fixed_buddy/0.1.0")]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![no_std]
#![cfg_attr(docs_rs, feature(doc_cfg))]
// This is necessary to allow `sptr` to shadow methods which have since been
// stabilized in `core`.
#![allow(unstable_name_collisions)]

#[cfg(any(feature = "alloc", test))]
extern crate alloc;

mod base;
pub mod buddy;
mod core;
mod free_list;
pub mod size_class;

#[cfg(test)]
mod tests;

use ::core::{alloc::Layout, fmt, ptr::NonNull};

pub use crate::{
    buddy::{BuddyArena, FreeBlocks},
    size_class::SizeClasses,
};

/// The error type for arena operations.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArenaError {
    /// The arena has not been initialized, or has been destroyed.
    NotInitialized,

    /// The requested size is zero, or a freed size exceeds the arena.
    InvalidSize,

    /// The requested size, once rounded up to a block size, is larger than
    /// the arena.
    SizeExceedsArena,

    /// No free block of sufficient size exists.
    ///
    /// This is also returned by [`BuddyArena::init`] when the backing region
    /// cannot be obtained.
    OutOfMemory,

    /// The pointer is null, the `usize::MAX` sentinel, outside the arena, or
    /// not aligned to the block size it was freed with.
    InvalidPointer,
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ArenaError::NotInitialized => "arena is not initialized",
            ArenaError::InvalidSize => "invalid block size",
            ArenaError::SizeExceedsArena => "requested size exceeds the arena",
            ArenaError::OutOfMemory => "no free block of sufficient size",
            ArenaError::InvalidPointer => "pointer does not denote a block of the arena",
        };

        f.write_str(msg)
    }
}

impl ::core::error::Error for ArenaError {}

/// Types which provide the memory region that backs an arena.
///
/// This trait is sealed, and is implemented by the following types:
/// - [`Raw`] wraps a region supplied by the caller. Nothing is allocated or
///   freed; the region is handed back to the arena every time it is
///   initialized.
/// - [`Global`] obtains the region from the global allocator on
///   [`init`](BuddyArena::init) and returns it on
///   [`destroy`](BuddyArena::destroy).
pub trait BackingAllocator: Sealed {
    /// Obtains a region satisfying `layout`.
    ///
    /// Returns `None` if the region cannot be obtained.
    fn acquire(&mut self, layout: Layout) -> Option<NonNull<u8>>;

    /// Returns the region referenced by `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `acquire(layout)` on this value, and it
    /// must not have been released since.
    unsafe fn release(&mut self, ptr: NonNull<u8>, layout: Layout);
}

/// A backing allocator wrapping a region supplied by the caller.
#[derive(Clone, Debug)]
pub struct Raw {
    region: NonNull<u8>,
}

impl Raw {
    /// Wraps `region`.
    ///
    /// # Safety
    ///
    /// `region` must satisfy the layout of the arena it is used with, and it
    /// must be valid for reads and writes for the arena's entire size for as
    /// long as the arena exists.
    pub(crate) unsafe fn new(region: NonNull<u8>) -> Raw {
        Raw { region }
    }
}

impl Sealed for Raw {}
impl BackingAllocator for Raw {
    fn acquire(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        let _ = layout;
        Some(self.region)
    }

    unsafe fn release(&mut self, _: NonNull<u8>, _: Layout) {}
}

/// The global memory allocator.
#[cfg(any(feature = "alloc", test))]
#[cfg_attr(docs_rs, doc(cfg(feature = "alloc")))]
#[derive(Clone, Debug, Default)]
pub struct Global;

#[cfg(any(feature = "alloc", test))]
impl Sealed for Global {}

#[cfg(any(feature = "alloc", test))]
impl BackingAllocator for Global {
    fn acquire(&mut self, layout: Layout) -> Option<NonNull<u8>> {
        // SAFETY: arena layouts never have a size of zero.
        NonNull::new(unsafe { alloc::alloc::alloc(layout) })
    }

    unsafe fn release(&mut self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

#[doc(hidden)]
mod private {
    pub trait Sealed {}
}
use private::Sealed;
