//! Re-exports of `core`, plus the strict-provenance polyfill.
//!
//! With the `sptr` feature enabled, the strict-provenance methods on raw
//! pointers are provided by the `sptr` crate for toolchains which predate
//! their stabilization. Otherwise, the inherent methods in `core` are used.

pub use core::mem;

pub(crate) mod num {
    pub use core::num::*;
}

#[cfg(not(feature = "sptr"))]
pub(crate) use core::ptr;

#[cfg(feature = "sptr")]
pub(crate) mod ptr {
    pub use core::ptr::*;

    pub use sptr::Strict;
}
