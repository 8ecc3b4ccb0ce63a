//! Fiber handle type
//!
//! A handle is the only identifier a fiber exposes to callers. It packs a
//! slot index and a generation counter so that a handle to an exited fiber
//! never resolves to whichever fiber later reuses the slot:
//!
//! ```text
//! bit 31      : always 0
//! bit 30      : always 0 (reserved for WAITERS_BIT in lock cells)
//! bits 15..30 : generation (1..=0x7FFF, never 0)
//! bits 0..15  : slot index
//! ```
//!
//! Because the generation is never zero, a valid handle is never zero, and a
//! lock cell holding 0 means "unlocked".

use core::fmt;
use crate::constants::{HANDLE_GENERATION_BITS, HANDLE_INDEX_BITS, WAITERS_BIT};

const INDEX_MASK: u32 = (1 << HANDLE_INDEX_BITS) - 1;
const GENERATION_MASK: u32 = (1 << HANDLE_GENERATION_BITS) - 1;

/// Opaque identifier of a fiber
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FiberHandle(u32);

impl FiberHandle {
    /// Sentinel value indicating no fiber
    pub const NONE: FiberHandle = FiberHandle(0);

    /// Reinterpret a raw value (e.g. read from a lock cell) as a handle
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        FiberHandle(raw)
    }

    /// Build a handle from its slot index and generation
    ///
    /// The generation is folded into `1..=0x7FFF`.
    #[inline]
    pub const fn from_parts(index: u32, generation: u32) -> Self {
        let mut gen = generation & GENERATION_MASK;
        if gen == 0 {
            gen = 1;
        }
        FiberHandle((gen << HANDLE_INDEX_BITS) | (index & INDEX_MASK))
    }

    /// Get the raw u32 value
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Slot index encoded in the handle
    #[inline]
    pub const fn index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }

    /// Generation encoded in the handle
    #[inline]
    pub const fn generation(self) -> u32 {
        (self.0 >> HANDLE_INDEX_BITS) & GENERATION_MASK
    }

    /// Check if this is the NONE sentinel
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Check if this could be a live handle
    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != 0 && self.0 & !(INDEX_MASK | (GENERATION_MASK << HANDLE_INDEX_BITS)) == 0
    }

    /// Convert to Option
    #[inline]
    pub const fn to_option(self) -> Option<FiberHandle> {
        if self.is_some() {
            Some(self)
        } else {
            None
        }
    }

    /// Owner recorded in a lock cell value (ignores the waiters bit)
    #[inline]
    pub const fn lock_owner(cell_value: u32) -> FiberHandle {
        FiberHandle(cell_value & !WAITERS_BIT)
    }
}

/// Check whether a lock cell value has its waiters bit set
#[inline]
pub const fn has_waiters(cell_value: u32) -> bool {
    cell_value & WAITERS_BIT != 0
}

impl From<FiberHandle> for u32 {
    #[inline]
    fn from(h: FiberHandle) -> Self {
        h.0
    }
}

impl fmt::Debug for FiberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "FiberHandle(NONE)")
        } else {
            write!(f, "FiberHandle({}#{})", self.index(), self.generation())
        }
    }
}

impl fmt::Display for FiberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

impl Default for FiberHandle {
    fn default() -> Self {
        FiberHandle::NONE
    }
}
