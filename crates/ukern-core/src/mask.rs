//! Core affinity masks
//!
//! One bit per core. The scheduler owns a mask naming the cores it drives;
//! each fiber carries a mask naming the cores it may run on, which must be a
//! non-empty subset of the scheduler's.

use core::fmt;
use crate::constants::MAX_CORES;

/// Bitmask of cores
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct CoreMask(u64);

impl CoreMask {
    /// Mask with no cores
    pub const EMPTY: CoreMask = CoreMask(0);

    /// Create a mask from raw bits
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        CoreMask(bits)
    }

    /// Mask containing the first `n` cores
    #[inline]
    pub const fn first_n(n: usize) -> Self {
        if n >= MAX_CORES {
            CoreMask(u64::MAX)
        } else {
            CoreMask((1u64 << n) - 1)
        }
    }

    /// Mask containing a single core
    #[inline]
    pub const fn single(core: usize) -> Self {
        if core >= MAX_CORES {
            CoreMask(0)
        } else {
            CoreMask(1u64 << core)
        }
    }

    /// Raw bits
    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Check if the mask names `core`
    #[inline]
    pub const fn contains(self, core: usize) -> bool {
        core < MAX_CORES && self.0 & (1u64 << core) != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Check if every core in `self` is also in `other`
    #[inline]
    pub const fn is_subset_of(self, other: CoreMask) -> bool {
        self.0 & !other.0 == 0
    }

    /// Number of cores in the mask
    #[inline]
    pub const fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Lowest core in the mask
    #[inline]
    pub const fn first(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }

    /// Iterate the cores in ascending order
    pub fn iter(self) -> impl Iterator<Item = usize> {
        let mut bits = self.0;
        core::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let core = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            Some(core)
        })
    }
}

impl fmt::Debug for CoreMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoreMask({:#b})", self.0)
    }
}

impl From<u64> for CoreMask {
    fn from(bits: u64) -> Self {
        CoreMask(bits)
    }
}
