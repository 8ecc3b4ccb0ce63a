//! Fiber stacks
//!
//! Each fiber gets its own anonymous mapping with a `PROT_NONE` guard page
//! at the low end, so an overflow faults instead of corrupting a
//! neighbour.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        use unix as sys;
    } else {
        compile_error!("fiber stacks need mmap");
    }
}

use std::io;
use std::ptr::NonNull;

/// An mmap'd stack: `[guard | usable]`, growing down from `top()`
pub struct FiberStack {
    base: NonNull<u8>,
    /// Whole mapping, guard included
    len: usize,
    guard: usize,
}

// Safety: the mapping is owned exclusively; it is only touched by whichever
// thread currently runs the context living on it
unsafe impl Send for FiberStack {}

impl FiberStack {
    /// Map a stack with at least `size` usable bytes
    pub fn new(size: usize) -> io::Result<Self> {
        let page = sys::page_size();
        let usable = size
            .checked_next_multiple_of(page)
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
        let len = usable
            .checked_add(page)
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
        let base = sys::map_stack(len, page)?;
        Ok(Self { base, len, guard: page })
    }

    /// High end of the stack (one past the last usable byte)
    #[inline]
    pub fn top(&self) -> *mut u8 {
        // Safety: stays within the mapping
        unsafe { self.base.as_ptr().add(self.len) }
    }

    /// Lowest usable byte, just above the guard page
    #[inline]
    pub fn bottom(&self) -> *mut u8 {
        // Safety: stays within the mapping
        unsafe { self.base.as_ptr().add(self.guard) }
    }

    #[inline]
    pub fn usable_size(&self) -> usize {
        self.len - self.guard
    }

    /// Check if `addr` lies in the usable part of this stack
    pub fn contains(&self, addr: usize) -> bool {
        (self.bottom() as usize..self.top() as usize).contains(&addr)
    }
}

impl Drop for FiberStack {
    fn drop(&mut self) {
        sys::unmap_stack(self.base, self.len);
    }
}

impl std::fmt::Debug for FiberStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiberStack")
            .field("bottom", &self.bottom())
            .field("usable", &self.usable_size())
            .finish()
    }
}
