//! Fixed-capacity slot allocator for fiber control blocks
//!
//! Uses a LIFO free stack so that a recently released slot, whose control
//! block memory is still warm, is handed out first. All calls happen under
//! the scheduler lock, so no internal synchronization is needed.

use crate::error::{SchedError, SchedResult};

/// Index of a control block in the scheduler's arena
pub type SlotId = u32;

/// Slot allocator with a hard capacity
#[derive(Debug)]
pub struct SlotAllocator {
    /// LIFO stack of free slot IDs (for reuse)
    free_stack: Vec<SlotId>,

    /// Next fresh slot ID to allocate (never used before)
    next_fresh: SlotId,

    /// Maximum number of slots
    max_slots: u32,

    /// Number of currently allocated slots
    allocated_count: u32,
}

impl SlotAllocator {
    /// Create a new slot allocator
    pub fn new(max_slots: usize) -> Self {
        Self {
            free_stack: Vec::with_capacity(max_slots),
            next_fresh: 0,
            max_slots: max_slots as u32,
            allocated_count: 0,
        }
    }

    /// Allocate a slot, returning its ID
    ///
    /// Prefers reusing recently freed slots (LIFO).
    /// Falls back to fresh slot IDs if the free stack is empty.
    pub fn allocate(&mut self) -> SchedResult<SlotId> {
        let id = match self.free_stack.pop() {
            Some(id) => id,
            None => {
                if self.next_fresh >= self.max_slots {
                    return Err(SchedError::PoolExhausted);
                }
                let id = self.next_fresh;
                self.next_fresh += 1;
                id
            }
        };
        self.allocated_count += 1;
        Ok(id)
    }

    /// Release a slot back to the allocator
    pub fn release(&mut self, id: SlotId) {
        debug_assert!(id < self.next_fresh, "releasing a slot that was never allocated");
        debug_assert!(!self.free_stack.contains(&id), "double release of slot {}", id);
        self.free_stack.push(id);
        self.allocated_count -= 1;
    }

    /// Get the number of currently allocated slots
    #[inline]
    pub fn allocated_count(&self) -> u32 {
        self.allocated_count
    }

    /// Get the maximum number of slots
    #[inline]
    pub fn max_slots(&self) -> u32 {
        self.max_slots
    }

    /// Get the number of fresh (never-used) slots remaining
    #[inline]
    pub fn fresh_remaining(&self) -> u32 {
        self.max_slots.saturating_sub(self.next_fresh)
    }

    /// Highest slot ID ever handed out, plus one
    #[inline]
    pub fn high_water(&self) -> u32 {
        self.next_fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_sequential() {
        let mut alloc = SlotAllocator::new(100);

        assert_eq!(alloc.allocate().unwrap(), 0);
        assert_eq!(alloc.allocate().unwrap(), 1);
        assert_eq!(alloc.allocate().unwrap(), 2);
        assert_eq!(alloc.allocated_count(), 3);
        assert_eq!(alloc.fresh_remaining(), 97);
    }

    #[test]
    fn test_allocate_release_reuse() {
        let mut alloc = SlotAllocator::new(100);

        let id1 = alloc.allocate().unwrap();
        let _id2 = alloc.allocate().unwrap();
        alloc.release(id1);
        assert_eq!(alloc.allocated_count(), 1);

        // LIFO: the released slot comes back first
        let id3 = alloc.allocate().unwrap();
        assert_eq!(id3, id1);
        assert_eq!(alloc.allocated_count(), 2);
        assert_eq!(alloc.high_water(), 2);
    }

    #[test]
    fn test_allocate_exhaustion() {
        let mut alloc = SlotAllocator::new(3);

        for _ in 0..3 {
            alloc.allocate().unwrap();
        }
        assert_eq!(alloc.allocate(), Err(SchedError::PoolExhausted));

        alloc.release(1);
        assert_eq!(alloc.allocate(), Ok(1));
    }
}
