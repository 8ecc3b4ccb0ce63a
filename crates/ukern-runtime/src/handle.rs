//! Handle table
//!
//! Maps the handles handed out to callers onto arena slots. Each entry keeps
//! a generation counter that is bumped on release, so a handle that outlived
//! its fiber stops resolving even after the entry is reused.

use ukern_core::constants::HANDLE_GENERATION_BITS;
use ukern_core::{FiberHandle, SchedError, SchedResult, SlotId};

const MAX_GENERATION: u32 = (1 << HANDLE_GENERATION_BITS) - 1;

#[derive(Debug, Clone, Copy)]
struct HandleEntry {
    generation: u32,
    slot: Option<SlotId>,
}

/// Fixed-capacity handle table
#[derive(Debug)]
pub struct HandleTable {
    entries: Vec<HandleEntry>,
    /// Released entry indices, reused LIFO
    free: Vec<u32>,
    capacity: usize,
    live: usize,
}

impl HandleTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity.min(1024)),
            free: Vec::new(),
            capacity,
            live: 0,
        }
    }

    /// Reserve a fresh handle bound to `slot`
    pub fn reserve(&mut self, slot: SlotId) -> SchedResult<FiberHandle> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                if self.entries.len() >= self.capacity {
                    return Err(SchedError::HandleTableFull);
                }
                self.entries.push(HandleEntry {
                    generation: 1,
                    slot: None,
                });
                (self.entries.len() - 1) as u32
            }
        };

        let entry = &mut self.entries[index as usize];
        debug_assert!(entry.slot.is_none());
        entry.slot = Some(slot);
        self.live += 1;
        Ok(FiberHandle::from_parts(index, entry.generation))
    }

    /// Slot a live handle refers to
    pub fn resolve(&self, handle: FiberHandle) -> Option<SlotId> {
        if !handle.is_some() {
            return None;
        }
        let entry = self.entries.get(handle.index())?;
        if entry.generation != handle.generation() {
            return None;
        }
        entry.slot
    }

    /// Retire a handle; it never resolves again
    pub fn release(&mut self, handle: FiberHandle) {
        let Some(entry) = self.entries.get_mut(handle.index()) else {
            return;
        };
        if entry.generation != handle.generation() || entry.slot.is_none() {
            return;
        }
        entry.slot = None;
        entry.generation = if entry.generation >= MAX_GENERATION {
            1
        } else {
            entry.generation + 1
        };
        self.free.push(handle.index() as u32);
        self.live -= 1;
    }

    /// Number of live handles
    #[inline]
    pub fn live(&self) -> usize {
        self.live
    }
}
