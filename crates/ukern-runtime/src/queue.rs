//! Run-queue set
//!
//! Five FIFO ready queues (one per priority), a suspended queue for fibers
//! that are not started or whose activity is Suspended, and the global wait
//! queue holding one parent per watched key/address plus sleepers.
//!
//! Every queue threads through the `scheduler_node` link, so a block sits on
//! at most one of them; `FiberLocalStorage::queue` records which.

use crate::fiber::FiberArena;
use crate::list::{LinkKind, ListHead};
use ukern_core::{ActivityLevel, FiberState, Priority, SlotId};

/// Identifies one queue of the set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueId {
    Ready(Priority),
    Suspended,
    GlobalWait,
}

/// The scheduler's queues
#[derive(Debug, Default)]
pub struct RunQueues {
    ready: [ListHead; Priority::COUNT],
    suspended: ListHead,
    global_wait: ListHead,
}

impl RunQueues {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn head(&self, id: QueueId) -> &ListHead {
        match id {
            QueueId::Ready(p) => &self.ready[p.as_index()],
            QueueId::Suspended => &self.suspended,
            QueueId::GlobalWait => &self.global_wait,
        }
    }

    #[inline]
    fn head_mut(&mut self, id: QueueId) -> &mut ListHead {
        match id {
            QueueId::Ready(p) => &mut self.ready[p.as_index()],
            QueueId::Suspended => &mut self.suspended,
            QueueId::GlobalWait => &mut self.global_wait,
        }
    }

    /// Append `slot` to the tail of `id`
    pub fn push(&mut self, arena: &mut FiberArena, slot: SlotId, id: QueueId) {
        debug_assert!(arena[slot].queue.is_none(), "slot {} already queued", slot);
        self.head_mut(id).push_back(arena, slot, LinkKind::Scheduler);
        arena[slot].queue = Some(id);
    }

    /// Remove `slot` from whichever queue holds it; returns that queue
    pub fn unlink(&mut self, arena: &mut FiberArena, slot: SlotId) -> Option<QueueId> {
        let id = arena[slot].queue.take()?;
        self.head_mut(id).remove(arena, slot, LinkKind::Scheduler);
        Some(id)
    }

    /// Queue a non-waiting fiber where its state and activity say it belongs
    pub fn enqueue(&mut self, arena: &mut FiberArena, slot: SlotId) {
        let f = &arena[slot];
        let id = if f.fiber_state == FiberState::Scheduled
            && f.activity == ActivityLevel::Schedulable
        {
            QueueId::Ready(f.priority)
        } else {
            QueueId::Suspended
        };
        self.push(arena, slot, id);
    }

    /// Unlink and return the next fiber core `core` may run
    ///
    /// Highest priority first, FIFO within a level; fibers whose mask
    /// excludes `core` are skipped, not reordered.
    pub fn take_ready(&mut self, arena: &mut FiberArena, core: usize) -> Option<SlotId> {
        for prio in Priority::iter() {
            let found = self.ready[prio.as_index()].iter(arena, LinkKind::Scheduler).find(|&s| {
                let f = &arena[s];
                f.core_mask.contains(core) && f.activity == ActivityLevel::Schedulable
            });
            if let Some(slot) = found {
                self.unlink(arena, slot);
                return Some(slot);
            }
        }
        None
    }

    /// Total fibers in the ready queues
    pub fn ready_len(&self) -> usize {
        self.ready.iter().map(ListHead::len).sum()
    }

    /// Members of the global wait queue, oldest first
    pub fn global_waiters(&self, arena: &FiberArena) -> Vec<SlotId> {
        self.global_wait.to_vec(arena, LinkKind::Scheduler)
    }

    /// Forget every membership (used at shutdown after the arena is drained)
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
