//! Fiber control blocks
//!
//! `FiberLocalStorage` holds everything the scheduler knows about one fiber.
//! Blocks live in a `FiberArena` indexed by slot; queues and wait chains
//! refer to them by slot index only.

use crate::continuation::Continuation;
use crate::list::{Link, LinkArena, LinkKind, ListHead};
use crate::queue::QueueId;
use std::ops::{Index, IndexMut};
use std::sync::atomic::AtomicU32;
use ukern_core::constants::MAX_TIME;
use ukern_core::{ActivityLevel, CoreMask, FiberHandle, FiberState, Priority, SchedResult, SlotId};

/// What a Waiting fiber is blocked on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waitable {
    /// A contended lock cell; lives in the owner's chain
    LockArbiter,
    /// A condition key
    KeyArbiter,
    /// An address predicate
    WaitAddressArbiter,
    /// A plain deadline
    Sleep,
}

/// Address of a caller-owned cell
///
/// Stored as an integer so control blocks stay `Send`. A recorded address is
/// only dereferenced while the fiber that supplied it is blocked inside the
/// call that borrowed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CellAddr(usize);

impl CellAddr {
    pub const NULL: CellAddr = CellAddr(0);

    #[inline]
    pub fn of(cell: &AtomicU32) -> Self {
        CellAddr(cell as *const AtomicU32 as usize)
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// # Safety
    ///
    /// The address must come from `CellAddr::of` on a cell that is still
    /// borrowed by a blocked caller.
    #[inline]
    pub unsafe fn cell<'a>(self) -> &'a AtomicU32 {
        debug_assert!(!self.is_null());
        &*(self.0 as *const AtomicU32)
    }
}

/// Per-fiber control block
pub struct FiberLocalStorage {
    pub handle: FiberHandle,
    pub name: String,

    pub priority: Priority,
    pub core_mask: CoreMask,
    /// Core the fiber last ran on
    pub current_core: Option<usize>,
    pub stack_size: usize,

    pub fiber_state: FiberState,
    pub activity: ActivityLevel,

    /// Absolute deadline tick; MAX_TIME for none
    pub timeout: u64,
    /// Cell this fiber waits on (lock, key or address)
    pub wait_address: CellAddr,
    /// Lock cell to re-acquire after a key wait
    pub lock_address: CellAddr,
    /// Value written into the lock cell when ownership is granted
    pub wait_tag: u32,
    pub waitable: Option<Waitable>,
    /// Delivered to the blocked call on wake
    pub last_result: SchedResult<()>,

    /// Scheduler queue the block is linked on, if any
    pub queue: Option<QueueId>,
    /// Fiber whose `wait_list` this block is linked on, if any
    pub wait_parent: Option<SlotId>,
    pub scheduler_node: Link,
    pub wait_node: Link,
    /// Children waiting behind this fiber
    pub wait_list: ListHead,

    pub continuation: Option<Continuation>,
}

impl FiberLocalStorage {
    pub fn new(
        handle: FiberHandle,
        name: String,
        priority: Priority,
        core_mask: CoreMask,
        stack_size: usize,
    ) -> Self {
        Self {
            handle,
            name,
            priority,
            core_mask,
            current_core: None,
            stack_size,
            fiber_state: FiberState::Suspended,
            activity: ActivityLevel::Suspended,
            timeout: MAX_TIME,
            wait_address: CellAddr::NULL,
            lock_address: CellAddr::NULL,
            wait_tag: 0,
            waitable: None,
            last_result: Ok(()),
            queue: None,
            wait_parent: None,
            scheduler_node: Link::default(),
            wait_node: Link::default(),
            wait_list: ListHead::new(),
            continuation: None,
        }
    }

    /// Forget the wait bookkeeping of a fiber leaving the Waiting state
    pub fn clear_wait(&mut self) {
        self.timeout = MAX_TIME;
        self.wait_address = CellAddr::NULL;
        self.lock_address = CellAddr::NULL;
        self.wait_tag = 0;
        self.waitable = None;
    }

    /// Check if this fiber waits on `(kind, addr)`
    #[inline]
    pub fn waits_on(&self, kind: Waitable, addr: CellAddr) -> bool {
        self.fiber_state == FiberState::Waiting
            && self.waitable == Some(kind)
            && self.wait_address == addr
    }
}

/// Slot-indexed storage for control blocks
pub struct FiberArena {
    slots: Vec<Option<FiberLocalStorage>>,
}

impl FiberArena {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn insert(&mut self, slot: SlotId, fiber: FiberLocalStorage) {
        let idx = slot as usize;
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        debug_assert!(self.slots[idx].is_none(), "slot {} occupied", slot);
        self.slots[idx] = Some(fiber);
    }

    pub fn remove(&mut self, slot: SlotId) -> Option<FiberLocalStorage> {
        self.slots.get_mut(slot as usize).and_then(Option::take)
    }

    #[inline]
    pub fn get(&self, slot: SlotId) -> Option<&FiberLocalStorage> {
        self.slots.get(slot as usize).and_then(Option::as_ref)
    }

    #[inline]
    pub fn get_mut(&mut self, slot: SlotId) -> Option<&mut FiberLocalStorage> {
        self.slots.get_mut(slot as usize).and_then(Option::as_mut)
    }

    /// Occupied slots and their blocks
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &FiberLocalStorage)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_ref().map(|f| (i as SlotId, f)))
    }

    /// Remove every block
    pub fn drain(&mut self) -> Vec<(SlotId, FiberLocalStorage)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(slot, f)| Some((slot as SlotId, f.take()?)))
            .collect()
    }
}

impl Default for FiberArena {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<SlotId> for FiberArena {
    type Output = FiberLocalStorage;

    fn index(&self, slot: SlotId) -> &FiberLocalStorage {
        match self.get(slot) {
            Some(f) => f,
            None => panic!("no fiber in slot {}", slot),
        }
    }
}

impl IndexMut<SlotId> for FiberArena {
    fn index_mut(&mut self, slot: SlotId) -> &mut FiberLocalStorage {
        match self.get_mut(slot) {
            Some(f) => f,
            None => panic!("no fiber in slot {}", slot),
        }
    }
}

impl LinkArena for FiberArena {
    fn link(&self, idx: SlotId, kind: LinkKind) -> &Link {
        let f = &self[idx];
        match kind {
            LinkKind::Scheduler => &f.scheduler_node,
            LinkKind::Wait => &f.wait_node,
        }
    }

    fn link_mut(&mut self, idx: SlotId, kind: LinkKind) -> &mut Link {
        let f = &mut self[idx];
        match kind {
            LinkKind::Scheduler => &mut f.scheduler_node,
            LinkKind::Wait => &mut f.wait_node,
        }
    }
}
