//! Scheduler state behind the scheduler lock
//!
//! Everything here runs with the `SpinLock<SchedulerState>` held: control
//! block arena, slot pool, handle table, run queues and the wait chains.
//!
//! # Wait chains
//!
//! For every watched key or address exactly one waiter, the *parent*, sits in
//! the global wait queue. Later waiters on the same cell are *children*
//! linked on the parent's `wait_list`, oldest first. When the parent leaves
//! (woken, timed out) its oldest matching child inherits the remaining
//! children and takes its place in the global wait queue.
//!
//! Lock waiters are children of the lock's owner and never appear in the
//! global wait queue. A `wait_list` can therefore mix lock waiters for
//! several cells with key/address children; every lookup filters on
//! `(waitable, wait_address)`.

use crate::continuation::{Continuation, ContinuationRef};
use crate::fiber::{CellAddr, FiberArena, FiberLocalStorage, Waitable};
use crate::handle::HandleTable;
use crate::list::LinkKind;
use crate::parking::CoreParking;
use crate::queue::{QueueId, RunQueues};
use crate::time;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use ukern_core::constants::{MAX_TIME, WAITERS_BIT};
use ukern_core::{
    ActivityLevel, FiberHandle, FiberState, SchedError, SchedResult, SlotAllocator, SlotId,
};

pub(crate) struct SchedulerState {
    pub fibers: FiberArena,
    pub slots: SlotAllocator,
    pub handles: HandleTable,
    pub queues: RunQueues,
    /// Cores currently not parked
    pub active_cores: usize,
    pub shutting_down: bool,
    parking: Arc<CoreParking>,
}

impl SchedulerState {
    pub fn new(max_fibers: usize, parking: Arc<CoreParking>) -> Self {
        Self {
            fibers: FiberArena::new(),
            slots: SlotAllocator::new(max_fibers),
            handles: HandleTable::new(max_fibers),
            queues: RunQueues::new(),
            active_cores: 0,
            shutting_down: false,
            parking,
        }
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Slot of a live fiber
    pub fn resolve(&self, handle: FiberHandle) -> Option<SlotId> {
        let slot = self.handles.resolve(handle)?;
        self.fibers.get(slot).map(|_| slot)
    }

    pub fn resolve_live(&self, handle: FiberHandle) -> SchedResult<SlotId> {
        self.resolve(handle).ok_or(SchedError::InvalidHandle)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Reserve a slot and handle for a new fiber
    pub fn reserve(&mut self) -> SchedResult<(SlotId, FiberHandle)> {
        let slot = self.slots.allocate()?;
        match self.handles.reserve(slot) {
            Ok(handle) => Ok((slot, handle)),
            Err(e) => {
                self.slots.release(slot);
                Err(e)
            }
        }
    }

    /// Undo `reserve` for a fiber that never made it into the arena
    pub fn unreserve(&mut self, slot: SlotId, handle: FiberHandle) {
        self.handles.release(handle);
        self.slots.release(slot);
    }

    /// Install a new block in the suspended queue
    pub fn insert_suspended(&mut self, slot: SlotId, fiber: FiberLocalStorage) {
        self.fibers.insert(slot, fiber);
        self.queues.push(&mut self.fibers, slot, QueueId::Suspended);
    }

    /// Raise a never-dispatched fiber to Schedulable and queue it
    pub fn start(&mut self, slot: SlotId) {
        debug_assert_eq!(self.fibers[slot].fiber_state, FiberState::Suspended);
        self.fibers[slot].activity = ActivityLevel::Schedulable;
        self.queues.unlink(&mut self.fibers, slot);
        self.make_ready(slot);
    }

    /// Tear down an Exiting fiber; the returned continuation is dropped by
    /// the caller
    pub fn destroy(&mut self, slot: SlotId) -> Option<Continuation> {
        self.queues.unlink(&mut self.fibers, slot);

        // Lock waiters of a dead owner can never be granted through it
        let orphans = self.fibers[slot].wait_list.to_vec(&self.fibers, LinkKind::Wait);
        for child in orphans {
            self.detach_child(child);
            self.wake(child, Err(SchedError::InvalidHandle));
        }

        let mut fiber = self.fibers.remove(slot)?;
        self.handles.release(fiber.handle);
        self.slots.release(slot);
        fiber.continuation.take()
    }

    // ------------------------------------------------------------------
    // Readiness
    // ------------------------------------------------------------------

    /// Move a fiber that is not on any queue to where it can be dispatched
    pub fn make_ready(&mut self, slot: SlotId) {
        let f = &mut self.fibers[slot];
        f.clear_wait();
        f.fiber_state = FiberState::Scheduled;
        let schedulable = f.activity == ActivityLevel::Schedulable;
        self.queues.enqueue(&mut self.fibers, slot);
        if schedulable {
            self.parking.notify();
        }
    }

    /// Deliver `result` to a detached waiter and make it ready
    pub fn wake(&mut self, slot: SlotId, result: SchedResult<()>) {
        self.fibers[slot].last_result = result;
        self.make_ready(slot);
    }

    /// Unlink the next fiber `core` may run
    pub fn take_ready(&mut self, core: usize) -> Option<SlotId> {
        self.queues.take_ready(&mut self.fibers, core)
    }

    /// Mark a dequeued fiber Running on `core` and return the continuation
    /// to switch into
    pub fn begin_run(&mut self, slot: SlotId, core: usize) -> Option<ContinuationRef> {
        let f = &mut self.fibers[slot];
        let cont = f.continuation.as_ref()?.raw();
        f.fiber_state = FiberState::Running;
        f.current_core = Some(core);
        Some(cont)
    }

    /// Re-insert a fiber whose priority, mask or activity changed
    pub fn requeue_if_queued(&mut self, slot: SlotId) {
        let in_sched_queue = matches!(
            self.fibers[slot].queue,
            Some(QueueId::Ready(_)) | Some(QueueId::Suspended)
        );
        if in_sched_queue {
            self.queues.unlink(&mut self.fibers, slot);
            self.queues.enqueue(&mut self.fibers, slot);
            self.parking.notify();
        }
    }

    // ------------------------------------------------------------------
    // Wait chains
    // ------------------------------------------------------------------

    /// Children of `parent` waiting on `(kind, addr)`, oldest first
    fn chain_children(&self, parent: SlotId, kind: Waitable, addr: CellAddr) -> Vec<SlotId> {
        self.fibers[parent]
            .wait_list
            .iter(&self.fibers, LinkKind::Wait)
            .filter(|&c| self.fibers[c].waits_on(kind, addr))
            .collect()
    }

    fn attach_child(&mut self, parent: SlotId, child: SlotId) {
        let mut list = self.fibers[parent].wait_list;
        list.push_back(&mut self.fibers, child, LinkKind::Wait);
        self.fibers[parent].wait_list = list;
        self.fibers[child].wait_parent = Some(parent);
    }

    fn detach_child(&mut self, child: SlotId) {
        let Some(parent) = self.fibers[child].wait_parent.take() else {
            return;
        };
        let mut list = self.fibers[parent].wait_list;
        list.remove(&mut self.fibers, child, LinkKind::Wait);
        self.fibers[parent].wait_list = list;
    }

    /// The parent for `(kind, addr)`, if anyone waits there
    pub fn find_parent(&self, kind: Waitable, addr: CellAddr) -> Option<SlotId> {
        self.queues
            .head(QueueId::GlobalWait)
            .iter(&self.fibers, LinkKind::Scheduler)
            .find(|&s| self.fibers[s].waits_on(kind, addr))
    }

    /// Number of fibers waiting on `(kind, addr)`
    pub fn waiter_count(&self, kind: Waitable, addr: CellAddr) -> usize {
        match self.find_parent(kind, addr) {
            Some(p) => 1 + self.chain_children(p, kind, addr).len(),
            None => 0,
        }
    }

    /// Block `slot` on a key, an address, or (with `Waitable::Sleep`) just a
    /// deadline
    pub fn park(&mut self, slot: SlotId, kind: Waitable, addr: CellAddr, timeout: u64) {
        debug_assert!(kind != Waitable::LockArbiter, "lock waiters go through add_lock_waiter");
        {
            let f = &mut self.fibers[slot];
            f.fiber_state = FiberState::Waiting;
            f.waitable = Some(kind);
            f.wait_address = addr;
            f.timeout = timeout;
            f.last_result = Err(SchedError::Timeout);
        }

        let parent = match kind {
            Waitable::Sleep => None,
            _ => self.find_parent(kind, addr).filter(|&p| p != slot),
        };
        match parent {
            Some(p) => self.attach_child(p, slot),
            None => self.queues.push(&mut self.fibers, slot, QueueId::GlobalWait),
        }
    }

    /// Block `slot` behind `owner` on the lock cell `lock`
    ///
    /// `tag` is what gets written into the cell when the lock is granted.
    pub fn add_lock_waiter(&mut self, owner: SlotId, slot: SlotId, lock: CellAddr, tag: u32) {
        {
            let f = &mut self.fibers[slot];
            f.fiber_state = FiberState::Waiting;
            f.waitable = Some(Waitable::LockArbiter);
            f.wait_address = lock;
            f.lock_address = CellAddr::NULL;
            f.wait_tag = tag;
            f.timeout = MAX_TIME;
            f.last_result = Ok(());
        }
        self.attach_child(owner, slot);
    }

    /// Take a parent out of the global wait queue, passing parentage on
    fn remove_parent(&mut self, parent: SlotId) {
        self.queues.unlink(&mut self.fibers, parent);

        let (kind, addr) = {
            let f = &self.fibers[parent];
            match f.waitable {
                Some(kind) if kind != Waitable::Sleep => (kind, f.wait_address),
                _ => return,
            }
        };

        let children = self.chain_children(parent, kind, addr);
        if let Some((&heir, rest)) = children.split_first() {
            self.detach_child(heir);
            for &c in rest {
                self.detach_child(c);
                self.attach_child(heir, c);
            }
            self.queues.push(&mut self.fibers, heir, QueueId::GlobalWait);
        }
    }

    /// Detach a Waiting fiber from wherever it waits, without waking it
    fn detach_waiter(&mut self, slot: SlotId) {
        if self.fibers[slot].wait_parent.is_some() {
            self.detach_child(slot);
        } else if self.fibers[slot].queue == Some(QueueId::GlobalWait) {
            self.remove_parent(slot);
        }
    }

    /// Wake a Waiting fiber early with `result`
    pub fn cancel_wait(&mut self, slot: SlotId, result: SchedResult<()>) {
        if self.fibers[slot].fiber_state != FiberState::Waiting {
            return;
        }
        self.detach_waiter(slot);
        self.wake(slot, result);
    }

    /// Detach up to `count` waiters on `(kind, addr)` in FIFO order; a
    /// negative count means all. They stay Waiting for the caller to
    /// dispose of.
    pub fn take_waiters(&mut self, kind: Waitable, addr: CellAddr, count: i32) -> Vec<SlotId> {
        let mut taken = Vec::new();
        while count < 0 || taken.len() < count as usize {
            let Some(parent) = self.find_parent(kind, addr) else {
                break;
            };
            self.remove_parent(parent);
            taken.push(parent);
        }
        taken
    }

    /// Wake up to `count` waiters on `(kind, addr)` with `result`
    pub fn wake_waiters(
        &mut self,
        kind: Waitable,
        addr: CellAddr,
        count: i32,
        result: SchedResult<()>,
    ) -> usize {
        let taken = self.take_waiters(kind, addr, count);
        for &slot in &taken {
            self.wake(slot, result.clone());
        }
        taken.len()
    }

    // ------------------------------------------------------------------
    // Locks
    // ------------------------------------------------------------------

    /// Release `lock`, held by `owner`, to its oldest waiter or to nobody
    ///
    /// The caller has checked that the cell names `owner`.
    pub fn release_lock(&mut self, owner: SlotId, lock: CellAddr) {
        // Safety: `lock` was borrowed by the caller of the current operation
        let cell = unsafe { lock.cell() };

        let children = self.chain_children(owner, Waitable::LockArbiter, lock);
        let Some((&next, rest)) = children.split_first() else {
            cell.store(0, Ordering::Release);
            return;
        };

        self.detach_child(next);
        for &c in rest {
            self.detach_child(c);
            self.attach_child(next, c);
        }

        let tag = self.fibers[next].wait_tag;
        let value = if rest.is_empty() { tag } else { tag | WAITERS_BIT };
        cell.store(value, Ordering::Release);
        self.wake(next, Ok(()));
    }

    /// Grant `lock` to `slot`, which stopped waiting on a key, or queue it
    /// behind the current owner
    pub fn regrant_lock(&mut self, slot: SlotId, lock: CellAddr, tag: u32) {
        // Safety: `slot` is blocked inside the call that borrowed `lock`
        let cell = unsafe { lock.cell() };
        let value = cell.load(Ordering::Acquire);

        if value == 0 {
            cell.store(tag, Ordering::Release);
            self.wake(slot, Ok(()));
            return;
        }

        match self.resolve(FiberHandle::lock_owner(value)) {
            Some(owner) if owner != slot => {
                cell.store(value | WAITERS_BIT, Ordering::Release);
                self.add_lock_waiter(owner, slot, lock, tag);
            }
            _ => self.wake(slot, Err(SchedError::InvalidHandle)),
        }
    }

    // ------------------------------------------------------------------
    // Deadlines
    // ------------------------------------------------------------------

    /// Every fiber reachable from the global wait queue, parents first
    fn timed_waiters(&self) -> Vec<SlotId> {
        let mut out = Vec::new();
        for p in self.queues.global_waiters(&self.fibers) {
            out.push(p);
            let f = &self.fibers[p];
            if let Some(kind) = f.waitable.filter(|k| *k != Waitable::Sleep) {
                out.extend(self.chain_children(p, kind, f.wait_address));
            }
        }
        out
    }

    /// Cancel every waiter whose deadline is at or before `now`
    pub fn sweep_timeouts(&mut self, now: u64) -> usize {
        if self.queues.head(QueueId::GlobalWait).is_empty() {
            return 0;
        }

        let expired: Vec<SlotId> = self
            .timed_waiters()
            .into_iter()
            .filter(|&s| time::is_elapsed(self.fibers[s].timeout, now))
            .collect();

        for &slot in &expired {
            self.cancel_wait(slot, Err(SchedError::Timeout));
        }
        expired.len()
    }

    /// Nearest finite deadline among waiters that may run on `core`
    pub fn next_deadline(&self, core: usize) -> Option<u64> {
        self.timed_waiters()
            .into_iter()
            .map(|s| &self.fibers[s])
            .filter(|f| f.timeout != MAX_TIME && f.core_mask.contains(core))
            .map(|f| f.timeout)
            .min()
    }

    /// Nothing is ready, nothing has a deadline, and someone is waiting
    pub fn is_deadlocked(&self) -> bool {
        if self.queues.ready_len() > 0 {
            return false;
        }
        let mut waiting = 0usize;
        for (_, f) in self.fibers.iter() {
            match f.fiber_state {
                FiberState::Waiting if f.timeout != MAX_TIME => return false,
                FiberState::Waiting => waiting += 1,
                FiberState::Running => return false,
                _ => {}
            }
        }
        waiting > 0
    }

    /// One line per live fiber, for the deadlock report
    pub fn describe_fibers(&self) -> Vec<String> {
        self.fibers
            .iter()
            .map(|(_, f)| {
                format!(
                    "{} '{}' {} waitable={:?} prio={}",
                    f.handle, f.name, f.fiber_state, f.waitable, f.priority
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use ukern_core::{CoreMask, Priority};

    fn state_with(n: usize) -> (SchedulerState, Vec<SlotId>) {
        let mut st = SchedulerState::new(16, Arc::new(CoreParking::new()));
        let mut slots = Vec::new();
        for i in 0..n {
            let (slot, handle) = st.reserve().unwrap();
            let f = FiberLocalStorage::new(
                handle,
                format!("f{}", i),
                Priority::Normal,
                CoreMask::first_n(2),
                64 * 1024,
            );
            st.insert_suspended(slot, f);
            st.queues.unlink(&mut st.fibers, slot);
            st.fibers[slot].fiber_state = FiberState::Running;
            st.fibers[slot].activity = ActivityLevel::Schedulable;
            slots.push(slot);
        }
        (st, slots)
    }

    #[test]
    fn test_key_chain_parent_and_children() {
        let (mut st, s) = state_with(3);
        let key = AtomicU32::new(1);
        let addr = CellAddr::of(&key);

        for &slot in &s {
            st.park(slot, Waitable::KeyArbiter, addr, MAX_TIME);
        }
        assert_eq!(st.find_parent(Waitable::KeyArbiter, addr), Some(s[0]));
        assert_eq!(st.waiter_count(Waitable::KeyArbiter, addr), 3);
        assert_eq!(st.queues.head(QueueId::GlobalWait).len(), 1);
        assert_eq!(st.fibers[s[1]].wait_parent, Some(s[0]));
    }

    #[test]
    fn test_take_waiters_fifo_with_parentage_transfer() {
        let (mut st, s) = state_with(4);
        let cell = AtomicU32::new(0);
        let addr = CellAddr::of(&cell);
        for &slot in &s {
            st.park(slot, Waitable::WaitAddressArbiter, addr, MAX_TIME);
        }

        let woken = st.wake_waiters(Waitable::WaitAddressArbiter, addr, 2, Ok(()));
        assert_eq!(woken, 2);
        assert_eq!(st.fibers[s[0]].fiber_state, FiberState::Scheduled);
        assert_eq!(st.fibers[s[1]].fiber_state, FiberState::Scheduled);

        // The third waiter is now the parent of the fourth
        assert_eq!(st.find_parent(Waitable::WaitAddressArbiter, addr), Some(s[2]));
        assert_eq!(st.fibers[s[3]].wait_parent, Some(s[2]));
        assert_eq!(st.waiter_count(Waitable::WaitAddressArbiter, addr), 2);

        assert_eq!(st.wake_waiters(Waitable::WaitAddressArbiter, addr, -1, Ok(())), 2);
        assert_eq!(st.waiter_count(Waitable::WaitAddressArbiter, addr), 0);
        assert_eq!(st.queues.ready_len(), 4);
    }

    #[test]
    fn test_sweep_expires_parent_and_child() {
        let (mut st, s) = state_with(3);
        let cell = AtomicU32::new(0);
        let addr = CellAddr::of(&cell);
        st.park(s[0], Waitable::WaitAddressArbiter, addr, 100);
        st.park(s[1], Waitable::WaitAddressArbiter, addr, MAX_TIME);
        st.park(s[2], Waitable::WaitAddressArbiter, addr, 50);

        assert_eq!(st.next_deadline(0), Some(50));
        assert_eq!(st.sweep_timeouts(10), 0);

        assert_eq!(st.sweep_timeouts(100), 2);
        assert_eq!(st.fibers[s[0]].last_result, Err(SchedError::Timeout));
        assert_eq!(st.fibers[s[2]].last_result, Err(SchedError::Timeout));
        assert_eq!(st.fibers[s[1]].fiber_state, FiberState::Waiting);
        assert_eq!(st.find_parent(Waitable::WaitAddressArbiter, addr), Some(s[1]));
        assert_eq!(st.next_deadline(0), None);
    }

    #[test]
    fn test_release_lock_hands_off_fifo() {
        let (mut st, s) = state_with(3);
        let lock = AtomicU32::new(0);
        let addr = CellAddr::of(&lock);
        let owner_tag = st.fibers[s[0]].handle.as_u32();
        lock.store(owner_tag | WAITERS_BIT, Ordering::Relaxed);

        let tag1 = st.fibers[s[1]].handle.as_u32();
        let tag2 = st.fibers[s[2]].handle.as_u32();
        st.add_lock_waiter(s[0], s[1], addr, tag1);
        st.add_lock_waiter(s[0], s[2], addr, tag2);

        st.release_lock(s[0], addr);
        assert_eq!(lock.load(Ordering::Relaxed), tag1 | WAITERS_BIT);
        assert_eq!(st.fibers[s[1]].fiber_state, FiberState::Scheduled);
        assert_eq!(st.fibers[s[2]].wait_parent, Some(s[1]));

        st.release_lock(s[1], addr);
        assert_eq!(lock.load(Ordering::Relaxed), tag2);

        st.release_lock(s[2], addr);
        assert_eq!(lock.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_regrant_lock() {
        let (mut st, s) = state_with(3);
        let lock = AtomicU32::new(0);
        let addr = CellAddr::of(&lock);
        let tag1 = st.fibers[s[1]].handle.as_u32();
        st.fibers[s[1]].fiber_state = FiberState::Waiting;

        // Free lock: granted immediately
        st.regrant_lock(s[1], addr, tag1);
        assert_eq!(lock.load(Ordering::Relaxed), tag1);
        assert_eq!(st.fibers[s[1]].last_result, Ok(()));

        // Held lock: joins the owner's chain
        let tag2 = st.fibers[s[2]].handle.as_u32();
        st.fibers[s[2]].fiber_state = FiberState::Waiting;
        st.regrant_lock(s[2], addr, tag2);
        assert_eq!(lock.load(Ordering::Relaxed), tag1 | WAITERS_BIT);
        assert_eq!(st.fibers[s[2]].waitable, Some(Waitable::LockArbiter));
        assert_eq!(st.fibers[s[2]].wait_parent, Some(s[1]));

        // Dead owner
        let dead = AtomicU32::new(FiberHandle::from_parts(9, 3).as_u32());
        st.fibers[s[0]].fiber_state = FiberState::Waiting;
        st.regrant_lock(s[0], CellAddr::of(&dead), 1);
        assert_eq!(st.fibers[s[0]].last_result, Err(SchedError::InvalidHandle));
    }

    #[test]
    fn test_destroy_releases_handle_and_orphans() {
        let (mut st, s) = state_with(2);
        let lock = AtomicU32::new(0);
        let h0 = st.fibers[s[0]].handle;
        st.add_lock_waiter(s[0], s[1], CellAddr::of(&lock), 1);

        st.fibers[s[0]].fiber_state = FiberState::Exiting;
        st.destroy(s[0]);
        assert_eq!(st.resolve(h0), None);
        assert_eq!(st.fibers[s[1]].last_result, Err(SchedError::InvalidHandle));
        assert_eq!(st.slots.allocated_count(), 1);
    }

    #[test]
    fn test_deadlock_predicate() {
        let (mut st, s) = state_with(2);
        assert!(!st.is_deadlocked()); // running fibers

        let cell = AtomicU32::new(0);
        st.park(s[0], Waitable::WaitAddressArbiter, CellAddr::of(&cell), MAX_TIME);
        st.fibers[s[1]].fiber_state = FiberState::Suspended;
        assert!(st.is_deadlocked());

        st.park(s[1], Waitable::Sleep, CellAddr::NULL, 10);
        assert!(!st.is_deadlocked());
    }

    #[test]
    fn test_sleepers_never_chain() {
        let (mut st, s) = state_with(2);
        st.park(s[0], Waitable::Sleep, CellAddr::NULL, 10);
        st.park(s[1], Waitable::Sleep, CellAddr::NULL, 20);
        assert_eq!(st.queues.head(QueueId::GlobalWait).len(), 2);
        assert!(st.fibers[s[1]].wait_parent.is_none());
    }

    #[test]
    fn test_new_block_waits_for_start() {
        let mut st = SchedulerState::new(4, Arc::new(CoreParking::new()));
        let (slot, handle) = st.reserve().unwrap();
        let f = FiberLocalStorage::new(handle, "f".into(), Priority::Normal, CoreMask::first_n(1), 64 * 1024);
        st.insert_suspended(slot, f);

        assert_eq!(st.fibers[slot].activity, ActivityLevel::Suspended);
        assert_eq!(st.fibers[slot].queue, Some(QueueId::Suspended));
        assert_eq!(st.take_ready(0), None);

        st.start(slot);
        assert_eq!(st.fibers[slot].activity, ActivityLevel::Schedulable);
        assert_eq!(st.fibers[slot].fiber_state, FiberState::Scheduled);
        assert_eq!(st.take_ready(0), Some(slot));
    }
}
