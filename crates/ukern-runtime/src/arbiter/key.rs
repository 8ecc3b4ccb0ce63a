//! Key arbitration
//!
//! A key cell is 1 while fibers may be waiting on it and 0 once it has been
//! reset. Waiting on a key releases a lock cell; being signalled re-acquires
//! it before the waiter returns.

use crate::fiber::{CellAddr, Waitable};
use crate::scheduler::Scheduler;
use crate::time;
use std::sync::atomic::{AtomicU32, Ordering};
use ukern_core::{ktrace, FiberHandle, SchedError, SchedResult};

impl Scheduler {
    /// Release `lock`, wait on `key` until signalled or until `deadline`
    ///
    /// On `Ok` the caller owns `lock` again, stored as `tag`. On `Timeout`
    /// it does not. The caller must own `lock`.
    pub fn wait_key(
        &self,
        lock: &AtomicU32,
        key: &AtomicU32,
        tag: u32,
        deadline: u64,
    ) -> SchedResult<()> {
        let (ctx, mut guard) = self.enter_blocking()?;

        let value = lock.load(Ordering::Acquire);
        if value == 0 || FiberHandle::lock_owner(value) != ctx.handle {
            return Err(SchedError::InvalidState);
        }

        key.store(1, Ordering::Release);
        guard.release_lock(ctx.slot, CellAddr::of(lock));

        if time::is_elapsed(deadline, time::now()) {
            return Err(SchedError::Timeout);
        }

        let key_addr = CellAddr::of(key);
        guard.park(ctx.slot, Waitable::KeyArbiter, key_addr, deadline);
        {
            let f = &mut guard.fibers[ctx.slot];
            f.lock_address = CellAddr::of(lock);
            f.wait_tag = tag;
        }
        ktrace!("{} waits on key {:?}", ctx.handle, key_addr);
        self.block(guard, &ctx)
    }

    /// Wake up to `count` waiters on `key`, oldest first
    ///
    /// A negative count wakes every waiter; 0 only resets the key. Each woken
    /// fiber re-acquires the lock it released, queueing behind the current
    /// owner if the lock is held.
    pub fn signal_key(&self, key: &AtomicU32, count: i32) -> SchedResult<()> {
        let mut guard = self.shared.state.lock();
        let key_addr = CellAddr::of(key);

        if count == 0 {
            key.store(0, Ordering::Release);
            return Ok(());
        }

        for slot in guard.take_waiters(Waitable::KeyArbiter, key_addr, count) {
            let (lock, tag) = {
                let f = &guard.fibers[slot];
                (f.lock_address, f.wait_tag)
            };
            guard.regrant_lock(slot, lock, tag);
        }

        if guard.find_parent(Waitable::KeyArbiter, key_addr).is_none() {
            key.store(0, Ordering::Release);
        }
        Ok(())
    }
}
