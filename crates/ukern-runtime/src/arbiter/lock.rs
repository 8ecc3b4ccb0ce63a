//! Lock arbitration
//!
//! A lock cell holds 0 when free, the owner's tag while owned, and the tag
//! with `WAITERS_BIT` set once another fiber has queued behind the owner.

use crate::fiber::CellAddr;
use crate::scheduler::Scheduler;
use std::sync::atomic::{AtomicU32, Ordering};
use ukern_core::constants::WAITERS_BIT;
use ukern_core::{ktrace, FiberHandle, SchedError, SchedResult};

impl Scheduler {
    /// Acquire the lock in `cell`, blocking behind `owner` if it holds it
    ///
    /// `owner` is the handle the caller last read from the cell and `tag`
    /// is the value to store once the caller owns it, normally its own
    /// handle. A stale `owner` returns `InvalidState` so the caller can
    /// re-read the cell and retry. A free cell is taken without blocking,
    /// from any thread.
    pub fn arbitrate_lock(&self, owner: FiberHandle, cell: &AtomicU32, tag: u32) -> SchedResult<()> {
        let ctx = match self.calling_fiber() {
            Ok(ctx) => Some(ctx),
            Err(SchedError::NotAFiber) => None,
            Err(e) => return Err(e),
        };

        let mut guard = self.shared.state.lock();
        let value = cell.load(Ordering::Acquire);
        if value == 0 {
            cell.store(tag, Ordering::Release);
            return Ok(());
        }

        let ctx = ctx.ok_or(SchedError::NotAFiber)?;
        guard = self.refuse_if_shutting_down(guard, &ctx)?;

        if FiberHandle::lock_owner(value) != owner || owner == ctx.handle {
            return Err(SchedError::InvalidState);
        }
        let owner_slot = guard.resolve_live(owner)?;

        let addr = CellAddr::of(cell);
        cell.store(value | WAITERS_BIT, Ordering::Release);
        guard.add_lock_waiter(owner_slot, ctx.slot, addr, tag);
        ktrace!("{} waits for {:?} held by {}", ctx.handle, addr, owner);
        self.block(guard, &ctx)
    }

    /// Release the lock in `cell`, held by the calling fiber
    ///
    /// Ownership passes to the oldest fiber queued on this cell, if any.
    pub fn arbitrate_unlock(&self, cell: &AtomicU32) -> SchedResult<()> {
        let ctx = self.calling_fiber()?;
        let mut guard = self.shared.state.lock();

        let slot = guard.resolve(ctx.handle).ok_or(SchedError::InvalidState)?;
        let value = cell.load(Ordering::Acquire);
        if value == 0 || FiberHandle::lock_owner(value) != ctx.handle {
            return Err(SchedError::InvalidState);
        }

        guard.release_lock(slot, CellAddr::of(cell));
        Ok(())
    }
}
