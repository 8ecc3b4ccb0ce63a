//! Address wait/wake
//!
//! Futex-style waiting on a caller-owned cell. The wait predicate is checked
//! under the scheduler lock, so a waker that changes the cell and then wakes
//! can never slip between a waiter's check and its park.

use crate::fiber::{CellAddr, Waitable};
use crate::scheduler::Scheduler;
use crate::time;
use std::sync::atomic::{AtomicU32, Ordering};
use ukern_core::{ktrace, SchedError, SchedResult};

impl Scheduler {
    /// Block while `*cell == value`, until woken or until `deadline`
    pub fn wait_for_address_if_equal(
        &self,
        cell: &AtomicU32,
        value: u32,
        deadline: u64,
    ) -> SchedResult<()> {
        let (ctx, mut guard) = self.enter_blocking()?;
        if cell.load(Ordering::Acquire) != value {
            return Ok(());
        }
        if time::is_elapsed(deadline, time::now()) {
            return Err(SchedError::Timeout);
        }

        let addr = CellAddr::of(cell);
        guard.park(ctx.slot, Waitable::WaitAddressArbiter, addr, deadline);
        ktrace!("{} waits on {:?} == {}", ctx.handle, addr, value);
        self.block(guard, &ctx)
    }

    /// Block while `*cell < value`, until woken or until `deadline`
    ///
    /// With `decrement` the cell is decremented before the caller parks.
    pub fn wait_for_address_if_less_than(
        &self,
        cell: &AtomicU32,
        value: u32,
        deadline: u64,
        decrement: bool,
    ) -> SchedResult<()> {
        let (ctx, mut guard) = self.enter_blocking()?;
        let current = cell.load(Ordering::Acquire);
        if current >= value {
            return Ok(());
        }
        if time::is_elapsed(deadline, time::now()) {
            return Err(SchedError::Timeout);
        }
        if decrement {
            cell.store(current.wrapping_sub(1), Ordering::Release);
        }

        let addr = CellAddr::of(cell);
        guard.park(ctx.slot, Waitable::WaitAddressArbiter, addr, deadline);
        ktrace!("{} waits on {:?} < {}", ctx.handle, addr, value);
        self.block(guard, &ctx)
    }

    /// Wake up to `count` waiters on `cell`; a negative count wakes all
    pub fn wake_by_address(&self, cell: &AtomicU32, count: i32) -> SchedResult<()> {
        let mut guard = self.shared.state.lock();
        guard.wake_waiters(Waitable::WaitAddressArbiter, CellAddr::of(cell), count, Ok(()));
        Ok(())
    }

    /// If `*cell == value`, store `value + 1` and wake up to `count` waiters
    pub fn wake_by_address_increment_equal(
        &self,
        cell: &AtomicU32,
        value: u32,
        count: i32,
    ) -> SchedResult<()> {
        let mut guard = self.shared.state.lock();
        if cell.load(Ordering::Acquire) != value {
            return Err(SchedError::InvalidState);
        }
        cell.store(value.wrapping_add(1), Ordering::Release);
        guard.wake_waiters(Waitable::WaitAddressArbiter, CellAddr::of(cell), count, Ok(()));
        Ok(())
    }

    /// If `*cell == value`, adjust it by how many waiters remain, then wake
    /// up to `count` of them
    ///
    /// The cell becomes `value + 1` with no waiters, `value - 1` when the
    /// wake empties the chain, and stays `value` otherwise.
    pub fn wake_by_address_modify_less_than(
        &self,
        cell: &AtomicU32,
        value: u32,
        count: i32,
    ) -> SchedResult<()> {
        let mut guard = self.shared.state.lock();
        if cell.load(Ordering::Acquire) != value {
            return Err(SchedError::InvalidState);
        }

        let addr = CellAddr::of(cell);
        let waiters = guard.waiter_count(Waitable::WaitAddressArbiter, addr);
        let new_value = if waiters == 0 {
            value.wrapping_add(1)
        } else if count < 0 || waiters <= count as usize {
            value.wrapping_sub(1)
        } else {
            value
        };
        cell.store(new_value, Ordering::Release);

        guard.wake_waiters(Waitable::WaitAddressArbiter, addr, count, Ok(()));
        Ok(())
    }
}
