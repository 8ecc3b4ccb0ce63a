//! Per-core dispatch loop and the fiber side of a switch
//!
//! The scheduler lock travels with every switch: whoever gives up a core
//! leaks its guard, and whoever is handed the core adopts it. A fiber is
//! therefore never observable by another core between "decided to block"
//! and "actually switched off its stack".
//!
//! A worker records the fiber it is about to run in thread-local storage
//! before resuming it and clears the record once the fiber gives the core
//! back, so fiber code always sees the identity of the fiber itself.

use crate::scheduler::Shared;
use crate::state::SchedulerState;
use crate::time;
use crate::tls::{self, FiberContext};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use ukern_core::{kdebug, kerror, kprint, ktrace, kwarn};
use ukern_core::{FiberState, SlotId, SpinLockGuard};

/// Unwind payload that ends a fiber
pub(crate) struct FiberExit;

/// Main loop of the worker thread driving `core`
pub(crate) fn core_main(shared: Arc<Shared>, core: usize) {
    tls::set_core_id(core);
    kprint::set_core_id(core as u32);
    kdebug!("dispatch loop started");

    let park_timeout = shared.config.park_timeout;
    let mut guard = shared.state.lock();
    guard.active_cores += 1;

    while !guard.shutting_down {
        guard.sweep_timeouts(time::now());

        if let Some(slot) = guard.take_ready(core) {
            guard = switch_to(&shared, guard, core, slot);
            continue;
        }

        // Idle
        guard.active_cores -= 1;
        if guard.active_cores == 0 && shared.config.deadlock_abort && guard.is_deadlocked() {
            kerror!("deadlock: every live fiber is blocked with no deadline");
            for line in guard.describe_fibers() {
                kerror!("  {}", line);
            }
            std::process::abort();
        }

        let deadline = guard.next_deadline(core);
        let seen = shared.parking.epoch();
        drop(guard);

        let timeout = deadline
            .and_then(|d| time::remaining(d, time::now()))
            .map_or(park_timeout, |d| d.min(park_timeout));
        shared.parking.park(seen, Some(timeout));

        guard = shared.state.lock();
        guard.active_cores += 1;
    }

    guard.active_cores -= 1;
    drop(guard);
    kdebug!("dispatch loop stopped");
    kprint::clear_core_id();
}

/// Run `slot` on `core` until it gives the core back
fn switch_to<'a>(
    shared: &'a Arc<Shared>,
    mut guard: SpinLockGuard<'a, SchedulerState>,
    core: usize,
    slot: SlotId,
) -> SpinLockGuard<'a, SchedulerState> {
    let Some(cont) = guard.begin_run(slot, core) else {
        kwarn!("slot {} has no continuation; dropping it", slot);
        drop(guard.destroy(slot));
        return guard;
    };
    let handle = guard.fibers[slot].handle;
    ktrace!("switch to {}", handle);

    tls::set_current_fiber(FiberContext {
        shared: Arc::clone(shared),
        slot,
        handle,
        cont,
    });
    kprint::set_fiber_id(handle.as_u32());

    SpinLockGuard::leak(guard);
    // Safety: the fiber was dequeued under the lock, so no other core can
    // resume it; its continuation lives until destroy below
    unsafe { cont.resume() };

    kprint::clear_fiber_id();
    tls::clear_current_fiber();

    // Safety: the fiber leaked the lock before switching back
    let mut guard = unsafe { shared.state.adopt() };

    match guard.fibers.get(slot).map(|f| f.fiber_state) {
        Some(FiberState::Running) if !guard.shutting_down => guard.make_ready(slot),
        Some(FiberState::Exiting) => {
            drop(guard.destroy(slot));
            kdebug!("fiber {} exited", handle);
        }
        _ => {}
    }
    guard
}

/// Give the core back and wait to be dispatched again
///
/// Called by the running fiber with the lock held; returns with the lock
/// held again, possibly on a different worker thread. If the scheduler is
/// torn down meanwhile the fiber unwinds from here instead.
pub(crate) fn suspend<'a>(
    shared: &'a Shared,
    guard: SpinLockGuard<'a, SchedulerState>,
    ctx: &FiberContext,
) -> SpinLockGuard<'a, SchedulerState> {
    debug_assert!(
        guard.fibers[ctx.slot].current_core.is_some(),
        "running fiber {} has no core",
        ctx.handle
    );

    SpinLockGuard::leak(guard);
    // Safety: called on this fiber's own stack
    unsafe { ctx.cont.suspend() };

    // Safety: only shutdown sets the flag, and it owns the continuation
    if unsafe { ctx.cont.is_cancelled() } {
        tls::mark_cancelled();
        panic::resume_unwind(Box::new(FiberExit))
    }
    // Safety: the dispatching core leaked the lock before resuming us
    unsafe { shared.state.adopt() }
}

/// Body of every fiber, run on its own stack
pub(crate) fn fiber_main(
    shared: Arc<Shared>,
    slot: SlotId,
    name: String,
    entry: Box<dyn FnOnce() + Send>,
) {
    // Safety: first dispatch; switch_to leaked the lock
    drop(unsafe { shared.state.adopt() });

    match panic::catch_unwind(AssertUnwindSafe(entry)) {
        Ok(()) => {}
        Err(payload) if payload.is::<FiberExit>() => {}
        Err(payload) => kerror!("fiber '{}' panicked: {}", name, panic_message(&*payload)),
    }

    if !tls::is_cancelled() {
        finish(&shared, slot);
    }
}

/// Mark the calling fiber Exiting and leave the lock for its core
///
/// The switch back happens when the fiber body returns.
fn finish(shared: &Shared, slot: SlotId) {
    let mut guard = shared.state.lock();
    if let Some(f) = guard.fibers.get_mut(slot) {
        f.fiber_state = FiberState::Exiting;
    }
    SpinLockGuard::leak(guard);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
