//! Thread-local storage for scheduler context
//!
//! Worker threads record their core id, and the fiber they are currently
//! running. A fiber may resume on a different worker than it suspended on,
//! so the accessors are kept out of line: a thread-local address computed
//! before a switch must not be reused after it.

use crate::continuation::ContinuationRef;
use crate::scheduler::Shared;
use std::cell::{Cell, RefCell};
use std::sync::Arc;
use ukern_core::{FiberHandle, SlotId};

/// Identity of the fiber running on this thread
#[derive(Clone)]
pub(crate) struct FiberContext {
    pub shared: Arc<Shared>,
    pub slot: SlotId,
    pub handle: FiberHandle,
    pub cont: ContinuationRef,
}

thread_local! {
    /// Core id of the dispatch loop running on this OS thread
    static CORE_ID: Cell<usize> = const { Cell::new(usize::MAX) };

    /// Fiber running on this OS thread
    static CURRENT_FIBER: RefCell<Option<FiberContext>> = const { RefCell::new(None) };

    /// Set while shutdown unwinds a cancelled fiber on this thread
    static CANCELLED: Cell<bool> = const { Cell::new(false) };
}

/// Set the current core ID
#[inline(never)]
pub fn set_core_id(id: usize) {
    CORE_ID.with(|cell| cell.set(id));
}

/// Try to get current core ID, returns None if not on a worker thread
#[inline(never)]
pub fn try_current_core_id() -> Option<usize> {
    let id = CORE_ID.with(|cell| cell.get());
    if id == usize::MAX {
        None
    } else {
        Some(id)
    }
}

#[inline(never)]
pub(crate) fn set_current_fiber(ctx: FiberContext) {
    CURRENT_FIBER.with(|cell| *cell.borrow_mut() = Some(ctx));
}

#[inline(never)]
pub(crate) fn clear_current_fiber() {
    let ctx = CURRENT_FIBER.with(|cell| cell.borrow_mut().take());
    // Dropped outside the borrow: releasing the last `Shared` reference
    // must not run inside the RefCell
    drop(ctx);
}

#[inline(never)]
pub(crate) fn current_fiber() -> Option<FiberContext> {
    CURRENT_FIBER.with(|cell| cell.borrow().clone())
}

/// Handle of the fiber running on this thread, or NONE outside a fiber
#[inline(never)]
pub fn current_handle() -> FiberHandle {
    CURRENT_FIBER.with(|cell| {
        cell.borrow()
            .as_ref()
            .map(|ctx| ctx.handle)
            .unwrap_or(FiberHandle::NONE)
    })
}

/// Check if we're running inside a fiber
#[inline(never)]
pub fn is_in_fiber() -> bool {
    CURRENT_FIBER.with(|cell| cell.borrow().is_some())
}

#[inline(never)]
pub(crate) fn mark_cancelled() {
    CANCELLED.with(|cell| cell.set(true));
}

#[inline(never)]
pub(crate) fn clear_cancelled() {
    CANCELLED.with(|cell| cell.set(false));
}

/// Check if this fiber is unwinding because its scheduler shut down
#[inline(never)]
pub fn is_cancelled() -> bool {
    CANCELLED.with(|cell| cell.get())
}
