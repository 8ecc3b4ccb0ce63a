//! Fiber continuations
//!
//! A continuation is a saved register set plus an mmap'd stack. Switching
//! happens on whatever worker thread resumes it: `resume` saves the caller's
//! registers into the continuation's host slot and jumps onto the fiber
//! stack; `suspend`, called from the fiber, jumps back to whoever resumed
//! it last. Fibers therefore migrate freely between worker threads.
//!
//! Nothing here synchronizes. Callers must guarantee that a continuation is
//! resumed by one thread at a time and only while suspended or fresh; the
//! scheduler does so by handing its lock across every switch.

use crate::arch::{self, SavedRegs};
use crate::memory::FiberStack;
use std::cell::{Cell, UnsafeCell};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use ukern_core::{kerror, kwarn};

/// Code run on the fiber stack on first resume
pub type Body = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Fresh,
    Running,
    Suspended,
    Finished,
}

struct Inner {
    /// Fiber registers while it is not running
    regs: UnsafeCell<SavedRegs>,
    /// Registers of the thread that last resumed the fiber
    host: UnsafeCell<SavedRegs>,
    body: Cell<Option<Body>>,
    status: Cell<Status>,
    cancelled: Cell<bool>,
    stack: FiberStack,
}

/// Owning side of a fiber's execution context
pub struct Continuation {
    inner: NonNull<Inner>,
}

// Safety: a continuation is only touched by the thread the scheduler has
// handed it to; the body is Send and the stack is a private mapping
unsafe impl Send for Continuation {}

impl Continuation {
    /// Map a stack and prepare `body` to run on it
    pub fn new(stack_size: usize, body: Body) -> io::Result<Self> {
        let stack = FiberStack::new(stack_size)?;
        let inner = NonNull::from(Box::leak(Box::new(Inner {
            regs: UnsafeCell::new(SavedRegs::default()),
            host: UnsafeCell::new(SavedRegs::default()),
            body: Cell::new(Some(body)),
            status: Cell::new(Status::Fresh),
            cancelled: Cell::new(false),
            stack,
        })));

        // Safety: nothing has run on the new stack; `inner` stays at this
        // address until the continuation is dropped
        unsafe {
            let i = inner.as_ref();
            arch::init_context(&mut *i.regs.get(), i.stack.top(), fiber_entry, inner.as_ptr() as usize);
        }
        Ok(Self { inner })
    }

    /// Non-owning handle used to switch into and out of this continuation
    #[inline]
    pub fn raw(&self) -> ContinuationRef {
        ContinuationRef(self.inner)
    }

    #[inline]
    fn inner(&self) -> &Inner {
        // Safety: owned until drop
        unsafe { self.inner.as_ref() }
    }

    /// Check if the body has begun running
    pub fn is_started(&self) -> bool {
        self.inner().status.get() != Status::Fresh
    }

    /// Check if the fiber is parked inside `suspend`
    pub fn is_suspended(&self) -> bool {
        self.inner().status.get() == Status::Suspended
    }

    pub fn is_finished(&self) -> bool {
        self.inner().status.get() == Status::Finished
    }

    /// Flag the fiber so that its pending `suspend` reports cancellation
    pub fn cancel(&self) {
        self.inner().cancelled.set(true);
    }

    /// Check if `addr` lies on this continuation's stack
    pub fn owns_address(&self, addr: usize) -> bool {
        self.inner().stack.contains(addr)
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        let status = self.inner().status.get();
        debug_assert!(status != Status::Running, "dropping a running continuation");
        if status == Status::Suspended {
            kwarn!("dropping a suspended fiber; its stack frames are not unwound");
        }
        // Safety: allocated by Box::leak in `new`; no ContinuationRef is
        // used after its owner is dropped
        drop(unsafe { Box::from_raw(self.inner.as_ptr()) });
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation")
            .field("status", &self.inner().status.get())
            .field("stack", &self.inner().stack)
            .finish()
    }
}

/// Copyable reference to a live continuation
#[derive(Clone, Copy)]
pub struct ContinuationRef(NonNull<Inner>);

// Safety: see `Continuation`
unsafe impl Send for ContinuationRef {}
unsafe impl Sync for ContinuationRef {}

impl ContinuationRef {
    /// Run the fiber on this thread until it suspends or finishes
    ///
    /// # Safety
    ///
    /// The owning `Continuation` must be alive, fresh or suspended, and not
    /// being resumed by any other thread.
    pub unsafe fn resume(self) {
        let inner = self.0.as_ref();
        debug_assert!(
            matches!(inner.status.get(), Status::Fresh | Status::Suspended),
            "resuming a {:?} continuation",
            inner.status.get()
        );
        inner.status.set(Status::Running);
        arch::switch_context(inner.host.get(), inner.regs.get());
    }

    /// Switch back to whoever resumed the fiber; returns on the next resume
    ///
    /// # Safety
    ///
    /// Must be called from the fiber running on this continuation.
    pub unsafe fn suspend(self) {
        let inner = self.0.as_ref();
        debug_assert_eq!(inner.status.get(), Status::Running);
        inner.status.set(Status::Suspended);
        arch::switch_context(inner.regs.get(), inner.host.get());
    }

    /// Check if the owner cancelled the fiber while it was suspended
    ///
    /// # Safety
    ///
    /// The owning `Continuation` must be alive.
    pub unsafe fn is_cancelled(self) -> bool {
        self.0.as_ref().cancelled.get()
    }
}

/// First frame on every fiber stack
extern "C" fn fiber_entry(arg: usize) -> ! {
    // Safety: `arg` is the Inner pointer handed to init_context; the owner
    // keeps it alive while the fiber can run
    let inner = unsafe { &*(arg as *const Inner) };
    if let Some(body) = inner.body.take() {
        if panic::catch_unwind(AssertUnwindSafe(body)).is_err() {
            kerror!("panic escaped a fiber body");
        }
    }
    inner.status.set(Status::Finished);
    // Safety: host holds the registers of the thread that resumed us
    unsafe { arch::switch_context(inner.regs.get(), inner.host.get()) };
    // A finished continuation is never resumed
    std::process::abort()
}
