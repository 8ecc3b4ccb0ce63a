//! # ukern - user-mode fiber kernel
//!
//! Cooperative fibers scheduled over several cores, with the arbitration
//! primitives of a small kernel: lock cells, condition keys and futex-style
//! address waits.
//!
//! ## Features
//!
//! - **Priority Scheduling**: five levels, FIFO within a level, no aging
//! - **Core Affinity**: per-fiber core masks over a scheduler-wide mask
//! - **Lock Arbitration**: handle-tagged lock cells with FIFO handoff
//! - **Condition Keys**: wait/signal that re-acquire the lock on wake
//! - **Address Waits**: compare-and-block on any `AtomicU32`
//! - **Timeouts**: absolute tick deadlines swept by the dispatch loops
//!
//! ## Quick Start
//!
//! ```ignore
//! use ukern::{Kernel, SchedulerConfig};
//! use ukern::sync::KMutex;
//! use std::sync::Arc;
//!
//! fn main() {
//!     let kernel = Kernel::new(SchedulerConfig::default()).unwrap();
//!
//!     let total = kernel.block_on(|sched| {
//!         let counter = Arc::new(KMutex::new(0u64));
//!         let workers: Vec<_> = (0..4)
//!             .map(|_| {
//!                 let counter = Arc::clone(&counter);
//!                 ukern::spawn(move || *counter.lock().unwrap() += 1).unwrap()
//!             })
//!             .collect();
//!         for h in workers {
//!             sched.join_thread(h).unwrap();
//!         }
//!         let total = *counter.lock().unwrap();
//!         total
//!     });
//!     assert_eq!(total, Ok(4));
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │        create_thread(), KMutex, KCondvar, wait/wake         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Scheduler (one SpinLock'd state)               │
//! │   run queues · wait chains · handle table · timeouts        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │  Core 0   │      │  Core 1   │      │  Core N   │
//!    │ dispatch  │      │ dispatch  │      │ dispatch  │
//!    └───────────┘      └───────────┘      └───────────┘
//!          │                   │                   │
//!          └───────────────────┼───────────────────┘
//!                              ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │     Fibers (mmap'd stacks, switched on the workers)     │
//!    │            resumed on any core in their mask            │
//!    └─────────────────────────────────────────────────────────┘
//! ```

pub mod sync;

// Re-export core types
pub use ukern_core::{
    ActivityLevel,
    Change,
    ConfigError,
    CoreMask,
    FiberHandle,
    FiberState,
    Priority,
    SchedError,
    SchedResult,
};
pub use ukern_core::constants::{MAX_TIME, WAITERS_BIT};

// Re-export kprint macros for debug logging
pub use ukern_core::{kprint, kprintln, kerror, kwarn, kinfo, kdebug, ktrace};
pub use ukern_core::kprint::{LogLevel, init as init_logging, set_log_level, set_flush_enabled, set_time_enabled};

// Re-export env utilities
pub use ukern_core::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use ukern_runtime::{
    SchedulerConfig,
    Scheduler,
    deadline_after,
    now,
};

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Owner of a scheduler's lifetime
///
/// Dereferences to the `Scheduler`, so the whole fiber API is available on
/// the kernel itself. Dropping the kernel shuts the scheduler down.
pub struct Kernel {
    scheduler: Scheduler,
    started: AtomicBool,
}

impl Kernel {
    /// Create a kernel with the given configuration
    ///
    /// This does not start the scheduler. Call `start()` or `block_on()` to begin.
    pub fn new(config: SchedulerConfig) -> SchedResult<Self> {
        Ok(Self {
            scheduler: Scheduler::new(config)?,
            started: AtomicBool::new(false),
        })
    }

    /// Start the per-core dispatch loops
    pub fn start(&self) -> SchedResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedError::InvalidState);
        }
        self.scheduler.start()
    }

    /// Run `f` in a fiber, wait for it, then shut down
    ///
    /// This is the typical entry point for applications. Returns
    /// `Terminated` if the fiber exited or panicked without producing a
    /// value.
    pub fn block_on<F, T>(&self, f: F) -> SchedResult<T>
    where
        F: FnOnce(Scheduler) -> T + Send + 'static,
        T: Send + 'static,
    {
        if !self.started.load(Ordering::SeqCst) {
            self.start()?;
        }

        let slot = Arc::new(Mutex::new(None));
        let out = Arc::clone(&slot);
        let sched = self.scheduler.clone();
        let handle = self.scheduler.create_thread(
            "main",
            move || {
                let value = f(sched);
                *out.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
            },
            0,
            0,
            None,
        )?;
        self.scheduler.start_thread(handle)?;
        self.scheduler.join_thread(handle)?;
        self.shutdown();

        let value = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        value.ok_or(SchedError::Terminated)
    }

    /// The scheduler driven by this kernel
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Stop dispatching and cancel every remaining fiber
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

impl Deref for Kernel {
    type Target = Scheduler;

    fn deref(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Create and start a Normal-priority fiber on the calling fiber's scheduler
pub fn spawn<F>(f: F) -> SchedResult<FiberHandle>
where
    F: FnOnce() + Send + 'static,
{
    spawn_with_priority(f, 0)
}

/// Create and start a fiber at `priority` (-2 lowest to 2 highest)
pub fn spawn_with_priority<F>(f: F, priority: i32) -> SchedResult<FiberHandle>
where
    F: FnOnce() + Send + 'static,
{
    let sched = Scheduler::current().ok_or(SchedError::NotAFiber)?;
    let handle = sched.create_thread("fiber", f, 0, priority, None)?;
    sched.start_thread(handle)?;
    Ok(handle)
}

/// Yield the calling fiber's core
#[inline]
pub fn yield_now() -> SchedResult<()> {
    Scheduler::current().ok_or(SchedError::NotAFiber)?.yield_now()
}

/// End the calling fiber, running its destructors
///
/// See `Scheduler::exit_thread`.
///
/// # Panics
///
/// When called outside a fiber, with the `SchedError::NotAFiber` message.
/// Use `is_in_fiber` first where that is not known.
pub fn exit_thread() -> ! {
    Scheduler::exit_thread()
}

/// Get the current fiber's handle
///
/// Returns `FiberHandle::NONE` if not running in a fiber.
#[inline]
pub fn current_handle() -> FiberHandle {
    ukern_runtime::tls::current_handle()
}

/// Check if currently executing within a fiber
#[inline]
pub fn is_in_fiber() -> bool {
    ukern_runtime::tls::is_in_fiber()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    pub(crate) fn test_kernel(cores: usize) -> Kernel {
        let config = SchedulerConfig::new()
            .num_cores(cores)
            .max_fibers(128)
            .default_stack_size(128 * 1024)
            .deadlock_abort(false)
            .park_timeout(Duration::from_millis(5));
        Kernel::new(config).unwrap()
    }

    #[test]
    fn test_block_on_returns_value() {
        let kernel = test_kernel(2);
        let result = kernel.block_on(|sched| {
            assert!(is_in_fiber());
            assert_eq!(current_handle(), sched.current_handle());
            let child = spawn(|| {}).unwrap();
            sched.join_thread(child).unwrap();
            42
        });
        assert_eq!(result, Ok(42));
        assert!(kernel.is_shutting_down());
    }

    #[test]
    fn test_block_on_exit_yields_terminated() {
        let kernel = test_kernel(1);
        let result: SchedResult<u32> = kernel.block_on(|_| exit_thread());
        assert_eq!(result, Err(SchedError::Terminated));
    }

    #[test]
    #[should_panic(expected = "exit_thread: not called from a fiber")]
    fn test_exit_thread_outside_fiber_panics() {
        assert!(!is_in_fiber());
        exit_thread();
    }

    #[test]
    fn test_free_functions_outside_fiber() {
        assert!(!is_in_fiber());
        assert_eq!(current_handle(), FiberHandle::NONE);
        assert_eq!(yield_now(), Err(SchedError::NotAFiber));
        assert_eq!(spawn(|| {}), Err(SchedError::NotAFiber));
    }

    #[test]
    fn test_start_twice() {
        let kernel = test_kernel(1);
        kernel.start().unwrap();
        assert_eq!(kernel.start(), Err(SchedError::InvalidState));
    }
}
