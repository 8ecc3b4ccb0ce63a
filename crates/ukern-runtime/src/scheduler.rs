//! The scheduler object and fiber lifecycle
//!
//! `Scheduler` is a cheap, cloneable handle to shared scheduler state. Fibers
//! get one back through `Scheduler::current()`. The synchronization
//! primitives are implemented in `arbiter`.

use crate::config::SchedulerConfig;
use crate::continuation::Continuation;
use crate::dispatch::{self, FiberExit};
use crate::fiber::{CellAddr, FiberLocalStorage, Waitable};
use crate::parking::CoreParking;
use crate::state::SchedulerState;
use crate::time;
use crate::tls::{self, FiberContext};
use crate::worker::WorkerPool;
use std::sync::{Arc, Mutex, PoisonError};
use ukern_core::constants::MIN_STACK_SIZE;
use ukern_core::kprint::{self, LogLevel};
use ukern_core::{kdebug, kinfo, kwarn};
use ukern_core::{
    ActivityLevel, Change, CoreMask, FiberHandle, FiberState, Priority, SchedError, SchedResult,
    SlotId, SpinLock, SpinLockGuard,
};

/// State shared by the scheduler handles, workers and fibers
pub(crate) struct Shared {
    pub config: SchedulerConfig,
    pub state: SpinLock<SchedulerState>,
    pub parking: Arc<CoreParking>,
    workers: Mutex<Option<WorkerPool>>,
}

/// Handle to a scheduler
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("core_mask", &self.shared.config.core_mask)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create a scheduler; no threads run until `start`
    pub fn new(config: SchedulerConfig) -> SchedResult<Self> {
        config.validate()?;

        if config.debug_logging && !kprint::level_enabled(LogLevel::Debug) {
            kprint::set_log_level(LogLevel::Debug);
        }

        let parking = Arc::new(CoreParking::new());
        let shared = Shared {
            state: SpinLock::new(SchedulerState::new(config.max_fibers, Arc::clone(&parking))),
            parking,
            workers: Mutex::new(None),
            config,
        };

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Start one dispatch loop per core in the mask
    pub fn start(&self) -> SchedResult<()> {
        let mut workers = self
            .shared
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if workers.is_some() {
            return Err(SchedError::InvalidState);
        }
        if self.shared.state.lock().shutting_down {
            return Err(SchedError::Terminated);
        }

        let mut pool = WorkerPool::new();
        let mut result = Ok(());
        for core in self.shared.config.core_mask.iter() {
            if let Err(e) = pool.spawn_core(&self.shared, core) {
                kwarn!("failed to spawn worker for core {}: {}", core, e);
                result = Err(SchedError::SpawnFailed);
                break;
            }
        }
        kinfo!(
            "scheduler started on {} cores ({:?})",
            pool.num_workers(),
            self.shared.config.core_mask
        );
        // Kept even on failure so shutdown can join what did start
        *workers = Some(pool);
        result
    }

    /// Stop dispatching, join the workers, cancel every remaining fiber
    ///
    /// Idempotent. Must be called from outside the scheduler's fibers.
    pub fn shutdown(&self) {
        if self.calling_fiber().is_ok() {
            kwarn!("shutdown called from inside a fiber; ignored");
            return;
        }

        {
            let mut guard = self.shared.state.lock();
            if guard.shutting_down {
                return;
            }
            guard.shutting_down = true;
            self.shared.parking.notify();
        }

        let pool = self
            .shared
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = pool {
            pool.join();
        }

        let fibers = {
            let mut guard = self.shared.state.lock();
            let fibers = guard.fibers.drain();
            guard.queues.clear();
            for (_, fiber) in &fibers {
                guard.handles.release(fiber.handle);
            }
            fibers
        };

        let cancelled = fibers.len();
        for (slot, fiber) in fibers {
            if let Some(cont) = fiber.continuation {
                self.unwind_suspended(slot, fiber.handle, cont);
            }
        }
        kinfo!("scheduler shut down ({} fibers cancelled)", cancelled);
    }

    /// Resume a suspended fiber on this thread so that it unwinds
    ///
    /// A fiber that never ran only has its entry closure, which dropping
    /// the continuation releases.
    fn unwind_suspended(&self, slot: SlotId, handle: FiberHandle, cont: Continuation) {
        if !cont.is_suspended() {
            return;
        }
        cont.cancel();
        let raw = cont.raw();
        tls::set_current_fiber(FiberContext {
            shared: Arc::clone(&self.shared),
            slot,
            handle,
            cont: raw,
        });
        kprint::set_fiber_id(handle.as_u32());

        // Safety: the workers are joined, so nothing else can resume it
        unsafe { raw.resume() };

        kprint::clear_fiber_id();
        tls::clear_current_fiber();
        tls::clear_cancelled();
        if !cont.is_finished() {
            kwarn!("fiber {} suspended again while being cancelled", handle);
        }
    }

    /// Scheduler of the calling fiber, if any
    pub fn current() -> Option<Scheduler> {
        tls::current_fiber().map(|ctx| Scheduler { shared: ctx.shared })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn core_mask(&self) -> CoreMask {
        self.shared.config.core_mask
    }

    /// Check if shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        self.shared.state.lock().shutting_down
    }

    /// Number of live fibers
    pub fn live_fibers(&self) -> usize {
        self.shared.state.lock().handles.live()
    }

    // ------------------------------------------------------------------
    // Calling-fiber helpers
    // ------------------------------------------------------------------

    /// Context of the calling fiber, if it belongs to this scheduler
    pub(crate) fn calling_fiber(&self) -> SchedResult<FiberContext> {
        if tls::is_cancelled() {
            return Err(SchedError::Terminated);
        }
        match tls::current_fiber() {
            Some(ctx) if Arc::ptr_eq(&ctx.shared, &self.shared) => Ok(ctx),
            _ => Err(SchedError::NotAFiber),
        }
    }

    /// Lock the scheduler on behalf of a call that may block
    ///
    /// During shutdown the calling fiber gives its core back and is
    /// cancelled instead of returning.
    pub(crate) fn enter_blocking(
        &self,
    ) -> SchedResult<(FiberContext, SpinLockGuard<'_, SchedulerState>)> {
        let ctx = self.calling_fiber()?;
        let guard = self.shared.state.lock();
        let guard = self.refuse_if_shutting_down(guard, &ctx)?;
        Ok((ctx, guard))
    }

    /// Give the core back and report `Terminated` once shutdown has begun
    pub(crate) fn refuse_if_shutting_down<'a>(
        &'a self,
        guard: SpinLockGuard<'a, SchedulerState>,
        ctx: &FiberContext,
    ) -> SchedResult<SpinLockGuard<'a, SchedulerState>> {
        if guard.shutting_down {
            drop(dispatch::suspend(&self.shared, guard, ctx));
            return Err(SchedError::Terminated);
        }
        Ok(guard)
    }

    /// Switch out until woken, then return the delivered result
    pub(crate) fn block(
        &self,
        guard: SpinLockGuard<'_, SchedulerState>,
        ctx: &FiberContext,
    ) -> SchedResult<()> {
        let mut guard = dispatch::suspend(&self.shared, guard, ctx);
        std::mem::replace(&mut guard.fibers[ctx.slot].last_result, Ok(()))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create a fiber in the Suspended state
    ///
    /// `priority` is -2 (lowest) to 2 (highest). `core_id` pins the fiber
    /// to one core; `None` allows every core of the scheduler. A
    /// `stack_size` of 0 selects the configured default.
    pub fn create_thread<F>(
        &self,
        name: &str,
        entry: F,
        stack_size: usize,
        priority: i32,
        core_id: Option<u32>,
    ) -> SchedResult<FiberHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let priority = Priority::try_from(priority)?;
        let core_mask = match core_id {
            None => self.shared.config.core_mask,
            Some(core) if self.shared.config.core_mask.contains(core as usize) => {
                CoreMask::single(core as usize)
            }
            Some(_) => return Err(SchedError::InvalidCoreId),
        };
        let stack_size = match stack_size {
            0 => self.shared.config.default_stack_size,
            s if s < MIN_STACK_SIZE => return Err(SchedError::InvalidStackSize),
            s => s,
        };

        let (slot, handle) = {
            let mut guard = self.shared.state.lock();
            if guard.shutting_down {
                return Err(SchedError::Terminated);
            }
            guard.reserve()?
        };

        // The stack is mapped outside the lock
        let shared = Arc::clone(&self.shared);
        let fiber_name = name.to_string();
        let entry: Box<dyn FnOnce() + Send> = Box::new(entry);
        let mapped = Continuation::new(
            stack_size,
            Box::new(move || dispatch::fiber_main(shared, slot, fiber_name, entry)),
        );

        let mut guard = self.shared.state.lock();
        let cont = match mapped {
            Ok(cont) => cont,
            Err(e) => {
                guard.unreserve(slot, handle);
                kwarn!("failed to map a {} byte stack for '{}': {}", stack_size, name, e);
                return Err(SchedError::StackAllocFailed);
            }
        };
        if guard.shutting_down {
            guard.unreserve(slot, handle);
            drop(guard);
            drop(cont);
            return Err(SchedError::Terminated);
        }

        let mut fiber = FiberLocalStorage::new(handle, name.to_string(), priority, core_mask, stack_size);
        fiber.continuation = Some(cont);
        guard.insert_suspended(slot, fiber);
        drop(guard);

        kdebug!("created fiber '{}' {} ({})", name, handle, priority);
        Ok(handle)
    }

    /// Make a freshly created fiber runnable
    ///
    /// Same as raising its activity to Schedulable, but refuses a fiber
    /// that has already been started.
    pub fn start_thread(&self, handle: FiberHandle) -> SchedResult<()> {
        let mut guard = self.shared.state.lock();
        let slot = guard.resolve_live(handle)?;
        if guard.fibers[slot].fiber_state != FiberState::Suspended {
            return Err(SchedError::InvalidState);
        }
        guard.start(slot);
        Ok(())
    }

    /// End the calling fiber
    ///
    /// Unwinds the fiber's stack, running destructors, then hands its core
    /// back for teardown. Code that catches unwinds must let this one pass.
    /// Destructors run by the unwind may release locks but must not block.
    ///
    /// # Panics
    ///
    /// When called outside a fiber, with a message naming
    /// `SchedError::NotAFiber`. Nothing is unwound in that case.
    pub fn exit_thread() -> ! {
        if !tls::is_in_fiber() {
            panic!("exit_thread: {}", SchedError::NotAFiber);
        }
        std::panic::resume_unwind(Box::new(FiberExit))
    }

    /// Wait until `handle` no longer names a live fiber
    ///
    /// Polls every `join_poll_interval`: by sleeping when called from a
    /// fiber, by sleeping the OS thread otherwise.
    pub fn join_thread(&self, handle: FiberHandle) -> SchedResult<()> {
        let poll = self.shared.config.join_poll_interval;
        let in_fiber = match self.calling_fiber() {
            Ok(ctx) if ctx.handle == handle => return Err(SchedError::InvalidState),
            Ok(_) => true,
            Err(SchedError::NotAFiber) => false,
            Err(e) => return Err(e),
        };

        while self.shared.state.lock().resolve(handle).is_some() {
            if in_fiber {
                self.sleep(time::deadline_after(poll))?;
            } else {
                std::thread::sleep(poll);
            }
        }
        Ok(())
    }

    pub fn set_priority(&self, handle: FiberHandle, priority: i32) -> SchedResult<Change> {
        let priority = Priority::try_from(priority)?;
        let mut guard = self.shared.state.lock();
        let slot = guard.resolve_live(handle)?;
        if guard.fibers[slot].priority == priority {
            return Ok(Change::Unchanged);
        }
        guard.fibers[slot].priority = priority;
        guard.requeue_if_queued(slot);
        Ok(Change::Applied)
    }

    /// Restrict the cores a fiber may run on
    ///
    /// The mask must be a non-empty subset of the scheduler's core mask.
    pub fn set_core_mask(&self, handle: FiberHandle, mask: CoreMask) -> SchedResult<Change> {
        if mask.is_empty() || !mask.is_subset_of(self.shared.config.core_mask) {
            return Err(SchedError::InvalidCoreId);
        }
        let mut guard = self.shared.state.lock();
        let slot = guard.resolve_live(handle)?;
        if guard.fibers[slot].core_mask == mask {
            return Ok(Change::Unchanged);
        }
        guard.fibers[slot].core_mask = mask;
        guard.requeue_if_queued(slot);
        Ok(Change::Applied)
    }

    /// Suspend or resume dispatching of a fiber
    ///
    /// A Suspended fiber that is running or waiting keeps doing so; it is
    /// parked in the suspended queue the next time it would be queued.
    /// Raising a fiber that was never started starts it.
    pub fn set_activity(&self, handle: FiberHandle, activity: ActivityLevel) -> SchedResult<Change> {
        let mut guard = self.shared.state.lock();
        let slot = guard.resolve_live(handle)?;
        if guard.fibers[slot].activity == activity {
            return Ok(Change::Unchanged);
        }
        if activity == ActivityLevel::Schedulable
            && guard.fibers[slot].fiber_state == FiberState::Suspended
        {
            guard.start(slot);
            return Ok(Change::Applied);
        }
        guard.fibers[slot].activity = activity;
        guard.requeue_if_queued(slot);
        Ok(Change::Applied)
    }

    /// Block the calling fiber until tick `deadline`
    ///
    /// A deadline already in the past returns at once.
    pub fn sleep(&self, deadline: u64) -> SchedResult<()> {
        let (ctx, mut guard) = self.enter_blocking()?;
        if time::is_elapsed(deadline, time::now()) {
            return Ok(());
        }
        guard.park(ctx.slot, Waitable::Sleep, CellAddr::NULL, deadline);
        match self.block(guard, &ctx) {
            Err(SchedError::Timeout) => Ok(()),
            other => other,
        }
    }

    /// Give the core to the next fiber of equal or higher priority
    pub fn yield_now(&self) -> SchedResult<()> {
        let (ctx, guard) = self.enter_blocking()?;
        drop(dispatch::suspend(&self.shared, guard, &ctx));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Handle of the calling fiber, or NONE outside a fiber
    pub fn current_handle(&self) -> FiberHandle {
        self.calling_fiber().map_or(FiberHandle::NONE, |ctx| ctx.handle)
    }

    pub fn thread_name(&self, handle: FiberHandle) -> SchedResult<String> {
        let guard = self.shared.state.lock();
        let slot = guard.resolve_live(handle)?;
        Ok(guard.fibers[slot].name.clone())
    }

    pub fn thread_state(&self, handle: FiberHandle) -> SchedResult<FiberState> {
        let guard = self.shared.state.lock();
        let slot = guard.resolve_live(handle)?;
        Ok(guard.fibers[slot].fiber_state)
    }

    pub fn priority_of(&self, handle: FiberHandle) -> SchedResult<Priority> {
        let guard = self.shared.state.lock();
        let slot = guard.resolve_live(handle)?;
        Ok(guard.fibers[slot].priority)
    }

    pub fn activity_of(&self, handle: FiberHandle) -> SchedResult<ActivityLevel> {
        let guard = self.shared.state.lock();
        let slot = guard.resolve_live(handle)?;
        Ok(guard.fibers[slot].activity)
    }
}
