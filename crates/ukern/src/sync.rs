//! Fiber-blocking mutex and condition variable
//!
//! Thin clients of the scheduler's lock and key arbitration. Both must be
//! used from fibers; the lock cell stores the owning fiber's handle.

use crate::{Scheduler, MAX_TIME};
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};
use ukern_core::{FiberHandle, SchedError, SchedResult};

/// Mutex whose waiters block their fiber, not their OS thread
pub struct KMutex<T> {
    cell: AtomicU32,
    data: UnsafeCell<T>,
}

// Safety: access to `data` is serialized by the lock cell
unsafe impl<T: Send> Send for KMutex<T> {}
unsafe impl<T: Send> Sync for KMutex<T> {}

impl<T> KMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            cell: AtomicU32::new(0),
            data: UnsafeCell::new(value),
        }
    }

    /// Block the calling fiber until it owns the mutex
    ///
    /// Re-locking from the owning fiber returns `InvalidState`.
    pub fn lock(&self) -> SchedResult<KMutexGuard<'_, T>> {
        let sched = Scheduler::current().ok_or(SchedError::NotAFiber)?;
        let me = sched.current_handle();
        loop {
            let owner = FiberHandle::lock_owner(self.cell.load(Ordering::Acquire));
            match sched.arbitrate_lock(owner, &self.cell, me.as_u32()) {
                Ok(()) => return Ok(KMutexGuard { mutex: self, sched }),
                // The owner changed under us; re-read and retry
                Err(SchedError::InvalidState) if owner != me => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Check if some fiber holds the mutex
    pub fn is_locked(&self) -> bool {
        self.cell.load(Ordering::Acquire) != 0
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for KMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// RAII guard; unlocks on drop
pub struct KMutexGuard<'a, T> {
    mutex: &'a KMutex<T>,
    sched: Scheduler,
}

impl<T> Deref for KMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard proves ownership of the lock cell
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for KMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard proves ownership of the lock cell
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for KMutexGuard<'_, T> {
    fn drop(&mut self) {
        // Fails only when not the owner, e.g. while unwinding at shutdown
        let _ = self.sched.arbitrate_unlock(&self.mutex.cell);
    }
}

/// Condition variable over a scheduler key cell
#[derive(Default)]
pub struct KCondvar {
    key: AtomicU32,
}

impl KCondvar {
    pub const fn new() -> Self {
        Self {
            key: AtomicU32::new(0),
        }
    }

    /// Release the guard's mutex, wait for a notification, re-acquire
    pub fn wait<'a, T>(&self, guard: KMutexGuard<'a, T>) -> SchedResult<KMutexGuard<'a, T>> {
        self.wait_until(guard, MAX_TIME).map(|(guard, _)| guard)
    }

    /// Like `wait`, giving up at tick `deadline`
    ///
    /// The mutex is held again on return either way; the flag reports
    /// whether the deadline passed.
    pub fn wait_until<'a, T>(
        &self,
        guard: KMutexGuard<'a, T>,
        deadline: u64,
    ) -> SchedResult<(KMutexGuard<'a, T>, bool)> {
        let me = guard.sched.current_handle();
        match guard.sched.wait_key(&guard.mutex.cell, &self.key, me.as_u32(), deadline) {
            Ok(()) => Ok((guard, false)),
            Err(SchedError::Timeout) => {
                let mutex = guard.mutex;
                // Already released by the key wait; this unlock is refused
                drop(guard);
                Ok((mutex.lock()?, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Wake the oldest waiter
    pub fn notify_one(&self) -> SchedResult<()> {
        self.signal(1)
    }

    /// Wake every waiter
    pub fn notify_all(&self) -> SchedResult<()> {
        self.signal(-1)
    }

    fn signal(&self, count: i32) -> SchedResult<()> {
        Scheduler::current()
            .ok_or(SchedError::NotAFiber)?
            .signal_key(&self.key, count)
    }
}
