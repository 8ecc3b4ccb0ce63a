//! The scheduler lock
//!
//! A spinlock whose ownership is not tied to an OS thread. The scheduler
//! relies on that: a fiber about to block keeps the lock held while it
//! switches out, and whichever side resumes adopts it. That is what stops
//! another core from dispatching a fiber whose context is still being saved.

use core::cell::UnsafeCell;
use core::mem;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

const SPIN_LIMIT: u32 = 128;

/// A spinlock with transferable ownership
///
/// Critical sections must be short: they only ever cover queue and
/// control-block surgery, never user code.
pub struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// Safety: SpinLock provides exclusive access to T
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Create a new spinlock containing the given value
    #[inline]
    pub const fn new(value: T) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock, spinning until it's available
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        while !self.acquire(true) {
            self.wait_released();
        }
        SpinLockGuard { lock: self }
    }

    /// Try to acquire the lock without spinning
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.acquire(false).then(|| SpinLockGuard { lock: self })
    }

    #[inline]
    fn acquire(&self, weak: bool) -> bool {
        let (order, fail) = (Ordering::Acquire, Ordering::Relaxed);
        if weak {
            self.locked.compare_exchange_weak(false, true, order, fail).is_ok()
        } else {
            self.locked.compare_exchange(false, true, order, fail).is_ok()
        }
    }

    // Read-only spin so waiters don't bounce the cache line; past
    // SPIN_LIMIT rounds the holder is probably a descheduled worker.
    #[cold]
    fn wait_released(&self) {
        let mut rounds = 0u32;
        while self.locked.load(Ordering::Relaxed) {
            if rounds < SPIN_LIMIT {
                rounds += 1;
                for _ in 0..rounds.min(64) {
                    core::hint::spin_loop();
                }
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Take over a lock that was leaked by another thread
    ///
    /// # Safety
    ///
    /// The lock must be held, and its previous holder must have given it up
    /// with [`SpinLockGuard::leak`] on our behalf.
    #[inline]
    pub unsafe fn adopt(&self) -> SpinLockGuard<'_, T> {
        debug_assert!(self.is_locked(), "adopting an unlocked SpinLock");
        SpinLockGuard { lock: self }
    }

    /// Check if the lock is currently held
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Get mutable access to the underlying data
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        SpinLock::new(T::default())
    }
}

/// Guard that releases the spinlock when dropped
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<'a, T> SpinLockGuard<'a, T> {
    /// Give up the guard without releasing the lock
    ///
    /// The lock stays held until some thread calls [`SpinLock::adopt`] and
    /// drops the resulting guard.
    #[inline]
    pub fn leak(guard: Self) {
        mem::forget(guard);
    }
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: We hold the lock
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: We hold the lock
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
