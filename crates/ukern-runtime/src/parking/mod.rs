//! Blocking primitives for OS threads
//!
//! `CoreParking` is the wake counter idle dispatch loops sleep on. It sits
//! on a wait-word abstraction whose platform-specific implementations use
//! the most efficient primitive available.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// A 32-bit word threads can sleep on until it changes
pub trait WaitWord: Send + Sync {
    /// The underlying atomic
    fn word(&self) -> &AtomicU32;

    /// Sleep while the word equals `expected`, or until `timeout` passes
    ///
    /// Returns `true` if woken by `wake`. Spurious returns happen; callers
    /// re-check the word regardless of the result.
    fn wait(&self, expected: u32, timeout: Option<Duration>) -> bool;

    /// Wake up to `count` sleepers (`i32::MAX` for all)
    fn wake(&self, count: i32);
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexWord as PlatformWord;
    } else {
        mod fallback;
        pub use fallback::CondvarWord as PlatformWord;
    }
}

/// Wake counter for idle dispatch loops
///
/// An idle core snapshots `epoch()` while still holding the scheduler lock,
/// releases the lock, then calls `park(seen, ..)`. Anything that makes a
/// fiber ready calls `notify()` under the lock, so a notification between the
/// snapshot and the sleep is never lost: the counter has already moved.
pub struct CoreParking {
    seq: PlatformWord,
    parked: AtomicUsize,
}

impl CoreParking {
    pub const fn new() -> Self {
        Self {
            seq: PlatformWord::new(0),
            parked: AtomicUsize::new(0),
        }
    }

    /// Current value of the wake counter
    #[inline]
    pub fn epoch(&self) -> u32 {
        self.seq.word().load(Ordering::SeqCst)
    }

    /// Sleep until the counter moves past `seen` or `timeout` passes
    ///
    /// Returns `true` if the counter moved.
    pub fn park(&self, seen: u32, timeout: Option<Duration>) -> bool {
        self.parked.fetch_add(1, Ordering::SeqCst);
        if self.epoch() == seen {
            self.seq.wait(seen, timeout);
        }
        self.parked.fetch_sub(1, Ordering::SeqCst);
        self.epoch() != seen
    }

    /// Bump the counter and wake every parked core
    pub fn notify(&self) {
        self.seq.word().fetch_add(1, Ordering::SeqCst);
        if self.parked.load(Ordering::SeqCst) > 0 {
            self.seq.wake(i32::MAX);
        }
    }

    /// Number of currently parked cores (hint, may be stale)
    pub fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}

impl Default for CoreParking {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_park_timeout() {
        let parking = CoreParking::new();
        let seen = parking.epoch();
        let start = Instant::now();
        let moved = parking.park(seen, Some(Duration::from_millis(50)));
        let elapsed = start.elapsed();

        assert!(!moved);
        assert!(elapsed >= Duration::from_millis(40)); // Allow some slack
    }

    #[test]
    fn test_stale_snapshot_returns_immediately() {
        let parking = CoreParking::new();
        let seen = parking.epoch();
        parking.notify();

        let start = Instant::now();
        assert!(parking.park(seen, Some(Duration::from_secs(10))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_notify_wakes_parked() {
        let parking = Arc::new(CoreParking::new());
        let parking2 = Arc::clone(&parking);
        let seen = parking.epoch();

        let handle = thread::spawn(move || parking2.park(seen, Some(Duration::from_secs(10))));

        // Give thread time to park
        thread::sleep(Duration::from_millis(50));
        parking.notify();

        assert!(handle.join().unwrap());
        assert_eq!(parking.parked_count(), 0);
    }

    #[test]
    fn test_wait_word_value_mismatch() {
        let word = PlatformWord::new(5);
        let start = Instant::now();
        assert!(!word.wait(4, Some(Duration::from_secs(10))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
