//! Fallback wait word using std::sync::Condvar
//!
//! Used on platforms without futex support.
//! Less efficient but portable.

use super::WaitWord;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Condvar-backed wait word
pub struct CondvarWord {
    word: AtomicU32,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl CondvarWord {
    pub const fn new(value: u32) -> Self {
        Self {
            word: AtomicU32::new(value),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }
}

impl WaitWord for CondvarWord {
    #[inline]
    fn word(&self) -> &AtomicU32 {
        &self.word
    }

    fn wait(&self, expected: u32, timeout: Option<Duration>) -> bool {
        let guard = self.mutex.lock().unwrap_or_else(PoisonError::into_inner);

        // Checked under the mutex; `wake` takes it before notifying
        if self.word.load(Ordering::Acquire) != expected {
            return false;
        }

        match timeout {
            Some(t) => {
                let (_guard, result) = self
                    .condvar
                    .wait_timeout(guard, t)
                    .unwrap_or_else(PoisonError::into_inner);
                !result.timed_out()
            }
            None => {
                let _guard = self
                    .condvar
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner);
                true
            }
        }
    }

    fn wake(&self, count: i32) {
        drop(self.mutex.lock().unwrap_or_else(PoisonError::into_inner));
        if count == 1 {
            self.condvar.notify_one();
        } else {
            self.condvar.notify_all();
        }
    }
}
