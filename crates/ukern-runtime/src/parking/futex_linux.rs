//! Linux futex-backed wait word
//!
//! `wait` blocks in FUTEX_WAIT while the word still holds the expected
//! value; `wake` issues FUTEX_WAKE. Both use the process-private variant
//! since every waiter lives in this process.

use super::WaitWord;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

/// Futex word
pub struct FutexWord {
    word: AtomicU32,
}

impl FutexWord {
    pub const fn new(value: u32) -> Self {
        Self {
            word: AtomicU32::new(value),
        }
    }
}

impl WaitWord for FutexWord {
    #[inline]
    fn word(&self) -> &AtomicU32 {
        &self.word
    }

    fn wait(&self, expected: u32, timeout: Option<Duration>) -> bool {
        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs().min(i64::MAX as u64) as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });

        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        // Safety: the word outlives the call; the kernel only reads it
        let result = unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.word.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                expected,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            )
        };

        // ETIMEDOUT, EAGAIN (value already changed) and EINTR all report false;
        // callers re-check the word either way
        result == 0
    }

    fn wake(&self, count: i32) {
        // Safety: as above
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.word.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                count,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }
}
