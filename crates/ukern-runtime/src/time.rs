//! Scheduler time base
//!
//! Deadlines are absolute ticks: nanoseconds since the first time any
//! scheduler in the process read the clock. `MAX_TIME` means "never".

use std::sync::OnceLock;
use std::time::{Duration, Instant};
use ukern_core::constants::MAX_TIME;

static START_INSTANT: OnceLock<Instant> = OnceLock::new();

#[inline]
fn epoch() -> Instant {
    *START_INSTANT.get_or_init(Instant::now)
}

/// Current tick
#[inline]
pub fn now() -> u64 {
    epoch().elapsed().as_nanos().min(u128::from(MAX_TIME - 1)) as u64
}

/// Tick `d` from now, saturating to `MAX_TIME`
#[inline]
pub fn deadline_after(d: Duration) -> u64 {
    let ns = d.as_nanos().min(u128::from(MAX_TIME)) as u64;
    now().saturating_add(ns)
}

/// Check if a deadline has already passed (0 always has)
#[inline]
pub fn is_elapsed(deadline: u64, now: u64) -> bool {
    deadline != MAX_TIME && deadline <= now
}

/// Time left until `deadline`, or `None` for an infinite one
#[inline]
pub fn remaining(deadline: u64, now: u64) -> Option<Duration> {
    if deadline == MAX_TIME {
        None
    } else {
        Some(Duration::from_nanos(deadline.saturating_sub(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic() {
        let a = now();
        std::thread::sleep(Duration::from_millis(1));
        let b = now();
        assert!(b > a);
    }

    #[test]
    fn test_deadline_after() {
        let before = now();
        let d = deadline_after(Duration::from_millis(10));
        assert!(d >= before + 10_000_000);
        assert_eq!(deadline_after(Duration::MAX), MAX_TIME);
    }

    #[test]
    fn test_elapsed_and_remaining() {
        assert!(is_elapsed(0, 0));
        assert!(is_elapsed(5, 10));
        assert!(!is_elapsed(11, 10));
        assert!(!is_elapsed(MAX_TIME, u64::MAX - 1));

        assert_eq!(remaining(MAX_TIME, 0), None);
        assert_eq!(remaining(5, 10), Some(Duration::ZERO));
        assert_eq!(remaining(15, 10), Some(Duration::from_nanos(5)));
    }
}
