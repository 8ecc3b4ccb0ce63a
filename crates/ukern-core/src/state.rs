//! Fiber state, activity level and priority types

use core::fmt;
use crate::error::SchedError;

/// Scheduling state of a fiber
///
/// Exactly one of these holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FiberState {
    /// Created but not started, or parked by `set_activity`
    Suspended = 0,

    /// Ready to run, in a ready queue
    Scheduled = 1,

    /// Currently executing on a core
    Running = 2,

    /// Blocked on a lock, key, address or sleep
    Waiting = 3,

    /// Finished, awaiting teardown by the dispatch loop
    Exiting = 4,
}

impl FiberState {
    /// Check if this fiber can be picked by a dispatch loop
    #[inline]
    pub const fn is_runnable(&self) -> bool {
        matches!(self, FiberState::Scheduled)
    }

    /// Check if this fiber has terminated
    #[inline]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, FiberState::Exiting)
    }
}

impl fmt::Display for FiberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FiberState::Suspended => write!(f, "suspended"),
            FiberState::Scheduled => write!(f, "scheduled"),
            FiberState::Running => write!(f, "running"),
            FiberState::Waiting => write!(f, "waiting"),
            FiberState::Exiting => write!(f, "exiting"),
        }
    }
}

/// User-requested override, independent of the queue-derived state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ActivityLevel {
    /// The fiber may be dispatched whenever it is ready
    #[default]
    Schedulable = 0,

    /// The fiber is held in the suspended queue even when ready
    Suspended = 1,
}

/// Priority level for fibers
///
/// Lower index is dispatched first. Callers use the signed range `-2..=2`,
/// where `2` is `High` and `-2` is `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    /// Dispatched before everything else
    High = 0,

    AboveNormal = 1,

    /// Default for new fibers
    #[default]
    Normal = 2,

    BelowNormal = 3,

    /// Background work, may be starved by higher levels
    Low = 4,
}

impl Priority {
    /// Number of priority levels
    pub const COUNT: usize = 5;

    /// Get priority as queue index (0 = High, 4 = Low)
    #[inline]
    pub const fn as_index(&self) -> usize {
        *self as usize
    }

    /// Get priority from queue index
    #[inline]
    pub const fn from_index(idx: usize) -> Option<Priority> {
        match idx {
            0 => Some(Priority::High),
            1 => Some(Priority::AboveNormal),
            2 => Some(Priority::Normal),
            3 => Some(Priority::BelowNormal),
            4 => Some(Priority::Low),
            _ => None,
        }
    }

    /// Signed caller-facing level (`2` = High ... `-2` = Low)
    #[inline]
    pub const fn level(&self) -> i32 {
        2 - *self as i32
    }

    /// Iterator over all priorities (highest to lowest)
    pub fn iter() -> impl Iterator<Item = Priority> {
        [
            Priority::High,
            Priority::AboveNormal,
            Priority::Normal,
            Priority::BelowNormal,
            Priority::Low,
        ]
        .into_iter()
    }
}

impl TryFrom<i32> for Priority {
    type Error = SchedError;

    fn try_from(level: i32) -> Result<Self, Self::Error> {
        match level {
            2 => Ok(Priority::High),
            1 => Ok(Priority::AboveNormal),
            0 => Ok(Priority::Normal),
            -1 => Ok(Priority::BelowNormal),
            -2 => Ok(Priority::Low),
            _ => Err(SchedError::InvalidPriority),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "HIGH"),
            Priority::AboveNormal => write!(f, "ABOVE_NORMAL"),
            Priority::Normal => write!(f, "NORMAL"),
            Priority::BelowNormal => write!(f, "BELOW_NORMAL"),
            Priority::Low => write!(f, "LOW"),
        }
    }
}
