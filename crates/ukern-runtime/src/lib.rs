//! # ukern-runtime
//!
//! Multi-core cooperative fiber scheduler.
//!
//! This crate provides:
//! - Per-core dispatch loops over five priority levels with core affinity
//! - Lock arbitration, condition keys and futex-style address wait/wake
//! - Fiber lifecycle through a generation-checked handle table
//! - Timeout sweeping and global deadlock detection
//!
//! Fibers are stackful: each has an mmap'd stack and runs on whichever
//! worker thread dispatches it, switched in and out by a few lines of
//! assembly per architecture. The scheduler lock is handed across every
//! switch.

pub mod config;
pub mod parking;
pub mod time;
mod list;
mod handle;
mod arch;
mod memory;
mod continuation;
pub mod tls;
mod fiber;
mod queue;
mod state;
mod dispatch;
pub mod worker;
pub mod scheduler;
mod arbiter;

#[cfg(test)]
mod tests;

// Re-exports
pub use config::SchedulerConfig;
pub use scheduler::Scheduler;
pub use worker::WorkerPool;
pub use parking::CoreParking;
pub use time::{deadline_after, now};
pub use ukern_core::constants::{MAX_TIME, WAITERS_BIT};
pub use ukern_core::{
    ActivityLevel, Change, CoreMask, FiberHandle, FiberState, Priority, SchedError, SchedResult,
};
