//! # ukern-core
//!
//! Core types for the ukern user-mode fiber scheduler.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! The scheduler itself lives in `ukern-runtime`.
//!
//! ## Modules
//!
//! - `id` - Fiber handle type and lock-cell encoding
//! - `state` - Fiber state, activity level and priority enums
//! - `mask` - Core affinity masks
//! - `slot` - Fixed-capacity slot allocator for control blocks
//! - `error` - Error taxonomy
//! - `spinlock` - The scheduler lock primitive
//! - `kprint` - Kernel-style debug printing macros
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod mask;
pub mod slot;
pub mod error;
pub mod spinlock;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::FiberHandle;
pub use state::{ActivityLevel, FiberState, Priority};
pub use mask::CoreMask;
pub use slot::{SlotAllocator, SlotId};
pub use error::{Change, ConfigError, SchedError, SchedResult};
pub use spinlock::{SpinLock, SpinLockGuard};
pub use env::{env_get, env_get_bits, env_get_bool, env_get_opt, env_get_str, env_is_set};

/// Constants shared by the scheduler and its clients
pub mod constants {
    /// Waiters bit in a lock cell: set while the owner has a wait chain
    pub const WAITERS_BIT: u32 = 0x4000_0000;

    /// Deadline value meaning "wait forever"
    pub const MAX_TIME: u64 = u64::MAX;

    /// Maximum cores a scheduler can drive (one bit per core in a `CoreMask`)
    pub const MAX_CORES: usize = 64;

    /// Bits of a handle used for the slot index
    pub const HANDLE_INDEX_BITS: u32 = 15;

    /// Bits of a handle used for the generation counter
    pub const HANDLE_GENERATION_BITS: u32 = 15;

    /// Upper bound on live fibers imposed by the handle encoding
    pub const MAX_HANDLES: usize = 1 << HANDLE_INDEX_BITS;

    /// Smallest fiber stack that may be requested
    pub const MIN_STACK_SIZE: usize = 16 * 1024;

    /// Cache line size for alignment
    pub const CACHE_LINE_SIZE: usize = 64;
}
