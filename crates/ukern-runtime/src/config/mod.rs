//! Scheduler configuration
//!
//! Provides compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls on `SchedulerConfig`
//! 2. Environment variables (runtime, via `from_env`)
//! 3. User's ukern_config.rs (compile-time, `UKERN_CONFIG_RS`)
//! 4. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use ukern_runtime::config::SchedulerConfig;
//! use ukern_core::CoreMask;
//!
//! let config = SchedulerConfig::from_env()
//!     .core_mask(CoreMask::first_n(2))
//!     .deadlock_abort(false);
//! ```

pub mod defaults;

use std::time::Duration;
use ukern_core::constants::{MAX_HANDLES, MIN_STACK_SIZE};
use ukern_core::env::{env_get, env_get_bits, env_get_bool};
use ukern_core::{ConfigError, CoreMask};

/// The `debug-logging` feature turns debug logging on by default
const fn default_debug_logging() -> bool {
    cfg!(feature = "debug-logging") || defaults::DEBUG_LOGGING
}

/// Scheduler configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Cores the scheduler runs a dispatch loop on, one worker per set bit
    pub core_mask: CoreMask,
    /// Capacity of the control-block pool
    pub max_fibers: usize,
    /// Stack size used when `create_thread` is given 0
    pub default_stack_size: usize,
    /// Pin each worker to the matching OS CPU
    pub pin_workers: bool,
    /// Abort the process when every live fiber is blocked forever
    pub deadlock_abort: bool,
    /// Polling interval of `join_thread`
    pub join_poll_interval: Duration,
    /// Upper bound on one idle park of a worker
    pub park_timeout: Duration,
    /// Raise the log level to debug when the scheduler starts
    pub debug_logging: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl SchedulerConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `UKERN_CORE_MASK` - Core mask (decimal, 0x or 0b)
    /// - `UKERN_MAX_FIBERS` - Control-block pool capacity
    /// - `UKERN_STACK_SIZE` - Default fiber stack size in bytes
    /// - `UKERN_PIN_WORKERS` - Pin workers to CPUs (0/1)
    /// - `UKERN_DEADLOCK_ABORT` - Abort on global deadlock (0/1)
    /// - `UKERN_JOIN_POLL_US` - join_thread polling interval in microseconds
    /// - `UKERN_PARK_TIMEOUT_MS` - Worker park timeout in milliseconds
    /// - `UKERN_DEBUG` - Enable debug logging (0/1)
    pub fn from_env() -> Self {
        Self {
            core_mask: CoreMask::from_bits(env_get_bits("UKERN_CORE_MASK", defaults::CORE_MASK)),
            max_fibers: env_get("UKERN_MAX_FIBERS", defaults::MAX_FIBERS),
            default_stack_size: env_get("UKERN_STACK_SIZE", defaults::DEFAULT_STACK_SIZE),
            pin_workers: env_get_bool("UKERN_PIN_WORKERS", defaults::PIN_WORKERS),
            deadlock_abort: env_get_bool("UKERN_DEADLOCK_ABORT", defaults::DEADLOCK_ABORT),
            join_poll_interval: Duration::from_micros(env_get(
                "UKERN_JOIN_POLL_US",
                defaults::JOIN_POLL_INTERVAL_US,
            )),
            park_timeout: Duration::from_millis(env_get(
                "UKERN_PARK_TIMEOUT_MS",
                defaults::PARK_TIMEOUT_MS,
            )),
            debug_logging: env_get_bool("UKERN_DEBUG", default_debug_logging()),
        }
    }

    /// Create config with explicit defaults (no env override).
    /// Useful for testing or when you want full control.
    pub fn new() -> Self {
        Self {
            core_mask: CoreMask::from_bits(defaults::CORE_MASK),
            max_fibers: defaults::MAX_FIBERS,
            default_stack_size: defaults::DEFAULT_STACK_SIZE,
            pin_workers: defaults::PIN_WORKERS,
            deadlock_abort: defaults::DEADLOCK_ABORT,
            join_poll_interval: Duration::from_micros(defaults::JOIN_POLL_INTERVAL_US),
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
            debug_logging: default_debug_logging(),
        }
    }

    // Builder methods

    pub fn core_mask(mut self, mask: CoreMask) -> Self {
        self.core_mask = mask;
        self
    }

    /// Shorthand for a mask of cores `0..n`
    pub fn num_cores(mut self, n: usize) -> Self {
        self.core_mask = CoreMask::first_n(n);
        self
    }

    pub fn max_fibers(mut self, n: usize) -> Self {
        self.max_fibers = n;
        self
    }

    pub fn default_stack_size(mut self, size: usize) -> Self {
        self.default_stack_size = size;
        self
    }

    pub fn pin_workers(mut self, enable: bool) -> Self {
        self.pin_workers = enable;
        self
    }

    pub fn deadlock_abort(mut self, enable: bool) -> Self {
        self.deadlock_abort = enable;
        self
    }

    pub fn join_poll_interval(mut self, d: Duration) -> Self {
        self.join_poll_interval = d;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.core_mask.is_empty() {
            return Err(ConfigError::InvalidValue("core_mask must not be empty"));
        }
        if self.max_fibers == 0 {
            return Err(ConfigError::InvalidValue("max_fibers must be > 0"));
        }
        if self.max_fibers > MAX_HANDLES {
            return Err(ConfigError::InvalidValue("max_fibers must be <= 32768"));
        }
        if self.default_stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::InvalidValue("default_stack_size must be >= 16KB"));
        }
        if self.join_poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue("join_poll_interval must be > 0"));
        }
        if self.park_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("park_timeout must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("ukern Configuration:");
        eprintln!("  core_mask:           {:?}", self.core_mask);
        eprintln!("  max_fibers:          {}", self.max_fibers);
        eprintln!("  default_stack_size:  {}", self.default_stack_size);
        eprintln!("  pin_workers:         {}", self.pin_workers);
        eprintln!("  deadlock_abort:      {}", self.deadlock_abort);
        eprintln!("  join_poll_interval:  {:?}", self.join_poll_interval);
        eprintln!("  park_timeout:        {:?}", self.park_timeout);
        eprintln!("  debug_logging:       {}", self.debug_logging);
    }
}
