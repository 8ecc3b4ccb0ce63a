//! Error types for the ukern scheduler
//!
//! Every recoverable condition is reported as a `SchedError`; the caller
//! decides whether to retry. Requests that would not change anything are
//! not errors and come back as `Ok(Change::Unchanged)`.

use core::fmt;

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur in scheduler operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// Handle does not resolve to a live fiber
    InvalidHandle,

    /// Priority outside `-2..=2`
    InvalidPriority,

    /// Core id or core mask outside the scheduler's core mask
    InvalidCoreId,

    /// Requested stack size is below the minimum
    InvalidStackSize,

    /// A blocking primitive was called outside of a fiber
    NotAFiber,

    /// Lock/key/cell is not in the state the operation requires
    InvalidState,

    /// No free control-block slots
    PoolExhausted,

    /// No free handles
    HandleTableFull,

    /// The deadline elapsed before the fiber was woken
    Timeout,

    /// The scheduler is shutting down
    Terminated,

    /// Configuration rejected by validation
    Config(ConfigError),

    /// A worker thread could not be spawned
    SpawnFailed,

    /// A fiber stack could not be mapped
    StackAllocFailed,
}

impl SchedError {
    /// Check if this is a timeout
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, SchedError::Timeout)
    }
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::InvalidHandle => write!(f, "invalid fiber handle"),
            SchedError::InvalidPriority => write!(f, "priority out of range"),
            SchedError::InvalidCoreId => write!(f, "core not in scheduler core mask"),
            SchedError::InvalidStackSize => write!(f, "stack size too small"),
            SchedError::NotAFiber => write!(f, "not called from a fiber"),
            SchedError::InvalidState => write!(f, "invalid state for operation"),
            SchedError::PoolExhausted => write!(f, "no fiber slots available"),
            SchedError::HandleTableFull => write!(f, "handle table full"),
            SchedError::Timeout => write!(f, "operation timed out"),
            SchedError::Terminated => write!(f, "scheduler terminated"),
            SchedError::Config(e) => write!(f, "config error: {}", e),
            SchedError::SpawnFailed => write!(f, "failed to spawn worker thread"),
            SchedError::StackAllocFailed => write!(f, "failed to allocate fiber stack"),
        }
    }
}

impl std::error::Error for SchedError {}

/// Outcome of a setter that may be a no-op
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// The new value was applied
    Applied,

    /// The value already matched; nothing was touched
    Unchanged,
}

impl Change {
    #[inline]
    pub fn is_applied(self) -> bool {
        matches!(self, Change::Applied)
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for SchedError {
    fn from(e: ConfigError) -> Self {
        SchedError::Config(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", SchedError::Timeout), "operation timed out");

        let e = SchedError::Config(ConfigError::InvalidValue("core_mask must not be empty"));
        assert_eq!(
            format!("{}", e),
            "config error: invalid config: core_mask must not be empty"
        );
    }

    #[test]
    fn test_error_conversion() {
        let cfg = ConfigError::InvalidValue("x");
        let sched: SchedError = cfg.into();
        assert!(matches!(sched, SchedError::Config(_)));
        assert!(SchedError::Timeout.is_timeout());
        assert!(!SchedError::InvalidState.is_timeout());
    }

    #[test]
    fn test_change() {
        assert!(Change::Applied.is_applied());
        assert!(!Change::Unchanged.is_applied());
    }
}
