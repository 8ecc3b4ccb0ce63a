//! Kernel-style print macros for ukern
//!
//! Leveled, line-atomic stderr output in the style of printk. Each line is
//! prefixed with the calling thread's scheduler context (`[core N]` for a
//! dispatch loop, `[fiber H]` while a fiber runs on it) when one is set.
//!
//! # Environment Variables
//!
//! - `UKERN_FLUSH_EPRINT=1` - Flush stderr after each line (useful when chasing crashes)
//! - `UKERN_LOG_LEVEL=<level>` - 0=off, 1=error, 2=warn, 3=info, 4=debug, 5=trace
//! - `UKERN_LOG_TIME=1` - Prefix lines with microseconds since first log
//!
//! # Usage
//!
//! ```ignore
//! use ukern_core::{kinfo, kdebug};
//!
//! kinfo!("core {} online", core);
//! kdebug!("dispatching {}", handle);
//! ```

use std::cell::Cell;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// Log levels
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Parse a level name or digit, as accepted by `UKERN_LOG_LEVEL`
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "1" => Some(LogLevel::Error),
            "warn" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

// Global configuration (initialized once)
static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static TIME_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);
static LOG_EPOCH: OnceLock<Instant> = OnceLock::new();

const NO_CONTEXT: u32 = u32::MAX;

thread_local! {
    static CORE_ID: Cell<u32> = const { Cell::new(NO_CONTEXT) };
    static FIBER_ID: Cell<u32> = const { Cell::new(NO_CONTEXT) };
}

/// Initialize logging from environment variables
///
/// Called automatically on first log, but can be called explicitly for
/// deterministic initialization.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    let _ = LOG_EPOCH.get_or_init(Instant::now);

    if let Ok(val) = std::env::var("UKERN_FLUSH_EPRINT") {
        let flush = matches!(val.as_str(), "1" | "true" | "yes" | "on");
        FLUSH_ENABLED.store(flush, Ordering::Relaxed);
    }

    if let Ok(val) = std::env::var("UKERN_LOG_TIME") {
        let time = matches!(val.as_str(), "1" | "true" | "yes" | "on");
        TIME_ENABLED.store(time, Ordering::Relaxed);
    }

    if let Ok(val) = std::env::var("UKERN_LOG_LEVEL") {
        let level = LogLevel::parse(&val).unwrap_or(LogLevel::Info);
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

#[inline]
fn ensure_init() {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
}

/// Check if flush is enabled
#[inline]
pub fn flush_enabled() -> bool {
    ensure_init();
    FLUSH_ENABLED.load(Ordering::Relaxed)
}

/// Get current log level
#[inline]
pub fn log_level() -> LogLevel {
    ensure_init();
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Set log level programmatically
pub fn set_log_level(level: LogLevel) {
    ensure_init();
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Set flush mode programmatically
pub fn set_flush_enabled(enabled: bool) {
    ensure_init();
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Enable or disable timestamps
pub fn set_time_enabled(enabled: bool) {
    ensure_init();
    TIME_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Check if a log level is enabled
#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level as u8 <= log_level() as u8
}

/// Tag log lines from this thread with a core id
pub fn set_core_id(core: u32) {
    CORE_ID.with(|c| c.set(core));
}

pub fn clear_core_id() {
    CORE_ID.with(|c| c.set(NO_CONTEXT));
}

/// Tag log lines from this thread with a fiber handle
pub fn set_fiber_id(handle: u32) {
    FIBER_ID.with(|c| c.set(handle));
}

pub fn clear_fiber_id() {
    FIBER_ID.with(|c| c.set(NO_CONTEXT));
}

fn write_context(handle: &mut impl Write) {
    if TIME_ENABLED.load(Ordering::Relaxed) {
        let us = LOG_EPOCH.get().map(|e| e.elapsed().as_micros()).unwrap_or(0);
        let _ = write!(handle, "{:>10}us ", us);
    }
    let core = CORE_ID.with(|c| c.get());
    if core != NO_CONTEXT {
        let _ = write!(handle, "[core {}] ", core);
    }
    let fiber = FIBER_ID.with(|c| c.get());
    if fiber != NO_CONTEXT {
        let _ = write!(handle, "[fiber {:#x}] ", fiber);
    }
}

fn finish_line(handle: &mut impl Write, newline: bool) {
    if newline {
        let _ = handle.write_all(b"\n");
    }
    if flush_enabled() {
        let _ = handle.flush();
    }
}

/// Internal: unleveled print, with or without a newline
#[doc(hidden)]
pub fn _kwrite_impl(args: std::fmt::Arguments<'_>, newline: bool) {
    let mut handle = std::io::stderr().lock();
    let _ = handle.write_fmt(args);
    finish_line(&mut handle, newline);
}

/// Internal: leveled print with the thread's context prefix
#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let mut handle = std::io::stderr().lock();
    let _ = write!(handle, "{} ", level.prefix());
    write_context(&mut handle);
    let _ = handle.write_fmt(args);
    finish_line(&mut handle, true);
}

// ============================================================================
// Public Macros
// ============================================================================

/// Print to stderr (no newline)
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::kprint::_kwrite_impl(format_args!($($arg)*), false)
    };
}

/// Print to stderr with newline
#[macro_export]
macro_rules! kprintln {
    () => {
        $crate::kprint::_kwrite_impl(format_args!(""), true)
    };
    ($($arg:tt)*) => {
        $crate::kprint::_kwrite_impl(format_args!($($arg)*), true)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __klog {
    ($level:ident, $($arg:tt)*) => {
        $crate::kprint::_klog_impl($crate::kprint::LogLevel::$level, format_args!($($arg)*))
    };
}

/// Error level log (always shown unless logging is off)
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => { $crate::__klog!(Error, $($arg)*) };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { $crate::__klog!(Warn, $($arg)*) };
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { $crate::__klog!(Info, $($arg)*) };
}

/// Debug level log; scheduler decisions and lifecycle events
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => { $crate::__klog!(Debug, $($arg)*) };
}

/// Trace level log; every switch and wait
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => { $crate::__klog!(Trace, $($arg)*) };
}
