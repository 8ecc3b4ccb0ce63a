//! Environment variable utilities
//!
//! Typed lookups with defaults, used by `SchedulerConfig::from_env` and the
//! logging setup.
//!
//! ```ignore
//! use ukern_core::env::{env_get, env_get_bool, env_get_bits};
//!
//! let max: usize = env_get("UKERN_MAX_FIBERS", 4096);
//! let pin = env_get_bool("UKERN_PIN_WORKERS", true);
//! let mask = env_get_bits("UKERN_CORE_MASK", 0b1111);
//! ```

use std::str::FromStr;

// Trimmed value of `key`, if set and valid unicode
fn lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_owned())
}

/// Get environment variable parsed as type T, or return default
///
/// Unset or unparsable values yield the default.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as boolean
///
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true and
/// "0", "false", "no", "off" as false. Anything else returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    let Some(val) = lookup(key) else {
        return default;
    };
    match val.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Get environment variable as a bit pattern
///
/// Accepts decimal, `0x` hex and `0b` binary, with `_` separators.
pub fn env_get_bits(key: &str, default: u64) -> u64 {
    lookup(key).and_then(|v| parse_bits(&v)).unwrap_or(default)
}

fn parse_bits(s: &str) -> Option<u64> {
    let s: String = s.chars().filter(|c| *c != '_').collect();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        u64::from_str_radix(bin, 2).ok()
    } else {
        s.parse().ok()
    }
}

/// Get environment variable as optional value
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    lookup(key)?.parse().ok()
}

/// Get environment variable as string, or return default
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Check if environment variable is set (regardless of value)
#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var(key).is_ok()
}
