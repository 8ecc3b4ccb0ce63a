//! Build script for ukern-runtime
//!
//! Emits `OUT_DIR/ukern_merged_config.rs`, the compile-time defaults behind
//! `SchedulerConfig`. A file named by `UKERN_CONFIG_RS` may override any
//! subset of them with lines of the form
//!
//! ```text
//! pub const MAX_FIBERS: usize = 1024;
//! ```

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::PathBuf;

/// (name, type, default)
const CONFIG_PARAMS: &[(&str, &str, &str)] = &[
    ("CORE_MASK", "u64", "0b1111"),
    ("MAX_FIBERS", "usize", "4096"),
    ("DEFAULT_STACK_SIZE", "usize", "256 * 1024"),
    ("PIN_WORKERS", "bool", "false"),
    ("DEADLOCK_ABORT", "bool", "true"),
    ("JOIN_POLL_INTERVAL_US", "u64", "500"),
    ("PARK_TIMEOUT_MS", "u64", "100"),
    ("DEBUG_LOGGING", "bool", "false"),
];

fn main() {
    println!("cargo:rerun-if-env-changed=UKERN_CONFIG_RS");

    let mut overrides = BTreeMap::new();
    let user_path = env::var("UKERN_CONFIG_RS").ok();
    if let Some(path) = &user_path {
        println!("cargo:rerun-if-changed={}", path);
        match fs::read_to_string(path) {
            Ok(content) => {
                overrides = collect_overrides(&content);
                println!("cargo:warning=Using custom config: {}", path);
            }
            Err(e) => println!("cargo:warning=Failed to read UKERN_CONFIG_RS ({}): {}", path, e),
        }
    }

    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"))
        .join("ukern_merged_config.rs");
    fs::write(out, render(&overrides, user_path.is_some())).expect("Failed to write merged config");
}

/// Known parameters assigned in `content`, by name
fn collect_overrides(content: &str) -> BTreeMap<&'static str, String> {
    let mut found = BTreeMap::new();
    for (name, value) in content.lines().filter_map(const_item) {
        match CONFIG_PARAMS.iter().find(|(known, _, _)| *known == name) {
            Some((known, _, _)) => {
                found.insert(*known, value.to_string());
            }
            None => println!("cargo:warning=Unknown config parameter: {}", name),
        }
    }
    found
}

/// Split `pub const NAME: TYPE = VALUE;` into name and value
fn const_item(line: &str) -> Option<(&str, &str)> {
    let item = line.trim().strip_prefix("pub const ")?;
    let (decl, value) = item.split_once('=')?;
    let (name, _ty) = decl.split_once(':')?;
    let value = value.trim().trim_end_matches(';').trim();
    if value.is_empty() {
        return None;
    }
    Some((name.trim(), value))
}

fn render(overrides: &BTreeMap<&'static str, String>, custom: bool) -> String {
    let mut out = String::from("// Generated by build.rs\n");
    if custom {
        out.push_str("// Includes overrides from UKERN_CONFIG_RS\n");
    }
    out.push('\n');
    for (name, ty, default) in CONFIG_PARAMS {
        let value = overrides.get(name).map(String::as_str).unwrap_or(*default);
        out.push_str(&format!("pub const {}: {} = {};\n", name, ty, value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_const_item() {
        assert_eq!(const_item("pub const MAX_FIBERS: usize = 128;"), Some(("MAX_FIBERS", "128")));
        assert_eq!(
            const_item("  pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;"),
            Some(("DEFAULT_STACK_SIZE", "64 * 1024"))
        );
        assert_eq!(const_item("pub const BROKEN;"), None);
        assert_eq!(const_item("// pub const X: u8 = 1;"), None);
    }

    #[test]
    fn test_collect_overrides_skips_unknown() {
        let user = "
            // Two cores, pinned
            pub const CORE_MASK: u64 = 0b11;
            pub const PIN_WORKERS: bool = true;
            pub const NOT_A_PARAM: u32 = 1;
        ";
        let found = collect_overrides(user);
        assert_eq!(found.get("CORE_MASK").map(String::as_str), Some("0b11"));
        assert_eq!(found.get("PIN_WORKERS").map(String::as_str), Some("true"));
        assert_eq!(found.len(), 2);

        let rendered = render(&found, true);
        assert!(rendered.contains("pub const CORE_MASK: u64 = 0b11;"));
        assert!(rendered.contains("pub const MAX_FIBERS: usize = 4096;"));
    }
}
