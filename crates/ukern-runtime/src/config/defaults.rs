//! Compile-time configuration defaults
//!
//! Generated by `build.rs` from the library defaults, merged with the file
//! named by `UKERN_CONFIG_RS` when it is set at build time.

include!(concat!(env!("OUT_DIR"), "/ukern_merged_config.rs"));
