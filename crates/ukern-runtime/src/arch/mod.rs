//! Architecture-specific context switching
//!
//! Each architecture provides `SavedRegs` (the callee-saved register file of
//! its C ABI), `init_context`, which points a fresh context at an entry
//! function on a new stack, and `switch_context`.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub use self::x86_64::*;
    } else if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        pub use self::aarch64::*;
    } else {
        compile_error!("ukern-runtime supports x86_64 and aarch64 only");
    }
}

/// Signature of a context entry function; it must never return
pub type EntryFn = extern "C" fn(usize) -> !;
