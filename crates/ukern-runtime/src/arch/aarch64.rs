//! aarch64 (AAPCS64) context switch

use super::EntryFn;
use std::arch::naked_asm;

/// Callee-saved state of a switched-out context
///
/// Offsets are fixed; `switch_context` addresses fields by hand.
#[repr(C)]
#[derive(Debug, Default)]
pub struct SavedRegs {
    pub sp: u64,            // 0x00
    pub pc: u64,            // 0x08
    pub x19_x28: [u64; 10], // 0x10
    pub fp: u64,            // 0x60
    pub lr: u64,            // 0x68
    pub d8_d15: [u64; 8],   // 0x70
}

const _: () = assert!(std::mem::size_of::<SavedRegs>() == 0xb0);

/// Point `regs` at `entry(arg)` running on the stack ending at `stack_top`
///
/// # Safety
///
/// `stack_top` must be the high end of a writable stack with room for at
/// least one frame.
pub unsafe fn init_context(regs: &mut SavedRegs, stack_top: *mut u8, entry: EntryFn, arg: usize) {
    let sp = (stack_top as usize & !0xF) - 16;
    (sp as *mut u64).write(0);
    ((sp + 8) as *mut u64).write(0);

    *regs = SavedRegs {
        sp: sp as u64,
        pc: context_trampoline as usize as u64,
        ..SavedRegs::default()
    };
    regs.x19_x28[0] = entry as usize as u64;
    regs.x19_x28[1] = arg as u64;
}

/// First code a fresh context runs: `x19(x20)`
#[unsafe(naked)]
unsafe extern "C" fn context_trampoline() {
    naked_asm!(
        "mov x29, xzr",
        "mov x30, xzr",
        "mov x0, x20",
        "blr x19",
        "brk #0x1",
    );
}

/// Save the current context into `from` and resume `to`
///
/// Returns when something switches back into `from`.
///
/// # Safety
///
/// `to` must hold a context saved by this function or set up by
/// `init_context`, whose stack is still alive and not running anywhere.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_from: *mut SavedRegs, _to: *const SavedRegs) {
    naked_asm!(
        // Save into `from` (x0)
        "mov x9, sp",
        "str x9, [x0, #0x00]",
        "adr x10, 2f",
        "str x10, [x0, #0x08]",
        "stp x19, x20, [x0, #0x10]",
        "stp x21, x22, [x0, #0x20]",
        "stp x23, x24, [x0, #0x30]",
        "stp x25, x26, [x0, #0x40]",
        "stp x27, x28, [x0, #0x50]",
        "stp x29, x30, [x0, #0x60]",
        "stp d8, d9, [x0, #0x70]",
        "stp d10, d11, [x0, #0x80]",
        "stp d12, d13, [x0, #0x90]",
        "stp d14, d15, [x0, #0xa0]",
        // Load from `to` (x1)
        "ldr x9, [x1, #0x00]",
        "mov sp, x9",
        "ldr x10, [x1, #0x08]",
        "ldp x19, x20, [x1, #0x10]",
        "ldp x21, x22, [x1, #0x20]",
        "ldp x23, x24, [x1, #0x30]",
        "ldp x25, x26, [x1, #0x40]",
        "ldp x27, x28, [x1, #0x50]",
        "ldp x29, x30, [x1, #0x60]",
        "ldp d8, d9, [x1, #0x70]",
        "ldp d10, d11, [x1, #0x80]",
        "ldp d12, d13, [x1, #0x90]",
        "ldp d14, d15, [x1, #0xa0]",
        "br x10",
        // Resumed
        "2:",
        "ret",
    );
}
