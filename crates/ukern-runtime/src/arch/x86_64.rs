//! x86_64 (System V) context switch

use super::EntryFn;
use std::arch::naked_asm;

/// Callee-saved state of a switched-out context
///
/// Offsets are fixed; `switch_context` addresses fields by hand.
#[repr(C)]
#[derive(Debug, Default)]
pub struct SavedRegs {
    pub rsp: u64,   // 0x00
    pub rip: u64,   // 0x08
    pub rbx: u64,   // 0x10
    pub rbp: u64,   // 0x18
    pub r12: u64,   // 0x20
    pub r13: u64,   // 0x28
    pub r14: u64,   // 0x30
    pub r15: u64,   // 0x38
    pub mxcsr: u32, // 0x40
    pub fpucw: u16, // 0x44
    _pad: u16,
}

const _: () = assert!(std::mem::size_of::<SavedRegs>() == 0x48);

/// Power-on defaults: all SSE exceptions masked, round to nearest
const MXCSR_DEFAULT: u32 = 0x1F80;
const FPUCW_DEFAULT: u16 = 0x037F;

/// Point `regs` at `entry(arg)` running on the stack ending at `stack_top`
///
/// # Safety
///
/// `stack_top` must be the high end of a writable stack with room for at
/// least one frame.
pub unsafe fn init_context(regs: &mut SavedRegs, stack_top: *mut u8, entry: EntryFn, arg: usize) {
    // 16-byte aligned before the trampoline's `call`; the two zeroed words
    // are a null return address and frame pointer for stack walkers
    let sp = (stack_top as usize & !0xF) - 16;
    (sp as *mut u64).write(0);
    ((sp + 8) as *mut u64).write(0);

    *regs = SavedRegs {
        rsp: sp as u64,
        rip: context_trampoline as usize as u64,
        r12: entry as usize as u64,
        r13: arg as u64,
        mxcsr: MXCSR_DEFAULT,
        fpucw: FPUCW_DEFAULT,
        ..SavedRegs::default()
    };
}

/// First code a fresh context runs: `r12(r13)`
#[unsafe(naked)]
unsafe extern "C" fn context_trampoline() {
    naked_asm!(
        "xor ebp, ebp",
        "mov rdi, r13",
        "call r12",
        "ud2",
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
        // Save into `from` (rdi)
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 2f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "stmxcsr [rdi + 0x40]",
        "fnstcw [rdi + 0x44]",
        // Load from `to` (rsi)
        "mov rsp, [rsi + 0x00]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "ldmxcsr [rsi + 0x40]",
        "fldcw [rsi + 0x44]",
        "jmp qword ptr [rsi + 0x08]",
        // Resumed
        "2:",
        "ret",
    );
}
