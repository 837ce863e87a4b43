//! Bare-metal implementations of the architecture seam.

use core::arch::asm;
use core::sync::atomic::{AtomicBool, Ordering};

use x86_64::instructions::interrupts;

use super::Context;

static INTERRUPTS_WERE_ENABLED: AtomicBool = AtomicBool::new(true);

pub fn cli() {
    let was_enabled = interrupts::are_enabled();
    interrupts::disable();
    INTERRUPTS_WERE_ENABLED.store(was_enabled, Ordering::Relaxed);
}

pub fn sti() {
    interrupts::enable();
}

pub fn interrupts_enabled() -> bool {
    interrupts::are_enabled()
}

pub fn halt() {
    interrupts::enable_and_hlt();
}

/// Index of the lowest set bit, matching the `bsf` instruction used
/// throughout the original scheduler for runq/pending-bit scans.
pub fn bsf(bits: u64) -> Option<u32> {
    if bits == 0 {
        None
    } else {
        Some(bits.trailing_zeros())
    }
}

/// Saves the running process's context into `*current`, switches address
/// space and stack to `*next`, and resumes it. Execution returns from
/// this call, on whichever CPU switches back into `*current`, exactly as
/// if it were an ordinary function return. Collapses `sched.c`'s
/// `if (save(curproc)) return; else resume(proc);` pair into one call.
///
/// # Safety
/// `current` and `next` must be valid, non-aliasing `Context` pointers.
/// `next` must have been populated either by a prior call to this
/// function or by `proc::bootstrap`.
#[naked]
pub unsafe extern "C" fn switch_context(current: *mut Context, next: *const Context) {
    asm!(
        "
        // save callee-saved regs and rsp into *current (rdi)
        mov [rdi + 0x10], rbx
        mov [rdi + 0x18], rbp
        mov [rdi + 0x20], rsi
        mov [rdi + 0x28], rdi
        mov [rdi + 0x30], r8
        mov [rdi + 0x38], r9
        mov [rdi + 0x40], r10
        mov [rdi + 0x48], r11
        mov [rdi + 0x50], r12
        mov [rdi + 0x58], r13
        mov [rdi + 0x60], r14
        mov [rdi + 0x68], r15
        pushfq
        pop rax
        mov [rdi + 0x70], rax
        mov [rdi + 0x08], rsp

        lea rax, [rip + 1f]
        mov [rdi + 0x78], rax

        fxsave [rdi + 0x80]

        // switch address spaces and stack
        mov rax, [rsi + 0x00]
        mov cr3, rax
        mov rsp, [rsi + 0x08]

        fxrstor [rsi + 0x80]

        mov rbx, [rsi + 0x10]
        mov rbp, [rsi + 0x18]
        mov r8,  [rsi + 0x30]
        mov r9,  [rsi + 0x38]
        mov r10, [rsi + 0x40]
        mov r11, [rsi + 0x48]
        mov r12, [rsi + 0x50]
        mov r13, [rsi + 0x58]
        mov r14, [rsi + 0x60]
        mov r15, [rsi + 0x68]
        mov rax, [rsi + 0x70]
        push rax
        popfq
        mov rdi, [rsi + 0x28]
        mov rax, [rsi + 0x78]
        mov rsi, [rsi + 0x20]

        jmp rax

        1:
        ret
        ",
        options(noreturn)
    );
}

/// Reads the currently loaded page-table root, used once at boot to learn
/// the bootloader-installed identity map so `memory::root_of` has a
/// prototype to clone kernel entries from for every later process.
pub fn current_cr3() -> u64 {
    let value: u64;
    unsafe {
        asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

/// Checkpoints the caller's full register context into `*ctx`, mirroring
/// `switch_context`'s save half exactly (same field offsets, so a context
/// saved here is a perfectly ordinary resume target for `switch_context`
/// or `resume_context` later). Returns `true` the first time it returns —
/// the checkpointing call itself — and `false` the second time control
/// reaches this point, which only happens when some later dispatch jumps
/// to the `rip` recorded here. Collapses `sched.c`'s `save()`/`resume()`
/// split into a single call, the way `fork()` uses it: "if save returns
/// resumed, the child returns 0; otherwise the parent gets the child's pid".
///
/// # Safety
/// `ctx` must be a valid, exclusively-owned `Context` pointer that nothing
/// else reads until either this function returns `false` into it, or the
/// scheduler resumes it via `switch_context`/`resume_context`.
#[naked]
pub unsafe extern "C" fn save_context(ctx: *mut Context) -> bool {
    asm!(
        "
        mov [rdi + 0x10], rbx
        mov [rdi + 0x18], rbp
        mov [rdi + 0x20], rsi
        mov [rdi + 0x28], rdi
        mov [rdi + 0x30], r8
        mov [rdi + 0x38], r9
        mov [rdi + 0x40], r10
        mov [rdi + 0x48], r11
        mov [rdi + 0x50], r12
        mov [rdi + 0x58], r13
        mov [rdi + 0x60], r14
        mov [rdi + 0x68], r15
        pushfq
        pop rax
        mov [rdi + 0x70], rax
        mov [rdi + 0x08], rsp

        mov rax, cr3
        mov [rdi + 0x00], rax

        lea rax, [rip + 2f]
        mov [rdi + 0x78], rax

        fxsave [rdi + 0x80]

        mov al, 1
        ret

        2:
        xor eax, eax
        ret
        ",
        options(noreturn)
    );
}

/// Restores `*ctx` into the running CPU and jumps into it; never returns.
/// Used where there is no meaningful "current" context to save first —
/// the per-CPU boot stack handing off to proc0's saved context.
///
/// # Safety
/// `ctx` must hold a context previously populated by `save_context`,
/// `switch_context`, or `proc::bootstrap`'s initial fabrication.
#[naked]
pub unsafe extern "C" fn resume_context(ctx: *const Context) -> ! {
    asm!(
        "
        mov rax, [rdi + 0x00]
        mov cr3, rax
        mov rsp, [rdi + 0x08]

        fxrstor [rdi + 0x80]

        mov rbx, [rdi + 0x10]
        mov rbp, [rdi + 0x18]
        mov rsi, [rdi + 0x20]
        mov r8,  [rdi + 0x30]
        mov r9,  [rdi + 0x38]
        mov r10, [rdi + 0x40]
        mov r11, [rdi + 0x48]
        mov r12, [rdi + 0x50]
        mov r13, [rdi + 0x58]
        mov r14, [rdi + 0x60]
        mov r15, [rdi + 0x68]
        mov rax, [rdi + 0x70]
        push rax
        popfq
        mov rax, [rdi + 0x78]
        mov rdi, [rdi + 0x28]

        jmp rax
        ",
        options(noreturn)
    );
}
