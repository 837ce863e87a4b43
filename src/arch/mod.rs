//! Architecture seam: everything the scheduler and memory manager need
//! from the bare metal, isolated behind plain functions so the rest of
//! the kernel stays testable under `std`.
//!
//! Grounded in `original_source/include/sys/proc.h`'s `struct proc`
//! (the saved-context layout) and the naked-function / `core::arch::asm!`
//! idiom used throughout the teacher's `interrupt/handler.rs`.

#[cfg(not(test))]
mod real;
#[cfg(test)]
pub mod test_support;

#[cfg(not(test))]
pub use real::*;
#[cfg(test)]
pub use test_support::*;

/// Saved process context, field order matching `struct proc` exactly
/// ("these are accessed by save() and resume(), so do not move them
/// around without ensuring lib.s is in sync" — here, `real::switch`).
/// `#[repr(align(16))]`: `fxsave`/`fxrstor` fault with #GP unless their
/// 512-byte memory operand is 16-byte aligned (spec.md §3, "extended
/// state block (16-byte aligned)"); a plain `#[repr(C)]` layout would
/// only guarantee 8-byte alignment here, since every field is a `u64`.
#[repr(C, align(16))]
#[derive(Clone, Copy)]
pub struct Context {
    pub cr3: u64,
    pub rsp: u64,

    pub rbx: u64,
    pub rbp: u64,
    pub rsi: u64,
    pub rdi: u64,

    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,

    pub rflags: u64,
    pub rip: u64,

    pub fxsave: [u8; 512],
}

impl Context {
    pub const fn empty() -> Self {
        Self {
            cr3: 0,
            rsp: 0,
            rbx: 0,
            rbp: 0,
            rsi: 0,
            rdi: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rflags: 0,
            rip: 0,
            fxsave: [0; 512],
        }
    }
}
