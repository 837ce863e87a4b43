//! Host-side simulation of the architecture seam, used so `sched`,
//! `memory` and `proc`'s logic can run under `cargo test` without a real
//! CPU. No actual stack/address-space switching happens here: tests
//! exercise the scheduler's dispatch decisions directly and never call
//! `switch_context` through a real multi-process run.

use core::sync::atomic::{AtomicBool, Ordering};

use super::Context;

static INTERRUPTS_ENABLED: AtomicBool = AtomicBool::new(true);

pub fn cli() {
    INTERRUPTS_ENABLED.store(false, Ordering::SeqCst);
}

pub fn sti() {
    INTERRUPTS_ENABLED.store(true, Ordering::SeqCst);
}

pub fn interrupts_enabled() -> bool {
    INTERRUPTS_ENABLED.load(Ordering::SeqCst)
}

pub fn halt() {}

pub fn bsf(bits: u64) -> Option<u32> {
    if bits == 0 {
        None
    } else {
        Some(bits.trailing_zeros())
    }
}

/// # Safety
/// Test-only stand-in: copies `*next` into `*current`'s slot semantics
/// are intentionally not modeled. Never invoked by the unit tests in
/// this crate; present so code paths that mention `switch_context`
/// still type-check under `cfg(test)`.
pub unsafe fn switch_context(_current: *mut Context, _next: *const Context) {}

pub fn current_cr3() -> u64 {
    0
}

/// Test-only stand-in for the checkpoint primitive. Always reports the
/// "freshly saved" (parent) path — tests that exercise `proc::create::fork`
/// drive the child path explicitly rather than relying on a real resume.
///
/// # Safety
/// Does not actually capture register state; `ctx` is untouched.
pub unsafe fn save_context(_ctx: *mut Context) -> bool {
    true
}

/// # Safety
/// Test-only stand-in: never invoked, present only so call sites type-check.
pub unsafe fn resume_context(_ctx: *const Context) -> ! {
    unreachable!("resume_context is not exercised under cfg(test)")
}
