//! The scheduler's global interlock.
//!
//! Grounded in `original_source/kernel/sched.c`'s `spin()`/`unspin()`
//! pairs bracketing every scheduling decision: a single machine-wide
//! spinlock taken with interrupts disabled, guaranteeing the run/sleep
//! queues and the held-token word are only ever touched by one CPU at a
//! time. spec.md's Interlock generalizes this into a typed guard so
//! nested `acquire`-style call paths save/restore the interrupt flag
//! correctly instead of the raw disable/enable pair the source uses.

use spin::MutexGuard;

use crate::arch;

use super::SchedulerState;

/// Proof that the caller holds the scheduler's global lock with
/// interrupts disabled. Dropping it releases the lock and restores
/// interrupts to whatever state they were in when this interlock (or,
/// for a nested acquisition, the outermost one) was taken.
pub struct Interlock<'a> {
    guard: Option<MutexGuard<'a, SchedulerState>>,
    restore_interrupts: bool,
}

impl<'a> Interlock<'a> {
    /// Disables interrupts (remembering the prior state) and takes the
    /// scheduler lock. Safe to call with interrupts already disabled:
    /// `arch::interrupts_enabled` is read before `arch::cli` runs.
    pub fn acquire(lock: &'a spin::Mutex<SchedulerState>) -> Self {
        let was_enabled = arch::interrupts_enabled();
        arch::cli();
        Self { guard: Some(lock.lock()), restore_interrupts: was_enabled }
    }

    pub fn state(&mut self) -> &mut SchedulerState {
        self.guard.as_mut().expect("interlock used after release")
    }
}

impl<'a> Drop for Interlock<'a> {
    fn drop(&mut self) {
        self.guard = None;
        if self.restore_interrupts {
            arch::sti();
        }
    }
}
