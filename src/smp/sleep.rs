//! Platform-timer delay used during AP bring-up.
//!
//! `original_source`'s `lapic_startcpu` waits for a newly woken AP with an
//! open-coded spin loop (flagged in spec.md §9 as crude); this crate
//! replaces it with a delay derived from a real calibrated frequency, the
//! way the teacher always threads a measured tick rate through its SMP
//! bring-up path rather than guessing a loop count.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::driver::ioapic::lapic;
use crate::driver::pit;

/// LAPIC timer tick frequency in Hz, measured once on the BSP by
/// `init` and shared read-only by every core afterwards.
static LAPIC_FREQ_HZ: AtomicU64 = AtomicU64::new(0);

#[inline]
pub fn lapic_freq_hz() -> u64 {
    let value = LAPIC_FREQ_HZ.load(Ordering::SeqCst);
    assert!(value != 0, "LAPIC_FREQ_HZ uninitialized");
    value
}

/// Busy-waits roughly `ns` nanoseconds using the BSP's calibrated LAPIC
/// tick rate. Used only for the coarse delays AP bring-up needs
/// (init-to-startup IPI spacing, polling for the AP's ready flag); nothing
/// in the scheduler itself depends on wall-clock sleep.
pub fn sleep_ns(ns: u64) {
    let ticks = (ns.saturating_mul(lapic_freq_hz())) / 1_000_000_000;
    lapic::set_timer_raw(ticks.min(u32::MAX as u64) as u32);
    while lapic::get_timer_raw() != 0 {
        core::hint::spin_loop();
    }
}

/// Calibrates the LAPIC timer frequency against the legacy PIT, the same
/// two-clock measurement the teacher's `smp::sleep::measure_with_pit` does
/// (minus the parallel TSC measurement this core has no use for, since the
/// LAPIC is the only clock `sleep_ns` or the scheduler's tick rely on).
fn measure_with_pit() {
    lapic::set_timer_raw(0xffff_ffff);
    pit::kernel_early_sleep_ns(100_000_000);
    let after = lapic::get_timer_raw();
    pit::disable();

    let tick_count = 0xffff_ffffu32.wrapping_sub(after);
    let lapic_freq_hz = 10 * (tick_count as u64);
    LAPIC_FREQ_HZ.store(lapic_freq_hz, Ordering::SeqCst);
    log::info!("LAPIC frequency Hz {}", lapic_freq_hz);
}

pub fn init() {
    measure_with_pit();
}
