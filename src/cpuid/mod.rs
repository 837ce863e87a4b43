//! `cpuid`-derived feature detection, logged once at boot so later driver
//! init code (and a careful eye on the serial log) can see what the host
//! CPU actually offers. No feature gates anything in this core yet; the
//! LAPIC timer is always run in periodic mode rather than branching on
//! TSC-deadline support (`original_source`'s `lapic.c` prefers deadline
//! mode when available, but a fixed-rate periodic tick is all the
//! scheduler's `sched::irq` timer vector needs).

use core::arch::asm;

fn log_feature_bits(ecx: u32, edx: u32) {
    log::debug!("cpuid feature bits: ecx={:032b} edx={:032b}", ecx, edx);
}

pub fn init() {
    let ecx: u32;
    let edx: u32;
    unsafe {
        asm!(
            "cpuid",
            inout("eax") 1u32 => _,
            lateout("ebx") _,
            lateout("ecx") ecx,
            lateout("edx") edx,
            options(nomem, nostack),
        );
    }
    log_feature_bits(ecx, edx);
}
