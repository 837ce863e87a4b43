//! Symmetric multiprocessing bring-up.
//!
//! Waking additional cores, handing each one a stack to boot on, and
//! confirming every core checked in is an external-collaborator contract
//! (spec.md §1's boot loader / platform-timer boundary) — this module is a
//! thin coordinator around `driver::ioapic`'s IPI primitives, not part of
//! the scheduler/memory/slab/proc core itself.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::driver::acpi;
use crate::driver::ioapic;
use crate::memory::{self, pmap::FrameTag, prelude::*};
use crate::proc::ProcId;

pub mod sleep;

pub fn current_processor_id() -> ProcessorId {
    if ioapic::is_enabled() {
        ioapic::apic_processor_id()
    } else {
        ProcessorId(0)
    }
}

/// If current core is BSP
pub fn is_bsp() -> bool {
    if ioapic::is_enabled() {
        ioapic::apic_processor_id().0 == 0
    } else {
        true
    }
}

/// Processor (ACPI) id
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ProcessorId(pub u8);
impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Top of the stack page handed to the next AP to wake; read (and zeroed)
/// by the AP's own entry shim as it arrives in long mode, before it
/// allocates its own idle process and kernel stack the normal way.
static AP_FREE_STACK: AtomicU64 = AtomicU64::new(0);

/// # Safety
/// Must not be called before `AP_FREE_STACK` has been set by `start_one`.
#[inline]
pub unsafe fn ap_take_stack() -> u64 {
    let value = AP_FREE_STACK.swap(0, Ordering::SeqCst);
    assert!(value != 0, "SMP AP stack not set");
    value
}

/// Number of AP cores that have completed initialization.
static AP_READY_COUNT: AtomicU64 = AtomicU64::new(0);

/// Must not be executed in parallel across cores.
unsafe fn start_one(acpi_id: ProcessorId, entry_page: u8) {
    log::debug!("Waking up core {}", acpi_id);

    assert!(AP_FREE_STACK.load(Ordering::SeqCst) == 0);

    let stack_pgno = memory::page_alloc(FrameTag::Anonymous { owner: ProcId::NONE, vaddr: 0 });
    let stack_top = phys_to_virt(stack_pgno.addr()).as_u64() + PAGE_SIZE_BYTES;
    AP_FREE_STACK.store(stack_top, Ordering::SeqCst);

    ioapic::apic_wakeup_processor(acpi_id.0, entry_page);

    log::trace!("Waiting for core {} to be up", acpi_id);

    let mut is_online = false;
    for _ in 0..50_000 {
        sleep::sleep_ns(200_000);
        if AP_FREE_STACK.load(Ordering::SeqCst) == 0 {
            is_online = true;
            break;
        }
    }
    if !is_online {
        panic!("Failed to bring core {} online (timeout)", acpi_id);
    }

    log::trace!("Core {} online", acpi_id);
}

/// Called by the AP once it has finished initialization.
pub fn ap_mark_ready() {
    AP_READY_COUNT.fetch_add(1, Ordering::SeqCst);
}

/// Wakes every non-BSP CPU listed in the ACPI MADT, pointing each one at
/// `entry_page` (a caller-supplied real-mode trampoline page — supplying
/// its contents is boot-loader territory, out of this core's scope).
pub fn start_all(entry_page: u8) {
    let acpi_data = acpi::ACPI_DATA.poll().expect("acpi::init not called");

    let mut count = 0;
    for cpu in acpi_data.cpus.iter().skip(1) {
        unsafe {
            start_one(ProcessorId(cpu.acpi_id), entry_page);
        }
        count += 1;
    }

    while AP_READY_COUNT.load(Ordering::SeqCst) < count {
        sleep::sleep_ns(200_000);
    }
    log::info!("All CPU cores ready");
}

/// Not to be used before `start_all` has been called.
pub fn cpu_count() -> u64 {
    AP_READY_COUNT.load(Ordering::SeqCst)
}

pub fn init() {
    self::sleep::init();
}
