//! https://wiki.osdev.org/IOAPIC

use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::driver::acpi::ACPI_DATA;
use crate::memory;

pub mod io;
pub mod lapic;

pub use self::lapic::processor_id as apic_processor_id;

static APIC_ENABLED: AtomicBool = AtomicBool::new(false);

pub fn is_enabled() -> bool {
    APIC_ENABLED.load(Ordering::SeqCst)
}

fn enable_local_apic() {
    // Enable APIC
    let local_apic_addr = ACPI_DATA
        .poll()
        .expect("acpi::init not called")
        .local_apic_addr;

    let addr = memory::phys_to_virt(local_apic_addr);

    // https://wiki.osdev.org/APIC#Spurious_Interrupt_Vector_Register
    let field = (addr.as_u64() + 0xf0) as *mut u32;
    unsafe {
        let value = ptr::read_volatile(field);
        ptr::write_volatile(field, value | 0xff | 0x100);
    }
}

/// Global IO APIC enable function, only ran by the BSP. Supplying the real
/// mode trampoline code APs jump to on wakeup is boot-loader territory
/// (out of scope for this core); callers that actually bring up APs are
/// expected to have placed one at `entry_page` before calling
/// `apic_wakeup_processor`.
pub fn init_bsp(timer_vector: u8) {
    // Disable old PICs
    crate::driver::pic::disable();

    // I/O APIC initialization
    io::init();

    // Do per-processor initialization
    per_processor_init(timer_vector);

    // Mark APIC as enabled
    APIC_ENABLED.store(true, Ordering::SeqCst);
}

/// LAPIC initalization, done for each processor. `timer_vector` is a vector
/// already wired into the IDT's ISR range (`sched::register_isr`); unlike
/// the fixed `0xd8` the scheduler tick used to hardcode, it is allocated
/// dynamically so the shared `isr_handler`/`sched::irq` path picks it up
/// like any other ISR source.
pub fn per_processor_init(timer_vector: u8) {
    enable_local_apic();
    lapic::configure_timer(timer_vector);
}

/// Sends the INIT-SIPI-SIPI sequence that wakes a real-mode AP and starts
/// it executing at `entry_page << 12` (a caller-supplied low-memory page
/// holding AP trampoline code; this driver has no opinion on its
/// contents).
pub fn apic_wakeup_processor(acpi_id: u8, entry_page: u8) {
    let local_apic_addr = ACPI_DATA
        .poll()
        .expect("acpi::init not called")
        .local_apic_addr;

    let addr = memory::phys_to_virt(local_apic_addr);

    // https://wiki.osdev.org/APIC#Interrupt_Command_Register
    let field_lo = (addr.as_u64() + 0x300) as *mut u32;
    let field_hi = (addr.as_u64() + 0x310) as *mut u32;

    unsafe {
        // Init IPI
        log::trace!("Sending Init IPI to core {}", acpi_id);
        ptr::write_volatile(field_hi, (acpi_id as u32) << 24);
        ptr::write_volatile(field_lo, 0x00004500);

        crate::smp::sleep::sleep_ns(10_000_000);

        // Startup IPI
        log::trace!("Sending Startup IPI to core {}", acpi_id);
        ptr::write_volatile(field_hi, (acpi_id as u32) << 24);
        ptr::write_volatile(field_lo, 0x4600 | (entry_page as u32));
    }
}

pub fn send_ipi(acpi_id: u8, int_vector: u8, synchronous: bool) {
    let local_apic_addr = ACPI_DATA
        .poll()
        .expect("acpi::init not called")
        .local_apic_addr;

    let addr = memory::phys_to_virt(local_apic_addr);

    // https://wiki.osdev.org/APIC#Interrupt_Command_Register
    let field_lo = (addr.as_u64() + 0x300) as *mut u32;
    let field_hi = (addr.as_u64() + 0x310) as *mut u32;

    unsafe {
        log::trace!("Sending IPI to core {} (vector {})", acpi_id, int_vector);
        ptr::write_volatile(field_hi, (acpi_id as u32) << 24);
        ptr::write_volatile(field_lo, int_vector as u32);

        if synchronous {
            while ptr::read_volatile(field_lo) & (1 << 12) != 0 {}
        }
    }
}

pub fn broadcast_ipi(include_self: bool, int_vector: u8) {
    let local_apic_addr = ACPI_DATA
        .poll()
        .expect("acpi::init not called")
        .local_apic_addr;

    let addr = memory::phys_to_virt(local_apic_addr);

    // https://wiki.osdev.org/APIC#Interrupt_Command_Register
    let field_lo = (addr.as_u64() + 0x300) as *mut u32;
    let field_hi = (addr.as_u64() + 0x310) as *mut u32;

    unsafe {
        log::trace!(
            "Broadcasting IPI (self: {}) (vector {})",
            include_self,
            int_vector
        );

        let mode: u32 = if include_self { 0b10 << 18 } else { 0b11 << 18 };

        ptr::write_volatile(field_hi, 0u32);
        ptr::write_volatile(field_lo, (int_vector as u32) | mode);
    }
}
