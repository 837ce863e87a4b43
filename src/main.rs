// Code style
#![forbid(private_in_public)]
// Safety
#![deny(overflowing_literals)]
#![deny(unused_must_use)]
// Workarounds
#![allow(named_asm_labels)]
// Disable some clippy lints
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::identity_op)]
// No stdlib or mainfn when not running tests
#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]
// Unstable features
#![feature(abi_x86_interrupt)]
#![feature(alloc_error_handler)]
#![feature(naked_functions)]
#![feature(panic_info_message)]

extern crate alloc;

// Hardware drivers
#[macro_use]
mod driver;

mod arch;
mod cpuid;
mod interrupt;
mod memory;
mod proc;
mod sched;
mod slab;
mod smp;

use core::alloc::Layout;
use core::panic::PanicInfo;
use core::ptr;

use memory::prelude::*;
use sched::{IsrFlags, Priority};

/// Physical address the boot loader leaves the firmware memory map at:
/// a one-byte entry count followed by that many 24-byte
/// `{base: u64, length: u64, kind: u32, acpi_data: u32}` records
/// (the `INT 0x15, EAX=0xE820` layout, one field wider than the bare
/// BIOS record to carry the ACPI 3.0 extended attributes byte).
const BOOT_TMP_MMAP_BUFFER: PhysAddr = unsafe { PhysAddr::new_unchecked(0x2000) };

const MAX_MMAP_ENTRIES: usize = 64;

fn read_mmap_entry(index: usize) -> memory::map::MemoryMapEntry {
    let base = (BOOT_TMP_MMAP_BUFFER.as_u64() + 1) as *const u8;
    unsafe {
        let start: u64 = ptr::read_unaligned(base.add(24 * index) as *const u64);
        let length: u64 = ptr::read_unaligned(base.add(24 * index + 8) as *const u64);
        let kind: u32 = ptr::read_unaligned(base.add(24 * index + 16) as *const u32);
        let acpi_data: u32 = ptr::read_unaligned(base.add(24 * index + 20) as *const u32);
        memory::map::MemoryMapEntry {
            base: start,
            length,
            usable: (kind == 1 || kind == 4) && (acpi_data & 1) == 1,
        }
    }
}

/// Reads the whole firmware memory map left at [`BOOT_TMP_MMAP_BUFFER`].
fn read_memory_map() -> alloc::vec::Vec<memory::map::MemoryMapEntry> {
    let entry_count = unsafe { ptr::read_volatile(BOOT_TMP_MMAP_BUFFER.as_u64() as *const u8) } as usize;
    let entry_count = entry_count.min(MAX_MMAP_ENTRIES);
    (0..entry_count).map(read_mmap_entry).collect()
}

/// Inclusive page-number range spanning the kernel's own loaded image,
/// sized conservatively rather than from a linker-provided end symbol
/// (`memory::constants::KERNEL_LOAD_ADDR`/`KERNEL_SIZE_LIMIT`).
fn kernel_range() -> (PageNumber, PageNumber) {
    let first = PageNumber::containing(KERNEL_LOAD_ADDR);
    let last = PageNumber::containing(PhysAddr::new(KERNEL_LOAD_ADDR.as_u64() + KERNEL_SIZE_LIMIT - 1));
    (first, last)
}

/// Entry point for idle processes: proc0 on the BSP, and (were AP bring-up
/// wired in) each AP's own idle process. Never returns.
extern "C" fn idle_entry() -> ! {
    sched::idle_loop()
}

/// The kernel main function.
#[no_mangle]
pub extern "C" fn rust_main() -> ! {
    rreset!();
    rprintln!("Initializing the system...\n");

    driver::uart::init();
    driver::logger::init();
    driver::pic::init();

    let entries = read_memory_map();

    // A preliminary normalize/highest_usable pass, done here rather than
    // inside `page_init`, purely to size `frame_db_range` before the frame
    // database exists to report its own length.
    let ranges = memory::map::normalize(&entries);
    let highest = memory::map::highest_usable(&ranges).min(MAX_PHYS_PAGES.saturating_sub(1));
    assert!(highest > 0, "no usable memory reported by the firmware map");
    let nr_pages = highest + 1;

    let kernel_range = kernel_range();
    let frame_db_first = PageNumber(kernel_range.1 .0 + 1);
    let frame_db_bytes = memory::pmap::FrameDb::bytes_for(nr_pages);
    let frame_db_pages = to_pages_round_up(frame_db_bytes as u64).max(1);
    let frame_db_range = (frame_db_first, PageNumber(frame_db_first.0 + frame_db_pages - 1));

    memory::page_init(&entries, kernel_range, frame_db_range);
    memory::set_prototype_root(PhysAddr::new(arch::current_cr3()));

    // Needs `memory::page_alloc` to be callable (double-fault IST stack),
    // so this runs after `page_init`/`set_prototype_root` rather than
    // before memory is up.
    interrupt::init();

    cpuid::init();
    driver::acpi::init();
    smp::init();

    // The scheduler's periodic tick is an ordinary ISR source at the
    // highest priority band, allocated through the same dynamic vector
    // table every other ISR uses rather than a vector hardcoded ahead of
    // time, so `interrupt::isr_handler` already knows how to route it.
    let timer_vector = sched::register_isr(Priority::HighIsr, IsrFlags::empty(), -1);
    driver::ioapic::init_bsp(timer_vector.0);

    // No real-mode AP trampoline image is available to this core (see
    // `driver::ioapic::apic_wakeup_processor`'s own scope note), so
    // `smp::start_all` is never called; this kernel always runs on the BSP
    // alone.

    let proc0 = proc::proc_alloc(Priority::Idle, idle_entry);

    rreset!();
    log::info!("Kernel initialized.");

    sched::enter(proc0)
}

#[global_allocator]
static ALLOCATOR: memory::heap::GlobAlloc = memory::heap::GlobAlloc::new();

#[alloc_error_handler]
fn out_of_memory(layout: Layout) -> ! {
    sched::panic(&alloc::format!("out of memory: {:?}", layout))
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    if let Some(location) = info.location() {
        log::error!("panic at {}:{}", location.file(), location.line());
    }
    let msg = if let Some(args) = info.message() {
        alloc::format!("{}", args)
    } else {
        alloc::string::String::from("(no message)")
    };
    sched::panic(&msg)
}

static_assertions::assert_eq_size!(u64, usize);
