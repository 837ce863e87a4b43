//! GDT/TSS/IDT wiring: the hand-off from the bootloader's flat setup to
//! this kernel's own descriptor tables, and the low-level entry points
//! that feed interrupts into `sched::irq`/`sched::panic`.
//!
//! Grounded in `original_source/kernel/trap.c`'s vector table and the
//! teacher's `interrupt/handler.rs` exception set; the ISR range uses one
//! shared handler reading the LAPIC's in-service register back
//! (`driver::ioapic::lapic::in_service_vector`) rather than 64 separately
//! compiled trampolines, since nothing here needs per-vector machine code,
//! only per-vector bookkeeping that `sched::isr::IsrTable` already does.

pub mod gdt;
pub mod tss;

use core::sync::atomic::{AtomicUsize, Ordering};

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

use crate::driver::ioapic::lapic;
use crate::memory::{self, pmap::FrameTag, prelude::*};
use crate::proc::ProcId;
use crate::sched::{self, Vector};

const MAX_CPUS: usize = 64;

/// Per-CPU GDT backing storage. Each CPU gets its own table (code segment
/// plus its own TSS descriptor); `GdtBuilder::add_entry` writes raw
/// descriptor words directly into a slot of this array.
static mut GDT_TABLE: [[u64; 8]; MAX_CPUS] = [[0; 8]; MAX_CPUS];
static mut GDT_BUILDERS: [Option<gdt::GdtBuilder>; MAX_CPUS] = [None; MAX_CPUS];
static NEXT_GDT_SLOT: AtomicUsize = AtomicUsize::new(0);

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();

        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.general_protection_fault.set_handler_fn(general_protection_fault_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX as u16);
        }

        idt[sched::HALT_VECTOR as usize].set_handler_fn(halt_handler);

        for vector in sched::VECTOR_ISR_BASE..(sched::VECTOR_ISR_BASE + sched::NR_ISR_VECTORS as u8) {
            idt[vector as usize].set_handler_fn(isr_handler);
        }

        idt
    };
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    log::warn!("breakpoint\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame, error_code: u64,
) {
    log::error!("general protection fault (error code {:#x})\n{:#?}", error_code, stack_frame);
    sched::panic("general protection fault");
}

/// The trap stub spec.md §7 describes: logs the faulting frame and the
/// faulting address, then hands off to the scheduler's fatal path. No
/// demand paging or copy-on-write is implemented, so every page fault is
/// unrecoverable here.
extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame, error_code: PageFaultErrorCode,
) {
    let fault_addr = x86_64::registers::control::Cr2::read();
    log::error!(
        "page fault at {:?} (error {:?})\n{:#?}",
        fault_addr,
        error_code,
        stack_frame
    );
    sched::panic("page fault");
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame, error_code: u64,
) -> ! {
    log::error!("double fault (error code {:#x})\n{:#?}", error_code, stack_frame);
    sched::panic("double fault")
}

/// Every core's halt IPI target (`sched::panic`'s `broadcast_ipi`): stop
/// immediately and never come back.
extern "x86-interrupt" fn halt_handler(_stack_frame: InterruptStackFrame) {
    loop {
        crate::arch::halt();
    }
}

/// Shared entry point for the whole dynamically-allocated ISR range.
/// Reads back which vector is actually in-service from the LAPIC, marks
/// it pending in the scheduler, and acknowledges it.
extern "x86-interrupt" fn isr_handler(_stack_frame: InterruptStackFrame) {
    if let Some(vector) = lapic::in_service_vector() {
        sched::irq(Vector(vector));
    }
    lapic::write_eoi();
}

pub fn init_idt() {
    IDT.load();
}

/// Builds and loads this CPU's own GDT and TSS: a kernel code segment plus
/// a TSS whose double-fault IST entry points at a freshly allocated
/// private stack, so a double fault is survivable even if the regular
/// kernel stack has overflowed.
pub fn per_cpu_init() {
    let stack_pgno = memory::page_alloc(FrameTag::Anonymous { owner: ProcId::NONE, vaddr: 0 });
    let stack_top = phys_to_virt(stack_pgno.addr()) + PAGE_SIZE_BYTES;

    let mut ist_tss = TaskStateSegment::new();
    ist_tss.interrupt_stack_table[gdt::DOUBLE_FAULT_IST_INDEX] = stack_top;
    let tss_ref = tss::store(ist_tss);

    let slot = NEXT_GDT_SLOT.fetch_add(1, Ordering::SeqCst);
    assert!(slot < MAX_CPUS, "more CPUs booted than MAX_CPUS GDT slots");

    unsafe {
        let addr = VirtAddr::new(GDT_TABLE[slot].as_mut_ptr() as u64);
        let mut builder = gdt::GdtBuilder::new(addr);
        let code_selector = builder.add_entry(gdt::Descriptor::kernel_code_segment());
        let tss_selector = builder.add_entry(gdt::Descriptor::tss_segment(tss_ref));

        // `load` takes `&'static self`; stash the builder in the per-slot
        // static array so the reference handed to `load` is genuinely
        // `'static`, not a borrow of this function's stack frame.
        GDT_BUILDERS[slot] = Some(builder);
        GDT_BUILDERS[slot].as_ref().unwrap().load();

        x86_64::instructions::segmentation::set_cs(code_selector);
        x86_64::instructions::tables::load_tss(tss_selector);
    }
}

pub fn init() {
    per_cpu_init();
    init_idt();
}
