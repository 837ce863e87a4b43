//! Per-CPU Task State Segment storage.

use core::sync::atomic::{AtomicUsize, Ordering};

use x86_64::structures::tss::TaskStateSegment;

const MAX_CPUS: usize = 64;

static mut TSS_TABLE: [TaskStateSegment; MAX_CPUS] =
    [TaskStateSegment::new(); MAX_CPUS];
static USED_TSS: AtomicUsize = AtomicUsize::new(0);

/// Stores `tss` in the next free per-CPU slot, returning a `'static`
/// reference suitable for loading into a GDT.
pub fn store(tss: TaskStateSegment) -> &'static TaskStateSegment {
    let index = USED_TSS.fetch_add(1, Ordering::SeqCst);
    assert!(index < MAX_CPUS, "more CPUs booted than MAX_CPUS TSS slots");
    unsafe {
        TSS_TABLE[index] = tss;
        &TSS_TABLE[index]
    }
}
