//! Compile-time layout and sizing constants for the physical-page manager.
//!
//! These mirror the design values called out in the kernel specification:
//! the frame-database cap, kernel stack size, and the fixed virtual
//! addresses the bootstrap identity map reserves for page-table access.

use x86_64::{PhysAddr, VirtAddr};

/// Size of a single physical page frame.
pub const PAGE_SIZE_BYTES: u64 = 0x1000;

/// Upper bound on the number of frames the frame database will size for.
/// Corresponds to the 128 GiB design cap: a memory map implying more
/// frames than this is rejected rather than accepted silently.
pub const MAX_PHYS_PAGES: u64 = (128u64 * 1024 * 1024 * 1024) / PAGE_SIZE_BYTES;

/// Number of 8-byte entries in one page-table page.
pub const PTES_PER_TABLE: usize = 512;

/// Number of pages mapped for each process's kernel stack.
pub const KSTACK_PAGES: usize = 2;

/// Virtual address identity-mapping RAM begins at during early boot.
/// The bootstrap map covers physical memory 1:1 starting here.
pub const PHYS_MAP_OFFSET: VirtAddr = unsafe { VirtAddr::new_unsafe(0) };

/// Physical load address of the kernel image, used only to size the
/// "kernel image" frame range during `page_init`.
pub const KERNEL_LOAD_ADDR: PhysAddr = unsafe { PhysAddr::new_unchecked(0x100_000) };

/// Conservative upper bound on the kernel image's own size, used to carve
/// out its frame range without a linker-provided end symbol.
pub const KERNEL_SIZE_LIMIT: u64 = 0x200_000;
