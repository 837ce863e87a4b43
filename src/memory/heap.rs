//! Kernel heap backing `#[global_allocator]`.
//!
//! Adapted from the teacher's own `rust_heap.rs`: small requests are
//! served out of power-of-two `allogator::BlockLLAllocator` pools, one
//! pool per distinct size, each pool backed by a single page obtained
//! from `page_alloc`. Large requests (at or above one page) get a whole
//! page directly. There is no multi-page contiguous allocation here —
//! this kernel's frame database hands out single pages, not buddy-style
//! runs — so any single allocation wider than a page fails outright.

use core::alloc::{GlobalAlloc, Layout};
use core::{mem, ptr};

use spin::Mutex;

use allogator::BlockLLAllocator;

use super::pmap::FrameTag;
use super::prelude::*;

const MIN_ALLOC: usize = mem::size_of::<*mut u8>();

/// Bump allocator serving the handful of small, never-freed allocations
/// `page_init` itself makes (`map::normalize`'s scratch `Vec`) before the
/// frame database exists to back `page_alloc`. Nothing past `page_init`
/// should still be drawing from this; it exists solely to break the
/// bootstrap cycle where the heap needs the frame database and the frame
/// database's own construction needs the heap.
const EARLY_HEAP_SIZE: usize = 16 * 1024;

#[repr(align(16))]
struct EarlyHeap([u8; EARLY_HEAP_SIZE]);

static mut EARLY_HEAP: EarlyHeap = EarlyHeap([0; EARLY_HEAP_SIZE]);
static EARLY_HEAP_NEXT: Mutex<usize> = Mutex::new(0);

fn early_heap_base() -> usize {
    unsafe { EARLY_HEAP.0.as_ptr() as usize }
}

unsafe fn early_alloc(layout: Layout) -> *mut u8 {
    let mut next = EARLY_HEAP_NEXT.lock();
    let base = early_heap_base();
    let start = (base + *next + layout.align() - 1) & !(layout.align() - 1);
    let end = start - base + layout.size();
    assert!(end <= EARLY_HEAP_SIZE, "early boot heap exhausted");
    *next = end;
    start as *mut u8
}

fn is_early_ptr(ptr: *mut u8) -> bool {
    let base = early_heap_base();
    let addr = ptr as usize;
    addr >= base && addr < base + EARLY_HEAP_SIZE
}

struct Pool {
    size: usize,
    allocator: BlockLLAllocator,
}

struct Heap {
    pools: alloc::vec::Vec<Pool>,
}

impl Heap {
    unsafe fn allocate(&mut self, size: usize) -> *mut u8 {
        let size = size.next_power_of_two();

        for pool in self.pools.iter_mut() {
            if pool.size == size {
                if let Some(p) = pool.allocator.allocate_one() {
                    return p.as_ptr();
                }
            }
        }

        let pgno = super::page_alloc(FrameTag::KernelHeap);
        let backing = allogator::MemoryBlock {
            ptr: ptr::NonNull::new(phys_to_virt(pgno.addr()).as_mut_ptr()).unwrap(),
            len: PAGE_SIZE_BYTES as usize,
        };
        let mut allocator = BlockLLAllocator::new(backing, size);
        let result = allocator.allocate_one().unwrap().as_ptr();
        self.pools.push(Pool { size, allocator });
        result
    }

    unsafe fn deallocate(&mut self, ptr: *mut u8, size: usize) {
        let size = size.next_power_of_two();
        let ptr = ptr::NonNull::new(ptr).unwrap();
        for pool in self.pools.iter_mut() {
            if pool.size == size && pool.allocator.contains(ptr) {
                pool.allocator.deallocate_one(ptr);
                return;
            }
        }
    }
}

pub struct GlobAlloc {
    inner: Mutex<Heap>,
}

impl GlobAlloc {
    pub const fn new() -> Self {
        Self { inner: Mutex::new(Heap { pools: alloc::vec::Vec::new() }) }
    }
}

unsafe impl GlobalAlloc for GlobAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if !super::frame_db_ready() {
            return early_alloc(layout);
        }

        let req = layout.size().max(layout.align()).max(MIN_ALLOC);
        if req as u64 >= PAGE_SIZE_BYTES {
            assert!(req as u64 <= PAGE_SIZE_BYTES, "allocation wider than one page: {} bytes", req);
            let pgno = super::page_alloc(FrameTag::KernelHeap);
            phys_to_virt(pgno.addr()).as_mut_ptr()
        } else {
            self.inner.lock().allocate(req)
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if is_early_ptr(ptr) {
            // Bump allocations are never individually freed.
            return;
        }

        let req = layout.size().max(layout.align()).max(MIN_ALLOC);
        if req as u64 >= PAGE_SIZE_BYTES {
            let addr = PhysAddr::new(ptr as u64 - PHYS_MAP_OFFSET.as_u64());
            super::page_free(PageNumber::containing(addr));
        } else {
            self.inner.lock().deallocate(ptr, req);
        }
    }
}
