//! Fixed-size object (slab) allocator.
//!
//! Grounded in `original_source/kernel/slab.c` and `include/sys/slab.h`.
//! Objects are carved out of whole pages obtained from `memory::page_alloc`;
//! a page holding at least one free object stays on its slab's partial
//! list, and a page is handed back to the page allocator the moment its
//! last object is freed. The source's intrusive `LIST_ENTRY` page links
//! become a plain `Vec<PageNumber>` per slab; the free-object list within
//! a page is still the embedded singly-linked list the source uses
//! (there's nowhere else to put it: the objects themselves are the only
//! storage available once they're unallocated).

use alloc::vec::Vec;

use spin::Mutex;

use crate::memory;
use crate::memory::prelude::*;

/// Minimum object size/alignment a slab will hand out, matching
/// `SLAB_MIN`. The first `SLAB_MIN` bytes of every backing page are
/// reserved for the page's own header.
pub const SLAB_MIN: usize = 64;

/// Identifies a registered slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlabId(u32);

#[repr(C)]
struct PageHeader {
    slab: SlabId,
    nr_free: u32,
    free_head: u64,
}

struct Slab {
    obj_size: usize,
    per_page: usize,
    /// Pages with at least one free object.
    partial: Vec<PageNumber>,
}

impl Slab {
    fn new(obj_size: usize) -> Self {
        let obj_size = obj_size.max(SLAB_MIN);
        let per_page = (PAGE_SIZE_BYTES as usize - SLAB_MIN) / obj_size;
        assert!(per_page > 0, "slab object size too large for one page");
        Self { obj_size, per_page, partial: Vec::new() }
    }
}

static SLABS: Mutex<Vec<Slab>> = Mutex::new(Vec::new());

/// Registers a new slab for objects of (at least) `obj_size` bytes.
pub fn slab_init(obj_size: usize) -> SlabId {
    let mut slabs = SLABS.lock();
    slabs.push(Slab::new(obj_size));
    SlabId((slabs.len() - 1) as u32)
}

fn header_ptr(pgno: PageNumber) -> *mut PageHeader {
    phys_to_virt(pgno.addr()).as_mut_ptr()
}

fn object_addr(pgno: PageNumber, index: usize, obj_size: usize) -> u64 {
    phys_to_virt(pgno.addr()).as_u64() + SLAB_MIN as u64 + (index * obj_size) as u64
}

/// Carves up a freshly allocated page into `per_page` free objects,
/// threading them into the page's embedded free list, and returns the
/// populated header.
fn populate_page(slab_id: SlabId, pgno: PageNumber, obj_size: usize, per_page: usize) {
    memory::zero_frame(pgno);

    let mut next = 0u64; // 0 terminates the embedded free list.
    for i in (0..per_page).rev() {
        let addr = object_addr(pgno, i, obj_size);
        unsafe { *(addr as *mut u64) = next };
        next = addr;
    }

    unsafe {
        *header_ptr(pgno) = PageHeader { slab: slab_id, nr_free: per_page as u32, free_head: next };
    }
}

/// Allocates one object from `id`, obtaining a new backing page from the
/// page allocator if the slab has no partial pages.
pub fn slab_alloc(id: SlabId) -> VirtAddr {
    let have = crate::sched::acquire(crate::sched::Token::SLAB);

    let (obj_size, per_page) = {
        let slabs = SLABS.lock();
        let slab = &slabs[id.0 as usize];
        (slab.obj_size, slab.per_page)
    };

    {
        let mut slabs = SLABS.lock();
        if slabs[id.0 as usize].partial.is_empty() {
            drop(slabs);
            let pgno = memory::page_alloc(memory::pmap::FrameTag::SlabBacking { slab: id });
            populate_page(id, pgno, obj_size, per_page);
            slabs = SLABS.lock();
            slabs[id.0 as usize].partial.push(pgno);
        }
    }

    let mut slabs = SLABS.lock();
    let pgno = *slabs[id.0 as usize].partial.last().unwrap();
    let header = unsafe { &mut *header_ptr(pgno) };

    let object = header.free_head;
    header.free_head = unsafe { *(object as *const u64) };
    header.nr_free -= 1;

    if header.nr_free == 0 {
        slabs[id.0 as usize].partial.pop();
    }

    crate::sched::release(have);
    VirtAddr::new(object)
}

/// Frees an object previously returned by `slab_alloc`, returning the
/// backing page to the page allocator once every object on it is free.
pub fn slab_free(addr: VirtAddr) {
    let have = crate::sched::acquire(crate::sched::Token::SLAB);

    let pgno = PageNumber::containing(PhysAddr::new(addr.as_u64() - PHYS_MAP_OFFSET.as_u64()));
    let header = unsafe { &mut *header_ptr(pgno) };
    let slab_id = header.slab;

    unsafe { *(addr.as_u64() as *mut u64) = header.free_head };
    header.free_head = addr.as_u64();
    header.nr_free += 1;

    let mut slabs = SLABS.lock();
    let slab = &mut slabs[slab_id.0 as usize];

    if header.nr_free == 1 {
        slab.partial.push(pgno);
    }

    if header.nr_free as usize == slab.per_page {
        slab.partial.retain(|&p| p != pgno);
        drop(slabs);
        memory::page_free(pgno);
    }

    crate::sched::release(have);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_page_accounts_for_header_reservation() {
        let slab = Slab::new(128);
        assert_eq!(slab.per_page, (PAGE_SIZE_BYTES as usize - SLAB_MIN) / 128);
    }

    #[test]
    #[should_panic]
    fn object_larger_than_page_panics() {
        Slab::new(PAGE_SIZE_BYTES as usize * 2);
    }
}
