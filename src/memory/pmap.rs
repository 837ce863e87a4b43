//! Frame database: one entry per physical page frame in the machine,
//! indexed by page number, plus the free-frame list threaded through it.
//!
//! Grounded in `original_source/kernel/page.c`'s `pmap[]` / `free_pages`
//! and `original_source/include/sys/page.h`'s `PMAP_*` tags, re-typed as
//! the tagged variant spec.md §9 asks for and with the intrusive C list
//! restated as an index-based list over this arena (§9's suggested
//! "single shared intrusive-list hook" becomes plain `Option<PageNumber>`
//! prev/next fields).

use alloc::vec::Vec;
use core::mem;

use crate::proc::ProcId;
use crate::slab::SlabId;

use super::prelude::*;

/// What a physical frame is currently used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTag {
    /// Not yet categorized; only valid during `page_init`.
    Unknown,
    /// Not usable RAM (reserved, MMIO, or unavailable per the firmware map).
    Unavailable,
    /// On the free list.
    Free,
    /// Part of the kernel's loaded image.
    KernelImage,
    /// Backing the frame database itself.
    FrameDatabase,
    /// A page-table page, owned by `owner`.
    PageTable { owner: ProcId },
    /// Anonymous memory mapped into a process's address space.
    Anonymous { owner: ProcId, vaddr: u64 },
    /// Backing a slab.
    SlabBacking { slab: SlabId },
    /// Backing the Rust global allocator's kernel heap.
    KernelHeap,
}

#[derive(Debug, Clone, Copy)]
struct FrameEntry {
    tag: FrameTag,
    prev: Option<PageNumber>,
    next: Option<PageNumber>,
}

impl FrameEntry {
    const fn unknown() -> Self {
        Self {
            tag: FrameTag::Unknown,
            prev: None,
            next: None,
        }
    }
}

/// The frame database and its free list.
///
/// Invariants (spec.md §3):
/// * frame 0 is always `Unavailable` ("no page" sentinel).
/// * a frame tagged `Free` is on the free list, and only those are.
pub struct FrameDb {
    entries: Vec<FrameEntry>,
    free_head: Option<PageNumber>,
    free_count: u64,
}

impl FrameDb {
    /// Creates a frame database sized for `nr_pages` frames, all `Unknown`
    /// except frame 0 which is immediately `Unavailable`.
    pub fn new(nr_pages: u64) -> Self {
        assert!(nr_pages <= MAX_PHYS_PAGES, "memory map exceeds frame-database cap");
        let mut entries = Vec::with_capacity(nr_pages as usize);
        entries.resize(nr_pages as usize, FrameEntry::unknown());
        entries[0].tag = FrameTag::Unavailable;
        Self {
            entries,
            free_head: None,
            free_count: 0,
        }
    }

    /// Number of bytes `new_in_place` needs to hold `nr_pages` entries.
    /// Callers use this to size `frame_db_range` before the database
    /// itself exists to report its own length.
    pub fn bytes_for(nr_pages: u64) -> usize {
        nr_pages as usize * mem::size_of::<FrameEntry>()
    }

    /// Constructs a frame database of `nr_pages` entries directly inside
    /// `backing`, an already page-aligned span of at least
    /// `nr_pages * size_of::<FrameEntry>()` bytes that the caller has
    /// reserved (and tagged `FrameDatabase`) for exactly this purpose.
    /// Used instead of [`Self::new`] by the real boot path, where no heap
    /// exists yet to back an ordinary `Vec`.
    ///
    /// # Safety
    /// `backing` must be valid for reads and writes for `backing_len`
    /// bytes and not aliased by anything else for the database's entire
    /// lifetime.
    pub unsafe fn new_in_place(nr_pages: u64, backing: *mut u8, backing_len: usize) -> Self {
        let nr = nr_pages as usize;
        assert!(
            nr * mem::size_of::<FrameEntry>() <= backing_len,
            "frame database backing too small for {} pages",
            nr
        );
        let ptr = backing as *mut FrameEntry;
        for i in 0..nr {
            ptr.add(i).write(FrameEntry::unknown());
        }
        let mut entries = Vec::from_raw_parts(ptr, nr, nr);
        entries[0].tag = FrameTag::Unavailable;
        Self {
            entries,
            free_head: None,
            free_count: 0,
        }
    }

    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn nr_free(&self) -> u64 {
        self.free_count
    }

    pub fn tag(&self, pgno: PageNumber) -> FrameTag {
        self.entries[pgno.0 as usize].tag
    }

    pub fn set_tag(&mut self, pgno: PageNumber, tag: FrameTag) {
        self.entries[pgno.0 as usize].tag = tag;
    }

    /// Inserts `pgno` at the head of the free list and tags it `Free`.
    /// Does not itself serialize with other accessors: callers hold the
    /// page-allocator token around this (see `memory::page_free`).
    pub fn push_free(&mut self, pgno: PageNumber) {
        assert_ne!(pgno, PageNumber::NONE);
        self.entries[pgno.0 as usize].tag = FrameTag::Free;
        self.entries[pgno.0 as usize].prev = None;
        self.entries[pgno.0 as usize].next = self.free_head;
        if let Some(head) = self.free_head {
            self.entries[head.0 as usize].prev = Some(pgno);
        }
        self.free_head = Some(pgno);
        self.free_count += 1;
    }

    /// Pops the head of the free list, if any.
    pub fn pop_free(&mut self) -> Option<PageNumber> {
        let pgno = self.free_head?;
        let next = self.entries[pgno.0 as usize].next;
        if let Some(n) = next {
            self.entries[n.0 as usize].prev = None;
        }
        self.free_head = next;
        self.entries[pgno.0 as usize].next = None;
        self.free_count -= 1;
        Some(pgno)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_zero_is_unavailable() {
        let db = FrameDb::new(16);
        assert_eq!(db.tag(PageNumber(0)), FrameTag::Unavailable);
    }

    #[test]
    fn free_list_round_trips() {
        let mut db = FrameDb::new(16);
        for i in 1..16 {
            db.push_free(PageNumber(i));
        }
        assert_eq!(db.nr_free(), 15);

        let mut popped = Vec::new();
        while let Some(p) = db.pop_free() {
            popped.push(p);
        }
        // LIFO order: last pushed is first popped.
        assert_eq!(popped.first(), Some(&PageNumber(15)));
        assert_eq!(popped.last(), Some(&PageNumber(1)));
        assert_eq!(db.nr_free(), 0);
    }

    #[test]
    fn push_tags_free_pop_does_not_retag() {
        let mut db = FrameDb::new(4);
        db.set_tag(PageNumber(1), FrameTag::KernelImage);
        db.push_free(PageNumber(1));
        assert_eq!(db.tag(PageNumber(1)), FrameTag::Free);
        let popped = db.pop_free().unwrap();
        assert_eq!(popped, PageNumber(1));
        // page_alloc is responsible for retagging after pop; pop itself
        // leaves the tag as `Free`.
        assert_eq!(db.tag(PageNumber(1)), FrameTag::Free);
    }
}
