//! Common types re-exported by the rest of `memory`.

pub use x86_64::{PhysAddr, VirtAddr};

pub use super::constants::*;

/// Identity of a single physical page frame: its index in the frame
/// database. `PageNumber(0)` is reserved ("no page", see `FrameDb`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageNumber(pub u64);
impl PageNumber {
    pub const NONE: PageNumber = PageNumber(0);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    pub fn addr(self) -> PhysAddr {
        PhysAddr::new(self.0 * PAGE_SIZE_BYTES)
    }

    pub fn containing(addr: PhysAddr) -> PageNumber {
        PageNumber(addr.as_u64() / PAGE_SIZE_BYTES)
    }
}

/// Round a byte length up to a whole number of pages.
pub const fn to_pages_round_up(bytes: u64) -> u64 {
    (bytes + (PAGE_SIZE_BYTES - 1)) / PAGE_SIZE_BYTES
}

/// Bootstrap identity map is 1:1, so physical and virtual addresses
/// coincide below the map's extent.
pub fn phys_to_virt(addr: PhysAddr) -> VirtAddr {
    VirtAddr::new(addr.as_u64() + PHYS_MAP_OFFSET.as_u64())
}
