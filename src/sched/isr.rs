//! ISR table: vector assignment and the pending-ISR bitmask.
//!
//! Grounded in `original_source/kernel/sched.c`'s `struct isr isrs[]` /
//! `pending` and `irq()`/`isr()`, and `include/sys/sched.h`'s `ISR_*`
//! flags and vector layout constants. The source's `isr()` only fills in
//! `token`/`vector` for the four ISR priorities and leaves vector
//! allocation within a priority's 16-vector band unfinished (the switch
//! has no default and never scans for a free slot); `IsrTable::allocate`
//! below is the completed policy: first free vector in the priority's
//! band, panicking if the band is exhausted.

use bitflags::bitflags;

use super::{Priority, Token};

pub const VECTOR_ISR_BASE: u8 = 0x20;
pub const NR_ISR_VECTORS: usize = 64;
pub const VECTORS_PER_PRIORITY: u8 = 16;

bitflags! {
    pub struct IsrFlags: u32 {
        const IOAPIC = 0x0000_0001;
        const LEVEL  = 0x0000_0002;
        const ACTLOW = 0x0000_0004;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vector(pub u8);

#[derive(Debug, Clone, Copy)]
struct IsrEntry {
    flags: IsrFlags,
    pin: i32,
    token: Token,
}

impl IsrEntry {
    const fn free() -> Self {
        Self { flags: IsrFlags::empty(), pin: -1, token: Token::empty() }
    }

    fn is_free(&self) -> bool {
        self.token.is_empty()
    }
}

pub struct IsrTable {
    entries: [IsrEntry; NR_ISR_VECTORS],
    pending: u64,
}

impl IsrTable {
    pub const fn new() -> Self {
        Self { entries: [IsrEntry::free(); NR_ISR_VECTORS], pending: 0 }
    }

    fn band_start(priority: Priority) -> u8 {
        use Priority::*;
        match priority {
            HighIsr => 0,
            TtyIsr => VECTORS_PER_PRIORITY,
            NetIsr => 2 * VECTORS_PER_PRIORITY,
            BlockIsr => 3 * VECTORS_PER_PRIORITY,
            User | Idle => panic!("no ISR vector band for a non-ISR priority"),
        }
    }

    /// Assigns the first free vector in `priority`'s band to a new ISR
    /// source, recording its synchronization token, flags and (if
    /// applicable) I/O APIC pin.
    pub fn allocate(&mut self, priority: Priority, flags: IsrFlags, pin: i32) -> Vector {
        let token = Token::for_isr_priority(priority);
        let start = Self::band_start(priority);
        for offset in 0..VECTORS_PER_PRIORITY {
            let i = (start + offset) as usize;
            if self.entries[i].is_free() {
                self.entries[i] = IsrEntry { flags, pin, token };
                return Vector(VECTOR_ISR_BASE + i as u8);
            }
        }
        panic!("ISR vector band exhausted for priority {:?}", priority);
    }

    fn index_of(vector: Vector) -> usize {
        (vector.0 - VECTOR_ISR_BASE) as usize
    }

    pub fn flags(&self, vector: Vector) -> IsrFlags {
        self.entries[Self::index_of(vector)].flags
    }

    pub fn pin(&self, vector: Vector) -> i32 {
        self.entries[Self::index_of(vector)].pin
    }

    pub fn token(&self, vector: Vector) -> Token {
        self.entries[Self::index_of(vector)].token
    }

    /// Marks `vector`'s ISR pending, matching `irq()`'s `pending |= 1 << i`.
    pub fn mark_pending(&mut self, vector: Vector) {
        self.pending |= 1 << Self::index_of(vector);
    }

    pub fn pending(&self) -> u64 {
        self.pending
    }

    pub fn clear_pending_bit(&mut self, bit: u32) {
        self.pending &= !(1 << bit);
    }

    /// Channel address used to wake an ISR's top half: the stable
    /// identity of its table slot, matching `wakeup1(&isrs[bit])`.
    pub fn channel(vector_index: u32) -> u64 {
        0xffff_0000_0000_0000 | vector_index as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_picks_first_free_in_band() {
        let mut table = IsrTable::new();
        let v0 = table.allocate(Priority::NetIsr, IsrFlags::IOAPIC, 5);
        let v1 = table.allocate(Priority::NetIsr, IsrFlags::empty(), -1);
        assert_eq!(v0.0, VECTOR_ISR_BASE + 2 * VECTORS_PER_PRIORITY);
        assert_eq!(v1.0, v0.0 + 1);
        assert_eq!(table.token(v0), Token::NET);
    }

    #[test]
    #[should_panic]
    fn allocate_panics_when_band_exhausted() {
        let mut table = IsrTable::new();
        for _ in 0..=VECTORS_PER_PRIORITY {
            table.allocate(Priority::HighIsr, IsrFlags::empty(), -1);
        }
    }

    #[test]
    fn pending_bit_round_trips() {
        let mut table = IsrTable::new();
        let v = table.allocate(Priority::TtyIsr, IsrFlags::empty(), -1);
        table.mark_pending(v);
        assert_ne!(table.pending() & (1 << (v.0 - VECTOR_ISR_BASE)), 0);
        table.clear_pending_bit((v.0 - VECTOR_ISR_BASE) as u32);
        assert_eq!(table.pending(), 0);
    }
}
