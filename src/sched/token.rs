//! Serializing tokens.
//!
//! Grounded in `original_source/include/sys/sched.h`'s `TOKEN_*` family.
//! A token is a single bit in a 64-bit word; `acquire`/`release` hand
//! these out instead of classic mutexes, so priority inheritance falls
//! out of the scheduler's dispatch rule rather than needing a separate
//! priority-ceiling mechanism.

use bitflags::bitflags;

bitflags! {
    #[derive(Default)]
    pub struct Token: u64 {
        const PMAP  = 1 << 1;
        const SLAB  = 1 << 2;
        const PROC  = 1 << 3;
        const HIGH  = 1 << 4;
        const TTY   = 1 << 5;
        const NET   = 1 << 6;
        const BLOCK = 1 << 7;
        const ALL   = !0;
    }
}

impl Token {
    /// The token guarding ISRs at `priority`, or `Token::empty()` for
    /// priorities with no dedicated synchronization token (User, Idle).
    pub fn for_isr_priority(priority: super::Priority) -> Token {
        use super::Priority::*;
        match priority {
            HighIsr => Token::HIGH,
            TtyIsr => Token::TTY,
            NetIsr => Token::NET,
            BlockIsr => Token::BLOCK,
            User | Idle => Token::empty(),
        }
    }
}
