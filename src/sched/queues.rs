//! Run queues and sleep queues.
//!
//! Grounded in `original_source/kernel/sched.c`: `runq[NR_RUNQS]` plus the
//! `runqs` non-empty bitmask, and `sleepq[NR_SLEEPQS]` hashed by
//! `SLEEPQ(channel)`. The original's intrusive `TAILQ` links become plain
//! `VecDeque<ProcId>`s here.

use alloc::collections::VecDeque;

use crate::proc::ProcId;

use super::{Priority, NR_SLEEPQS};

/// Hashes a sleep channel (an arbitrary but stable address-sized value)
/// into one of `NR_SLEEPQS` buckets, matching `SLEEPQ()`.
pub fn sleepq_hash(channel: u64) -> usize {
    ((channel >> 3) % NR_SLEEPQS as u64) as usize
}

/// Lowest set bit, or `None` if `bits == 0`. Stands in for the source's
/// `bsf()` builtin.
pub fn bsf(bits: u64) -> Option<u32> {
    if bits == 0 {
        None
    } else {
        Some(bits.trailing_zeros())
    }
}

pub struct RunQueues {
    queues: [VecDeque<ProcId>; Priority::COUNT],
    mask: u64,
}

impl RunQueues {
    pub const fn new() -> Self {
        const EMPTY: VecDeque<ProcId> = VecDeque::new();
        Self {
            queues: [EMPTY; Priority::COUNT],
            mask: 0,
        }
    }

    pub fn mask(&self) -> u64 {
        self.mask
    }

    pub fn insert_tail(&mut self, priority: Priority, pid: ProcId) {
        self.queues[priority as usize].push_back(pid);
        self.mask |= 1 << priority as u64;
    }

    pub fn insert_head(&mut self, priority: Priority, pid: ProcId) {
        self.queues[priority as usize].push_front(pid);
        self.mask |= 1 << priority as u64;
    }

    pub fn front(&self, priority: Priority) -> Option<ProcId> {
        self.queues[priority as usize].front().copied()
    }

    /// Removes and returns the process at the head of `priority`'s queue,
    /// clearing that priority's mask bit if the queue becomes empty.
    pub fn pop_front(&mut self, priority: Priority) -> Option<ProcId> {
        let pid = self.queues[priority as usize].pop_front();
        if self.queues[priority as usize].is_empty() {
            self.mask &= !(1 << priority as u64);
        }
        pid
    }

    /// First process in `priority`'s queue matching `predicate`, scanning
    /// front-to-back without removing anything. Mirrors `sched()`'s inner
    /// `while (proc)` loop, which walks past processes whose tokens
    /// aren't currently free instead of only ever looking at the head.
    pub fn find_first(
        &self, priority: Priority, mut predicate: impl FnMut(ProcId) -> bool,
    ) -> Option<ProcId> {
        self.queues[priority as usize].iter().copied().find(|&pid| predicate(pid))
    }

    /// Removes a specific process from `priority`'s queue, wherever it
    /// sits, clearing the mask bit if the queue becomes empty.
    pub fn remove(&mut self, priority: Priority, pid: ProcId) -> bool {
        let queue = &mut self.queues[priority as usize];
        if let Some(pos) = queue.iter().position(|&p| p == pid) {
            queue.remove(pos);
            if queue.is_empty() {
                self.mask &= !(1 << priority as u64);
            }
            true
        } else {
            false
        }
    }

    /// True if a process with priority strictly higher than `priority`
    /// (a smaller numeric value) is runnable. Matches `WAITING()`'s
    /// `runqs && bsf(runqs) < priority` half.
    pub fn has_higher_priority_than(&self, priority: Priority) -> bool {
        match bsf(self.mask) {
            Some(bit) => (bit as u8) < priority as u8,
            None => false,
        }
    }
}

pub struct SleepQueues {
    buckets: [VecDeque<(u64, ProcId)>; NR_SLEEPQS],
}

impl SleepQueues {
    pub const fn new() -> Self {
        const EMPTY: VecDeque<(u64, ProcId)> = VecDeque::new();
        Self { buckets: [EMPTY; NR_SLEEPQS] }
    }

    pub fn insert(&mut self, channel: u64, pid: ProcId) {
        self.buckets[sleepq_hash(channel)].push_back((channel, pid));
    }

    /// Removes and returns every process sleeping on `channel`, matching
    /// `wakeup1()`'s scan-and-splice of the bucket.
    pub fn drain_channel(&mut self, channel: u64) -> VecDeque<ProcId> {
        let bucket = &mut self.buckets[sleepq_hash(channel)];
        let mut woken = VecDeque::new();
        let mut remaining = VecDeque::with_capacity(bucket.len());
        for (c, pid) in bucket.drain(..) {
            if c == channel {
                woken.push_back(pid);
            } else {
                remaining.push_back((c, pid));
            }
        }
        *bucket = remaining;
        woken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bsf_matches_trailing_zeros() {
        assert_eq!(bsf(0), None);
        assert_eq!(bsf(0b1000), Some(3));
        assert_eq!(bsf(0b1010), Some(1));
    }

    #[test]
    fn run_queue_mask_tracks_occupancy() {
        let mut rq = RunQueues::new();
        assert_eq!(rq.mask(), 0);
        rq.insert_tail(Priority::User, ProcId::from_raw(1));
        assert_eq!(rq.mask(), 1 << Priority::User as u64);
        rq.pop_front(Priority::User);
        assert_eq!(rq.mask(), 0);
    }

    #[test]
    fn higher_priority_waiting_detects_lower_bit() {
        let mut rq = RunQueues::new();
        rq.insert_tail(Priority::NetIsr, ProcId::from_raw(1));
        assert!(rq.has_higher_priority_than(Priority::User));
        assert!(!rq.has_higher_priority_than(Priority::HighIsr));
    }

    #[test]
    fn sleep_queue_drains_only_matching_channel() {
        let mut sq = SleepQueues::new();
        sq.insert(100, ProcId::from_raw(1));
        sq.insert(200, ProcId::from_raw(2));
        sq.insert(100, ProcId::from_raw(3));

        let woken = sq.drain_channel(100);
        assert_eq!(woken.len(), 2);
        assert!(woken.contains(&ProcId::from_raw(1)));
        assert!(woken.contains(&ProcId::from_raw(3)));

        let remaining = sq.drain_channel(200);
        assert_eq!(remaining.len(), 1);
    }
}
