//! Process table.
//!
//! Grounded in `original_source/include/sys/proc.h`'s `struct proc` and
//! `kernel/proc.c`'s `proc_init`/`proc_kstack`. The global `struct proc
//! proc0` plus whatever processes get `fork()`ed become a `Vec<Process>`
//! arena here, indexed by `ProcId`.

mod create;

pub use create::{fork, proc_alloc};

use spin::Mutex;

use crate::arch::Context;
use crate::sched::{Priority, Token};

/// Identifies a process. `ProcId(0)` is never assigned to a real process
/// (mirrors `PageNumber`'s "no page" sentinel, and keeps `0` available as
/// an explicit "no such process" value for callers that want it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcId(i64);

impl ProcId {
    pub const NONE: ProcId = ProcId(0);

    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> i64 {
        self.0
    }
}

bitflags::bitflags! {
    /// Per-process flags; `SLEEPING` mirrors the `flags` argument `sleep()`
    /// ORs into `proc->flags` for the duration of a sleep.
    #[derive(Default)]
    pub struct ProcFlags: u32 {
        const SLEEPING = 1 << 0;
    }
}

pub struct Process {
    pub id: ProcId,
    pub context: Context,
    pub priority: Priority,
    pub tokens: Token,
    pub channel: Option<u64>,
    pub flags: ProcFlags,
}

impl Process {
    fn new(id: ProcId, priority: Priority) -> Self {
        Self {
            id,
            context: Context::empty(),
            priority,
            tokens: Token::empty(),
            channel: None,
            flags: ProcFlags::empty(),
        }
    }
}

struct ProcessTable {
    processes: alloc::vec::Vec<Process>,
    next_pid: i64,
}

impl ProcessTable {
    const fn new() -> Self {
        Self { processes: alloc::vec::Vec::new(), next_pid: 1 }
    }
}

static TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable::new());

/// Inserts a hand-crafted process (proc0, or a per-CPU idle process) into
/// the table with a freshly allocated pid, returning its id.
pub fn bootstrap(priority: Priority, context: Context) -> ProcId {
    let mut table = TABLE.lock();
    let id = allocate_pid(&table);
    let mut process = Process::new(id, priority);
    process.context = context;
    table.processes.push(process);
    id
}

/// Scans for a pid not currently in use, wrapping `next_pid` back to 1
/// on overflow rather than ever reusing an in-flight pid by chance
/// (spec.md §4.4: monotonic allocation, wrap without reuse collision).
fn allocate_pid(table: &ProcessTable) -> ProcId {
    let mut candidate = table.next_pid;
    loop {
        if candidate == i64::MAX {
            candidate = 1;
        }
        if !table.processes.iter().any(|p| p.id.raw() == candidate) {
            return ProcId::from_raw(candidate);
        }
        candidate += 1;
    }
}

pub fn with_process<R>(id: ProcId, f: impl FnOnce(&mut Process) -> R) -> R {
    let mut table = TABLE.lock();
    let process = table
        .processes
        .iter_mut()
        .find(|p| p.id == id)
        .expect("with_process: no such process");
    f(process)
}

pub fn priority(id: ProcId) -> Priority {
    with_process(id, |p| p.priority)
}

pub fn tokens(id: ProcId) -> Token {
    with_process(id, |p| p.tokens)
}

pub fn set_tokens(id: ProcId, tokens: Token) {
    with_process(id, |p| p.tokens = tokens);
}

pub fn channel(id: ProcId) -> Option<u64> {
    with_process(id, |p| p.channel)
}

pub fn set_channel(id: ProcId, channel: Option<u64>) {
    with_process(id, |p| p.channel = channel);
}

pub fn context_ptr(id: ProcId) -> *mut Context {
    with_process(id, |p| &mut p.context as *mut Context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_assigns_distinct_pids() {
        let a = bootstrap(Priority::Idle, Context::empty());
        let b = bootstrap(Priority::Idle, Context::empty());
        assert_ne!(a, b);
    }

    #[test]
    fn pid_allocation_skips_in_use_ids() {
        let mut table = ProcessTable::new();
        table.processes.push(Process::new(ProcId::from_raw(1), Priority::Idle));
        table.processes.push(Process::new(ProcId::from_raw(2), Priority::Idle));
        table.next_pid = 1;
        let next = allocate_pid(&table);
        assert_eq!(next, ProcId::from_raw(3));
    }
}
