//! Staticlib crate root: the same module tree `main.rs` drives from
//! `rust_main`, exposed as a library so an external bootloader/link step
//! (and `cargo test`, which exercises this target rather than the no_std
//! binary) can pull in the kernel core without going through a `no_main`
//! executable.
#![cfg_attr(not(test), no_std)]
#![feature(abi_x86_interrupt)]
#![feature(alloc_error_handler)]
#![feature(naked_functions)]

extern crate alloc;

#[macro_use]
pub mod driver;

pub mod arch;
pub mod cpuid;
pub mod interrupt;
pub mod memory;
pub mod proc;
pub mod sched;
pub mod slab;
pub mod smp;
