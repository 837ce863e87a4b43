//! `log` crate backend writing to the VGA text console and COM1.
//!
//! Grounded in the teacher's own `rprintln!`/`write_com1` macros: there is
//! no dedicated logging driver in the source tree this crate was copied
//! from, so this wires the two output sinks that already exist into the
//! `log::Log` trait the rest of the kernel calls through
//! (`log::{trace,debug,info,warn,error}!`), matching SPEC_FULL.md §2's
//! ambient-stack logging section.

use core::fmt::Write;

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::driver::uart;

struct ComWriter;

impl Write for ComWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            uart::write_com1(byte);
        }
        Ok(())
    }
}

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level = record.level();
        rprintln!("[{}] {}", level, record.args());
        if uart::has_com1() {
            let _ = writeln!(ComWriter, "[{}] {}", level, record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Installs the kernel logger as the `log` crate's global backend.
/// Must run before anything calls `log::info!`/etc; safe to call more
/// than once only because `set_logger` itself returns an error the
/// second time, which is ignored here.
pub fn init() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Trace);
}
