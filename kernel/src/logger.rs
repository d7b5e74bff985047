//! Kernel logger
//!
//! `log` facade backend. Records are formatted into a stack buffer (no
//! allocation, usable before the heap is up) and handed to a registered sink:
//! the serial console on hardware, a memory ring or nothing on a host.

use core::fmt::Write;
use log::{Level, LevelFilter, Metadata, Record};
use spin::Once;

/// Maximum formatted record length; longer records are truncated
pub const LOG_LINE_MAX: usize = 512;

/// Destination for formatted log lines
pub trait LogSink: Sync {
    /// Write one formatted line (already newline terminated)
    fn write_line(&self, line: &[u8]);
}

struct KernelLogger {
    sink: Once<&'static dyn LogSink>,
}

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Some(sink) = self.sink.get() else {
            return;
        };

        // Format: [LEVEL] target: message
        let level_str = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        let mut buf = [0u8; LOG_LINE_MAX];
        let pos = {
            let mut writer = BufferWriter { buffer: &mut buf, pos: 0 };
            let _ = write!(writer, "[{}] {}: {}\n", level_str, record.target(), record.args());
            writer.pos
        };
        sink.write_line(&buf[..pos]);
    }

    fn flush(&self) {}
}

/// Simple buffer writer for formatting without alloc
pub struct BufferWriter<'a> {
    pub buffer: &'a mut [u8],
    pub pos: usize,
}

impl<'a> Write for BufferWriter<'a> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buffer.len() - self.pos;
        let to_write = bytes.len().min(remaining);

        if to_write > 0 {
            self.buffer[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
            self.pos += to_write;
        }

        Ok(())
    }
}

/// Global logger instance
static LOGGER: KernelLogger = KernelLogger { sink: Once::new() };

/// Install the logger with `sink` as its output
///
/// Only the first call registers a sink; later calls just adjust the level,
/// so several kernels booted in one test binary share the first sink.
pub fn init(sink: &'static dyn LogSink, level: LevelFilter) {
    LOGGER.sink.call_once(|| sink);
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// Sink that drops everything
pub struct NullSink;

impl LogSink for NullSink {
    fn write_line(&self, _line: &[u8]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_writer_truncates() {
        let mut buf = [0u8; 8];
        let mut writer = BufferWriter { buffer: &mut buf, pos: 0 };
        let _ = write!(writer, "{}", "0123456789");
        assert_eq!(writer.pos, 8);
        assert_eq!(&buf, b"01234567");
    }

    #[test]
    fn test_buffer_writer_appends() {
        let mut buf = [0u8; 32];
        let mut writer = BufferWriter { buffer: &mut buf, pos: 0 };
        let _ = write!(writer, "[{}] ", "INFO ");
        let _ = write!(writer, "tick {}", 3);
        let pos = writer.pos;
        assert_eq!(&buf[..pos], b"[INFO ] tick 3");
    }
}
