// Kernel logging (printk) with ring buffer

use crate::params::{LOG_BUF_ENTRIES, LOG_MSG_MAX};
use crate::ringbuf::RingBuffer;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

#[derive(Copy, Clone)]
pub struct LogEntry {
    /// Monotonic sequence number; the core has no wall clock.
    pub seq: u64,
    pub level: LogLevel,
    pub message: [u8; LOG_MSG_MAX],
    pub len: usize,
}

impl LogEntry {
    pub fn text(&self) -> &str {
        core::str::from_utf8(&self.message[..self.len]).unwrap_or("<bad utf8>")
    }
}

pub struct LogBuffer {
    buffer: Mutex<RingBuffer<LogEntry, LOG_BUF_ENTRIES>>,
}

impl LogBuffer {
    pub const fn new() -> Self {
        Self {
            buffer: Mutex::new(RingBuffer::new()),
        }
    }

    pub fn push(&self, entry: LogEntry) {
        let mut buffer = self.buffer.lock();
        buffer.push(entry);
    }

    pub fn drain_all(&self) -> alloc::vec::Vec<LogEntry> {
        let mut buffer = self.buffer.lock();
        buffer.drain_all()
    }
}

static KERNEL_LOG: LogBuffer = LogBuffer::new();
static LOG_SEQ: AtomicU64 = AtomicU64::new(0);

/// Console sink installed by the embedding kernel (UART, VGA, ...).
/// Defaults to buffer-only so the core stays silent on its own.
static CONSOLE: Mutex<Option<fn(&str)>> = Mutex::new(None);

/// Install the console sink. Messages at Warn and above are forwarded.
pub fn set_console(sink: fn(&str)) {
    *CONSOLE.lock() = Some(sink);
}

pub fn log(level: LogLevel, args: core::fmt::Arguments) {
    let msg_str = alloc::format!("{}", args);
    let mut message = [0u8; LOG_MSG_MAX];
    let len = core::cmp::min(msg_str.len(), LOG_MSG_MAX);
    message[..len].copy_from_slice(&msg_str.as_bytes()[..len]);

    let entry = LogEntry {
        seq: LOG_SEQ.fetch_add(1, Ordering::Relaxed),
        level,
        message,
        len,
    };

    KERNEL_LOG.push(entry);

    // Forward ERROR and WARN to the console immediately
    if level <= LogLevel::Warn {
        if let Some(sink) = *CONSOLE.lock() {
            sink(&alloc::format!("[{}] {}\n", level.as_str(), msg_str));
        }
    }
}

/// Drain the kernel log buffer (dmesg-style).
pub fn drain_log() -> alloc::vec::Vec<LogEntry> {
    KERNEL_LOG.drain_all()
}

#[macro_export]
macro_rules! printk {
    ($level:expr, $($arg:tt)*) => {
        $crate::printk::log($level, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::printk!($crate::printk::LogLevel::Error, $($arg)*)
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::printk!($crate::printk::LogLevel::Warn, $($arg)*)
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::printk!($crate::printk::LogLevel::Info, $($arg)*)
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::printk!($crate::printk::LogLevel::Debug, $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test: the log buffer is global and drain_all would race
    // against a sibling test draining it concurrently.
    #[test]
    fn test_log_entries_recorded_and_truncated() {
        crate::info!("printk test message {}", 42);
        let long = "x".repeat(LOG_MSG_MAX * 2);
        crate::printk!(LogLevel::Error, "{}", long);

        let entries = drain_log();
        assert!(entries
            .iter()
            .any(|e| e.level == LogLevel::Info && e.text().contains("printk test message 42")));
        let e = entries.iter().find(|e| e.level == LogLevel::Error).unwrap();
        assert_eq!(e.len, LOG_MSG_MAX);

        // Sequence numbers are unique even under concurrent logging.
        let mut seqs: alloc::vec::Vec<u64> = entries.iter().map(|e| e.seq).collect();
        let total = seqs.len();
        seqs.sort_unstable();
        seqs.dedup();
        assert_eq!(seqs.len(), total);
    }
}
