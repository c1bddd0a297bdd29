// Kernel logging (printk) with ring buffer

use crate::ringbuf::RingBuffer;
use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};
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

/// Log output format (human-readable or JSON for automation)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogFormat {
    Human = 0,
    Json = 1,
}

static LOG_FORMAT: AtomicU8 = AtomicU8::new(LogFormat::Human as u8);

pub fn set_log_format(format: LogFormat) {
    LOG_FORMAT.store(format as u8, Ordering::Relaxed);
}

pub fn get_log_format() -> LogFormat {
    match LOG_FORMAT.load(Ordering::Relaxed) {
        1 => LogFormat::Json,
        _ => LogFormat::Human,
    }
}

pub const MAX_LOG_MESSAGE: usize = 256;

#[derive(Copy, Clone)]
pub struct LogEntry {
    pub timestamp_ms: u64,
    pub level: LogLevel,
    pub message: [u8; MAX_LOG_MESSAGE],
    pub len: usize,
}

impl LogEntry {
    pub fn text(&self) -> &str {
        core::str::from_utf8(&self.message[..self.len]).unwrap_or("")
    }
}

struct LogBuffer {
    buffer: Mutex<RingBuffer<LogEntry, 1024>>,
}

impl LogBuffer {
    const fn new() -> Self {
        Self {
            buffer: Mutex::new(RingBuffer::new()),
        }
    }

    fn push(&self, entry: LogEntry) {
        self.buffer.lock().push(entry);
    }

    fn drain_all(&self) -> alloc::vec::Vec<LogEntry> {
        self.buffer.lock().drain_all()
    }
}

static KERNEL_LOG: LogBuffer = LogBuffer::new();

/// Console sink installed by the serial/console driver at boot. Tests may
/// install a capture sink. The sink must not call back into the log.
static CONSOLE_SINK: Mutex<Option<fn(&str)>> = Mutex::new(None);

pub fn set_console_sink(sink: Option<fn(&str)>) {
    *CONSOLE_SINK.lock() = sink;
}

fn console_write(s: &str) {
    if let Some(sink) = *CONSOLE_SINK.lock() {
        sink(s);
    }
}

pub fn log(level: LogLevel, args: fmt::Arguments) {
    let msg = alloc::format!("{}", args);
    let mut message = [0u8; MAX_LOG_MESSAGE];
    let len = core::cmp::min(msg.len(), MAX_LOG_MESSAGE);
    message[..len].copy_from_slice(&msg.as_bytes()[..len]);

    let entry = LogEntry {
        timestamp_ms: crate::time::now_ms(),
        level,
        message,
        len,
    };
    KERNEL_LOG.push(entry);

    // Errors and warnings also go to the console immediately
    if level <= LogLevel::Warn {
        console_write(&alloc::format!("[{}] {}\n", level.as_str(), msg));
    }
}

/// Structured event logging for automated testing and observability.
pub fn log_structured(subsystem: &str, status: &str, level: LogLevel) {
    let line = match get_log_format() {
        LogFormat::Json => alloc::format!(
            "{{\"ts\":{},\"subsystem\":\"{}\",\"status\":\"{}\",\"level\":\"{}\"}}\n",
            crate::time::now_ms(),
            subsystem,
            status,
            level.as_str()
        ),
        LogFormat::Human => alloc::format!("{}: {}\n", subsystem, status),
    };
    console_write(&line);

    log(level, format_args!("{}: {}", subsystem, status));
}

/// Drain all buffered entries (dmesg).
pub fn drain() -> alloc::vec::Vec<LogEntry> {
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

#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::printk!($crate::printk::LogLevel::Debug, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_event {
    ($subsystem:expr, $status:expr) => {
        $crate::printk::log_structured(
            $subsystem,
            $status,
            $crate::printk::LogLevel::Info,
        )
    };
    ($subsystem:expr, $status:expr, $level:expr) => {
        $crate::printk::log_structured($subsystem, $status, $level)
    };
}
