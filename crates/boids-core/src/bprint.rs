//! Context-aware print macros for the boids engine
//!
//! Thread-safe stderr output that automatically tags each line with the
//! worker executing it, so interleaved frames stay readable.
//!
//! # Environment Variables
//!
//! - `BOIDS_LOG_LEVEL=<level>` - 0=off, 1=error, 2=warn, 3=info, 4=debug, 5=trace
//! - `BOIDS_FLUSH_EPRINT=1` - Flush stderr after each print
//! - `BOIDS_LOG_TIME=1` - Include nanosecond timestamp in output
//!
//! # Output Format
//!
//! `[LEVEL] [w<worker>] message` from a worker thread,
//! `[LEVEL] [main] message` from the main thread, `[LEVEL] [-] message`
//! outside any pool context.

use crate::constants::MAIN_WORKER_ID;
use crate::env::env_get_bool;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;

/// Log levels, lowest to most verbose
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static TIME_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize logging from environment variables
///
/// Called automatically on first log, but can be called explicitly for
/// deterministic initialization.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    START_TIME.get_or_init(Instant::now);

    FLUSH_ENABLED.store(env_get_bool("BOIDS_FLUSH_EPRINT", false), Ordering::Relaxed);
    TIME_ENABLED.store(env_get_bool("BOIDS_LOG_TIME", false), Ordering::Relaxed);

    if let Ok(val) = std::env::var("BOIDS_LOG_LEVEL") {
        let level = match val.to_lowercase().as_str() {
            "off" | "0" => LogLevel::Off,
            "error" | "1" => LogLevel::Error,
            "warn" | "2" => LogLevel::Warn,
            "info" | "3" => LogLevel::Info,
            "debug" | "4" => LogLevel::Debug,
            "trace" | "5" => LogLevel::Trace,
            _ => LogLevel::Warn,
        };
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

/// Get current log level
#[inline]
pub fn log_level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Set log level programmatically
pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Check if a log level is enabled
#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level as u8 <= log_level() as u8
}

/// Elapsed nanoseconds since logging init
#[inline]
pub fn elapsed_ns() -> u64 {
    let start = START_TIME.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}

// Thread-local worker context (set by the pool, MAIN_WORKER_ID for the
// main thread while it participates in wait_for_completion)
thread_local! {
    static WORKER_CONTEXT: std::cell::Cell<Option<u32>> = const { std::cell::Cell::new(None) };
}

/// Install the worker id for this thread (called by the runtime)
pub fn set_worker_context(id: u32) {
    WORKER_CONTEXT.with(|w| w.set(Some(id)));
}

/// Remove the worker id for this thread (called on worker exit)
pub fn clear_worker_context() {
    WORKER_CONTEXT.with(|w| w.set(None));
}

/// Current worker id, if this thread belongs to a pool
#[inline]
pub fn worker_context() -> Option<u32> {
    WORKER_CONTEXT.with(|w| w.get())
}

fn write_context(handle: &mut impl Write) {
    match worker_context() {
        Some(MAIN_WORKER_ID) => {
            let _ = write!(handle, "[main] ");
        }
        Some(id) => {
            let _ = write!(handle, "[w{}] ", id);
        }
        None => {
            let _ = write!(handle, "[-] ");
        }
    }
}

/// Internal: Write and optionally flush (no level, no context)
#[doc(hidden)]
pub fn _bprint_impl(args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(args);
    if FLUSH_ENABLED.load(Ordering::Relaxed) {
        let _ = handle.flush();
    }
}

/// Internal: Write with newline and optionally flush (no level, no context)
#[doc(hidden)]
pub fn _bprintln_impl(args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if FLUSH_ENABLED.load(Ordering::Relaxed) {
        let _ = handle.flush();
    }
}

/// Internal: Leveled print with worker context
#[doc(hidden)]
pub fn _blog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }

    let stderr = std::io::stderr();
    let mut handle = stderr.lock();

    let _ = write!(handle, "{} ", level.prefix());

    if TIME_ENABLED.load(Ordering::Relaxed) {
        let _ = write!(handle, "[{}] ", elapsed_ns());
    }

    write_context(&mut handle);

    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");

    if FLUSH_ENABLED.load(Ordering::Relaxed) {
        let _ = handle.flush();
    }
}

/// Print to stderr (no newline, no context)
#[macro_export]
macro_rules! bprint {
    ($($arg:tt)*) => {{
        $crate::bprint::_bprint_impl(format_args!($($arg)*));
    }};
}

/// Print to stderr with newline (no context)
#[macro_export]
macro_rules! bprintln {
    () => {{
        $crate::bprint::_bprintln_impl(format_args!(""));
    }};
    ($($arg:tt)*) => {{
        $crate::bprint::_bprintln_impl(format_args!($($arg)*));
    }};
}

/// Error level log with worker context
#[macro_export]
macro_rules! berror {
    ($($arg:tt)*) => {{
        $crate::bprint::_blog_impl(
            $crate::bprint::LogLevel::Error,
            format_args!($($arg)*)
        );
    }};
}

/// Warning level log with worker context
#[macro_export]
macro_rules! bwarn {
    ($($arg:tt)*) => {{
        $crate::bprint::_blog_impl(
            $crate::bprint::LogLevel::Warn,
            format_args!($($arg)*)
        );
    }};
}

/// Info level log with worker context
#[macro_export]
macro_rules! binfo {
    ($($arg:tt)*) => {{
        $crate::bprint::_blog_impl(
            $crate::bprint::LogLevel::Info,
            format_args!($($arg)*)
        );
    }};
}

/// Debug level log with worker context
#[macro_export]
macro_rules! bdebug {
    ($($arg:tt)*) => {{
        $crate::bprint::_blog_impl(
            $crate::bprint::LogLevel::Debug,
            format_args!($($arg)*)
        );
    }};
}

/// Trace level log with worker context
#[macro_export]
macro_rules! btrace {
    ($($arg:tt)*) => {{
        $crate::bprint::_blog_impl(
            $crate::bprint::LogLevel::Trace,
            format_args!($($arg)*)
        );
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_order() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn test_level_from_u8() {
        assert_eq!(LogLevel::from_u8(0), LogLevel::Off);
        assert_eq!(LogLevel::from_u8(3), LogLevel::Info);
        assert_eq!(LogLevel::from_u8(200), LogLevel::Trace);
    }

    #[test]
    fn test_worker_context() {
        assert_eq!(worker_context(), None);

        set_worker_context(7);
        assert_eq!(worker_context(), Some(7));

        clear_worker_context();
        assert_eq!(worker_context(), None);
    }

    #[test]
    fn test_macros_compile() {
        set_log_level(LogLevel::Off);

        bprint!("x");
        bprintln!("x {}", 1);
        berror!("e");
        bwarn!("w");
        binfo!("i");
        bdebug!("d");
        btrace!("t");
    }
}
