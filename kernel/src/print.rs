use crate::spinlock::SpinLock;

/// The console output writer.
///
/// An implementation detail of the `print!` family of macros; use those
/// instead of this struct.
pub struct Printer;

impl core::fmt::Write for Printer {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        console_write(bytes);
        KLOG.lock().write(bytes);
        Ok(())
    }
}

#[cfg(not(target_os = "none"))]
fn console_write(bytes: &[u8]) {
    use std::io::Write;

    std::io::stdout().write_all(bytes).ok();
}

/// Bare-metal builds have no console of their own; the boot environment
/// reads the log buffer instead.
#[cfg(target_os = "none")]
fn console_write(_bytes: &[u8]) {}

/// Prints a string without a newline.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {{
        #![allow(unused_imports)]
        use core::fmt::Write;
        write!($crate::print::Printer, $($arg)*).ok();
    }};
}

/// Prints a string and a newline.
#[macro_export]
macro_rules! println {
    () => {{
        $crate::print!("\n");
    }};
    ($fmt:expr) => {{
        $crate::print!(concat!($fmt, "\n"));
    }};
    ($fmt:expr, $($arg:tt)*) => {{
        $crate::print!(concat!($fmt, "\n"), $($arg)*);
    }};
}

#[derive(Clone, Copy, PartialEq, Eq, Ord, PartialOrd)]
#[allow(dead_code)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)+) => {{
        use $crate::print::LogLevel;

        const RESET_COLOR: &str = "\x1b[0m";

        if cfg!(debug_assertions) || $level <= LogLevel::Info {
            let (color, level_str) = match $level {
                LogLevel::Error => ("\x1b[91m", "ERR"),
                LogLevel::Warn =>  ("\x1b[33m", "WARN"),
                LogLevel::Info =>  ("\x1b[96m", "INFO"),
                LogLevel::Debug => ("\x1b[0m", "DEBUG"),
                LogLevel::Trace => ("\x1b[0m", "TRACE"),
            };

            $crate::println!(
                "[kernel      ] {}{:6}{} {}",
                color,
                level_str,
                RESET_COLOR,
                format_args!($($arg)+)
            );
        }
    }};
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => { $crate::log!($crate::print::LogLevel::Error, $($arg)+) };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => { $crate::log!($crate::print::LogLevel::Warn, $($arg)+) };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => { $crate::log!($crate::print::LogLevel::Info, $($arg)+) };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => { $crate::log!($crate::print::LogLevel::Debug, $($arg)+) };
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => { $crate::log!($crate::print::LogLevel::Trace, $($arg)+) };
}

/// A warning that only matters while debugging the kernel itself.
#[macro_export]
macro_rules! debug_warn {
    ($($arg:tt)+) => {
        if cfg!(debug_assertions) {
            $crate::log!($crate::print::LogLevel::Warn, $($arg)+);
        }
    };
}

const KLOG_SIZE: usize = 8 * 1024;

/// An overwriting byte ring keeping the most recent console output for
/// post-mortem inspection.
struct KlogBuffer {
    buf: [u8; KLOG_SIZE],
    /// Total bytes ever written. `head % KLOG_SIZE` is the next slot.
    head: usize,
}

impl KlogBuffer {
    const fn new() -> KlogBuffer {
        KlogBuffer {
            buf: [0; KLOG_SIZE],
            head: 0,
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.buf[self.head % KLOG_SIZE] = byte;
            self.head = self.head.wrapping_add(1);
        }
    }

    /// Copies the newest bytes into `out`, oldest first. Returns how many
    /// bytes were copied.
    fn read_tail(&self, out: &mut [u8]) -> usize {
        let avail = self.head.min(KLOG_SIZE);
        let len = out.len().min(avail);
        let start = self.head - len;
        for (i, slot) in out[..len].iter_mut().enumerate() {
            *slot = self.buf[(start + i) % KLOG_SIZE];
        }
        len
    }
}

static KLOG: SpinLock<KlogBuffer> = SpinLock::new(KlogBuffer::new());

/// Reads the tail of the in-kernel log into `out`.
pub fn klog_read_tail(out: &mut [u8]) -> usize {
    KLOG.lock().read_tail(out)
}
