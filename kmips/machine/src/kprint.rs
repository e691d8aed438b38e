//! Kernel print utilities.
//!
//! Messages go to the host's standard error, one line per call. `info!` and
//! `warning!` are silenced by [`QUIET`](crate::QUIET); `debug!` prints only
//! when its flag character is enabled through [`set_debug_flags`].

use core::sync::atomic::{AtomicU32, Ordering};
use std::io::Write;

static DEBUG_FLAGS: AtomicU32 = AtomicU32::new(0);
const ALL_FLAGS: u32 = 1 << 26;

#[doc(hidden)]
pub fn _print(fmt: core::fmt::Arguments<'_>) {
    let mut sink = std::io::stderr().lock();
    let _ = sink.write_fmt(fmt);
}

/// Enables the debug flags named by the characters of `flags`.
///
/// Each lowercase letter enables one subsystem; `+` enables all of them.
/// Calling this again replaces the previous set.
pub fn set_debug_flags(flags: &str) {
    let mask = flags.chars().fold(0, |mask, c| match c {
        '+' => mask | ALL_FLAGS,
        'a'..='z' => mask | 1 << (c as u32 - 'a' as u32),
        _ => mask,
    });
    DEBUG_FLAGS.store(mask, Ordering::SeqCst);
}

/// Returns true if messages tagged with `flag` should be printed.
pub fn debug_enabled(flag: char) -> bool {
    let mask = DEBUG_FLAGS.load(Ordering::Relaxed);
    if mask & ALL_FLAGS != 0 {
        return true;
    }
    match flag {
        'a'..='z' => mask & 1 << (flag as u32 - 'a' as u32) != 0,
        _ => false,
    }
}

/// Prints out the message.
///
/// Use the format! syntax to write data to the standard error.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint::_print(format_args!($($arg)*)));
}

/// Prints out the message with a newline.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Display an information message.
#[macro_export]
macro_rules! info {
    () => (if !$crate::QUIET.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[INFO]\n") });
    ($($arg:tt)*) => (if !$crate::QUIET.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[INFO] {}\n", format_args!($($arg)*)) });
}

/// Display a warning message.
#[macro_export]
macro_rules! warning {
    () => (if !$crate::QUIET.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[WARN]\n") });
    ($($arg:tt)*) => (if !$crate::QUIET.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[WARN] {}\n", format_args!($($arg)*)) });
}

/// Display a debug message tagged with a single-character flag.
///
/// ```
/// machine::debug!('a', "loading {} pages", 12);
/// ```
#[macro_export]
macro_rules! debug {
    ($flag:literal, $($arg:tt)*) => (if $crate::kprint::debug_enabled($flag) { $crate::print!("[DEBUG] {}\n", format_args!($($arg)*)) });
}
