// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compile-time configurable logging for the T.30 engine.
//!
//! Four severity levels, matching T.30's own taxonomy (§7): `Debug` for
//! flow-level tracing of every frame and timer tick, `Info` for phase
//! transitions, `Warning` for protocol violations and discarded frames,
//! `Error` for session-terminal failures.
//!
//! ```ignore
//! use spanfax::logging::{init_logger, ConsoleOutput, LogLevel};
//! use std::sync::Arc;
//!
//! init_logger(Arc::new(ConsoleOutput::new(LogLevel::Debug)), LogLevel::Debug);
//! spanfax::warn!("T2 expired waiting for {}", "DCS");
//! ```
//!
//! When the `logging` feature is disabled, `debug!`/`info!`/`warn!`/`error!`
//! expand to nothing and cost nothing at runtime.

#[cfg(feature = "logging")]
pub mod logger;
#[cfg(feature = "logging")]
mod output;

#[cfg(feature = "logging")]
pub use logger::{flush_logger, init_logger};
#[cfg(feature = "logging")]
pub use output::{ConsoleOutput, FileOutput, LogLevel, Output};

/// Trace-level log message: octet-level detail below `debug!` (every
/// stuffed/unstuffed wire octet, every audio-sample-window boundary).
/// Only compiled in with the `trace` feature.
#[macro_export]
#[cfg(feature = "trace")]
macro_rules! trace {
    ($($arg:tt)*) => {
        let _ = $crate::logging::logger::log_message(
            $crate::logging::LogLevel::Trace,
            &format!($($arg)*),
        );
    };
}

#[cfg(not(feature = "trace"))]
#[macro_export]
macro_rules! trace { ($($arg:tt)*) => {}; }

/// Debug-level log message (per-frame, per-timer-tick flow tracing).
#[macro_export]
#[cfg(feature = "logging")]
macro_rules! debug {
    ($($arg:tt)*) => {
        let _ = $crate::logging::logger::log_message(
            $crate::logging::LogLevel::Debug,
            &format!($($arg)*),
        );
    };
}

/// Info-level log message (phase transitions).
#[macro_export]
#[cfg(feature = "logging")]
macro_rules! info {
    ($($arg:tt)*) => {
        let _ = $crate::logging::logger::log_message(
            $crate::logging::LogLevel::Info,
            &format!($($arg)*),
        );
    };
}

/// Warning-level log message (protocol violations, discarded frames).
#[macro_export]
#[cfg(feature = "logging")]
macro_rules! warn {
    ($($arg:tt)*) => {
        let _ = $crate::logging::logger::log_message(
            $crate::logging::LogLevel::Warning,
            &format!($($arg)*),
        );
    };
}

/// Error-level log message (session-terminal failures).
#[macro_export]
#[cfg(feature = "logging")]
macro_rules! error {
    ($($arg:tt)*) => {
        let _ = $crate::logging::logger::log_message(
            $crate::logging::LogLevel::Error,
            &format!($($arg)*),
        );
    };
}

#[cfg(not(feature = "logging"))]
#[macro_export]
macro_rules! debug { ($($arg:tt)*) => {}; }
#[cfg(not(feature = "logging"))]
#[macro_export]
macro_rules! info { ($($arg:tt)*) => {}; }
#[cfg(not(feature = "logging"))]
#[macro_export]
macro_rules! warn { ($($arg:tt)*) => {}; }
#[cfg(not(feature = "logging"))]
#[macro_export]
macro_rules! error { ($($arg:tt)*) => {}; }
