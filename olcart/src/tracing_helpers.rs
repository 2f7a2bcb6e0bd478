//! Logging macros that forward to `tracing` when the `tracing` feature is on, and expand to
//! nothing otherwise.
//!
//! ```bash
//! RUST_LOG=olcart=trace cargo test --features tracing concurrent
//! ```

#![allow(unused_macros, unused_imports)]

/// Per-restart and per-structural-change events.
#[cfg(feature = "tracing")]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

/// Tree-level events that are rare enough to read at debug level.
#[cfg(feature = "tracing")]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

pub(crate) use debug_log;
pub(crate) use trace_log;
