//! Atomics shared between threads outside the node graph, and the yield used between restarts.
//!
//! Under the `shuttle` feature these come from shuttle, so every version-word access is a
//! scheduling point the shuttle scheduler can interleave.

#[cfg(not(feature = "shuttle"))]
pub(crate) use std::sync::atomic::{AtomicI64, AtomicU64};
#[cfg(not(feature = "shuttle"))]
pub(crate) use std::thread::yield_now;

#[cfg(feature = "shuttle")]
pub(crate) use shuttle::sync::atomic::{AtomicI64, AtomicU64};
#[cfg(feature = "shuttle")]
pub(crate) use shuttle::thread::yield_now;
