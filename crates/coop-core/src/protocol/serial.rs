//! Thread-safe serial counter for request numbering.
//!
//! Outgoing `InputEventRequest` and `FsSendFileRequest` messages carry a
//! monotonically increasing `serial` so the matching response/result can be
//! correlated with the request that caused it. The counter is an `AtomicU32`:
//! lock-free, and `Ordering::Relaxed` is sufficient because serials only
//! order messages, they never synchronise memory between threads.

use std::sync::atomic::{AtomicU32, Ordering};

/// A monotonically increasing counter for request serials.
///
/// Serials start at 0 and wrap around at `u32::MAX` without panicking.
///
/// # Examples
///
/// ```rust
/// use coop_core::SerialCounter;
///
/// let counter = SerialCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SerialCounter {
    inner: AtomicU32,
}

impl SerialCounter {
    /// Creates a new counter starting at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next serial and advances the counter.
    pub fn next(&self) -> u32 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the current value without advancing. Diagnostic only; another
    /// thread may advance the counter before the value is used.
    pub fn current(&self) -> u32 {
        self.inner.load(Ordering::Relaxed)
    }
}
