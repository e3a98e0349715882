//! Free-running tick counter.
//!
//! Ticks are milliseconds held in a `u32` that wraps silently, the same way
//! a scheduler tick counter does.  Every interval must therefore be computed
//! with [`elapsed_ms`] rather than a plain subtraction.

use std::time::Instant;

/// Source of the current tick count.
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary origin, wrapping at `u32::MAX`.
    fn now_ms(&self) -> u32;
}

/// Wraparound-safe `now - then`.
pub fn elapsed_ms(now: u32, then: u32) -> u32 {
    now.wrapping_sub(then)
}

/// Clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
    offset: u32,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// A clock whose first reading is `offset`.  Useful to start close to
    /// the wrap point.
    pub fn starting_at(offset: u32) -> Self {
        Self {
            origin: Instant::now(),
            offset,
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u32 {
        // Truncation is the wrap of the free-running counter.
        let ticks = self.origin.elapsed().as_millis() as u32;
        self.offset.wrapping_add(ticks)
    }
}
