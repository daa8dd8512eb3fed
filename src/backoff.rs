//! Atomic primitives and exponential backoff for contention management.
//!
//! This module provides the spin-wait building blocks shared by every lock
//! and lock-free structure in the crate: a CPU pause hint, a scheduler yield,
//! and an exponential-backoff sleep with jitter.
//!
//! # Example
//!
//! ```
//! use lockkit::backoff::Backoff;
//!
//! let mut backoff = Backoff::new();
//!
//! loop {
//!     if try_acquire_lock() {
//!         break;
//!     }
//!     backoff.spin();
//! }
//! # fn try_acquire_lock() -> bool { true }
//! ```

use rand::Rng;
use std::thread;
use std::time::Duration;

/// Initial backoff sleep, in nanoseconds.
const MIN_BACKOFF_NS: u64 = 1_000;

/// Maximum backoff sleep, in nanoseconds.
const MAX_BACKOFF_NS: u64 = 64_000;

/// CPU pause hint for spin loops.
///
/// Emits the platform's spin-pause instruction where available; on
/// architectures lacking one this degrades to a no-op compiler hint.
#[inline(always)]
pub fn pause_spin() {
    core::hint::spin_loop();
}

/// Surrender the remainder of this thread's timeslice to another runnable
/// thread. A hint to the scheduler, not a synchronization point.
#[inline(always)]
pub fn sched_yield() {
    thread::yield_now();
}

/// Sleep `current_ns + uniform_random(0, MIN_BACKOFF_NS)` nanoseconds and
/// return the next backoff value, doubled and capped at `MAX_BACKOFF_NS`.
pub fn backoff_sleep(current_ns: u64) -> u64 {
    let jitter = rand::thread_rng().gen_range(0..MIN_BACKOFF_NS);
    thread::sleep(Duration::from_nanos(current_ns + jitter));
    current_ns.saturating_mul(2).min(MAX_BACKOFF_NS)
}

/// Exponential backoff state for spin loops.
///
/// `spin()` pauses for an increasing number of iterations (doubling each
/// call) until a ceiling is reached; callers that need an actual sleep
/// instead of a spin should use [`backoff_sleep`] directly, as the three
/// busy-wait locks in [`crate::spinlock`] do after their spin budget is
/// exhausted.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: u32,
    ceiling: u32,
}

/// Default spin-count ceiling before a caller should fall back to sleeping.
const DEFAULT_CEILING: u32 = 128;

/// Hard cap on the spin-count ceiling.
const MAX_CEILING: u32 = 65_536;

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    /// Create a new backoff state with default parameters.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current: 1,
            ceiling: DEFAULT_CEILING,
        }
    }

    /// Create a new backoff state with a custom ceiling.
    #[inline]
    #[must_use]
    pub const fn with_ceiling(ceiling: u32) -> Self {
        Self {
            current: 1,
            ceiling: if ceiling > MAX_CEILING {
                MAX_CEILING
            } else {
                ceiling
            },
        }
    }

    /// Reset the backoff state.
    #[inline]
    pub fn reset(&mut self) {
        self.current = 1;
    }

    /// Spin for an increasing number of iterations, doubling each call
    /// until the ceiling is reached.
    #[inline]
    pub fn spin(&mut self) {
        for _ in 0..self.current {
            pause_spin();
        }

        if self.current < self.ceiling {
            self.current = self.current.saturating_mul(2);
        }
    }

    /// Check if we've reached the maximum backoff.
    #[inline]
    #[must_use]
    pub fn is_maxed(&self) -> bool {
        self.current >= self.ceiling
    }

    /// Get the current backoff value.
    #[inline]
    #[must_use]
    pub fn current(&self) -> u32 {
        self.current
    }
}
