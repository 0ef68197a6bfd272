//! Time sources.
//!
//! The timer service and the benchmark calibrator read time through the
//! [`TimeSource`] trait so production code runs on the wall clock while tests
//! drive a [`VirtualClock`] by hand.

use crate::types::{Time, duration_to_nanos_saturating};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Time source abstraction for getting the current time.
pub trait TimeSource: Send + Sync + std::fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> Time;
}

/// Monotonic wall clock.
///
/// Uses `std::time::Instant` internally; the epoch is the moment the clock
/// was created.
#[derive(Debug)]
pub struct WallClock {
    epoch: Instant,
}

impl WallClock {
    /// Creates a new wall clock time source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Time {
        Time::from_nanos(duration_to_nanos_saturating(self.epoch.elapsed()))
    }
}

/// Virtual time source for deterministic tests.
///
/// Time only advances when told to.
///
/// # Example
///
/// ```
/// use timekeep::time::{TimeSource, VirtualClock};
/// use timekeep::types::Time;
/// use std::time::Duration;
///
/// let clock = VirtualClock::new();
/// assert_eq!(clock.now(), Time::ZERO);
///
/// clock.advance(Duration::from_secs(1));
/// assert_eq!(clock.now(), Time::from_secs(1));
/// ```
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: AtomicU64,
}

impl VirtualClock {
    /// Creates a new virtual clock starting at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a virtual clock starting at the given time.
    #[must_use]
    pub fn starting_at(time: Time) -> Self {
        Self {
            now: AtomicU64::new(time.as_nanos()),
        }
    }

    /// Advances time by `by`.
    pub fn advance(&self, by: Duration) {
        let nanos = duration_to_nanos_saturating(by);
        let mut current = self.now.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(nanos);
            match self
                .now
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Advances time to the given absolute time.
    ///
    /// If the target time is in the past this is a no-op.
    pub fn advance_to(&self, time: Time) {
        self.now.fetch_max(time.as_nanos(), Ordering::AcqRel);
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Time {
        Time::from_nanos(self.now.load(Ordering::Acquire))
    }
}
