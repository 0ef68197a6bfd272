//! Deadline-ordered timers and benchmark iteration calibration.
//!
//! # Timers
//!
//! A [`TimerService`](time::TimerService) keeps registrations in a min-heap
//! keyed by deadline and runs a scheduling loop that fires each one when its
//! deadline passes. Callbacks run outside the service lock, so they may
//! register, cancel or reschedule timers themselves. [`Timer`](time::Timer)
//! and [`Ticker`](time::Ticker) deliver fire times through a single-slot
//! [`delivery_channel`](time::delivery_channel) that never blocks the loop.
//!
//! ```
//! use timekeep::time::{TimerService, Timer, VirtualClock};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let clock = Arc::new(VirtualClock::new());
//! let service = TimerService::manual(clock.clone());
//! let timer = Timer::new(&service, Duration::from_millis(10)).unwrap();
//!
//! clock.advance(Duration::from_millis(10));
//! assert_eq!(service.process_timers(), 1);
//! assert!(timer.receiver().try_recv().is_some());
//! ```
//!
//! # Benchmarks
//!
//! [`Calibrator`](bench::Calibrator) grows a workload's iteration count until
//! one round lasts at least the configured bench time, tracking heap
//! allocations through [`CountingAllocator`](bench::CountingAllocator).

pub mod bench;
pub mod config;
pub mod error;
pub mod test_utils;
pub mod time;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::{Time, TimerId};
