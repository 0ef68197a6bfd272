//! Benchmark iteration calibration.
//!
//! [`Calibrator::run`] drives a workload through rounds of growing iteration
//! counts and returns the final round as a [`BenchmarkResult`]. Inside the
//! workload, the [`Bencher`] exposes the round's count and the timer and
//! allocation controls.
//!
//! ```
//! use timekeep::bench::Calibrator;
//! use timekeep::config::{BenchConfig, BenchTime};
//! use std::hint::black_box;
//!
//! let config = BenchConfig::default().with_bench_time(BenchTime::Iterations(1_000));
//! let result = Calibrator::new(config)
//!     .run(|b| {
//!         for i in 0..b.n() {
//!             black_box(i.wrapping_mul(31));
//!         }
//!     })
//!     .unwrap();
//! assert_eq!(result.n, 1_000);
//! ```

pub mod alloc;
pub mod bencher;
pub mod calibrate;
pub mod result;

pub use alloc::{AllocSnapshot, AllocSource, CountingAllocator, GlobalAllocCounters};
pub use bencher::{Bencher, MetricError};
pub use calibrate::{BenchError, Calibrator, round_up};
pub use result::BenchmarkResult;
