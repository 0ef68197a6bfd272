//! Iteration-count calibration.
//!
//! The calibrator runs a workload with growing iteration counts until one
//! round lasts at least the configured bench time. Each round's count is
//! predicted from the previous round's rate, padded by a fifth, clamped to
//! at most a hundredfold growth, and rounded up to a readable number
//! (`1, 2, 3, 5, 10` times a power of ten).
//!
//! ```text
//! Idle -> Probing (n = 1) -> Growing ... -> Done
//! ```
//!
//! A round in which the workload calls [`Bencher::fail`] ends calibration.

use super::alloc::{AllocSource, GlobalAllocCounters};
use super::bencher::Bencher;
use super::result::BenchmarkResult;
use crate::config::{BenchConfig, BenchTime, ConfigError};
use crate::time::{TimeSource, WallClock};
use crate::types::duration_to_nanos_saturating;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Multipliers of a power of ten that round counts are rounded up to.
pub const ROUND_UP_STEPS: [u64; 5] = [1, 2, 3, 5, 10];

/// The predicted count is padded by `1 / GROWTH_HEADROOM_DIVISOR`.
pub const GROWTH_HEADROOM_DIVISOR: u64 = 5;

/// A round runs at most this many times the previous round's count.
pub const MAX_GROWTH_FACTOR: u64 = 100;

/// Errors from [`Calibrator::run`].
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    /// The workload reported failure.
    ///
    /// Carries the last round that completed before the failing one, if any.
    #[error("benchmark failed")]
    Failed {
        /// Result of the last successful round.
        last_completed: Option<Box<BenchmarkResult>>,
    },
    /// The configuration cannot be run.
    #[error("invalid benchmark configuration: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Probing,
    Growing,
    Done,
}

/// Finds an iteration count whose round lasts at least the bench time.
#[derive(Debug)]
pub struct Calibrator {
    config: BenchConfig,
    clock: Arc<dyn TimeSource>,
    allocs: Arc<dyn AllocSource>,
}

impl Calibrator {
    /// Creates a calibrator timed by the wall clock and counting allocations
    /// through [`CountingAllocator`](super::CountingAllocator).
    #[must_use]
    pub fn new(config: BenchConfig) -> Self {
        Self::with_sources(
            config,
            Arc::new(WallClock::new()),
            Arc::new(GlobalAllocCounters),
        )
    }

    /// Creates a calibrator with explicit time and allocation sources.
    #[must_use]
    pub fn with_sources(
        config: BenchConfig,
        clock: Arc<dyn TimeSource>,
        allocs: Arc<dyn AllocSource>,
    ) -> Self {
        Self {
            config,
            clock,
            allocs,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Calibrates and runs `workload`, returning the final round's result.
    ///
    /// `workload` is called once per round and must run its body
    /// [`Bencher::n`] times.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Config`] for an unusable configuration and
    /// [`BenchError::Failed`] if the workload called [`Bencher::fail`].
    pub fn run<F>(&self, mut workload: F) -> Result<BenchmarkResult, BenchError>
    where
        F: FnMut(&mut Bencher),
    {
        self.config.validate()?;
        let max = self.config.max_iterations;
        let mut bencher = Bencher::new(
            Arc::clone(&self.clock),
            Arc::clone(&self.allocs),
            self.config.report_allocs,
        );
        let mut last_completed: Option<BenchmarkResult> = None;
        let mut phase = Phase::Idle;

        loop {
            let n = match (phase, self.config.bench_time) {
                (Phase::Idle, BenchTime::Iterations(fixed)) => {
                    phase = Phase::Done;
                    fixed
                }
                (Phase::Idle, BenchTime::Duration(_)) => {
                    phase = Phase::Probing;
                    1
                }
                (Phase::Probing | Phase::Growing, BenchTime::Duration(target)) => {
                    let (prev_n, prev_elapsed) = bencher.previous();
                    if prev_elapsed >= target || prev_n >= max {
                        phase = Phase::Done;
                        continue;
                    }
                    phase = Phase::Growing;
                    next_round(target, prev_n, prev_elapsed, max)
                }
                (Phase::Done, _) | (Phase::Probing | Phase::Growing, BenchTime::Iterations(_)) => {
                    break;
                }
            };

            bencher.run_round(n, &mut workload);
            debug!(
                n,
                elapsed_ns = duration_to_nanos_saturating(bencher.elapsed()),
                "calibration round"
            );
            if bencher.failed() {
                warn!(n, "benchmark failed");
                return Err(BenchError::Failed {
                    last_completed: last_completed.map(Box::new),
                });
            }
            last_completed = Some(bencher.result());
        }

        // At least one round always runs before Done.
        last_completed.ok_or(BenchError::Failed {
            last_completed: None,
        })
    }
}

/// Predicts the next round's iteration count.
fn next_round(target: Duration, prev_n: u64, prev_elapsed: Duration, max: u64) -> u64 {
    let last = prev_n.max(1);
    let target_ns = target.as_nanos();
    let prev_ns = prev_elapsed.as_nanos().max(1);
    let predicted = u64::try_from(target_ns * u128::from(last) / prev_ns).unwrap_or(u64::MAX);

    let padded = predicted.saturating_add(predicted / GROWTH_HEADROOM_DIVISOR);
    let clamped = padded
        .min(last.saturating_mul(MAX_GROWTH_FACTOR))
        .max(last.saturating_add(1));
    round_up(clamped).min(max)
}

/// Rounds `n` up to the next `{1, 2, 3, 5, 10} x 10^k`.
#[must_use]
pub fn round_up(n: u64) -> u64 {
    let n = n.max(1);
    let mut base = 1u64;
    while let Some(next) = base.checked_mul(10) {
        if next > n {
            break;
        }
        base = next;
    }
    ROUND_UP_STEPS
        .iter()
        .map(|step| base.saturating_mul(*step))
        .find(|candidate| *candidate >= n)
        .unwrap_or(u64::MAX)
}
