//! Per-benchmark timing and allocation state.
//!
//! A [`Bencher`] is handed to the workload on every calibration round. The
//! workload runs its body [`n`](Bencher::n) times and may bracket parts of a
//! round with [`stop_timer`](Bencher::stop_timer) /
//! [`start_timer`](Bencher::start_timer) to exclude setup; every bracketed
//! interval adds to the round's elapsed time and allocation deltas.
//!
//! The timer is already running when the workload is called.

use super::alloc::{AllocSnapshot, AllocSource};
use super::result::BenchmarkResult;
use crate::time::TimeSource;
use crate::types::Time;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Errors from [`Bencher::report_metric`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetricError {
    /// Units must be non-empty and contain no whitespace.
    #[error("invalid metric unit {0:?}")]
    InvalidUnit(String),
}

/// Timing and allocation controls for one benchmark.
#[derive(Debug)]
pub struct Bencher {
    n: u64,
    previous_n: u64,
    previous_duration: Duration,

    clock: Arc<dyn TimeSource>,
    allocs: Arc<dyn AllocSource>,

    timer_running: bool,
    start: Time,
    start_allocs: AllocSnapshot,
    elapsed: Duration,
    net_allocs: u64,
    net_bytes: u64,

    bytes_per_op: u64,
    report_allocs: bool,
    failed: bool,
    extra: BTreeMap<String, f64>,
}

impl Bencher {
    pub(crate) fn new(
        clock: Arc<dyn TimeSource>,
        allocs: Arc<dyn AllocSource>,
        report_allocs: bool,
    ) -> Self {
        Self {
            n: 0,
            previous_n: 0,
            previous_duration: Duration::ZERO,
            start: clock.now(),
            start_allocs: allocs.snapshot(),
            clock,
            allocs,
            timer_running: false,
            elapsed: Duration::ZERO,
            net_allocs: 0,
            net_bytes: 0,
            bytes_per_op: 0,
            report_allocs,
            failed: false,
            extra: BTreeMap::new(),
        }
    }

    /// Iterations the workload must run this round.
    #[must_use]
    pub fn n(&self) -> u64 {
        self.n
    }

    /// Measured time so far in this round, including an open interval.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        if self.timer_running {
            self.elapsed + (self.clock.now() - self.start)
        } else {
            self.elapsed
        }
    }

    /// Starts timing. No-op if the timer is already running.
    ///
    /// Allocation counters are captured here whether or not allocations end
    /// up in the report.
    pub fn start_timer(&mut self) {
        if self.timer_running {
            return;
        }
        self.start_allocs = self.allocs.snapshot();
        self.start = self.clock.now();
        self.timer_running = true;
    }

    /// Stops timing and adds the interval's time and allocations to the
    /// round totals. No-op if the timer is not running.
    pub fn stop_timer(&mut self) {
        if !self.timer_running {
            return;
        }
        self.elapsed += self.clock.now() - self.start;
        let now = self.allocs.snapshot();
        self.net_allocs += now.allocs_since(&self.start_allocs);
        self.net_bytes += now.bytes_since(&self.start_allocs);
        self.timer_running = false;
    }

    /// Zeroes elapsed time and allocation totals.
    ///
    /// A running timer keeps running from a fresh baseline.
    pub fn reset_timer(&mut self) {
        if self.timer_running {
            self.start_allocs = self.allocs.snapshot();
            self.start = self.clock.now();
        }
        self.elapsed = Duration::ZERO;
        self.net_allocs = 0;
        self.net_bytes = 0;
    }

    /// Declares the bytes processed per iteration, enabling a throughput
    /// figure. Zero disables it.
    pub fn set_bytes(&mut self, bytes_per_op: u64) {
        self.bytes_per_op = bytes_per_op;
    }

    /// Reports allocation figures for this benchmark regardless of the global
    /// default.
    pub fn report_allocs(&mut self) {
        self.report_allocs = true;
    }

    /// Marks the benchmark as failed. Calibration stops after this round.
    pub fn fail(&mut self) {
        self.failed = true;
    }

    /// Returns true if the workload called [`fail`](Self::fail).
    #[must_use]
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Records a custom metric for this round, replacing any earlier value
    /// with the same unit.
    ///
    /// # Errors
    ///
    /// Returns [`MetricError::InvalidUnit`] if `unit` is empty or contains
    /// whitespace.
    pub fn report_metric(&mut self, value: f64, unit: &str) -> Result<(), MetricError> {
        if unit.is_empty() || unit.chars().any(char::is_whitespace) {
            return Err(MetricError::InvalidUnit(unit.to_string()));
        }
        self.extra.insert(unit.to_string(), value);
        Ok(())
    }

    pub(crate) fn previous(&self) -> (u64, Duration) {
        (self.previous_n, self.previous_duration)
    }

    /// Runs one calibration round of `n` iterations.
    pub(crate) fn run_round<F>(&mut self, n: u64, workload: &mut F)
    where
        F: FnMut(&mut Self),
    {
        self.n = n;
        self.extra.clear();
        self.reset_timer();
        self.start_timer();
        workload(self);
        self.stop_timer();
        self.previous_n = n;
        self.previous_duration = self.elapsed;
    }

    pub(crate) fn result(&self) -> BenchmarkResult {
        BenchmarkResult {
            n: self.n,
            elapsed: self.elapsed,
            bytes_per_op: self.bytes_per_op,
            mem_allocs: self.net_allocs,
            mem_bytes: self.net_bytes,
            report_allocs: self.report_allocs,
            extra: self.extra.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use crate::time::VirtualClock;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    /// Allocation counters the test bumps by hand.
    #[derive(Debug, Default)]
    pub(crate) struct FakeAllocs {
        allocs: AtomicU64,
        bytes: AtomicU64,
    }

    impl FakeAllocs {
        pub(crate) fn allocate(&self, count: u64, bytes: u64) {
            self.allocs.fetch_add(count, Ordering::SeqCst);
            self.bytes.fetch_add(bytes, Ordering::SeqCst);
        }
    }

    impl AllocSource for FakeAllocs {
        fn snapshot(&self) -> AllocSnapshot {
            AllocSnapshot {
                allocs: self.allocs.load(Ordering::SeqCst),
                bytes: self.bytes.load(Ordering::SeqCst),
            }
        }
    }

    fn bencher() -> (Arc<VirtualClock>, Arc<FakeAllocs>, Bencher) {
        let clock = Arc::new(VirtualClock::new());
        let allocs = Arc::new(FakeAllocs::default());
        let b = Bencher::new(clock.clone(), allocs.clone(), false);
        (clock, allocs, b)
    }

    #[test]
    fn start_stop_intervals_accumulate() {
        init_test("start_stop_intervals_accumulate");
        let (clock, allocs, mut b) = bencher();
        b.start_timer();
        clock.advance(Duration::from_millis(100));
        allocs.allocate(1, 8);
        b.stop_timer();

        // Excluded from measurement.
        clock.advance(Duration::from_secs(1));
        allocs.allocate(100, 800);

        b.start_timer();
        clock.advance(Duration::from_millis(100));
        allocs.allocate(2, 16);
        b.stop_timer();

        crate::assert_with_log!(
            b.elapsed() == Duration::from_millis(200),
            "two intervals add",
            Duration::from_millis(200),
            b.elapsed()
        );
        let r = b.result();
        crate::assert_with_log!(r.mem_allocs == 3, "allocs add", 3u64, r.mem_allocs);
        crate::assert_with_log!(r.mem_bytes == 24, "bytes add", 24u64, r.mem_bytes);
        crate::test_complete!("start_stop_intervals_accumulate");
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        init_test("start_and_stop_are_idempotent");
        let (clock, _allocs, mut b) = bencher();
        b.stop_timer();
        b.start_timer();
        clock.advance(Duration::from_millis(10));
        b.start_timer(); // must not move the start point
        clock.advance(Duration::from_millis(10));
        b.stop_timer();
        b.stop_timer();
        crate::assert_with_log!(
            b.elapsed() == Duration::from_millis(20),
            "single interval",
            Duration::from_millis(20),
            b.elapsed()
        );
        crate::test_complete!("start_and_stop_are_idempotent");
    }

    #[test]
    fn reset_while_running_is_seamless() {
        init_test("reset_while_running_is_seamless");
        let (clock, allocs, mut b) = bencher();
        b.start_timer();
        clock.advance(Duration::from_millis(100));
        allocs.allocate(5, 500);

        b.reset_timer();
        crate::assert_with_log!(
            b.elapsed() == Duration::ZERO,
            "zeroed while running",
            Duration::ZERO,
            b.elapsed()
        );
        crate::assert_with_log!(
            b.result().mem_allocs == 0,
            "allocs zeroed",
            0u64,
            b.result().mem_allocs,
        );

        clock.advance(Duration::from_millis(50));
        allocs.allocate(1, 10);
        b.stop_timer();
        let r = b.result();
        crate::assert_with_log!(
            r.elapsed == Duration::from_millis(50),
            "timing continued from reset",
            Duration::from_millis(50),
            r.elapsed
        );
        crate::assert_with_log!(r.mem_allocs == 1, "allocs after reset", 1u64, r.mem_allocs);
        crate::assert_with_log!(r.mem_bytes == 10, "bytes after reset", 10u64, r.mem_bytes);
        crate::test_complete!("reset_while_running_is_seamless");
    }

    #[test]
    fn allocations_counted_without_reporting() {
        init_test("allocations_counted_without_reporting");
        let (_clock, allocs, mut b) = bencher();
        b.start_timer();
        allocs.allocate(4, 64);
        b.stop_timer();
        let r = b.result();
        crate::assert_with_log!(!r.report_allocs, "not reported", false, r.report_allocs);
        crate::assert_with_log!(r.mem_allocs == 4, "still counted", 4u64, r.mem_allocs);
        b.report_allocs();
        crate::assert_with_log!(
            b.result().report_allocs,
            "now reported",
            true,
            b.result().report_allocs,
        );
        crate::test_complete!("allocations_counted_without_reporting");
    }

    #[test]
    fn report_metric_validates_unit() {
        init_test("report_metric_validates_unit");
        let (_clock, _allocs, mut b) = bencher();
        let ok = b.report_metric(3.5, "items/op");
        crate::assert_with_log!(ok.is_ok(), "valid unit", true, ok.is_ok());
        let bad = b.report_metric(1.0, "per op");
        crate::assert_with_log!(
            bad == Err(MetricError::InvalidUnit("per op".into())),
            "whitespace rejected",
            "InvalidUnit",
            bad
        );
        let empty = b.report_metric(1.0, "");
        crate::assert_with_log!(empty.is_err(), "empty rejected", "InvalidUnit", empty);
        let extra = b.result().extra;
        crate::assert_with_log!(
            extra.get("items/op") == Some(&3.5),
            "stored",
            Some(3.5),
            extra.get("items/op"),
        );
        crate::test_complete!("report_metric_validates_unit");
    }

    #[test]
    fn run_round_resets_and_records_previous() {
        init_test("run_round_resets_and_records_previous");
        let (clock, _allocs, mut b) = bencher();
        let mut workload = |b: &mut Bencher| {
            let n = b.n();
            clock.advance(Duration::from_micros(n));
        };
        b.run_round(10, &mut workload);
        b.run_round(20, &mut workload);
        let (prev_n, prev_d) = b.previous();
        crate::assert_with_log!(prev_n == 20, "previous n", 20u64, prev_n);
        crate::assert_with_log!(
            prev_d == Duration::from_micros(20),
            "previous duration is this round only",
            Duration::from_micros(20),
            prev_d
        );
        crate::test_complete!("run_round_resets_and_records_previous");
    }
}
