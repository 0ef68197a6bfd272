//! Benchmark results and derived metrics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Snapshot of one completed calibration round.
///
/// Only raw counters are stored; per-operation figures are computed on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Iterations in the round.
    pub n: u64,
    /// Measured time of the round.
    pub elapsed: Duration,
    /// Bytes processed per iteration, as declared by the workload.
    pub bytes_per_op: u64,
    /// Heap allocations made while the timer ran.
    pub mem_allocs: u64,
    /// Heap bytes allocated while the timer ran.
    pub mem_bytes: u64,
    /// Whether allocation figures should be reported for this benchmark.
    pub report_allocs: bool,
    /// Custom metrics by unit.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, f64>,
}

impl BenchmarkResult {
    /// Nanoseconds per iteration.
    #[must_use]
    pub fn ns_per_op(&self) -> u64 {
        self.elapsed
            .as_nanos()
            .checked_div(u128::from(self.n))
            .map_or(0, |ns| u64::try_from(ns).unwrap_or(u64::MAX))
    }

    /// Allocations per iteration.
    #[must_use]
    pub fn allocs_per_op(&self) -> u64 {
        self.mem_allocs.checked_div(self.n).unwrap_or(0)
    }

    /// Allocated bytes per iteration.
    #[must_use]
    pub fn alloced_bytes_per_op(&self) -> u64 {
        self.mem_bytes.checked_div(self.n).unwrap_or(0)
    }

    /// Throughput in MB/s, if the workload declared a per-iteration size.
    #[must_use]
    pub fn mb_per_sec(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        if self.bytes_per_op == 0 || secs <= 0.0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let bytes = self.bytes_per_op as f64 * self.n as f64;
        Some(bytes / secs / 1e6)
    }
}
