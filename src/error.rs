//! Crate-level error type.
//!
//! Each module reports its own error enum; [`Error`] wraps them for callers
//! that drive timers and benchmarks from one place.

use crate::bench::{BenchError, MetricError};
use crate::config::ConfigError;
use crate::time::TimerError;

/// Any error produced by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Timer service error.
    #[error(transparent)]
    Timer(#[from] TimerError),
    /// Calibration error.
    #[error(transparent)]
    Bench(#[from] BenchError),
    /// Custom metric error.
    #[error(transparent)]
    Metric(#[from] MetricError),
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
