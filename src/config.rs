//! Configuration for the timer service and the benchmark calibrator.
//!
//! Values are plain structs with defaults. The surrounding harness usually
//! passes them in directly; [`Config::from_env`] layers `TIMEKEEP_*`
//! environment overrides on top of the defaults:
//!
//! | Variable | Field | Format |
//! |----------|-------|--------|
//! | `TIMEKEEP_BENCHTIME` | `bench.bench_time` | `1s`, `250ms`, `500us`, `100x` |
//! | `TIMEKEEP_BENCHMEM` | `bench.report_allocs` | `true`/`false`/`1`/`0` |
//! | `TIMEKEEP_MAX_ITERATIONS` | `bench.max_iterations` | integer |
//! | `TIMEKEEP_TIMER_THREAD_NAME` | `timer.thread_name` | string |

use std::collections::BTreeMap;
use std::time::Duration;

const ENV_PREFIX: &str = "TIMEKEEP_";

/// Upper bound on benchmark iterations per round.
pub const DEFAULT_MAX_ITERATIONS: u64 = 1_000_000_000;

/// Default minimum duration of the final calibration round.
pub const DEFAULT_BENCH_TIME: Duration = Duration::from_secs(1);

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Timer service settings.
    pub timer: TimerServiceConfig,
    /// Benchmark calibration settings.
    pub bench: BenchConfig,
}

impl Config {
    /// Builds the default configuration with `TIMEKEEP_*` overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an unknown `TIMEKEEP_*` key or a value that
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let overrides: BTreeMap<String, String> = std::env::vars()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .collect();
        let mut config = Self::default();
        config.apply_overrides(&overrides)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `KEY=value` overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an unknown key or a value that does not
    /// parse.
    pub fn apply_overrides(
        &mut self,
        overrides: &BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        for (key, value) in overrides {
            self.apply_override(key, value)?;
        }
        Ok(())
    }

    fn apply_override(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "TIMEKEEP_BENCHTIME" => self.bench.bench_time = value.parse()?,
            "TIMEKEEP_BENCHMEM" => self.bench.report_allocs = parse_bool(value, key)?,
            "TIMEKEEP_MAX_ITERATIONS" => {
                self.bench.max_iterations = value.trim().parse().map_err(|_| {
                    ConfigError::Parse(format!("{key}: expected integer, got {value:?}"))
                })?;
            }
            "TIMEKEEP_TIMER_THREAD_NAME" => self.timer.thread_name = value.to_string(),
            _ => return Err(ConfigError::InvalidOverride(key.to_string())),
        }
        Ok(())
    }

    /// Checks the configuration for values the components cannot run with.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bench.validate()?;
        if self.timer.thread_name.is_empty() {
            return Err(ConfigError::EmptyThreadName);
        }
        Ok(())
    }
}

/// Timer service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerServiceConfig {
    /// Name of the scheduling thread.
    pub thread_name: String,
}

impl Default for TimerServiceConfig {
    fn default() -> Self {
        Self {
            thread_name: "timekeep-timer".to_string(),
        }
    }
}

/// How long a benchmark should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchTime {
    /// Grow the iteration count until one round takes at least this long.
    Duration(Duration),
    /// Run exactly this many iterations in a single round.
    Iterations(u64),
}

impl Default for BenchTime {
    fn default() -> Self {
        Self::Duration(DEFAULT_BENCH_TIME)
    }
}

impl std::str::FromStr for BenchTime {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(count) = s.strip_suffix('x') {
            let n: u64 = count
                .parse()
                .map_err(|_| ConfigError::InvalidBenchTime(s.to_string()))?;
            if n == 0 {
                return Err(ConfigError::InvalidBenchTime(s.to_string()));
            }
            return Ok(Self::Iterations(n));
        }
        parse_duration(s)
            .map(Self::Duration)
            .ok_or_else(|| ConfigError::InvalidBenchTime(s.to_string()))
    }
}

/// Benchmark calibration configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchConfig {
    /// Target duration or fixed iteration count.
    pub bench_time: BenchTime,
    /// Report allocation statistics for every benchmark, not only those that
    /// call `report_allocs`.
    pub report_allocs: bool,
    /// Iteration cap per round.
    pub max_iterations: u64,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            bench_time: BenchTime::default(),
            report_allocs: false,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl BenchConfig {
    /// Sets the target round duration.
    #[must_use]
    pub fn with_bench_time(mut self, bench_time: BenchTime) -> Self {
        self.bench_time = bench_time;
        self
    }

    /// Sets the global allocation reporting default.
    #[must_use]
    pub fn with_report_allocs(mut self, report_allocs: bool) -> Self {
        self.report_allocs = report_allocs;
        self
    }

    /// Sets the iteration cap.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Checks for values the calibrator cannot run with.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidMaxIterations);
        }
        match self.bench_time {
            BenchTime::Iterations(0) => Err(ConfigError::InvalidBenchTime("0x".to_string())),
            BenchTime::Iterations(n) if n > self.max_iterations => {
                Err(ConfigError::InvalidBenchTime(format!("{n}x")))
            }
            _ => Ok(()),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value did not parse.
    Parse(String),
    /// Bench time is neither a duration nor `<n>x` with `n > 0`.
    InvalidBenchTime(String),
    /// Iteration cap must be positive.
    InvalidMaxIterations,
    /// Timer thread name is empty.
    EmptyThreadName,
    /// Unknown override key.
    InvalidOverride(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "config parse error: {err}"),
            Self::InvalidBenchTime(value) => write!(f, "invalid bench time: {value:?}"),
            Self::InvalidMaxIterations => write!(f, "max_iterations must be > 0"),
            Self::EmptyThreadName => write!(f, "timer thread name must not be empty"),
            Self::InvalidOverride(key) => write!(f, "invalid override: {key}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parse_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Parse(format!("{key}: expected bool, got {value:?}"))),
    }
}

/// Parses `<integer><unit>` with unit one of `ns`, `us`, `ms`, `s`, `m`.
fn parse_duration(s: &str) -> Option<Duration> {
    let split = s.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = s.split_at(split);
    let n: u64 = digits.parse().ok()?;
    match unit {
        "ns" => Some(Duration::from_nanos(n)),
        "us" | "µs" => Some(Duration::from_micros(n)),
        "ms" => Some(Duration::from_millis(n)),
        "s" => Some(Duration::from_secs(n)),
        "m" => Some(Duration::from_secs(n.checked_mul(60)?)),
        _ => None,
    }
}
