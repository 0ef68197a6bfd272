//! Test logging helpers.
//!
//! Tests call [`init_test_logging`] once and then bracket their body with
//! [`test_phase!`](crate::test_phase) and [`test_complete!`](crate::test_complete).
//! [`assert_with_log!`](crate::assert_with_log) logs the expected/actual pair
//! through `tracing` before asserting, so a failing run shows the context in
//! captured output.
//!
//! Set `RUST_LOG=timekeep=trace` to see scheduling loop events while a test runs.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Marks the start of a test.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        ::tracing::info!(test = $name, "=== TEST START ===");
    };
}

/// Marks a named section inside a test.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        ::tracing::info!(section = $name, "--- section ---");
    };
}

/// Marks the successful end of a test, optionally with summary fields.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        ::tracing::info!(test = $name, "=== TEST COMPLETE ===");
    };
    ($name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        ::tracing::info!(test = $name, $($key = ?$value),+, "=== TEST COMPLETE ===");
    };
}

/// Asserts a condition, logging the expected and actual values on failure.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr $(,)?) => {
        if !$cond {
            ::tracing::error!(
                what = $msg,
                expected = ?$expected,
                actual = ?$actual,
                "Assertion failed"
            );
        }
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}
