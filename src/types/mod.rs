//! Core types shared by the timer service and the benchmark calibrator.
//!
//! - [`id`]: `Time` and `TimerId`

pub mod id;

pub use id::{Time, TimerId};
pub(crate) use id::duration_to_nanos_saturating;
