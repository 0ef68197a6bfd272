//! Deadline-ordered timers.
//!
//! - [`TimerService`]: the scheduling loop and its register / cancel /
//!   reschedule operations
//! - [`Timer`], [`Ticker`], [`after_fn`]: facades for one-shot, periodic and
//!   callback timers
//! - [`delivery_channel`]: the single-slot channel fire events are delivered
//!   through
//! - [`TimeSource`], [`WallClock`], [`VirtualClock`]: where "now" comes from

pub mod clock;
pub mod delivery;
mod heap;
pub mod service;
pub mod timer;

pub use clock::{TimeSource, VirtualClock, WallClock};
pub use delivery::{
    DeliveryReceiver, DeliverySender, RecvTimeoutError, TrySendError, delivery_channel,
};
pub use heap::TimerCallback;
pub use service::{TimerError, TimerHandle, TimerService};
pub use timer::{Ticker, Timer, after_fn, send_time};
