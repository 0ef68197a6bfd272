//! Timer facades over the [`TimerService`].
//!
//! - [`Timer`]: one-shot; delivers its fire time into a single-slot channel.
//! - [`Ticker`]: periodic; same channel, ticks that find the slot full are
//!   dropped.
//! - [`after_fn`]: runs a closure on its own thread once the duration passes.
//!
//! Stopping never closes the channel. A consumer blocked in
//! [`DeliveryReceiver::recv`] after a stop simply receives nothing.

use super::delivery::{DeliveryReceiver, DeliverySender, TrySendError, delivery_channel};
use super::service::{TimerError, TimerHandle, TimerService};
use crate::types::Time;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// The default fire action: hands `now` to the consumer without blocking.
///
/// A full slot means the consumer has not read the previous value; the new
/// one is dropped.
pub fn send_time(sender: &DeliverySender<Time>, now: Time) {
    if let Err(TrySendError::Full(dropped)) = sender.try_send(now) {
        trace!(?dropped, "delivery slot full, dropping fire event");
    }
}

fn delivering(sender: DeliverySender<Time>) -> impl Fn(Time) + Send + Sync + 'static {
    move |now| send_time(&sender, now)
}

/// A one-shot timer.
///
/// # Example
///
/// ```
/// use timekeep::time::{Timer, TimerService, WallClock};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let service = TimerService::new(Arc::new(WallClock::new()));
/// let timer = Timer::new(&service, Duration::from_millis(5)).unwrap();
/// let fired_at = timer.receiver().recv_timeout(Duration::from_secs(5)).unwrap();
/// assert!(fired_at >= timer.deadline_hint());
/// assert!(!timer.stop()); // already fired
/// ```
#[derive(Debug)]
pub struct Timer {
    service: Arc<TimerService>,
    handle: TimerHandle,
    receiver: DeliveryReceiver<Time>,
    deadline: Time,
}

impl Timer {
    /// Starts a timer that fires once after `duration`.
    ///
    /// # Errors
    ///
    /// Returns the service's registration error.
    pub fn new(service: &Arc<TimerService>, duration: Duration) -> Result<Self, TimerError> {
        let (sender, receiver) = delivery_channel();
        let deadline = service.now() + duration;
        let handle = service.register(deadline, Duration::ZERO, delivering(sender))?;
        Ok(Self {
            service: Arc::clone(service),
            handle,
            receiver,
            deadline,
        })
    }

    /// Returns the channel the fire time is delivered into.
    #[must_use]
    pub fn receiver(&self) -> &DeliveryReceiver<Time> {
        &self.receiver
    }

    /// Returns the deadline set by the most recent `new` or `reset` on this
    /// value.
    #[must_use]
    pub fn deadline_hint(&self) -> Time {
        self.deadline
    }

    /// Returns the underlying registration handle.
    #[must_use]
    pub fn handle(&self) -> &TimerHandle {
        &self.handle
    }

    /// Prevents the timer from firing.
    ///
    /// Returns `true` if the call stopped the timer, `false` if it had already
    /// fired or been stopped. A value delivered before the stop stays in the
    /// channel.
    pub fn stop(&self) -> bool {
        self.service.cancel(&self.handle)
    }

    /// Re-arms the timer to fire `duration` from now.
    ///
    /// Returns `true` if the timer was still pending. Reset only a stopped or
    /// fired timer whose channel has been drained; resetting a timer that is
    /// firing concurrently can deliver both the old and the new fire.
    pub fn reset(&mut self, duration: Duration) -> bool {
        self.deadline = self.service.now() + duration;
        self.service.reschedule(&self.handle, self.deadline)
    }
}

/// A periodic timer.
///
/// Ticks that arrive while the previous tick is unread are dropped, so a slow
/// consumer sees fewer ticks rather than a backlog.
#[derive(Debug)]
pub struct Ticker {
    service: Arc<TimerService>,
    handle: TimerHandle,
    receiver: DeliveryReceiver<Time>,
}

impl Ticker {
    /// Starts a ticker whose first tick is one `period` from now.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::ZeroPeriod`] if `period` is zero, or the
    /// service's registration error.
    pub fn new(service: &Arc<TimerService>, period: Duration) -> Result<Self, TimerError> {
        if period.is_zero() {
            return Err(TimerError::ZeroPeriod);
        }
        let (sender, receiver) = delivery_channel();
        let handle = service.register(service.now() + period, period, delivering(sender))?;
        Ok(Self {
            service: Arc::clone(service),
            handle,
            receiver,
        })
    }

    /// Returns the channel ticks are delivered into.
    #[must_use]
    pub fn receiver(&self) -> &DeliveryReceiver<Time> {
        &self.receiver
    }

    /// Returns the tick period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.handle.period()
    }

    /// Stops the ticker. Returns `true` if it was running.
    pub fn stop(&self) -> bool {
        self.service.cancel(&self.handle)
    }

    /// Restarts the ticker so the next tick is one period from now.
    pub fn reset(&self) -> bool {
        self.service
            .reschedule(&self.handle, self.service.now() + self.handle.period())
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        // A periodic registration would otherwise keep firing forever.
        self.service.cancel(&self.handle);
    }
}

/// Runs `f` on a new thread once `duration` has passed.
///
/// The scheduling loop only spawns the thread, so `f` may block or call back
/// into the service. The returned handle works with
/// [`TimerService::cancel`] and [`TimerService::reschedule`]; a rescheduled
/// handle runs `f` again.
///
/// # Errors
///
/// Returns the service's registration error.
pub fn after_fn<F>(
    service: &TimerService,
    duration: Duration,
    f: F,
) -> Result<TimerHandle, TimerError>
where
    F: Fn() + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let deadline = service.now() + duration;
    service.register(deadline, Duration::ZERO, move |_| {
        let f = Arc::clone(&f);
        if let Err(err) = std::thread::Builder::new()
            .name("timekeep-after-fn".into())
            .spawn(move || f())
        {
            tracing::error!(%err, "failed to spawn after_fn thread");
        }
    })
}
