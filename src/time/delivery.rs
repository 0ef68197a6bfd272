//! Single-slot delivery channel.
//!
//! Timers hand their fire time to consumers through a one-value slot. The
//! sending side never blocks: if the previous value has not been read yet,
//! [`DeliverySender::try_send`] gives the new value back and the caller drops
//! it. This keeps the scheduling loop from stalling on a slow or absent
//! consumer.
//!
//! ```text
//!   scheduling loop                         consumer
//!        │                                     │
//!        │── try_send(t1) ──► [ t1 ]           │
//!        │── try_send(t2) ──► [ t1 ]  Full(t2) │   (t2 dropped)
//!        │                    [    ] ◄── recv()├── t1
//! ```
//!
//! Closing is not modelled: stopping a timer leaves the channel open, so a
//! consumer sees "no value" rather than a disconnection.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Error returned by [`DeliverySender::try_send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrySendError<T> {
    /// The slot already holds an unread value.
    Full(T),
}

impl<T> std::fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full(_) => write!(f, "delivery slot is full"),
        }
    }
}

impl<T: std::fmt::Debug> std::error::Error for TrySendError<T> {}

impl<T> TrySendError<T> {
    /// Returns the value that could not be delivered.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) => value,
        }
    }
}

/// Error returned by [`DeliveryReceiver::recv_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvTimeoutError {
    /// No value arrived before the timeout.
    #[error("timed out waiting for a delivery")]
    Timeout,
}

#[derive(Debug)]
struct Slot<T> {
    value: Mutex<Option<T>>,
    ready: Condvar,
}

/// Creates a single-slot delivery channel.
#[must_use]
pub fn delivery_channel<T>() -> (DeliverySender<T>, DeliveryReceiver<T>) {
    let slot = Arc::new(Slot {
        value: Mutex::new(None),
        ready: Condvar::new(),
    });
    (
        DeliverySender {
            slot: Arc::clone(&slot),
        },
        DeliveryReceiver { slot },
    )
}

/// Sending half of a delivery channel.
#[derive(Debug)]
pub struct DeliverySender<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Clone for DeliverySender<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> DeliverySender<T> {
    /// Stores `value` if the slot is empty.
    ///
    /// # Errors
    ///
    /// Returns [`TrySendError::Full`] with the value if the slot is occupied.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut slot = self.slot.value.lock();
        if slot.is_some() {
            return Err(TrySendError::Full(value));
        }
        *slot = Some(value);
        drop(slot);
        self.slot.ready.notify_one();
        Ok(())
    }
}

/// Receiving half of a delivery channel.
#[derive(Debug)]
pub struct DeliveryReceiver<T> {
    slot: Arc<Slot<T>>,
}

impl<T> DeliveryReceiver<T> {
    /// Takes the value if one is waiting.
    #[must_use]
    pub fn try_recv(&self) -> Option<T> {
        self.slot.value.lock().take()
    }

    /// Blocks until a value is delivered.
    pub fn recv(&self) -> T {
        let mut slot = self.slot.value.lock();
        loop {
            if let Some(value) = slot.take() {
                return value;
            }
            self.slot.ready.wait(&mut slot);
        }
    }

    /// Blocks until a value is delivered or `timeout` passes.
    ///
    /// # Errors
    ///
    /// Returns [`RecvTimeoutError::Timeout`] if nothing arrived in time.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        let mut slot = self.slot.value.lock();
        if let Some(value) = slot.take() {
            return Ok(value);
        }
        // A timeout past the end of `Instant` is an unbounded wait.
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            drop(slot);
            return Ok(self.recv());
        };
        loop {
            if let Some(value) = slot.take() {
                return Ok(value);
            }
            if self.slot.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot.take().ok_or(RecvTimeoutError::Timeout);
            }
        }
    }

    /// Returns true if no value is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slot.value.lock().is_none()
    }
}
