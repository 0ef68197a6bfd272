//! Timer service: one scheduling loop managing many timed callbacks.
//!
//! The service owns a deadline-ordered [heap](super::heap) of registrations.
//! Callers on any thread register, cancel and reschedule through a
//! [`TimerService`]; every mutation happens under one lock. A single
//! background thread, started on the first registration, sleeps until the
//! earliest deadline (or until a registration moves that deadline earlier),
//! pops every due registration and invokes the callbacks with the lock
//! released. Callbacks may therefore call back into the service.
//!
//! ```text
//!   callers ── register / cancel / reschedule ──► [ Mutex<State> ]
//!                                                      │  notify if the
//!                                                      │  head moved earlier
//!   scheduling loop:  wait_for(head - now) ◄───────────┘
//!                     pop due, re-queue periodic (deadline += period)
//!                     unlock, fire callbacks in deadline order
//! ```
//!
//! # Reschedule race
//!
//! [`TimerService::reschedule`] is cancel-then-register under one lock
//! acquisition. If the registration was already popped for firing and its
//! callback is running, `reschedule` returns `false` *and* leaves a live
//! registration behind, so both the fire and the rescheduled fire happen.
//! Callers that need exactly one fire must only reschedule registrations
//! they have stopped or observed firing.
//!
//! # Manual driving
//!
//! [`TimerService::manual`] creates a service without a background thread.
//! The owner calls [`TimerService::process_timers`] after advancing its clock,
//! which makes deadline behavior deterministic under a
//! [`VirtualClock`](super::VirtualClock).

use super::clock::{TimeSource, WallClock};
use super::heap::{HeapEntry, Registration, TimerCallback, TimerHeap};
use crate::config::TimerServiceConfig;
use crate::types::{Time, TimerId};
use parking_lot::{Condvar, Mutex};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, trace};

/// Errors returned by timer service operations.
#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    /// The service has been shut down and accepts no new registrations.
    #[error("timer service is shut down")]
    Shutdown,
    /// A periodic timer was requested with a zero period.
    #[error("periodic timer requires a non-zero period")]
    ZeroPeriod,
    /// The scheduling thread could not be started.
    #[error("failed to start timer thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Opaque handle to a registration.
///
/// The handle identifies the registration for [`TimerService::cancel`] and
/// [`TimerService::reschedule`]; it never exposes the registration's heap
/// position. Handles stay valid after the registration fires, so a fired
/// one-shot can be rescheduled.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    registration: Arc<Registration>,
}

impl TimerHandle {
    /// Returns the registration id.
    #[must_use]
    pub fn id(&self) -> TimerId {
        self.registration.id()
    }

    /// Returns the repeat period; zero for one-shot registrations.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.registration.period()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopWait {
    /// The loop is not waiting; it re-reads the heap before it next sleeps.
    Busy,
    /// Nothing is queued; the loop sleeps until notified.
    Idle,
    /// The loop sleeps until this deadline.
    Until(Time),
}

#[derive(Debug)]
struct State {
    heap: TimerHeap,
    next_id: u64,
    wait: LoopWait,
    shutdown: bool,
}

impl State {
    /// Whether a new head deadline requires waking the sleeping loop.
    fn needs_wake(&self, deadline: Time) -> bool {
        match self.wait {
            LoopWait::Busy => false,
            LoopWait::Idle => true,
            LoopWait::Until(target) => deadline < target,
        }
    }
}

static NEXT_SERVICE_ID: AtomicU64 = AtomicU64::new(0);

struct Shared {
    /// Tags registrations so handles from other services are rejected.
    service_id: u64,
    clock: Arc<dyn TimeSource>,
    state: Mutex<State>,
    wakeup: Condvar,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("service_id", &self.service_id)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

struct Fired {
    registration: Arc<Registration>,
    deadline: Time,
}

impl Shared {
    /// Pops everything due at `now` into `batch`, re-queueing periodic
    /// registrations one period after their old deadline.
    fn collect_due(state: &mut State, now: Time, batch: &mut Vec<Fired>) {
        let mut requeue = Vec::new();
        while let Some(HeapEntry {
            deadline,
            registration,
        }) = state.heap.pop_due(now)
        {
            if registration.is_periodic() {
                requeue.push((deadline + registration.period(), Arc::clone(&registration)));
            }
            batch.push(Fired {
                registration,
                deadline,
            });
        }
        // Re-queued after the drain so a registration fires at most once per
        // pass; missed periods are caught up on the following passes.
        for (next, registration) in requeue {
            state.heap.push(next, registration);
        }
    }

    fn fire(batch: &mut Vec<Fired>, now: Time) -> usize {
        let fired = batch.len();
        for Fired {
            registration,
            deadline,
        } in batch.drain(..)
        {
            trace!(timer = %registration.id(), ?deadline, ?now, "firing timer");
            let callback = registration.callback();
            if catch_unwind(AssertUnwindSafe(|| callback(now))).is_err() {
                error!(timer = %registration.id(), "timer callback panicked");
            }
        }
        fired
    }

    fn run(self: &Arc<Self>) {
        debug!("timer loop started");
        let mut batch = Vec::new();
        loop {
            let now = {
                let mut state = self.state.lock();
                loop {
                    if state.shutdown {
                        debug!("timer loop stopped");
                        return;
                    }
                    let now = self.clock.now();
                    Self::collect_due(&mut state, now, &mut batch);
                    if !batch.is_empty() {
                        break now;
                    }
                    match state.heap.peek_deadline() {
                        None => {
                            state.wait = LoopWait::Idle;
                            self.wakeup.wait(&mut state);
                        }
                        Some(deadline) => {
                            state.wait = LoopWait::Until(deadline);
                            let _ = self.wakeup.wait_for(&mut state, deadline - now);
                        }
                    }
                    state.wait = LoopWait::Busy;
                }
            };
            Self::fire(&mut batch, now);
        }
    }
}

/// Whether the service runs its own scheduling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drive {
    Background,
    Manual,
}

/// Deadline-ordered timer service.
///
/// Share it as `Arc<TimerService>`. Dropping the last reference shuts the
/// scheduling loop down and drops all pending registrations without firing
/// them.
///
/// # Example
///
/// ```
/// use timekeep::time::{TimerService, VirtualClock};
/// use timekeep::types::Time;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::time::Duration;
///
/// let clock = Arc::new(VirtualClock::new());
/// let service = TimerService::manual(clock.clone());
/// let hits = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&hits);
/// let handle = service
///     .register(Time::from_millis(10), Duration::ZERO, move |_| {
///         counter.fetch_add(1, Ordering::SeqCst);
///     })
///     .unwrap();
///
/// clock.advance(Duration::from_millis(10));
/// assert_eq!(service.process_timers(), 1);
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// assert!(!service.cancel(&handle)); // already fired
/// ```
#[derive(Debug)]
pub struct TimerService {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    drive: Drive,
    config: TimerServiceConfig,
}

impl TimerService {
    /// Creates a service driven by its own background thread.
    ///
    /// The thread starts on the first registration. Its sleeps are measured
    /// in real time, so the clock should advance with real time.
    #[must_use]
    pub fn new(clock: Arc<dyn TimeSource>) -> Arc<Self> {
        Self::with_config(clock, TimerServiceConfig::default())
    }

    /// Creates a background-driven service with explicit configuration.
    #[must_use]
    pub fn with_config(clock: Arc<dyn TimeSource>, config: TimerServiceConfig) -> Arc<Self> {
        Arc::new(Self::build(clock, config, Drive::Background))
    }

    /// Creates a service without a scheduling thread.
    ///
    /// Timers fire only when [`process_timers`](Self::process_timers) is called.
    #[must_use]
    pub fn manual(clock: Arc<dyn TimeSource>) -> Arc<Self> {
        Arc::new(Self::build(
            clock,
            TimerServiceConfig::default(),
            Drive::Manual,
        ))
    }

    /// Returns the process-wide wall-clock service, creating it on first use.
    pub fn global() -> &'static Arc<Self> {
        static GLOBAL: OnceLock<Arc<TimerService>> = OnceLock::new();
        GLOBAL.get_or_init(|| Self::new(Arc::new(WallClock::new())))
    }

    fn build(clock: Arc<dyn TimeSource>, config: TimerServiceConfig, drive: Drive) -> Self {
        Self {
            shared: Arc::new(Shared {
                service_id: NEXT_SERVICE_ID.fetch_add(1, Ordering::Relaxed),
                clock,
                state: Mutex::new(State {
                    heap: TimerHeap::new(),
                    next_id: 0,
                    wait: LoopWait::Busy,
                    shutdown: false,
                }),
                wakeup: Condvar::new(),
            }),
            worker: Mutex::new(None),
            drive,
            config,
        }
    }

    /// Returns the current time of the service clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.shared.clock.now()
    }

    /// Registers `callback` to run at `deadline`, then every `period` after
    /// that if `period` is non-zero.
    ///
    /// Equal deadlines fire in registration order. A deadline already in the
    /// past fires on the next pass of the loop.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::Shutdown`] after [`shutdown`](Self::shutdown), or
    /// [`TimerError::Spawn`] if the scheduling thread cannot be started.
    pub fn register<F>(
        &self,
        deadline: Time,
        period: Duration,
        callback: F,
    ) -> Result<TimerHandle, TimerError>
    where
        F: Fn(Time) + Send + Sync + 'static,
    {
        self.register_callback(deadline, period, Arc::new(callback))
    }

    /// Registers an already shared callback. See [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// As for [`register`](Self::register).
    pub fn register_callback(
        &self,
        deadline: Time,
        period: Duration,
        callback: TimerCallback,
    ) -> Result<TimerHandle, TimerError> {
        self.ensure_started()?;
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(TimerError::Shutdown);
        }
        let id = TimerId::new(state.next_id);
        state.next_id += 1;
        let registration = Arc::new(Registration::new(
            id,
            self.shared.service_id,
            period,
            callback,
        ));
        state.heap.push(deadline, Arc::clone(&registration));
        let wake = state.needs_wake(deadline);
        drop(state);

        trace!(timer = %id, ?deadline, ?period, wake, "registered timer");
        if wake {
            self.shared.wakeup.notify_one();
        }
        Ok(TimerHandle { registration })
    }

    /// Removes the registration if it is still pending.
    ///
    /// Returns `true` if it was pending, `false` if it already fired, was
    /// already cancelled, or belongs to another service.
    pub fn cancel(&self, handle: &TimerHandle) -> bool {
        if !self.owns(handle) {
            trace!(timer = %handle.id(), "cancel with foreign handle ignored");
            return false;
        }
        let mut state = self.shared.state.lock();
        let removed = state.heap.remove(&handle.registration);
        let wake = removed.is_some_and(|d| state.wait == LoopWait::Until(d));
        drop(state);

        trace!(timer = %handle.id(), active = removed.is_some(), "cancelled timer");
        if wake {
            self.shared.wakeup.notify_one();
        }
        removed.is_some()
    }

    /// Moves the registration to `deadline`: cancel followed by re-register of
    /// the same handle, atomically with respect to other callers.
    ///
    /// Returns what the cancel returned. See the module documentation for the
    /// race with a concurrent fire. After [`shutdown`](Self::shutdown) nothing
    /// is re-registered, and a handle from another service is ignored.
    pub fn reschedule(&self, handle: &TimerHandle, deadline: Time) -> bool {
        if !self.owns(handle) {
            trace!(timer = %handle.id(), "reschedule with foreign handle ignored");
            return false;
        }
        let mut state = self.shared.state.lock();
        let removed = state.heap.remove(&handle.registration);
        if state.shutdown {
            return removed.is_some();
        }
        state.heap.push(deadline, Arc::clone(&handle.registration));
        let wake = state.needs_wake(deadline)
            || removed.is_some_and(|d| state.wait == LoopWait::Until(d));
        drop(state);

        trace!(
            timer = %handle.id(),
            ?deadline,
            active = removed.is_some(),
            "rescheduled timer"
        );
        if wake {
            self.shared.wakeup.notify_one();
        }
        removed.is_some()
    }

    /// Fires every registration due at the current clock time on the calling
    /// thread. Returns the number of callbacks invoked.
    pub fn process_timers(&self) -> usize {
        let mut batch = Vec::new();
        let now = self.now();
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return 0;
            }
            Shared::collect_due(&mut state, now, &mut batch);
        }
        Shared::fire(&mut batch, now)
    }

    /// Returns the earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Time> {
        self.shared.state.lock().heap.peek_deadline()
    }

    /// Returns the number of pending registrations.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().heap.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().heap.is_empty()
    }

    /// Stops the scheduling loop and drops all pending registrations.
    ///
    /// Idempotent. Later registrations fail with [`TimerError::Shutdown`].
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if !state.shutdown {
                debug!(pending = state.heap.len(), "shutting down timer service");
            }
            state.shutdown = true;
            state.heap.clear();
        }
        self.shared.wakeup.notify_all();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            // A callback may drop the last reference from the loop thread.
            if worker.thread().id() != std::thread::current().id() {
                let _ = worker.join();
            }
        }
    }

    fn owns(&self, handle: &TimerHandle) -> bool {
        handle.registration.owner() == self.shared.service_id
    }

    fn ensure_started(&self) -> Result<(), TimerError> {
        if self.drive == Drive::Manual {
            return Ok(());
        }
        let mut worker = self.worker.lock();
        if worker.is_some() || self.shared.state.lock().shutdown {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || shared.run())
            .map_err(TimerError::Spawn)?;
        *worker = Some(handle);
        Ok(())
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
