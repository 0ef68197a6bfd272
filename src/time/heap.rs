//! Index-tracked timer heap.
//!
//! A binary min-heap of `(deadline, registration)` entries ordered by deadline
//! with the registration id as tie-breaker, so equal deadlines pop in
//! registration order. Every registration records its current position in the
//! heap array; the position is rewritten on each swap, which makes removal
//! of an arbitrary registration O(log n).
//!
//! The heap is not synchronized. [`TimerService`](super::TimerService) owns it
//! behind its lock.

use crate::types::{Time, TimerId};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;

/// Function invoked when a registration fires. Receives the fire time.
pub type TimerCallback = Arc<dyn Fn(Time) + Send + Sync>;

const NOT_QUEUED: usize = usize::MAX;

/// A timed callback tracked by a timer service.
///
/// The deadline lives in the heap entry; everything that survives a fire
/// (identity, period, callback) lives here so the registration can be
/// re-inserted by a reschedule after it has fired.
pub(crate) struct Registration {
    id: TimerId,
    /// Id of the service that created the registration.
    owner: u64,
    period: Duration,
    callback: TimerCallback,
    /// Position in the owning heap, or `NOT_QUEUED`.
    index: AtomicUsize,
}

impl Registration {
    pub(crate) fn new(
        id: TimerId,
        owner: u64,
        period: Duration,
        callback: TimerCallback,
    ) -> Self {
        Self {
            id,
            owner,
            period,
            callback,
            index: AtomicUsize::new(NOT_QUEUED),
        }
    }

    pub(crate) fn id(&self) -> TimerId {
        self.id
    }

    pub(crate) fn owner(&self) -> u64 {
        self.owner
    }

    pub(crate) fn period(&self) -> Duration {
        self.period
    }

    pub(crate) fn is_periodic(&self) -> bool {
        !self.period.is_zero()
    }

    pub(crate) fn callback(&self) -> &TimerCallback {
        &self.callback
    }

    fn index(&self) -> usize {
        self.index.load(AtomicOrdering::Relaxed)
    }

    fn set_index(&self, index: usize) {
        self.index.store(index, AtomicOrdering::Relaxed);
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("period", &self.period)
            .field("index", &self.index())
            .finish_non_exhaustive()
    }
}

/// One queued registration.
#[derive(Debug, Clone)]
pub(crate) struct HeapEntry {
    pub(crate) deadline: Time,
    pub(crate) registration: Arc<Registration>,
}

impl HeapEntry {
    fn key_cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.registration.id.cmp(&other.registration.id))
    }
}

/// A min-heap of registrations ordered by deadline.
#[derive(Debug, Default)]
pub(crate) struct TimerHeap {
    entries: Vec<HeapEntry>,
}

impl TimerHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the earliest deadline, if any.
    pub(crate) fn peek_deadline(&self) -> Option<Time> {
        self.entries.first().map(|e| e.deadline)
    }

    /// Returns true if `registration` is currently queued in this heap.
    pub(crate) fn contains(&self, registration: &Arc<Registration>) -> bool {
        self.entries
            .get(registration.index())
            .is_some_and(|e| Arc::ptr_eq(&e.registration, registration))
    }

    /// Queues `registration` to fire at `deadline`.
    ///
    /// The registration must not already be queued.
    pub(crate) fn push(&mut self, deadline: Time, registration: Arc<Registration>) {
        debug_assert!(!self.contains(&registration), "registration queued twice");
        let index = self.entries.len();
        registration.set_index(index);
        self.entries.push(HeapEntry {
            deadline,
            registration,
        });
        self.sift_up(index);
    }

    /// Removes `registration` if queued, returning its deadline.
    pub(crate) fn remove(&mut self, registration: &Arc<Registration>) -> Option<Time> {
        if !self.contains(registration) {
            return None;
        }
        let entry = self.remove_at(registration.index());
        Some(entry.deadline)
    }

    /// Pops the earliest entry if its deadline is `<= now`.
    pub(crate) fn pop_due(&mut self, now: Time) -> Option<HeapEntry> {
        if self.peek_deadline()? <= now {
            Some(self.remove_at(0))
        } else {
            None
        }
    }

    /// Drops every queued entry.
    pub(crate) fn clear(&mut self) {
        for entry in self.entries.drain(..) {
            entry.registration.set_index(NOT_QUEUED);
        }
    }

    fn remove_at(&mut self, index: usize) -> HeapEntry {
        let last = self.entries.len() - 1;
        if index != last {
            self.swap(index, last);
        }
        let entry = self
            .entries
            .pop()
            .unwrap_or_else(|| unreachable!("remove_at on empty heap"));
        entry.registration.set_index(NOT_QUEUED);
        if index < self.entries.len() {
            // The moved entry may belong above or below its new slot.
            self.sift_down(index);
            self.sift_up(index);
        }
        entry
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.entries.swap(a, b);
        self.entries[a].registration.set_index(a);
        self.entries[b].registration.set_index(b);
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.entries[index].key_cmp(&self.entries[parent]) != Ordering::Less {
                break;
            }
            self.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut smallest = left;
            if right < len && self.entries[right].key_cmp(&self.entries[left]) == Ordering::Less {
                smallest = right;
            }
            if self.entries[smallest].key_cmp(&self.entries[index]) != Ordering::Less {
                break;
            }
            self.swap(index, smallest);
            index = smallest;
        }
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        for (i, entry) in self.entries.iter().enumerate() {
            assert_eq!(entry.registration.index(), i, "stale index at {i}");
            if i > 0 {
                let parent = &self.entries[(i - 1) / 2];
                assert_ne!(
                    entry.key_cmp(parent),
                    Ordering::Less,
                    "heap order violated at {i}"
                );
            }
        }
    }
}
