//! Heap allocation counters.
//!
//! [`CountingAllocator`] wraps a [`GlobalAlloc`] and counts allocations and
//! allocated bytes in process-wide atomics. A benchmark binary installs it:
//!
//! ```ignore
//! use std::alloc::System;
//! use timekeep::bench::CountingAllocator;
//!
//! #[global_allocator]
//! static GLOBAL: CountingAllocator<System> = CountingAllocator::new(System);
//! ```
//!
//! The calibrator reads counters through [`AllocSource`], so without the
//! allocator installed the counters stay at zero and every delta is zero.
//! Counters only grow; frees are not subtracted. A `realloc` counts as one
//! allocation of its full new size, regardless of the old size.

#![allow(unsafe_code)]

use std::alloc::{GlobalAlloc, Layout};
use std::sync::atomic::{AtomicU64, Ordering};

static ALLOC_COUNT: AtomicU64 = AtomicU64::new(0);
static ALLOC_BYTES: AtomicU64 = AtomicU64::new(0);

/// Allocator wrapper that counts allocations.
#[derive(Debug, Default)]
pub struct CountingAllocator<A> {
    inner: A,
}

impl<A> CountingAllocator<A> {
    /// Wraps `inner`.
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }
}

#[inline]
fn record(size: usize) {
    ALLOC_COUNT.fetch_add(1, Ordering::Relaxed);
    ALLOC_BYTES.fetch_add(size as u64, Ordering::Relaxed);
}

// SAFETY: every method forwards to the wrapped allocator with the caller's
// arguments unchanged; counting touches only atomics and never allocates.
unsafe impl<A: GlobalAlloc> GlobalAlloc for CountingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        record(layout.size());
        unsafe { self.inner.alloc(layout) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        record(layout.size());
        unsafe { self.inner.alloc_zeroed(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { self.inner.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        record(new_size);
        unsafe { self.inner.realloc(ptr, layout, new_size) }
    }
}

/// Snapshot of allocation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocSnapshot {
    /// Number of allocations so far.
    pub allocs: u64,
    /// Bytes allocated so far.
    pub bytes: u64,
}

impl AllocSnapshot {
    /// Allocations made since `before`.
    #[must_use]
    pub fn allocs_since(&self, before: &Self) -> u64 {
        self.allocs.saturating_sub(before.allocs)
    }

    /// Bytes allocated since `before`.
    #[must_use]
    pub fn bytes_since(&self, before: &Self) -> u64 {
        self.bytes.saturating_sub(before.bytes)
    }
}

/// Source of cumulative allocation counters.
pub trait AllocSource: std::fmt::Debug {
    /// Reads the current counters.
    fn snapshot(&self) -> AllocSnapshot;
}

/// Reads the counters maintained by [`CountingAllocator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalAllocCounters;

impl AllocSource for GlobalAllocCounters {
    fn snapshot(&self) -> AllocSnapshot {
        AllocSnapshot {
            allocs: ALLOC_COUNT.load(Ordering::SeqCst),
            bytes: ALLOC_BYTES.load(Ordering::SeqCst),
        }
    }
}
