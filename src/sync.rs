//! Source switch between `std` and `loom` synchronization primitives.
//!
//! Compiling with `RUSTFLAGS="--cfg loom"` substitutes the `loom` versions so
//! the model tests can explore thread interleavings.

use std::time::Duration;

#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{fence, AtomicBool, AtomicPtr, AtomicUsize, Ordering};

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{fence, AtomicBool, AtomicPtr, AtomicUsize, Ordering};

#[cfg(not(loom))]
pub(crate) use antidote::Mutex;

/// Non-poisoning facade over loom's mutex, mirroring the `antidote` API used
/// in the regular build.
#[cfg(loom)]
#[derive(Debug)]
pub(crate) struct Mutex<T>(loom::sync::Mutex<T>);

#[cfg(loom)]
impl<T> Mutex<T> {
    pub(crate) fn new(val: T) -> Self {
        Self(loom::sync::Mutex::new(val))
    }

    pub(crate) fn lock(&self) -> loom::sync::MutexGuard<'_, T> {
        self.0.lock().unwrap()
    }
}

/// Per-thread cache of an assigned stripe slot.
#[cfg(not(loom))]
pub(crate) struct SlotCache(thread_local::ThreadLocal<usize>);

#[cfg(not(loom))]
impl SlotCache {
    pub(crate) fn new() -> Self {
        Self(thread_local::ThreadLocal::new())
    }

    /// Returns the calling thread's cached slot, running `assign` on the
    /// first call from this thread.
    #[inline]
    pub(crate) fn get_or(&self, assign: impl FnOnce() -> usize) -> usize {
        *self.0.get_or(assign)
    }
}

/// Under loom the cache is bypassed: the `thread_local` crate synchronizes
/// internally with primitives the model cannot observe, so every call
/// assigns afresh through the tracked atomics instead.
#[cfg(loom)]
pub(crate) struct SlotCache;

#[cfg(loom)]
impl SlotCache {
    pub(crate) fn new() -> Self {
        Self
    }

    #[inline]
    pub(crate) fn get_or(&self, assign: impl FnOnce() -> usize) -> usize {
        assign()
    }
}

/// Parks the calling thread briefly before a drain loop re-scans.
#[cfg(not(loom))]
#[inline]
pub(crate) fn backoff(interval: Duration) {
    std::thread::sleep(interval);
}

#[cfg(loom)]
#[inline]
pub(crate) fn backoff(_interval: Duration) {
    loom::thread::yield_now();
}
