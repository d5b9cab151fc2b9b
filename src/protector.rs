//! A striped reader-count scheme guarding access windows around an
//! externally published pointer.
//!
//! Unlike [`Guardian`][crate::Guardian], the `Protector` never sees the
//! protected pointer itself. Readers bracket their accesses with a counted
//! window on one of `M` cache-padded stripes; a writer first publishes its
//! replacement through whatever external atomic it manages, then calls
//! [`scan`][Protector::scan] and may destroy the previous payload once it
//! returns.
//!
//! Both the window-opening increment and the writer's publication store are
//! sequentially consistent, so every reader either incremented before the
//! publication (and will be waited for by `scan`) or observes the new
//! pointer and never touches the retiring payload.

use std::fmt;

use crossbeam_utils::CachePadded;

use crate::config::Config;
use crate::sync::{self, AtomicUsize, Ordering, SlotCache};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Protector
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A grace-period primitive counting concurrent readers across `M` stripes.
///
/// Arriving threads are handed a stable stripe id round-robin; more than `M`
/// threads simply share stripes, which costs contention but no correctness.
pub struct Protector<const M: usize = 64> {
    /// The reader counters, one cache line each.
    stripes: [CachePadded<AtomicUsize>; M],
    /// Round-robin stripe handout for newly arriving threads.
    next_slot: AtomicUsize,
    /// The calling thread's assigned stripe, set on first use.
    slot: SlotCache,
    config: Config,
}

/********** impl inherent *************************************************************************/

impl<const M: usize> Protector<M> {
    /// Creates a new `Protector` with all stripes at zero.
    #[inline]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a new `Protector` using the given `config`.
    #[inline]
    pub fn with_config(config: Config) -> Self {
        Self {
            stripes: std::array::from_fn(|_| CachePadded::new(AtomicUsize::new(0))),
            next_slot: AtomicUsize::new(0),
            slot: SlotCache::new(),
            config,
        }
    }

    /// Opens a read window, ended when the returned guard is dropped.
    ///
    /// Any number of windows may be open concurrently, also from the same
    /// thread.
    #[inline]
    #[must_use]
    pub fn enter(&self) -> Window<'_> {
        let stripe = &self.stripes[self.slot_id()];
        // (PRT:1) this `SeqCst` increment is totally ordered with the
        // writer's publication store; see the module docs
        stripe.fetch_add(1, Ordering::SeqCst);
        Window { stripe }
    }

    /// Blocks until every stripe has been observed at zero at least once.
    ///
    /// Stripes are drained in order and need not all be zero simultaneously:
    /// a reader that opened its window *after* the caller's publication store
    /// does not endanger the retiring payload and may keep its window open
    /// without holding up the scan indefinitely. May block as long as any
    /// pre-publication window stays open.
    pub fn scan(&self) {
        for stripe in &self.stripes {
            while stripe.load(Ordering::SeqCst) > 0 {
                sync::backoff(self.config.backoff);
            }
        }
    }

    /// Returns the calling thread's stripe id, assigning one round-robin on
    /// first use.
    #[inline]
    fn slot_id(&self) -> usize {
        self.slot.get_or(|| self.next_slot.fetch_add(1, Ordering::Relaxed) % M)
    }
}

/********** impl Debug ****************************************************************************/

impl<const M: usize> fmt::Debug for Protector<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protector").field("stripes", &M).finish_non_exhaustive()
    }
}

/********** impl Default **************************************************************************/

impl<const M: usize> Default for Protector<M> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Window
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An open read window on a [`Protector`].
///
/// The window closes exactly once, when the guard is dropped; moving the
/// guard transfers that responsibility.
#[must_use]
pub struct Window<'p> {
    stripe: &'p CachePadded<AtomicUsize>,
}

/********** impl Debug ****************************************************************************/

impl fmt::Debug for Window<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window").finish_non_exhaustive()
    }
}

/********** impl Drop *****************************************************************************/

impl Drop for Window<'_> {
    #[inline]
    fn drop(&mut self) {
        // (PRT:2) totally ordered with (PRT:1); a scanning writer observes
        // the stripe at zero only after all its decrements
        self.stripe.fetch_sub(1, Ordering::SeqCst);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(all(test, not(loom)))]
mod tests {
    use std::sync::atomic::Ordering;
    use std::thread;

    use super::Protector;

    fn stripe_counts<const M: usize>(protector: &Protector<M>) -> Vec<usize> {
        protector.stripes.iter().map(|stripe| stripe.load(Ordering::Relaxed)).collect()
    }

    #[test]
    fn window_balances_stripe() {
        let protector: Protector<4> = Protector::new();

        let window = protector.enter();
        assert_eq!(stripe_counts(&protector).iter().sum::<usize>(), 1);
        drop(window);

        assert!(stripe_counts(&protector).iter().all(|&count| count == 0));
    }

    #[test]
    fn nested_windows_on_one_thread() {
        let protector: Protector<4> = Protector::new();

        let outer = protector.enter();
        let inner = protector.enter();
        assert_eq!(stripe_counts(&protector).iter().sum::<usize>(), 2);

        drop(inner);
        drop(outer);
        assert!(stripe_counts(&protector).iter().all(|&count| count == 0));
    }

    #[test]
    fn scan_returns_without_readers() {
        let protector: Protector<8> = Protector::new();
        protector.scan();
    }

    #[test]
    fn stripe_id_is_stable_per_thread() {
        let protector: Protector<4> = Protector::new();
        assert_eq!(protector.slot_id(), protector.slot_id());
    }

    #[test]
    fn handout_wraps_around() {
        // more threads than stripes; an out-of-range id would panic on the
        // stripe index inside `enter`
        let protector: Protector<2> = Protector::new();

        thread::scope(|scope| {
            for _ in 0..6 {
                scope.spawn(|| drop(protector.enter()));
            }
        });

        assert!(protector.next_slot.load(Ordering::Relaxed) >= 6);
        assert!(stripe_counts(&protector).iter().all(|&count| count == 0));
    }
}
