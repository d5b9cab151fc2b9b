//! A hazard-slot scheme protecting a single atomically replaceable pointer
//! against a fixed maximum number of concurrent readers.
//!
//! # Slots and Hazards
//!
//! The current and the previous payload live in two pointer slots, of which
//! exactly one is *live* at any instant, selected by a version flag. Before a
//! reader may dereference the live pointer it has to publish it in its own
//! *hazard* cell and then re-check the version. A writer installs a
//! replacement in the spare slot, flips the version and then waits until no
//! hazard cell advertises the retired pointer anymore, at which point it is
//! the pointer's sole owner again and can destroy it.
//!
//! # Total Order Argument
//!
//! Both the reader's hazard publication and the writer's version flip are
//! sequentially consistent, so all threads observe them in a single total
//! order. If a reader's re-check still sees the version it started from, its
//! hazard store precedes every later version store in that order, and the
//! writer flipping the version afterwards is guaranteed to observe the
//! hazard when it scans. If the re-check sees a newer version instead, the
//! reader retracts its hazard and restarts, so no guarantee is needed.
//! Consequently a payload is never destroyed while a non-retracted hazard
//! still references it.

use std::error::Error;
use std::fmt;
use std::ptr;

use crossbeam_utils::CachePadded;

use crate::config::Config;
use crate::sync::{self, fence, AtomicBool, AtomicPtr, AtomicUsize, Mutex, Ordering};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Guardian
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A hazard-slot protected pointer cell with space for `N` concurrent
/// readers.
///
/// The `Guardian` owns every payload passed to [`exchange`][Guardian::exchange]
/// until the payload has been replaced *and* drained, at which point it is
/// dropped exactly once. Dropping the `Guardian` itself drains and drops the
/// final payload.
///
/// Readers are identified by an id in `[0, N)`. The handle layer behind
/// [`try_reader`][Guardian::try_reader] manages ids automatically; the raw
/// [`lease`][Guardian::lease]/[`unlease`][Guardian::unlease] surface leaves
/// the id discipline to the caller.
pub struct Guardian<T, const N: usize> {
    /// The two payload slots, of which `slots[version]` is live.
    slots: [CachePadded<AtomicPtr<T>>; 2],
    /// Selects the live slot, always 0 or 1.
    version: CachePadded<AtomicUsize>,
    /// One hazard cell per reader id, written only by that reader.
    hazards: [CachePadded<AtomicPtr<T>>; N],
    /// Registry of handed-out reader ids (cold, only touched by
    /// `try_reader` and `Reader::drop`).
    claimed: [AtomicBool; N],
    /// Serializes writers and destruction.
    writer_lock: Mutex<()>,
    config: Config,
}

/********** impl inherent *************************************************************************/

impl<T, const N: usize> Guardian<T, N> {
    /// Creates an empty `Guardian` (both slots null, all hazards clear).
    #[inline]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates an empty `Guardian` using the given `config`.
    #[inline]
    pub fn with_config(config: Config) -> Self {
        Self {
            slots: std::array::from_fn(|_| CachePadded::new(AtomicPtr::new(ptr::null_mut()))),
            version: CachePadded::new(AtomicUsize::new(0)),
            hazards: std::array::from_fn(|_| CachePadded::new(AtomicPtr::new(ptr::null_mut()))),
            claimed: std::array::from_fn(|_| AtomicBool::new(false)),
            writer_lock: Mutex::new(()),
            config,
        }
    }

    /// Claims a free reader id and returns the handle owning it.
    ///
    /// The id is returned to the registry when the [`Reader`] is dropped.
    ///
    /// # Errors
    ///
    /// Fails if all `N` ids are currently claimed.
    #[inline]
    pub fn try_reader(&self) -> Result<Reader<'_, T, N>, IdsExhausted> {
        for (id, slot) in self.claimed.iter().enumerate() {
            if !slot.load(Ordering::Relaxed)
                && slot.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed).is_ok()
            {
                return Ok(Reader { guardian: self, id });
            }
        }

        Err(IdsExhausted)
    }

    /// Begins a read of the current payload on behalf of reader `id` and
    /// returns it (possibly null).
    ///
    /// The returned pointer is guaranteed not to be destroyed before the
    /// matching [`unlease`][Guardian::unlease]. The operation never fails; it
    /// retries internally while racing with a concurrent version flip and is
    /// lock-free in the absence of one.
    ///
    /// # Panics
    ///
    /// Panics if `id >= N`.
    ///
    /// # Safety
    ///
    /// `id` must be stable for this reader, must not be used by two readers
    /// concurrently and every `lease` must be paired with exactly one
    /// `unlease` on the same id. Dereferencing the pointer after the matching
    /// `unlease` (or while violating the id discipline) is undefined
    /// behavior.
    pub unsafe fn lease(&self, id: usize) -> *const T {
        loop {
            // (GRD:1) this `Acquire` load pairs with the `SeqCst` version
            // store in (GRD:4), ensuring the slot contents written before the
            // flip are visible below
            let version = self.version.load(Ordering::Acquire);
            let ptr = self.slots[version].load(Ordering::Relaxed);
            // (GRD:2) this `SeqCst` store participates in the total order
            // with the version store in (GRD:4)
            self.hazards[id].store(ptr, Ordering::SeqCst);
            // (GRD:3) if the version is unchanged, the store in (GRD:2)
            // precedes any later flip in the total order and the writer must
            // observe it during its drain scan
            if self.version.load(Ordering::Relaxed) == version {
                return ptr;
            }

            // a writer flipped the version in between, retract and retry
            self.hazards[id].store(ptr::null_mut(), Ordering::SeqCst);
        }
    }

    /// Ends the read started by the matching [`lease`][Guardian::lease] on
    /// the same id.
    ///
    /// # Panics
    ///
    /// Panics if `id >= N`.
    ///
    /// # Safety
    ///
    /// See [`lease`][Guardian::lease]; the pointer returned there must not be
    /// dereferenced anymore after this call.
    #[inline]
    pub unsafe fn unlease(&self, id: usize) {
        self.hazards[id].store(ptr::null_mut(), Ordering::SeqCst);
    }

    /// Atomically replaces the published payload with `replacement`, then
    /// blocks until the previous payload has been drained and destroys it.
    ///
    /// Writers are serialized among themselves and with destruction; readers
    /// are never blocked. The call may block arbitrarily long if a reader
    /// never releases its lease on the old payload.
    pub fn exchange(&self, replacement: Option<Box<T>>) {
        let replacement = replacement.map_or(ptr::null_mut(), Box::into_raw);
        let _writer = self.writer_lock.lock();

        let version = self.version.load(Ordering::Relaxed);
        // publication order of the slot write is carried by the version store
        self.slots[1 - version].store(replacement, Ordering::Relaxed);
        // (GRD:4) publication point: whoever observes the new version also
        // observes the slot written above; totally ordered with (GRD:2)
        self.version.store(1 - version, Ordering::SeqCst);

        let retired = self.slots[version].load(Ordering::Relaxed);
        if !retired.is_null() {
            self.drain(retired);
            // no hazard references `retired` anymore and the live slot no
            // longer hands it out, so this is the sole remaining owner
            unsafe { drop(Box::from_raw(retired)) };
        }
        self.slots[version].store(ptr::null_mut(), Ordering::Relaxed);
    }

    /// Spins until no hazard cell advertises `retired` anymore.
    fn drain(&self, retired: *mut T) {
        while self.is_protected(retired) {
            sync::backoff(self.config.backoff);
        }
    }

    /// Checks all hazard cells for `retired` (which must not be null).
    fn is_protected(&self, retired: *mut T) -> bool {
        // (GRD:5) this `SeqCst` fence joins the total order of (GRD:2) and
        // (GRD:4); the subsequent relaxed scan loads then suffice
        fence(Ordering::SeqCst);
        self.hazards.iter().any(|hazard| hazard.load(Ordering::Relaxed) == retired)
    }
}

/********** impl Debug ****************************************************************************/

impl<T, const N: usize> fmt::Debug for Guardian<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guardian")
            .field("version", &self.version.load(Ordering::Relaxed))
            .field("readers", &N)
            .finish_non_exhaustive()
    }
}

/********** impl Default **************************************************************************/

impl<T, const N: usize> Default for Guardian<T, N> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/********** impl Drop *****************************************************************************/

impl<T, const N: usize> Drop for Guardian<T, N> {
    fn drop(&mut self) {
        let _writer = self.writer_lock.lock();

        let version = self.version.load(Ordering::Relaxed);
        let last = self.slots[version].load(Ordering::Relaxed);
        if !last.is_null() {
            self.drain(last);
            unsafe { drop(Box::from_raw(last)) };
        }
    }
}

/********** impl Send + Sync **********************************************************************/

// payloads may be dropped by (and leased from) threads other than the one
// that allocated them
unsafe impl<T: Send, const N: usize> Send for Guardian<T, N> {}
unsafe impl<T: Send + Sync, const N: usize> Sync for Guardian<T, N> {}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Reader
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A handle owning one of a [`Guardian`]'s `N` reader ids.
///
/// The handle upholds the id discipline statically: the id is exclusively
/// claimed for as long as the `Reader` lives and taking a [`Lease`] borrows
/// the `Reader` mutably, so no two leases on the same id can overlap.
pub struct Reader<'g, T, const N: usize> {
    guardian: &'g Guardian<T, N>,
    id: usize,
}

/********** impl inherent *************************************************************************/

impl<'g, T, const N: usize> Reader<'g, T, N> {
    /// Returns the claimed reader id.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Begins a read of the current payload, ended when the returned guard is
    /// dropped.
    #[inline]
    #[must_use]
    pub fn lease(&mut self) -> Lease<'_, T> {
        // safety: the id is exclusively claimed and `&mut self` excludes an
        // overlapping lease on it
        let ptr = unsafe { self.guardian.lease(self.id) };
        Lease { hazard: &self.guardian.hazards[self.id], ptr }
    }
}

/********** impl Debug ****************************************************************************/

impl<T, const N: usize> fmt::Debug for Reader<'_, T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader").field("id", &self.id).finish_non_exhaustive()
    }
}

/********** impl Drop *****************************************************************************/

impl<T, const N: usize> Drop for Reader<'_, T, N> {
    #[inline]
    fn drop(&mut self) {
        self.guardian.claimed[self.id].store(false, Ordering::Release);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Lease
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An active read window on a [`Guardian`]'s payload.
///
/// The payload observed when the lease was taken remains valid until the
/// lease is dropped.
#[must_use]
pub struct Lease<'r, T> {
    hazard: &'r CachePadded<AtomicPtr<T>>,
    ptr: *const T,
}

/********** impl inherent *************************************************************************/

impl<T> Lease<'_, T> {
    /// Returns the leased payload, or `None` if null was published.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        // safety: the hazard cell keeps the pointee alive for the lifetime of
        // `self` and the returned borrow cannot outlive it
        unsafe { self.ptr.as_ref() }
    }

    /// Returns the leased pointer without touching the pointee.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.ptr
    }
}

/********** impl Debug ****************************************************************************/

impl<T> fmt::Debug for Lease<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("ptr", &self.ptr).finish()
    }
}

/********** impl Drop *****************************************************************************/

impl<T> Drop for Lease<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.hazard.store(ptr::null_mut(), Ordering::SeqCst);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// IdsExhausted
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Error type returned when all of a [`Guardian`]'s reader ids are claimed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IdsExhausted;

/********** impl Display **************************************************************************/

impl fmt::Display for IdsExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all reader ids of the guardian are currently claimed")
    }
}

/********** impl Error ****************************************************************************/

impl Error for IdsExhausted {}

////////////////////////////////////////////////////////////////////////////////////////////////////
