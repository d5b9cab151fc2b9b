//! Two cooperating primitives for safe memory reclamation of a single,
//! atomically updated shared datum with many concurrent readers and one
//! mutating writer at a time.
//!
//! Both answer the same question — how does a writer know it is safe to
//! destroy an old value after publishing a new one, without forcing readers
//! through a lock — at different points in the design space:
//!
//! - [`Guardian`] protects one pointer slot with per-reader hazard cells and
//!   a compile-time bound on concurrent readers. Readers publish the exact
//!   pointer they are about to use; the writer waits until no reader still
//!   advertises the old one.
//! - [`Protector`] counts readers on cache-padded stripes across their
//!   critical sections. The writer publishes a new pointer through an
//!   external atomic of its own and then waits until every stripe has
//!   drained to zero once.
//!
//! A program uses one or the other against a given datum, not both.
//!
//! # Examples
//!
//! Replacing a payload under `Guardian` protection:
//!
//! ```
//! use dataguard::Guardian;
//!
//! let guardian: Guardian<u64, 4> = Guardian::new();
//! guardian.exchange(Some(Box::new(7)));
//!
//! let mut reader = guardian.try_reader().unwrap();
//! {
//!     let lease = reader.lease();
//!     assert_eq!(lease.get(), Some(&7));
//! }
//!
//! // takes ownership of the new payload, destroys the old one after all
//! // leases on it have ended
//! guardian.exchange(Some(Box::new(9)));
//! assert_eq!(reader.lease().get(), Some(&9));
//! ```
//!
//! Guarding an externally managed pointer with `Protector`:
//!
//! ```
//! use std::ptr;
//! use std::sync::atomic::{AtomicPtr, Ordering};
//!
//! use dataguard::Protector;
//!
//! let protector: Protector = Protector::new();
//! let data = AtomicPtr::new(Box::into_raw(Box::new(7u64)));
//!
//! // reader side
//! {
//!     let _window = protector.enter();
//!     let ptr = data.load(Ordering::Acquire);
//!     assert_eq!(unsafe { *ptr }, 7);
//! }
//!
//! // writer side: publish first, then drain, then destroy
//! let old = data.swap(Box::into_raw(Box::new(9u64)), Ordering::SeqCst);
//! protector.scan();
//! unsafe { drop(Box::from_raw(old)) };
//!
//! # unsafe { drop(Box::from_raw(data.swap(ptr::null_mut(), Ordering::SeqCst))) };
//! ```

mod config;
mod guardian;
mod protector;
mod sync;

pub use crate::config::{Config, ConfigBuilder};
pub use crate::guardian::{Guardian, IdsExhausted, Lease, Reader};
pub use crate::protector::{Protector, Window};
