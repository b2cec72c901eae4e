//! Request-coalescing, time-bounded caching for expensive computations.
//!
//! The [`CoalescingCache`] makes sure that at most one computation per key is in flight at
//! any time. Concurrent callers for the same key wait for, and share, the result of that one
//! computation. Successful results are kept for a fixed time-to-live and are expired lazily,
//! when the next access observes that they went stale. Failed results are never served to
//! later callers.

#![warn(missing_docs)]

mod cache;
mod entry;
mod error;

pub use cache::*;
pub use entry::*;
pub use error::*;
