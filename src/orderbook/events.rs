//! Book update fan-out.
//!
//! Each book owns a single insertion-ordered listener list. After a
//! successful mutation releases the write discipline, the list is copied
//! locally and each listener is invoked on the mutating thread. Listeners
//! must be cheap or enqueue work elsewhere (see [`crate::queue`]); they
//! must never mutate the book.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A compact read-only summary of the book emitted on every mutation.
///
/// `sequence` is the authoritative per-book ordering: deliveries may
/// interleave between rapid mutations, so listeners should be idempotent
/// relative to it and can use gaps to detect missed updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookUpdate {
    /// Update sequence assigned inside the write discipline.
    pub sequence: u64,
    /// Best bid at notification time; `0.0` when bids are empty.
    pub best_bid: f64,
    /// Best ask at notification time; `f64::INFINITY` when asks are empty.
    pub best_ask: f64,
    /// Resting order count at notification time.
    pub order_count: usize,
    /// Timestamp of the mutation, nanoseconds.
    pub timestamp_ns: u64,
}

/// A thread-safe book update listener.
pub type BookUpdateListener = Arc<dyn Fn(&BookUpdate) + Send + Sync>;
