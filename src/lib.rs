//! # Matchbook
//!
//! A price-time-priority limit order book engine with durable state: a
//! memory-mapped write-ahead journal, periodic full-book snapshots, and a
//! crash-recovery procedure that deterministically reconstructs every book
//! from disk.
//!
//! ## Architecture
//!
//! One engine instance manages one instrument symbol per book. The moving
//! parts, leaves first:
//!
//! - [`time::TimeSource`] — injectable monotonic nanosecond clock.
//! - [`orderbook`] — two book implementations behind one contract
//!   ([`BookOps`]): [`OrderBook`] guards its ladders and id-index with a
//!   single reader/writer lock and is strictly linearizable;
//!   [`ConcurrentOrderBook`] partitions state across lock-free skip lists,
//!   a concurrent index, and per-side writer disciplines for throughput
//!   under contention. Semantics are identical; pick by latency profile.
//! - [`persistence::Journal`] / [`persistence::FileJournal`] — append-only
//!   memory-mapped operation log, one file per symbol, CRC-checked entries,
//!   bounded growth, online compaction.
//! - [`persistence::SnapshotStore`] — immutable full-book snapshots tagged
//!   with the journal checkpoint they include.
//! - [`persistence::PersistenceManager`] — the explicit persistence root:
//!   recovery (latest snapshot + journal tail replay), live-book registry,
//!   maintenance (snapshots, compaction, retention), shutdown flush.
//! - [`queue::BoundedQueue`] — lock-free bounded fan-out so update
//!   subscribers never block the matching path.
//!
//! ## Write path
//!
//! ```text
//! producer → book operation → journal append → subscriber fan-out
//!            (write discipline)  (inside it)     (after release)
//! ```
//!
//! The journal append happens inside the book's write discipline, so log
//! order always equals effect order; subscriber callbacks run on the
//! mutating thread after the discipline is released and must stay cheap.
//!
//! ## Example
//!
//! ```no_run
//! use matchbook::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = Arc::new(PersistenceManager::new(EngineConfig::default())?);
//! let status = manager.recover_state();
//! println!("recovery: {status:?}");
//!
//! let book = manager.open_book("BTC-USD")?;
//! book.add_order(Order::limit("o-1", "BTC-USD", Side::Buy, 100.0, 1.0, 0));
//! println!("best bid: {}", book.best_bid_price());
//!
//! manager.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod orderbook;
pub mod persistence;
pub mod prelude;
pub mod queue;
pub mod time;

pub use config::{ConfigError, EngineConfig};
pub use orderbook::{
    BookOps, BookSnapshot, BookUpdate, BookUpdateListener, ConcurrentOrderBook, Fill, LevelView,
    MarketSweep, Order, OrderBook, OrderKind, OrderStatus, Side,
};
pub use persistence::{
    FileJournal, Journal, JournalConfig, JournalEntry, JournalError, JournalOp, LoadedSnapshot,
    MaintenanceScheduler, PersistenceError, PersistenceManager, RecoveryStatus, SnapshotError,
    SnapshotStore,
};
pub use queue::BoundedQueue;
pub use time::{ManualClock, MonotonicClock, TimeSource};
