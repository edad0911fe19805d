//! Convenience re-exports for the common case.
//!
//! ```
//! use matchbook::prelude::*;
//! ```

pub use crate::config::EngineConfig;
pub use crate::orderbook::{
    BookOps, BookSnapshot, BookUpdate, ConcurrentOrderBook, Fill, MarketSweep, Order, OrderBook,
    OrderKind, OrderStatus, Side,
};
pub use crate::persistence::{
    Journal, JournalOp, MaintenanceScheduler, PersistenceManager, RecoveryStatus,
};
pub use crate::queue::BoundedQueue;
pub use crate::time::{ManualClock, MonotonicClock, TimeSource};
