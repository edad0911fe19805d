//! Price-time-priority order books and their shared contract.

mod book;
mod book_ops;
mod concurrent;
mod events;
mod level;
mod matching;
mod order;
mod snapshot;

mod tests;

pub use book::OrderBook;
pub use book_ops::{BookOps, Fill, MarketSweep};
pub use concurrent::ConcurrentOrderBook;
pub use events::{BookUpdate, BookUpdateListener};
pub use order::{Order, OrderKind, OrderStatus, Side};
pub use snapshot::{BookSnapshot, LevelView};
