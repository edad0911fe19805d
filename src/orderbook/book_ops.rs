//! The shared order book contract.
//!
//! Two implementations expose identical semantics: [`OrderBook`] guards its
//! state with a single reader/writer lock and is strictly linearizable;
//! [`ConcurrentOrderBook`] partitions state across lock-free structures and
//! guarantees per-side monotonicity. The observable difference is latency
//! under contention, never results.
//!
//! [`OrderBook`]: crate::orderbook::OrderBook
//! [`ConcurrentOrderBook`]: crate::orderbook::ConcurrentOrderBook

use super::events::BookUpdateListener;
use super::order::{Order, Side};
use super::snapshot::{BookSnapshot, LevelView};
use serde::{Deserialize, Serialize};

/// A single maker fill produced by a market sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    /// The resting (maker) order that was filled.
    pub order_id: String,
    /// Quantity filled against that order.
    pub quantity: f64,
}

impl Fill {
    /// Convenience constructor.
    pub fn new(order_id: impl Into<String>, quantity: f64) -> Self {
        Self {
            order_id: order_id.into(),
            quantity,
        }
    }
}

/// The outcome of a market order sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketSweep {
    /// Total quantity executed across all fills.
    pub executed_quantity: f64,
    /// Per-maker fills in execution (priority) order.
    pub fills: Vec<Fill>,
}

/// Operations shared by both order book implementations.
///
/// Per-operation failures are reported as `false` with no mutation, no
/// journal entry, and no notification; causes are logged at trace level.
pub trait BookOps: Send + Sync {
    /// The instrument symbol this book manages.
    fn symbol(&self) -> &str;

    /// Submits an order.
    ///
    /// A limit order that crosses the book matches at price-time priority
    /// until exhausted or uncrossed; any residual rests at its limit price.
    /// Market orders match the same way but never rest. Rejects duplicate
    /// ids, symbol mismatches, and non-positive quantities or limit prices.
    fn add_order(&self, order: Order) -> bool;

    /// Cancels a resting order, dropping its level if it becomes empty.
    fn cancel_order(&self, order_id: &str) -> bool;

    /// Fills a resting order by `quantity` (an externally reported fill).
    ///
    /// Requires `0 < quantity <= remaining`. Fully filled orders leave the
    /// book.
    fn execute_order(&self, order_id: &str, quantity: f64) -> bool;

    /// Sweeps the opposite ladder in priority order with no price limit.
    fn execute_market_order(&self, side: Side, quantity: f64) -> MarketSweep;

    /// Looks up a resting order by id.
    fn order(&self, order_id: &str) -> Option<Order>;

    /// Best bid price; `0.0` when the bid ladder is empty.
    fn best_bid_price(&self) -> f64;

    /// Best ask price; `f64::INFINITY` when the ask ladder is empty.
    fn best_ask_price(&self) -> f64;

    /// Midpoint of best bid and ask; falls back to the available side, or
    /// `0.0` when the book is empty.
    fn mid_price(&self) -> f64;

    /// Best ask minus best bid; `0.0` unless both sides exist.
    fn spread(&self) -> f64;

    /// Number of resting orders.
    fn order_count(&self) -> usize;

    /// The book's mutation counter. Strictly monotonic across successful
    /// mutations.
    fn update_sequence(&self) -> u64;

    /// Number of bid price levels.
    fn bid_level_count(&self) -> usize;

    /// Number of ask price levels.
    fn ask_level_count(&self) -> usize;

    /// Top `depth` bid levels, best first, with their full order lists.
    fn bid_levels(&self, depth: usize) -> Vec<LevelView>;

    /// Top `depth` ask levels, best first, with their full order lists.
    fn ask_levels(&self, depth: usize) -> Vec<LevelView>;

    /// Resting quantity at an exact price, on either side.
    fn volume_at_price(&self, price: f64) -> f64;

    /// Projected volume-weighted execution price for a hypothetical order
    /// of `quantity`, walking the opposite ladder. Falls back to the best
    /// opposite price when nothing is executable, `0.0` on an empty side.
    fn market_impact(&self, side: Side, quantity: f64) -> f64;

    /// Alias for [`market_impact`](Self::market_impact): the projected
    /// price is the volume-weighted average over the levels consumed.
    fn vwap(&self, side: Side, quantity: f64) -> f64 {
        self.market_impact(side, quantity)
    }

    /// Bid/ask volume imbalance over the top `depth` levels, in `[-1, 1]`.
    fn book_imbalance(&self, depth: usize) -> f64;

    /// Consistent deep copy of the current state.
    fn snapshot(&self) -> BookSnapshot;

    /// Empties the book and notifies subscribers.
    fn clear(&self);

    /// Registers an update listener. Listeners are invoked on the mutating
    /// thread after the write discipline is released and must not mutate
    /// the book.
    fn subscribe_updates(&self, listener: BookUpdateListener);
}
