//! Consistent book snapshots and derived metrics.

use super::order::Order;
use serde::{Deserialize, Serialize};

/// One price level as seen from outside: price, aggregate, and the full
/// order list in time priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelView {
    /// The level's price.
    pub price: f64,
    /// Sum of remaining quantities across the level's orders.
    pub total_quantity: f64,
    /// Orders at this level, oldest first.
    pub orders: Vec<Order>,
}

/// A consistent deep copy of the book at a single moment.
///
/// Bids are ordered best (highest) first, asks best (lowest) first. The
/// per-order `filled_quantity` is included so a snapshot can reconstruct
/// partially filled state exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    /// The instrument symbol.
    pub symbol: String,
    /// Capture timestamp, nanoseconds.
    pub timestamp_ns: u64,
    /// Bid levels, best first.
    pub bids: Vec<LevelView>,
    /// Ask levels, best first.
    pub asks: Vec<LevelView>,
}

impl BookSnapshot {
    /// Best bid price and quantity, if any.
    pub fn best_bid(&self) -> Option<(f64, f64)> {
        self.bids.first().map(|l| (l.price, l.total_quantity))
    }

    /// Best ask price and quantity, if any.
    pub fn best_ask(&self) -> Option<(f64, f64)> {
        self.asks.first().map(|l| (l.price, l.total_quantity))
    }

    /// Midpoint of best bid and ask.
    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    /// Best ask minus best bid.
    pub fn spread(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some(ask - bid),
            _ => None,
        }
    }

    /// Total resting quantity on the bid side.
    pub fn total_bid_volume(&self) -> f64 {
        self.bids.iter().map(|l| l.total_quantity).sum()
    }

    /// Total resting quantity on the ask side.
    pub fn total_ask_volume(&self) -> f64 {
        self.asks.iter().map(|l| l.total_quantity).sum()
    }

    /// Number of orders across both sides.
    pub fn order_count(&self) -> usize {
        self.bids
            .iter()
            .chain(self.asks.iter())
            .map(|l| l.orders.len())
            .sum()
    }

    /// Bid/ask volume imbalance over the top `depth` levels, in `[-1, 1]`.
    pub fn imbalance(&self, depth: usize) -> f64 {
        let bid_volume: f64 = self
            .bids
            .iter()
            .take(depth)
            .map(|l| l.total_quantity)
            .sum();
        let ask_volume: f64 = self
            .asks
            .iter()
            .take(depth)
            .map(|l| l.total_quantity)
            .sum();
        let total = bid_volume + ask_volume;
        if total > 0.0 {
            (bid_volume - ask_volume) / total
        } else {
            0.0
        }
    }
}
