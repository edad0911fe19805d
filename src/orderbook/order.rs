//! Order value entity and its lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The side of an order or a ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Bid side.
    Buy,
    /// Ask side.
    Sell,
}

impl Side {
    /// The opposing side (the ladder an incoming order matches against).
    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order kind. Market orders never rest on the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    /// Priced order; the residual rests at its limit price.
    Limit,
    /// Unpriced order; consumes liquidity regardless of price.
    Market,
}

/// Order lifecycle status.
///
/// Transitions: `New → {PartiallyFilled → {Filled, Canceled}, Filled,
/// Canceled, Rejected, Expired}`. Terminal states admit no further
/// mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted, nothing filled yet.
    New,
    /// Some quantity filled, remainder still working.
    PartiallyFilled,
    /// Fully filled. Terminal.
    Filled,
    /// Canceled by the owner. Terminal.
    Canceled,
    /// Rejected on submission. Terminal.
    Rejected,
    /// Expired by time-in-force handling. Terminal.
    Expired,
}

impl OrderStatus {
    /// Whether the status admits further fills or cancellation.
    #[inline]
    pub fn is_active(self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PartiallyFilled)
    }

    /// Whether the status is terminal.
    #[inline]
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

/// A single order.
///
/// While resting, an order is owned by exactly one book; price levels hold
/// handles into the book's id-index rather than the order itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Opaque printable identifier, unique within the book's lifetime.
    pub id: String,
    /// Instrument symbol; must match the receiving book.
    pub symbol: String,
    /// Buy or sell.
    pub side: Side,
    /// Limit or market.
    pub kind: OrderKind,
    /// Limit price. Zero is permitted only for market orders.
    pub price: f64,
    /// Original quantity, strictly positive.
    pub quantity: f64,
    /// Cumulative filled quantity; never decreases.
    pub filled_quantity: f64,
    /// Lifecycle status.
    pub status: OrderStatus,
    /// Creation timestamp, nanoseconds.
    pub created_at: u64,
    /// Timestamp of the last mutation, nanoseconds.
    pub last_updated_at: u64,
}

impl Order {
    /// Creates a new limit order.
    pub fn limit(
        id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        price: f64,
        quantity: f64,
        timestamp_ns: u64,
    ) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            side,
            kind: OrderKind::Limit,
            price,
            quantity,
            filled_quantity: 0.0,
            status: OrderStatus::New,
            created_at: timestamp_ns,
            last_updated_at: timestamp_ns,
        }
    }

    /// Creates a new market order. Price is fixed at zero.
    pub fn market(
        id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        quantity: f64,
        timestamp_ns: u64,
    ) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            side,
            kind: OrderKind::Market,
            price: 0.0,
            quantity,
            filled_quantity: 0.0,
            status: OrderStatus::New,
            created_at: timestamp_ns,
            last_updated_at: timestamp_ns,
        }
    }

    /// Reconstructs an order from persisted state (snapshot load).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restored(
        id: String,
        symbol: String,
        side: Side,
        kind: OrderKind,
        price: f64,
        quantity: f64,
        filled_quantity: f64,
        created_at: u64,
    ) -> Self {
        let status = if filled_quantity >= quantity {
            OrderStatus::Filled
        } else if filled_quantity > 0.0 {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::New
        };
        Self {
            id,
            symbol,
            side,
            kind,
            price,
            quantity,
            filled_quantity,
            status,
            created_at,
            last_updated_at: created_at,
        }
    }

    /// Quantity still working.
    #[inline]
    pub fn remaining_quantity(&self) -> f64 {
        (self.quantity - self.filled_quantity).max(0.0)
    }

    /// Whether the order can still be filled or canceled.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Applies a fill of `quantity` at `timestamp_ns`.
    ///
    /// Returns `false` without mutation when the order is not active or the
    /// quantity is not in `(0, remaining]`.
    pub(crate) fn fill(&mut self, quantity: f64, timestamp_ns: u64) -> bool {
        if !self.is_active() || quantity <= 0.0 || quantity > self.remaining_quantity() {
            return false;
        }
        self.filled_quantity += quantity;
        self.status = if self.filled_quantity >= self.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.last_updated_at = timestamp_ns;
        true
    }

    /// Cancels the order. Returns `false` when it is already terminal.
    pub(crate) fn cancel(&mut self, timestamp_ns: u64) -> bool {
        if !self.is_active() {
            return false;
        }
        self.status = OrderStatus::Canceled;
        self.last_updated_at = timestamp_ns;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(quantity: f64) -> Order {
        Order::limit("o-1", "BTC-USD", Side::Buy, 100.0, quantity, 10)
    }

    #[test]
    fn fill_walks_the_status_machine() {
        let mut o = order(2.0);
        assert_eq!(o.status, OrderStatus::New);

        assert!(o.fill(0.5, 11));
        assert_eq!(o.status, OrderStatus::PartiallyFilled);
        assert_eq!(o.remaining_quantity(), 1.5);

        assert!(o.fill(1.5, 12));
        assert_eq!(o.status, OrderStatus::Filled);
        assert_eq!(o.remaining_quantity(), 0.0);
        assert_eq!(o.last_updated_at, 12);

        // Terminal: no further mutation.
        assert!(!o.fill(0.1, 13));
        assert!(!o.cancel(13));
    }

    #[test]
    fn fill_rejects_invalid_quantities() {
        let mut o = order(1.0);
        assert!(!o.fill(0.0, 11));
        assert!(!o.fill(-1.0, 11));
        assert!(!o.fill(1.5, 11));
        assert_eq!(o.filled_quantity, 0.0);
        assert_eq!(o.status, OrderStatus::New);
    }

    #[test]
    fn cancel_is_terminal() {
        let mut o = order(1.0);
        assert!(o.cancel(11));
        assert_eq!(o.status, OrderStatus::Canceled);
        assert!(!o.cancel(12));
        assert!(!o.fill(0.5, 12));
    }

    #[test]
    fn restored_orders_infer_status_from_fill() {
        let o = Order::restored(
            "o-2".into(),
            "BTC-USD".into(),
            Side::Sell,
            OrderKind::Limit,
            101.0,
            3.0,
            1.0,
            5,
        );
        assert_eq!(o.status, OrderStatus::PartiallyFilled);
        assert_eq!(o.remaining_quantity(), 2.0);
    }

    #[test]
    fn market_orders_carry_zero_price() {
        let o = Order::market("m-1", "BTC-USD", Side::Buy, 4.0, 7);
        assert_eq!(o.kind, OrderKind::Market);
        assert_eq!(o.price, 0.0);
    }

    #[test]
    fn side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }
}
