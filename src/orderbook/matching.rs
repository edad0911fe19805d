//! Matching engine for the coarse order book.
//!
//! Everything here runs inside the book's write discipline: [`BookCore`] is
//! only reachable through the owning book's lock, so the functions mutate
//! ladders and the id-index freely.
//!
//! Trade price is always the maker's price: price-time priority rewards
//! resting liquidity.

use super::book::BookCore;
use super::book_ops::{Fill, MarketSweep};
use super::level::{PriceKey, PriceLevel};
use super::order::{Order, OrderKind, Side};
use std::collections::HashMap;
use tracing::{trace, warn};

/// Whether a limit taker can trade at the given maker price.
#[inline]
fn price_acceptable(taker_side: Side, taker_price: f64, maker_price: f64) -> bool {
    match taker_side {
        Side::Buy => maker_price <= taker_price,
        Side::Sell => maker_price >= taker_price,
    }
}

/// Fills the taker against one price level in time priority.
///
/// Fully filled makers are removed from the index and pruned from the
/// level; the level aggregate is reconciled afterwards. Returns the
/// quantity executed at this level.
fn fill_level(
    level: &mut PriceLevel,
    index: &mut HashMap<String, Order>,
    taker: &mut Order,
    timestamp_ns: u64,
    fills: &mut Vec<Fill>,
) -> f64 {
    let mut executed = 0.0;
    let mut completed: Vec<String> = Vec::new();

    for maker_id in level.order_ids() {
        if !taker.is_active() {
            break;
        }
        let Some(maker) = index.get_mut(maker_id) else {
            continue;
        };

        let fill_quantity = taker.remaining_quantity().min(maker.remaining_quantity());
        if fill_quantity <= 0.0 {
            continue;
        }

        maker.fill(fill_quantity, timestamp_ns);
        taker.fill(fill_quantity, timestamp_ns);
        executed += fill_quantity;
        fills.push(Fill::new(maker_id.clone(), fill_quantity));
        trace!(
            maker = %maker_id,
            taker = %taker.id,
            price = level.price(),
            quantity = fill_quantity,
            "matched"
        );

        if !maker.is_active() {
            completed.push(maker_id.clone());
        }
    }

    for id in &completed {
        index.remove(id);
    }
    level.prune(index);

    executed
}

impl BookCore {
    /// Best price key of the given ladder, if any.
    pub(super) fn best_key(&self, side: Side) -> Option<PriceKey> {
        match side {
            Side::Buy => self.bids.keys().next_back().copied(),
            Side::Sell => self.asks.keys().next().copied(),
        }
    }

    /// Best bid price, if any.
    pub(super) fn best_bid(&self) -> Option<f64> {
        self.best_key(Side::Buy).map(PriceKey::value)
    }

    /// Best ask price, if any.
    pub(super) fn best_ask(&self) -> Option<f64> {
        self.best_key(Side::Sell).map(PriceKey::value)
    }

    /// Matches an incoming order against the opposite ladder at price-time
    /// priority. Limit takers stop at their price; market takers sweep
    /// without a limit. Returns the executed quantity.
    pub(super) fn match_incoming(&mut self, taker: &mut Order, timestamp_ns: u64) -> f64 {
        let mut fills = Vec::new();
        self.match_incoming_collect(taker, timestamp_ns, &mut fills)
    }

    /// Like [`match_incoming`](Self::match_incoming), collecting per-maker
    /// fills.
    pub(super) fn match_incoming_collect(
        &mut self,
        taker: &mut Order,
        timestamp_ns: u64,
        fills: &mut Vec<Fill>,
    ) -> f64 {
        let opposite = taker.side.opposite();
        let mut executed = 0.0;

        while taker.is_active() && taker.remaining_quantity() > 0.0 {
            let Some(key) = self.best_key(opposite) else {
                break;
            };
            if taker.kind == OrderKind::Limit
                && !price_acceptable(taker.side, taker.price, key.value())
            {
                break;
            }

            let (ladder, index) = match opposite {
                Side::Buy => (&mut self.bids, &mut self.orders),
                Side::Sell => (&mut self.asks, &mut self.orders),
            };
            let Some(level) = ladder.get_mut(&key) else {
                break;
            };

            executed += fill_level(level, index, taker, timestamp_ns, fills);

            if level.is_empty() {
                ladder.remove(&key);
            }
        }

        executed
    }

    /// Sweeps the ladder opposite `side` in priority order with no price
    /// limit, until the requested quantity is filled or liquidity runs out.
    pub(super) fn sweep_market(
        &mut self,
        side: Side,
        quantity: f64,
        timestamp_ns: u64,
    ) -> MarketSweep {
        let mut sweep = MarketSweep::default();
        if quantity <= 0.0 {
            return sweep;
        }

        let mut taker = Order::market("", "", side, quantity, timestamp_ns);
        sweep.executed_quantity =
            self.match_incoming_collect(&mut taker, timestamp_ns, &mut sweep.fills);
        sweep
    }

    /// Re-applies a journaled fills list (market order replay).
    ///
    /// Fills referencing unknown order ids are skipped with a warning — the
    /// book continues replay. Returns the number of skipped fills.
    pub(super) fn apply_recorded_fills(&mut self, fills: &[Fill], timestamp_ns: u64) -> usize {
        let mut skipped = 0usize;

        for fill in fills {
            let Some(order) = self.orders.get_mut(&fill.order_id) else {
                warn!(order_id = %fill.order_id, "replayed fill references unknown order, skipping");
                skipped += 1;
                continue;
            };

            let quantity = fill.quantity.min(order.remaining_quantity());
            if quantity <= 0.0 {
                warn!(order_id = %fill.order_id, "replayed fill has no applicable quantity, skipping");
                skipped += 1;
                continue;
            }

            order.fill(quantity, timestamp_ns);
            let side = order.side;
            let price = order.price;
            let completed = !order.is_active();
            if completed {
                self.orders.remove(&fill.order_id);
            }
            self.reconcile_level(side, price);
        }

        skipped
    }

    /// Rests an order in its own ladder and the id-index.
    pub(super) fn insert_resting(&mut self, order: Order) {
        let key = PriceKey::new(order.price);
        let remaining = order.remaining_quantity();
        let ladder = match order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        ladder
            .entry(key)
            .or_insert_with(|| PriceLevel::new(key.value()))
            .add_order(order.id.clone(), remaining);
        self.orders.insert(order.id.clone(), order);
    }

    /// Removes a resting order from its level and the index, dropping the
    /// level if it becomes empty. Returns the removed order.
    pub(super) fn remove_resting(&mut self, order_id: &str) -> Option<Order> {
        let order = self.orders.remove(order_id)?;
        let key = PriceKey::new(order.price);
        let ladder = match order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if let Some(level) = ladder.get_mut(&key) {
            level.remove_order(order_id, order.remaining_quantity());
            if level.is_empty() {
                ladder.remove(&key);
            }
        }
        Some(order)
    }

    /// Reconciles a level's order list and aggregate with the index after a
    /// partial or completing fill, dropping the level if it emptied.
    pub(super) fn reconcile_level(&mut self, side: Side, price: f64) {
        let key = PriceKey::new(price);
        let ladder = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if let Some(level) = ladder.get_mut(&key) {
            level.prune(&self.orders);
            if level.is_empty() {
                ladder.remove(&key);
            }
        }
    }
}
