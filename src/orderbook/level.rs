//! Price levels and the ladder key type.

use super::order::Order;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Ladder key wrapping an `f64` price with a total order.
///
/// Ordering is `f64::total_cmp` on the stored bits; prices are compared
/// exactly as submitted, never normalized or rounded.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PriceKey(f64);

impl PriceKey {
    #[inline]
    pub(crate) fn new(price: f64) -> Self {
        Self(price)
    }

    #[inline]
    pub(crate) fn value(self) -> f64 {
        self.0
    }
}

impl PartialEq for PriceKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for PriceKey {}

impl PartialOrd for PriceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// A bucket of resting orders at a single price.
///
/// Orders are stored as id-handles into the book's index, in arrival order
/// (time priority). `total_quantity` tracks the sum of remaining quantities
/// and is reconciled from the index after partial fills.
#[derive(Debug, Clone)]
pub(crate) struct PriceLevel {
    price: f64,
    total_quantity: f64,
    orders: Vec<String>,
}

impl PriceLevel {
    pub(crate) fn new(price: f64) -> Self {
        Self {
            price,
            total_quantity: 0.0,
            orders: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn price(&self) -> f64 {
        self.price
    }

    #[inline]
    pub(crate) fn total_quantity(&self) -> f64 {
        self.total_quantity
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    #[inline]
    pub(crate) fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Order ids in time priority.
    #[inline]
    pub(crate) fn order_ids(&self) -> &[String] {
        &self.orders
    }

    /// Appends an order at the tail of the queue.
    pub(crate) fn add_order(&mut self, order_id: String, remaining_quantity: f64) {
        self.orders.push(order_id);
        self.total_quantity += remaining_quantity;
    }

    /// Removes an order by id. `remaining_quantity` is the removed order's
    /// outstanding quantity, subtracted from the aggregate.
    ///
    /// Cancellation is colder than insertion, so the linear scan is fine;
    /// levels stay shallow in practice.
    pub(crate) fn remove_order(&mut self, order_id: &str, remaining_quantity: f64) -> bool {
        if let Some(pos) = self.orders.iter().position(|id| id == order_id) {
            self.orders.remove(pos);
            self.total_quantity = (self.total_quantity - remaining_quantity).max(0.0);
            return true;
        }
        false
    }

    /// Recomputes the aggregate from the live index.
    ///
    /// Called after partial fills so the maintained sum cannot drift from
    /// the per-order remaining quantities.
    pub(crate) fn recompute_total(&mut self, index: &HashMap<String, Order>) {
        self.total_quantity = self
            .orders
            .iter()
            .filter_map(|id| index.get(id))
            .map(Order::remaining_quantity)
            .sum();
    }

    /// Drops ids no longer present in the index and recomputes the total.
    pub(crate) fn prune(&mut self, index: &HashMap<String, Order>) {
        self.orders.retain(|id| index.contains_key(id));
        self.recompute_total(index);
    }
}
