#![cfg(test)]


use super::order::{Order, Side};
use crate::time::ManualClock;
use std::sync::Arc;

/// Clock pinned near a known epoch for deterministic stamps.
pub(super) fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(1_000_000))
}

pub(super) fn buy(id: &str, price: f64, quantity: f64) -> Order {
    Order::limit(id, "TEST", Side::Buy, price, quantity, 1)
}

pub(super) fn sell(id: &str, price: f64, quantity: f64) -> Order {
    Order::limit(id, "TEST", Side::Sell, price, quantity, 1)
}
