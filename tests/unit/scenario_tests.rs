//! End-to-end book scenarios, run against both implementations.

use matchbook::prelude::*;
use std::sync::Arc;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(1_000_000))
}

fn buy(id: &str, price: f64, qty: f64) -> Order {
    Order::limit(id, "BTC-USD", Side::Buy, price, qty, 1)
}

fn sell(id: &str, price: f64, qty: f64) -> Order {
    Order::limit(id, "BTC-USD", Side::Sell, price, qty, 1)
}

fn for_both(check: impl Fn(&dyn BookOps)) {
    let coarse = OrderBook::with_clock("BTC-USD", clock());
    check(&coarse);
    let fine = ConcurrentOrderBook::with_clock("BTC-USD", clock());
    check(&fine);
}

#[test]
fn two_sided_rest_then_best_prices() {
    for_both(|book| {
        assert!(book.add_order(buy("b1", 100.0, 1.0)));
        assert!(book.add_order(sell("s1", 101.0, 1.0)));

        assert_eq!(book.best_bid_price(), 100.0);
        assert_eq!(book.best_ask_price(), 101.0);
        assert_eq!(book.spread(), 1.0);
        assert_eq!(book.mid_price(), 100.5);
        assert_eq!(book.order_count(), 2);
    });
}

#[test]
fn marketable_limit_respects_its_own_price() {
    for_both(|book| {
        assert!(book.add_order(sell("s1", 100.0, 1.0)));
        assert!(book.add_order(sell("s2", 101.0, 1.0)));
        // 100.5 crosses the 100.0 ask only; the 101.0 level is out of
        // reach, so the residual rests at 100.5.
        assert!(book.add_order(buy("b1", 100.5, 1.5)));

        assert_eq!(book.best_bid_price(), 100.5);
        assert_eq!(book.best_ask_price(), 101.0);
        assert_eq!(book.order_count(), 2);
        assert!(book.order("s1").is_none());
        assert_eq!(book.order("b1").map(|o| o.remaining_quantity()), Some(0.5));
        assert_eq!(book.order("s2").map(|o| o.remaining_quantity()), Some(1.0));
    });
}

#[test]
fn cancel_between_adds_leaves_the_level_consistent() {
    for_both(|book| {
        assert!(book.add_order(buy("b1", 100.0, 1.0)));
        assert!(book.add_order(buy("b2", 100.0, 2.0)));
        assert!(book.cancel_order("b1"));

        let levels = book.bid_levels(1);
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].price, 100.0);
        assert_eq!(levels[0].total_quantity, 2.0);
        assert_eq!(levels[0].orders.len(), 1);
        assert_eq!(levels[0].orders[0].id, "b2");
        assert_eq!(book.order_count(), 1);
    });
}

#[test]
fn market_sweep_across_levels() {
    for_both(|book| {
        assert!(book.add_order(sell("s1", 100.0, 1.0)));
        assert!(book.add_order(sell("s2", 101.0, 2.0)));
        assert!(book.add_order(sell("s3", 102.0, 3.0)));

        let sweep = book.execute_market_order(Side::Buy, 4.0);

        assert_eq!(sweep.executed_quantity, 4.0);
        assert_eq!(
            sweep.fills,
            vec![
                Fill::new("s1", 1.0),
                Fill::new("s2", 2.0),
                Fill::new("s3", 1.0)
            ]
        );
        assert_eq!(book.best_ask_price(), 102.0);
        assert_eq!(book.order("s3").map(|o| o.remaining_quantity()), Some(2.0));
    });
}

#[test]
fn imbalance_over_the_top_levels() {
    for_both(|book| {
        // Five bid levels totaling 10.0 against five ask levels totaling 5.0.
        for (i, qty) in [2.0, 2.0, 2.0, 2.0, 2.0].iter().enumerate() {
            assert!(book.add_order(buy(&format!("b{i}"), 100.0 - i as f64, *qty)));
        }
        for (i, qty) in [1.0, 1.0, 1.0, 1.0, 1.0].iter().enumerate() {
            assert!(book.add_order(sell(&format!("s{i}"), 101.0 + i as f64, *qty)));
        }

        let imbalance = book.book_imbalance(5);
        assert!((imbalance - 1.0 / 3.0).abs() < 1e-12);
    });
}

#[test]
fn empty_book_boundary_values() {
    for_both(|book| {
        assert_eq!(book.best_bid_price(), 0.0);
        assert_eq!(book.best_ask_price(), f64::INFINITY);
        assert_eq!(book.mid_price(), 0.0);
        assert_eq!(book.spread(), 0.0);
        assert_eq!(book.book_imbalance(5), 0.0);
        assert_eq!(book.execute_market_order(Side::Buy, 1.0).executed_quantity, 0.0);
    });
}

#[test]
fn oversized_market_order_drains_the_side() {
    for_both(|book| {
        assert!(book.add_order(sell("s1", 100.0, 1.0)));
        assert!(book.add_order(sell("s2", 101.0, 2.0)));
        assert!(book.add_order(sell("s3", 102.0, 3.0)));

        let sweep = book.execute_market_order(Side::Buy, 100.0);
        assert_eq!(sweep.executed_quantity, 6.0);
        assert_eq!(book.ask_level_count(), 0);
        assert_eq!(book.best_ask_price(), f64::INFINITY);
    });
}

#[test]
fn prices_compare_exactly_without_normalization() {
    for_both(|book| {
        // Two prices a hair apart are distinct levels.
        assert!(book.add_order(buy("b1", 100.000000000001, 1.0)));
        assert!(book.add_order(buy("b2", 100.000000000002, 1.0)));
        assert_eq!(book.bid_level_count(), 2);
        assert_eq!(book.best_bid_price(), 100.000000000002);
    });
}
