//! Property tests: structural invariants hold for arbitrary operation
//! sequences, and both implementations stay in lockstep.

use matchbook::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Add { id: u8, side: Side, price_ticks: u8, qty_ticks: u8 },
    Cancel { id: u8 },
    Execute { id: u8, qty_ticks: u8 },
    Market { side: Side, qty_ticks: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..40, any::<bool>(), 1u8..60, 1u8..20).prop_map(|(id, buy, price, qty)| Op::Add {
            id,
            side: if buy { Side::Buy } else { Side::Sell },
            price_ticks: price,
            qty_ticks: qty,
        }),
        (0u8..40).prop_map(|id| Op::Cancel { id }),
        (0u8..40, 1u8..10).prop_map(|(id, qty)| Op::Execute { id, qty_ticks: qty }),
        (any::<bool>(), 1u8..15).prop_map(|(buy, qty)| Op::Market {
            side: if buy { Side::Buy } else { Side::Sell },
            qty_ticks: qty,
        }),
    ]
}

fn apply(book: &dyn BookOps, op: &Op) {
    match op {
        Op::Add {
            id,
            side,
            price_ticks,
            qty_ticks,
        } => {
            let order = Order::limit(
                format!("o-{id}"),
                "PROP",
                *side,
                100.0 + *price_ticks as f64 * 0.25,
                *qty_ticks as f64 * 0.5,
                1,
            );
            book.add_order(order);
        }
        Op::Cancel { id } => {
            book.cancel_order(&format!("o-{id}"));
        }
        Op::Execute { id, qty_ticks } => {
            book.execute_order(&format!("o-{id}"), *qty_ticks as f64 * 0.25);
        }
        Op::Market { side, qty_ticks } => {
            book.execute_market_order(*side, *qty_ticks as f64 * 0.5);
        }
    }
}

// Uses prop_assert, so it returns a TestCaseResult for the proptest body.
fn assert_invariants(book: &dyn BookOps) -> Result<(), TestCaseError> {
    let snap = book.snapshot();

    // The count, the index, and the ladder order lists must agree.
    prop_assert_eq!(snap.order_count(), book.order_count());

    // Never crossed.
    if let (Some((bid, _)), Some((ask, _))) = (snap.best_bid(), snap.best_ask()) {
        prop_assert!(bid < ask, "crossed: {} >= {}", bid, ask);
    }

    // Per-level aggregates match order remainders, and no
    // empty levels survive.
    for level in snap.bids.iter().chain(snap.asks.iter()) {
        let expected: f64 = level.orders.iter().map(|o| o.remaining_quantity()).sum();
        prop_assert!(
            (level.total_quantity - expected).abs() < 1e-9,
            "level {} aggregate {} != {}",
            level.price,
            level.total_quantity,
            expected
        );
        prop_assert!(!level.orders.is_empty());
        for order in &level.orders {
            prop_assert!(order.remaining_quantity() > 0.0);
        }
    }

    Ok(())
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(1))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn coarse_book_invariants_hold(ops in proptest::collection::vec(op_strategy(), 1..80)) {
        let book = OrderBook::with_clock("PROP", clock());
        for op in &ops {
            apply(&book, op);
            assert_invariants(&book)?;
        }
    }

    #[test]
    fn fine_book_invariants_hold(ops in proptest::collection::vec(op_strategy(), 1..80)) {
        let book = ConcurrentOrderBook::with_clock("PROP", clock());
        for op in &ops {
            apply(&book, op);
            assert_invariants(&book)?;
        }
    }

    #[test]
    fn implementations_agree_on_serial_schedules(
        ops in proptest::collection::vec(op_strategy(), 1..60)
    ) {
        let coarse = OrderBook::with_clock("PROP", clock());
        let fine = ConcurrentOrderBook::with_clock("PROP", clock());

        for op in &ops {
            apply(&coarse, op);
            apply(&fine, op);
        }

        prop_assert_eq!(coarse.order_count(), fine.order_count());
        prop_assert_eq!(coarse.best_bid_price(), fine.best_bid_price());
        prop_assert_eq!(coarse.best_ask_price(), fine.best_ask_price());
        prop_assert_eq!(coarse.bid_level_count(), fine.bid_level_count());
        prop_assert_eq!(coarse.ask_level_count(), fine.ask_level_count());

        let coarse_snap = coarse.snapshot();
        let fine_snap = fine.snapshot();
        let flatten = |snap: &BookSnapshot| -> Vec<(String, f64, f64)> {
            let mut orders: Vec<(String, f64, f64)> = snap
                .bids
                .iter()
                .chain(snap.asks.iter())
                .flat_map(|l| l.orders.iter())
                .map(|o| (o.id.clone(), o.price, o.remaining_quantity()))
                .collect();
            orders.sort_by(|a, b| a.0.cmp(&b.0));
            orders
        };
        prop_assert_eq!(flatten(&coarse_snap), flatten(&fine_snap));
    }

    #[test]
    fn journal_round_trip_reproduces_any_schedule(
        ops in proptest::collection::vec(op_strategy(), 1..50)
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = EngineConfig {
            data_directory: dir.path().to_path_buf(),
            journal_initial_size: 32 * 1024,
            journal_size_increment: 32 * 1024,
            journal_max_size: 8 * 1024 * 1024,
            snapshot_retention_count: 2,
            compaction_threshold: 1_000_000,
            maintenance_period_ms: 60_000,
        };

        let fingerprint = {
            let manager = PersistenceManager::with_clock(config.clone(), clock())
                .expect("manager");
            let book = manager.open_book("PROP").expect("book");
            for op in &ops {
                apply(book.as_ref(), op);
            }
            manager.shutdown();
            let snap = book.snapshot();
            let mut orders: Vec<(String, f64)> = snap
                .bids
                .iter()
                .chain(snap.asks.iter())
                .flat_map(|l| l.orders.iter())
                .map(|o| (o.id.clone(), o.remaining_quantity()))
                .collect();
            orders.sort_by(|a, b| a.0.cmp(&b.0));
            orders
        };

        let manager = PersistenceManager::with_clock(config, clock()).expect("manager");
        let status = manager.recover_state();
        prop_assert!(matches!(
            status,
            RecoveryStatus::Success | RecoveryStatus::CleanStart
        ));
        if let Some(book) = manager.book("PROP") {
            let snap = book.snapshot();
            let mut orders: Vec<(String, f64)> = snap
                .bids
                .iter()
                .chain(snap.asks.iter())
                .flat_map(|l| l.orders.iter())
                .map(|o| (o.id.clone(), o.remaining_quantity()))
                .collect();
            orders.sort_by(|a, b| a.0.cmp(&b.0));
            prop_assert_eq!(orders, fingerprint);
        } else {
            prop_assert!(fingerprint.is_empty());
        }
    }
}
