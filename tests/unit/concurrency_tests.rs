//! Multi-threaded workloads against both implementations.

use matchbook::prelude::*;
use std::sync::Arc;
use std::thread;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(1_000_000))
}

fn buy(id: &str, price: f64, qty: f64) -> Order {
    Order::limit(id, "BTC-USD", Side::Buy, price, qty, 1)
}

fn sell(id: &str, price: f64, qty: f64) -> Order {
    Order::limit(id, "BTC-USD", Side::Sell, price, qty, 1)
}

/// Structural consistency checks on a quiesced book.
fn check_consistency(book: &dyn BookOps) {
    let snap = book.snapshot();
    assert_eq!(
        snap.order_count(),
        book.order_count(),
        "order count must equal the orders held by the ladders"
    );

    for level in snap.bids.iter().chain(snap.asks.iter()) {
        let expected: f64 = level.orders.iter().map(|o| o.remaining_quantity()).sum();
        assert!(
            (level.total_quantity - expected).abs() < 1e-9,
            "level {} aggregate drifted",
            level.price
        );
        assert!(!level.orders.is_empty(), "empty level in ladder");
        for order in &level.orders {
            assert!(order.remaining_quantity() > 0.0, "dead order in level");
            assert!(
                book.order(&order.id).is_some(),
                "ladder order missing from index"
            );
        }
    }

    if let (Some((bid, _)), Some((ask, _))) = (snap.best_bid(), snap.best_ask()) {
        assert!(bid < ask, "crossed book after quiesce: {bid} >= {ask}");
    }
}

fn hammer(book: Arc<dyn BookOps>, threads: usize, ops: usize) {
    let workers: Vec<_> = (0..threads)
        .map(|t| {
            let book = Arc::clone(&book);
            thread::spawn(move || {
                for i in 0..ops {
                    let id = format!("w{t}-{i}");
                    match i % 5 {
                        0 | 1 => {
                            // Passive adds on alternating sides, spread out
                            // so makers do not cross each other.
                            if t % 2 == 0 {
                                book.add_order(buy(&id, 95.0 - (i % 7) as f64, 1.0));
                            } else {
                                book.add_order(sell(&id, 105.0 + (i % 7) as f64, 1.0));
                            }
                        }
                        2 => {
                            let victim = format!("w{t}-{}", i.saturating_sub(2));
                            book.cancel_order(&victim);
                        }
                        3 => {
                            let victim = format!("w{t}-{}", i.saturating_sub(3));
                            book.execute_order(&victim, 0.5);
                        }
                        _ => {
                            let side = if t % 2 == 0 { Side::Sell } else { Side::Buy };
                            book.execute_market_order(side, 0.25);
                        }
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker panicked");
    }
}

#[test]
fn coarse_book_survives_a_mixed_workload() {
    let book: Arc<dyn BookOps> = Arc::new(OrderBook::with_clock("BTC-USD", clock()));
    hammer(Arc::clone(&book), 8, 200);
    check_consistency(book.as_ref());
}

#[test]
fn fine_book_survives_a_mixed_workload() {
    let book: Arc<dyn BookOps> = Arc::new(ConcurrentOrderBook::with_clock("BTC-USD", clock()));
    hammer(Arc::clone(&book), 8, 200);
    check_consistency(book.as_ref());
}

#[test]
fn post_mutation_reads_reflect_the_write() {
    // After a successful mutation returns, the same thread must see it.
    let book = Arc::new(OrderBook::with_clock("BTC-USD", clock()));
    let workers: Vec<_> = (0..4)
        .map(|t| {
            let book = Arc::clone(&book);
            thread::spawn(move || {
                for i in 0..100 {
                    let id = format!("t{t}-{i}");
                    assert!(book.add_order(buy(&id, 50.0 + t as f64, 1.0)));
                    assert!(book.order(&id).is_some());
                    assert!(book.cancel_order(&id));
                    assert!(book.order(&id).is_none());
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }
    assert_eq!(book.order_count(), 0);
}

#[test]
fn sequences_observed_by_readers_are_monotonic() {
    let book = Arc::new(ConcurrentOrderBook::with_clock("BTC-USD", clock()));
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let reader = {
        let book = Arc::clone(&book);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut last = 0u64;
            while !stop.load(std::sync::atomic::Ordering::Acquire) {
                let seq = book.update_sequence();
                assert!(seq >= last, "update sequence went backwards");
                last = seq;
            }
        })
    };

    for i in 0..500 {
        book.add_order(buy(&format!("b{i}"), 40.0 + (i % 10) as f64 * 0.1, 1.0));
    }
    stop.store(true, std::sync::atomic::Ordering::Release);
    reader.join().expect("reader panicked");
}

#[test]
fn concurrent_journaled_writes_produce_a_dense_log() {
    // Journal sequences must be strictly monotonic and gap-free even when
    // many threads mutate at once.
    let dir = tempfile::tempdir().expect("tempdir");
    let config = EngineConfig {
        data_directory: dir.path().to_path_buf(),
        journal_initial_size: 64 * 1024,
        journal_size_increment: 64 * 1024,
        journal_max_size: 16 * 1024 * 1024,
        snapshot_retention_count: 3,
        compaction_threshold: 1_000_000,
        maintenance_period_ms: 60_000,
    };
    let manager = Arc::new(
        PersistenceManager::with_clock(config, clock()).expect("manager"),
    );
    let book = manager.open_book("BTC-USD").expect("book");

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let book = Arc::clone(&book);
            thread::spawn(move || {
                for i in 0..100 {
                    assert!(book.add_order(buy(&format!("t{t}-{i}"), 60.0 + t as f64, 1.0)));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }

    let journal = manager.journal("BTC-USD").expect("journal");
    let entries = journal.read_entries_after(0).expect("read");
    assert_eq!(entries.len(), 400);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.sequence, i as u64 + 1, "gap in journal sequences");
    }
    manager.shutdown();
}
