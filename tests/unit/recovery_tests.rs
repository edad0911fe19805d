//! Persistence round trips: snapshot + journal replay equivalence,
//! compaction, and crash-tail tolerance.

use matchbook::prelude::*;
use matchbook::{EngineConfig, FileJournal, JournalConfig};
use std::path::Path;
use std::sync::Arc;

fn config(dir: &Path) -> EngineConfig {
    EngineConfig {
        data_directory: dir.to_path_buf(),
        journal_initial_size: 8 * 1024,
        journal_size_increment: 8 * 1024,
        journal_max_size: 4 * 1024 * 1024,
        snapshot_retention_count: 4,
        compaction_threshold: 3,
        maintenance_period_ms: 60_000,
    }
}

fn open_manager(dir: &Path) -> PersistenceManager {
    PersistenceManager::with_clock(config(dir), Arc::new(ManualClock::new(1_000)))
        .expect("persistence manager")
}

fn buy(id: &str, price: f64, qty: f64) -> Order {
    Order::limit(id, "BTC-USD", Side::Buy, price, qty, 1)
}

fn sell(id: &str, price: f64, qty: f64) -> Order {
    Order::limit(id, "BTC-USD", Side::Sell, price, qty, 1)
}

/// Shape of a book that can be compared across recovery paths.
fn fingerprint(book: &dyn BookOps) -> Vec<(String, f64, f64, f64)> {
    let snap = book.snapshot();
    let mut orders: Vec<(String, f64, f64, f64)> = snap
        .bids
        .iter()
        .chain(snap.asks.iter())
        .flat_map(|level| level.orders.iter())
        .map(|o| (o.id.clone(), o.price, o.quantity, o.filled_quantity))
        .collect();
    orders.sort_by(|a, b| a.0.cmp(&b.0));
    orders
}

/// Drives the canonical workload: a sweep plus two cancels, then two adds
/// after the snapshot point.
fn drive_pre_snapshot(book: &dyn BookOps) {
    assert!(book.add_order(sell("s1", 100.0, 1.0)));
    assert!(book.add_order(sell("s2", 101.0, 2.0)));
    assert!(book.add_order(sell("s3", 102.0, 3.0)));
    assert!(book.add_order(buy("b1", 99.0, 1.0)));
    assert!(book.add_order(buy("b2", 98.0, 2.0)));
    let sweep = book.execute_market_order(Side::Buy, 4.0);
    assert_eq!(sweep.executed_quantity, 4.0);
    assert!(book.cancel_order("b1"));
    assert!(book.cancel_order("b2"));
}

fn drive_post_snapshot(book: &dyn BookOps) {
    assert!(book.add_order(buy("b3", 99.5, 1.5)));
    assert!(book.add_order(sell("s4", 103.0, 0.5)));
}

#[test]
fn snapshot_then_replay_equals_full_replay() {
    // Load-from-snapshot plus tail replay must equal
    // replaying the whole journal into an empty book.
    let snap_dir = tempfile::tempdir().expect("tempdir");
    let full_dir = tempfile::tempdir().expect("tempdir");

    let expected = {
        let manager = open_manager(full_dir.path());
        let book = manager.open_book("BTC-USD").expect("book");
        drive_pre_snapshot(book.as_ref());
        drive_post_snapshot(book.as_ref());
        manager.shutdown();
        fingerprint(book.as_ref())
    };

    {
        let manager = open_manager(snap_dir.path());
        let book = manager.open_book("BTC-USD").expect("book");
        drive_pre_snapshot(book.as_ref());
        manager.perform_maintenance(); // snapshot + compaction here
        drive_post_snapshot(book.as_ref());
        manager.shutdown();
        assert_eq!(fingerprint(book.as_ref()), expected);
    }

    // Recover the snapshotted tree and compare.
    let manager = open_manager(snap_dir.path());
    assert_eq!(manager.recover_state(), RecoveryStatus::Success);
    let recovered = manager.book("BTC-USD").expect("recovered book");
    assert_eq!(fingerprint(recovered.as_ref()), expected);

    // And recover the journal-only tree.
    let manager = open_manager(full_dir.path());
    assert_eq!(manager.recover_state(), RecoveryStatus::Success);
    let recovered = manager.book("BTC-USD").expect("recovered book");
    assert_eq!(fingerprint(recovered.as_ref()), expected);
}

#[test]
fn snapshot_file_round_trip_preserves_every_field() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = open_manager(dir.path());
    let book = manager.open_book("BTC-USD").expect("book");

    assert!(book.add_order(buy("b1", 100.0, 2.0)));
    assert!(book.add_order(buy("b2", 99.0, 1.0)));
    assert!(book.add_order(sell("s1", 101.0, 3.0)));
    assert!(book.execute_order("s1", 1.25));

    let store = manager.snapshot_store("BTC-USD").expect("store");
    store
        .create_snapshot(&book.snapshot(), 4)
        .expect("create snapshot");

    let loaded = store.load_latest().expect("load").expect("present");
    assert_eq!(loaded.checkpoint_sequence, 4);
    assert_eq!(fingerprint(&loaded.book), fingerprint(book.as_ref()));

    let s1 = loaded.book.order("s1").expect("s1 restored");
    assert_eq!(s1.filled_quantity, 1.25);
    assert_eq!(s1.status, OrderStatus::PartiallyFilled);
}

#[test]
fn replay_does_not_rejournal() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let manager = open_manager(dir.path());
        let book = manager.open_book("BTC-USD").expect("book");
        assert!(book.add_order(buy("b1", 100.0, 1.0)));
        assert!(book.add_order(sell("s1", 101.0, 1.0)));
        manager.shutdown();
    }

    // Recover twice; the journal must not grow from recovery alone.
    for _ in 0..2 {
        let manager = open_manager(dir.path());
        assert_eq!(manager.recover_state(), RecoveryStatus::Success);
        let journal = manager.journal("BTC-USD").expect("journal");
        assert_eq!(journal.latest_sequence(), 2);
        assert_eq!(journal.read_entries_after(0).expect("read").len(), 2);
        manager.shutdown();
    }
}

#[test]
fn compaction_preserves_the_tail() {
    // Compacting at a checkpoint must not disturb the surviving tail.
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = FileJournal::open_with_config(
        dir.path().join("BTC-USD.journal"),
        JournalConfig {
            initial_size: 4096,
            size_increment: 4096,
            max_size: 1024 * 1024,
        },
    )
    .expect("journal");

    for i in 0..12 {
        let op = JournalOp::CancelOrder {
            order_id: format!("o-{i}"),
            timestamp_ns: i,
        };
        journal.append(&op, i).expect("append");
    }

    let before = journal.read_entries_after(5).expect("read");
    journal.compact(5).expect("compact");
    let after = journal.read_entries_after(5).expect("read");

    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(after.iter()) {
        assert_eq!(b.sequence, a.sequence);
        assert_eq!(b.op, a.op);
    }
    assert!(journal.read_entries_after(0).expect("read").len() == 7);
}

#[test]
fn recovery_skips_entries_for_unknown_orders() {
    // RecoveryMismatch tolerance: a cancel for an id that never rested is
    // skipped with a warning and replay continues.
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let manager = open_manager(dir.path());
        let journal = manager.journal("BTC-USD").expect("journal");
        let add = JournalOp::AddOrder {
            order: buy("b1", 100.0, 1.0),
        };
        journal.append(&add, 1).expect("append add");
        let phantom_cancel = JournalOp::CancelOrder {
            order_id: "ghost".to_string(),
            timestamp_ns: 2,
        };
        journal.append(&phantom_cancel, 2).expect("append cancel");
        let add2 = JournalOp::AddOrder {
            order: sell("s1", 101.0, 1.0),
        };
        journal.append(&add2, 3).expect("append add2");
        journal.flush().expect("flush");
        manager.shutdown();
    }

    let manager = open_manager(dir.path());
    assert_eq!(manager.recover_state(), RecoveryStatus::Success);
    let book = manager.book("BTC-USD").expect("recovered");
    assert_eq!(book.order_count(), 2);
    assert_eq!(book.best_bid_price(), 100.0);
    assert_eq!(book.best_ask_price(), 101.0);
}

#[test]
fn recovery_replays_market_orders_from_recorded_fills() {
    let dir = tempfile::tempdir().expect("tempdir");
    let expected = {
        let manager = open_manager(dir.path());
        let book = manager.open_book("BTC-USD").expect("book");
        assert!(book.add_order(sell("s1", 100.0, 1.0)));
        assert!(book.add_order(sell("s2", 101.0, 2.0)));
        let sweep = book.execute_market_order(Side::Buy, 1.5);
        assert_eq!(sweep.executed_quantity, 1.5);
        manager.shutdown();
        fingerprint(book.as_ref())
    };

    let manager = open_manager(dir.path());
    assert_eq!(manager.recover_state(), RecoveryStatus::Success);
    let book = manager.book("BTC-USD").expect("recovered");
    assert_eq!(fingerprint(book.as_ref()), expected);
    assert_eq!(book.order("s2").map(|o| o.remaining_quantity()), Some(1.5));
}

#[test]
fn multiple_symbols_recover_independently() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let manager = open_manager(dir.path());
        let btc = manager.open_book("BTC-USD").expect("btc");
        assert!(btc.add_order(buy("b1", 100.0, 1.0)));

        let eth = manager.open_book("ETH-USD").expect("eth");
        assert!(eth.add_order(Order::limit("e1", "ETH-USD", Side::Sell, 2_000.0, 5.0, 1)));
        manager.shutdown();
    }

    let manager = open_manager(dir.path());
    assert_eq!(manager.recover_state(), RecoveryStatus::Success);
    assert_eq!(manager.books().len(), 2);
    assert_eq!(
        manager.book("BTC-USD").expect("btc").best_bid_price(),
        100.0
    );
    assert_eq!(
        manager.book("ETH-USD").expect("eth").best_ask_price(),
        2_000.0
    );
}

#[test]
fn torn_journal_tail_recovers_the_prefix() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal_path = dir.path().join("journals").join("BTC-USD.journal");
    {
        let manager = open_manager(dir.path());
        let book = manager.open_book("BTC-USD").expect("book");
        assert!(book.add_order(buy("b1", 100.0, 1.0)));
        assert!(book.add_order(buy("b2", 99.0, 1.0)));
        assert!(book.add_order(buy("b3", 98.0, 1.0)));
        manager.shutdown();
    }

    // Flip a byte inside the last entry to simulate a torn write.
    {
        let journal = FileJournal::open_with_config(
            &journal_path,
            JournalConfig {
                initial_size: 8 * 1024,
                size_increment: 8 * 1024,
                max_size: 4 * 1024 * 1024,
            },
        )
        .expect("journal");
        let end = journal.write_position();
        drop(journal);
        let mut bytes = std::fs::read(&journal_path).expect("read journal");
        bytes[end - 6] ^= 0xFF;
        std::fs::write(&journal_path, &bytes).expect("write journal");
    }

    let manager = open_manager(dir.path());
    assert_eq!(manager.recover_state(), RecoveryStatus::Success);
    let book = manager.book("BTC-USD").expect("recovered");
    assert_eq!(book.order_count(), 2);
    assert!(book.order("b3").is_none());
}
