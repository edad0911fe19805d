//! Fine-grained order book: lock-free ladders, per-side writer discipline.
//!
//! State is partitioned so readers never block: the ladders are concurrent
//! skip lists (ordered, so best-price access needs no sorting), the
//! id→location index is a concurrent hash map, and the counters are
//! atomics. Mutations serialize per side through a writer mutex; order
//! lists inside a level sit behind their own lock, touched only while the
//! side's writer discipline is held.
//!
//! Snapshot reads observe a consistent moment (both side disciplines are
//! taken briefly); other cross-side reads get per-side monotonicity only.
//! Producers requiring strict linearizability should use
//! [`OrderBook`](super::OrderBook).

use super::book_ops::{BookOps, Fill, MarketSweep};
use super::events::{BookUpdate, BookUpdateListener};
use super::level::PriceKey;
use super::order::{Order, OrderKind, Side};
use super::snapshot::{BookSnapshot, LevelView};
use crate::persistence::journal::{Journal, JournalOp};
use crate::time::{MonotonicClock, TimeSource};
use crossbeam::atomic::AtomicCell;
use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{trace, warn};

/// Whether a limit taker can trade at the given maker price.
#[inline]
fn price_acceptable(taker_side: Side, taker_price: f64, maker_price: f64) -> bool {
    match taker_side {
        Side::Buy => maker_price <= taker_price,
        Side::Sell => maker_price >= taker_price,
    }
}

fn lock_plain(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A price level owning its orders, safe to share across the skip list.
///
/// The aggregate is kept in an [`AtomicCell`] so depth queries read it
/// without taking the order-list lock.
struct ConcurrentLevel {
    price: f64,
    total_quantity: AtomicCell<f64>,
    orders: RwLock<Vec<Order>>,
}

impl ConcurrentLevel {
    fn new(price: f64) -> Self {
        Self {
            price,
            total_quantity: AtomicCell::new(0.0),
            orders: RwLock::new(Vec::new()),
        }
    }

    fn read_orders(&self) -> std::sync::RwLockReadGuard<'_, Vec<Order>> {
        match self.orders.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_orders(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Order>> {
        match self.orders.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn total_quantity(&self) -> f64 {
        self.total_quantity.load()
    }

    fn order_count(&self) -> usize {
        self.read_orders().len()
    }

    fn find(&self, order_id: &str) -> Option<Order> {
        self.read_orders().iter().find(|o| o.id == order_id).cloned()
    }

    fn push_order(&self, order: Order) {
        let mut orders = self.write_orders();
        self.total_quantity
            .store(self.total_quantity.load() + order.remaining_quantity());
        orders.push(order);
    }

    /// Removes an order by id, reconciling the aggregate.
    fn remove_order(&self, order_id: &str) -> Option<Order> {
        let mut orders = self.write_orders();
        let pos = orders.iter().position(|o| o.id == order_id)?;
        let removed = orders.remove(pos);
        let total: f64 = orders.iter().map(Order::remaining_quantity).sum();
        self.total_quantity.store(total);
        Some(removed)
    }

    /// Fills one order by exactly `quantity`.
    ///
    /// Returns `Some(completed)` on success, `None` without mutation when
    /// the order is missing, terminal, or the quantity is out of range.
    fn fill_order(&self, order_id: &str, quantity: f64, timestamp_ns: u64) -> Option<bool> {
        let mut orders = self.write_orders();
        let pos = orders.iter().position(|o| o.id == order_id)?;
        {
            let order = &mut orders[pos];
            if !order.is_active() || quantity <= 0.0 || quantity > order.remaining_quantity() {
                return None;
            }
            order.fill(quantity, timestamp_ns);
        }
        let completed = !orders[pos].is_active();
        if completed {
            orders.remove(pos);
        }
        let total: f64 = orders.iter().map(Order::remaining_quantity).sum();
        self.total_quantity.store(total);
        Some(completed)
    }

    /// Matches the taker against this level in time priority.
    ///
    /// Returns the executed quantity and the ids of fully filled makers
    /// (already dropped from the level).
    fn match_up_to(
        &self,
        taker: &mut Order,
        timestamp_ns: u64,
        fills: &mut Vec<Fill>,
    ) -> (f64, Vec<String>) {
        let mut orders = self.write_orders();
        let mut executed = 0.0;
        let mut removed = Vec::new();

        for maker in orders.iter_mut() {
            if !taker.is_active() {
                break;
            }
            let fill_quantity = taker.remaining_quantity().min(maker.remaining_quantity());
            if fill_quantity <= 0.0 {
                continue;
            }
            maker.fill(fill_quantity, timestamp_ns);
            taker.fill(fill_quantity, timestamp_ns);
            executed += fill_quantity;
            fills.push(Fill::new(maker.id.clone(), fill_quantity));
            if !maker.is_active() {
                removed.push(maker.id.clone());
            }
        }

        orders.retain(Order::is_active);
        let total: f64 = orders.iter().map(Order::remaining_quantity).sum();
        self.total_quantity.store(total);

        (executed, removed)
    }

    fn view(&self) -> LevelView {
        let orders = self.read_orders();
        LevelView {
            price: self.price,
            total_quantity: orders.iter().map(Order::remaining_quantity).sum(),
            orders: orders.clone(),
        }
    }
}

/// Skip-list order book for a single symbol.
///
/// Exposes the same contract as [`OrderBook`](super::OrderBook); the
/// difference is latency under contention. Hot-path reads (best prices,
/// order count, update sequence) are wait-free.
pub struct ConcurrentOrderBook {
    symbol: String,
    bids: SkipMap<PriceKey, Arc<ConcurrentLevel>>,
    asks: SkipMap<PriceKey, Arc<ConcurrentLevel>>,
    order_locations: DashMap<String, (PriceKey, Side)>,
    order_count: AtomicUsize,
    update_sequence: AtomicU64,
    listeners: RwLock<Vec<BookUpdateListener>>,
    journal: RwLock<Option<Arc<dyn Journal>>>,
    journal_degraded: AtomicBool,
    last_trade_price: AtomicCell<f64>,
    has_traded: AtomicBool,
    clock: Arc<dyn TimeSource>,
    bid_write: Mutex<()>,
    ask_write: Mutex<()>,
}

impl ConcurrentOrderBook {
    /// Creates an empty book with the production clock.
    pub fn new(symbol: &str) -> Self {
        Self::with_clock(symbol, Arc::new(MonotonicClock::new()))
    }

    /// Creates an empty book with an injected clock.
    pub fn with_clock(symbol: &str, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            symbol: symbol.to_string(),
            bids: SkipMap::new(),
            asks: SkipMap::new(),
            order_locations: DashMap::new(),
            order_count: AtomicUsize::new(0),
            update_sequence: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
            journal: RwLock::new(None),
            journal_degraded: AtomicBool::new(false),
            last_trade_price: AtomicCell::new(0.0),
            has_traded: AtomicBool::new(false),
            clock,
            bid_write: Mutex::new(()),
            ask_write: Mutex::new(()),
        }
    }

    /// Attaches the journal this book appends to.
    pub fn attach_journal(&self, journal: Arc<dyn Journal>) {
        match self.journal.write() {
            Ok(mut slot) => *slot = Some(journal),
            Err(poisoned) => *poisoned.into_inner() = Some(journal),
        }
    }

    /// Whether a journal append has failed since the book was created.
    pub fn journal_degraded(&self) -> bool {
        self.journal_degraded.load(Ordering::Acquire)
    }

    /// Price of the last trade, if any trade has printed.
    pub fn last_trade_price(&self) -> Option<f64> {
        if self.has_traded.load(Ordering::Acquire) {
            Some(self.last_trade_price.load())
        } else {
            None
        }
    }

    /// Re-inserts a persisted order without matching, journaling, or
    /// notification (snapshot hydration).
    pub fn restore_resting_order(&self, order: Order) -> bool {
        if order.symbol != self.symbol
            || !order.is_active()
            || order.remaining_quantity() <= 0.0
            || order.kind != OrderKind::Limit
        {
            return false;
        }
        let _bid_guard = lock_plain(&self.bid_write);
        let _ask_guard = lock_plain(&self.ask_write);
        if self.order_locations.contains_key(&order.id) {
            return false;
        }
        let key = PriceKey::new(order.price);
        let side = order.side;
        let id = order.id.clone();
        self.side_map(side)
            .get_or_insert(key, Arc::new(ConcurrentLevel::new(order.price)))
            .value()
            .push_order(order);
        self.order_locations.insert(id, (key, side));
        self.order_count
            .store(self.order_locations.len(), Ordering::Release);
        true
    }

    fn side_map(&self, side: Side) -> &SkipMap<PriceKey, Arc<ConcurrentLevel>> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_guard(&self, side: Side) -> &Mutex<()> {
        match side {
            Side::Buy => &self.bid_write,
            Side::Sell => &self.ask_write,
        }
    }

    /// Matches the taker against the opposite ladder. Caller holds the
    /// opposite side's writer discipline.
    fn match_against(&self, taker: &mut Order, timestamp_ns: u64, fills: &mut Vec<Fill>) -> f64 {
        let opposite = taker.side.opposite();
        let ladder = self.side_map(opposite);
        let mut executed = 0.0;
        let mut empty_keys: Vec<PriceKey> = Vec::new();

        // SkipMap keeps prices sorted: ascending for asks, so a buy taker
        // walks forward and a sell taker walks in reverse over the bids.
        let entries: Box<dyn Iterator<Item = _>> = match taker.side {
            Side::Buy => Box::new(ladder.iter()),
            Side::Sell => Box::new(ladder.iter().rev()),
        };

        for entry in entries {
            if !taker.is_active() {
                break;
            }
            let price = entry.key().value();
            if taker.kind == OrderKind::Limit
                && !price_acceptable(taker.side, taker.price, price)
            {
                break;
            }

            let level = entry.value();
            let (level_executed, removed_ids) = level.match_up_to(taker, timestamp_ns, fills);
            if level_executed > 0.0 {
                executed += level_executed;
                self.last_trade_price.store(price);
                self.has_traded.store(true, Ordering::Release);
            }
            for id in &removed_ids {
                self.order_locations.remove(id);
            }
            if level.order_count() == 0 {
                empty_keys.push(*entry.key());
            }
        }

        // Batch-remove emptied levels after the walk.
        for key in &empty_keys {
            ladder.remove(key);
        }

        executed
    }

    /// Seals a successful mutation and builds the notification payload.
    /// Caller still holds the relevant writer discipline.
    fn finish_mutation(&self, op: Option<JournalOp>, timestamp_ns: u64) -> BookUpdate {
        self.order_count
            .store(self.order_locations.len(), Ordering::Release);
        let sequence = self.update_sequence.fetch_add(1, Ordering::AcqRel) + 1;

        if let Some(op) = op {
            self.journal_append(&op, timestamp_ns);
        }

        BookUpdate {
            sequence,
            best_bid: self.best_bid().unwrap_or(0.0),
            best_ask: self.best_ask().unwrap_or(f64::INFINITY),
            order_count: self.order_count.load(Ordering::Acquire),
            timestamp_ns,
        }
    }

    fn journal_append(&self, op: &JournalOp, timestamp_ns: u64) {
        let journal = match self.journal.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(journal) = journal {
            if let Err(e) = journal.append(op, timestamp_ns) {
                warn!(symbol = %self.symbol, error = %e, "journal append failed; book is ahead of the log");
                self.journal_degraded.store(true, Ordering::Release);
            }
        }
    }

    fn notify(&self, update: &BookUpdate) {
        let listeners: Vec<BookUpdateListener> = match self.listeners.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for listener in &listeners {
            listener(update);
        }
    }

    fn best_bid(&self) -> Option<f64> {
        self.bids.iter().next_back().map(|e| e.key().value())
    }

    fn best_ask(&self) -> Option<f64> {
        self.asks.iter().next().map(|e| e.key().value())
    }

    fn levels_best_first(&self, side: Side, depth: usize) -> Vec<LevelView> {
        let ladder = self.side_map(side);
        let entries: Box<dyn Iterator<Item = _>> = match side {
            Side::Buy => Box::new(ladder.iter().rev()),
            Side::Sell => Box::new(ladder.iter()),
        };
        entries.take(depth).map(|e| e.value().view()).collect()
    }
}

impl BookOps for ConcurrentOrderBook {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn add_order(&self, order: Order) -> bool {
        if order.symbol != self.symbol {
            trace!(id = %order.id, symbol = %order.symbol, "rejected: symbol mismatch");
            return false;
        }
        if !order.is_active() || order.quantity <= 0.0 || order.remaining_quantity() <= 0.0 {
            trace!(id = %order.id, "rejected: inactive or non-positive quantity");
            return false;
        }
        if order.kind == OrderKind::Limit && order.price <= 0.0 {
            trace!(id = %order.id, price = order.price, "rejected: non-positive limit price");
            return false;
        }

        let submitted = order.clone();

        // Both side disciplines, fixed order: matching mutates the opposite
        // ladder, the residual rests on the order's own side.
        let _bid_guard = lock_plain(&self.bid_write);
        let _ask_guard = lock_plain(&self.ask_write);

        if self.order_locations.contains_key(&order.id) {
            trace!(id = %order.id, "rejected: duplicate id");
            return false;
        }

        let timestamp_ns = self.clock.now_nanos();
        let mut taker = order;
        let mut fills = Vec::new();
        self.match_against(&mut taker, timestamp_ns, &mut fills);

        if taker.kind == OrderKind::Limit && taker.is_active() && taker.remaining_quantity() > 0.0
        {
            let key = PriceKey::new(taker.price);
            let side = taker.side;
            let id = taker.id.clone();
            self.side_map(side)
                .get_or_insert(key, Arc::new(ConcurrentLevel::new(taker.price)))
                .value()
                .push_order(taker);
            self.order_locations.insert(id, (key, side));
        }

        let update = self.finish_mutation(
            Some(JournalOp::AddOrder { order: submitted }),
            timestamp_ns,
        );
        drop(_ask_guard);
        drop(_bid_guard);
        self.notify(&update);
        true
    }

    fn cancel_order(&self, order_id: &str) -> bool {
        let Some((key, side)) = self.order_locations.get(order_id).map(|r| *r.value()) else {
            trace!(id = %order_id, "cancel rejected: not found");
            return false;
        };

        let guard = lock_plain(self.side_guard(side));

        // Re-resolve under the discipline: the order may have filled or
        // been canceled while we were acquiring it.
        let Some(entry) = self.side_map(side).get(&key) else {
            trace!(id = %order_id, "cancel rejected: level gone");
            return false;
        };
        let level = entry.value().clone();
        let timestamp_ns = self.clock.now_nanos();
        let Some(mut removed) = level.remove_order(order_id) else {
            trace!(id = %order_id, "cancel rejected: not at level");
            return false;
        };
        removed.cancel(timestamp_ns);
        self.order_locations.remove(order_id);
        if level.order_count() == 0 {
            self.side_map(side).remove(&key);
        }

        let update = self.finish_mutation(
            Some(JournalOp::CancelOrder {
                order_id: order_id.to_string(),
                timestamp_ns,
            }),
            timestamp_ns,
        );
        drop(guard);
        self.notify(&update);
        true
    }

    fn execute_order(&self, order_id: &str, quantity: f64) -> bool {
        let Some((key, side)) = self.order_locations.get(order_id).map(|r| *r.value()) else {
            trace!(id = %order_id, "execute rejected: not found");
            return false;
        };

        let guard = lock_plain(self.side_guard(side));

        let Some(entry) = self.side_map(side).get(&key) else {
            trace!(id = %order_id, "execute rejected: level gone");
            return false;
        };
        let level = entry.value().clone();
        let timestamp_ns = self.clock.now_nanos();
        let Some(completed) = level.fill_order(order_id, quantity, timestamp_ns) else {
            trace!(id = %order_id, quantity, "execute rejected: bad quantity or missing");
            return false;
        };

        if completed {
            self.order_locations.remove(order_id);
            if level.order_count() == 0 {
                self.side_map(side).remove(&key);
            }
        }
        self.last_trade_price.store(key.value());
        self.has_traded.store(true, Ordering::Release);

        let update = self.finish_mutation(
            Some(JournalOp::ExecuteOrder {
                order_id: order_id.to_string(),
                quantity,
                timestamp_ns,
            }),
            timestamp_ns,
        );
        drop(guard);
        self.notify(&update);
        true
    }

    fn execute_market_order(&self, side: Side, quantity: f64) -> MarketSweep {
        let mut sweep = MarketSweep::default();
        if quantity <= 0.0 {
            return sweep;
        }

        // The sweep mutates the opposite ladder only.
        let guard = lock_plain(self.side_guard(side.opposite()));

        let timestamp_ns = self.clock.now_nanos();
        let mut taker = Order::market("", "", side, quantity, timestamp_ns);
        sweep.executed_quantity = self.match_against(&mut taker, timestamp_ns, &mut sweep.fills);

        if sweep.executed_quantity <= 0.0 {
            return sweep;
        }

        let update = self.finish_mutation(
            Some(JournalOp::MarketOrder {
                side,
                quantity,
                fills: sweep.fills.clone(),
                timestamp_ns,
            }),
            timestamp_ns,
        );
        drop(guard);
        self.notify(&update);
        sweep
    }

    fn order(&self, order_id: &str) -> Option<Order> {
        let (key, side) = *self.order_locations.get(order_id)?.value();
        self.side_map(side)
            .get(&key)
            .and_then(|entry| entry.value().find(order_id))
    }

    fn best_bid_price(&self) -> f64 {
        self.best_bid().unwrap_or(0.0)
    }

    fn best_ask_price(&self) -> f64 {
        self.best_ask().unwrap_or(f64::INFINITY)
    }

    fn mid_price(&self) -> f64 {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => (bid + ask) / 2.0,
            (Some(bid), None) => bid,
            (None, Some(ask)) => ask,
            (None, None) => 0.0,
        }
    }

    fn spread(&self) -> f64 {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => ask - bid,
            _ => 0.0,
        }
    }

    fn order_count(&self) -> usize {
        self.order_count.load(Ordering::Acquire)
    }

    fn update_sequence(&self) -> u64 {
        self.update_sequence.load(Ordering::Acquire)
    }

    fn bid_level_count(&self) -> usize {
        self.bids.len()
    }

    fn ask_level_count(&self) -> usize {
        self.asks.len()
    }

    fn bid_levels(&self, depth: usize) -> Vec<LevelView> {
        self.levels_best_first(Side::Buy, depth)
    }

    fn ask_levels(&self, depth: usize) -> Vec<LevelView> {
        self.levels_best_first(Side::Sell, depth)
    }

    fn volume_at_price(&self, price: f64) -> f64 {
        let key = PriceKey::new(price);
        if let Some(entry) = self.bids.get(&key) {
            return entry.value().total_quantity();
        }
        if let Some(entry) = self.asks.get(&key) {
            return entry.value().total_quantity();
        }
        0.0
    }

    fn market_impact(&self, side: Side, quantity: f64) -> f64 {
        let opposite = side.opposite();
        let ladder = self.side_map(opposite);
        let entries: Box<dyn Iterator<Item = _>> = match side {
            Side::Buy => Box::new(ladder.iter()),
            Side::Sell => Box::new(ladder.iter().rev()),
        };

        let mut remaining = quantity;
        let mut weighted = 0.0;
        let mut executed = 0.0;
        let mut best: Option<f64> = None;
        for entry in entries {
            let price = entry.key().value();
            if best.is_none() {
                best = Some(price);
            }
            if remaining <= 0.0 {
                break;
            }
            let available = entry.value().total_quantity();
            let take = remaining.min(available);
            weighted += price * take;
            executed += take;
            remaining -= take;
        }

        if executed > 0.0 {
            weighted / executed
        } else {
            best.unwrap_or(0.0)
        }
    }

    fn book_imbalance(&self, depth: usize) -> f64 {
        let bid_volume: f64 = self
            .bids
            .iter()
            .rev()
            .take(depth)
            .map(|e| e.value().total_quantity())
            .sum();
        let ask_volume: f64 = self
            .asks
            .iter()
            .take(depth)
            .map(|e| e.value().total_quantity())
            .sum();
        let total = bid_volume + ask_volume;
        if total > 0.0 {
            (bid_volume - ask_volume) / total
        } else {
            0.0
        }
    }

    fn snapshot(&self) -> BookSnapshot {
        // Both disciplines briefly, so the two sides describe one moment.
        let _bid_guard = lock_plain(&self.bid_write);
        let _ask_guard = lock_plain(&self.ask_write);
        BookSnapshot {
            symbol: self.symbol.clone(),
            timestamp_ns: self.clock.now_nanos(),
            bids: self.levels_best_first(Side::Buy, usize::MAX),
            asks: self.levels_best_first(Side::Sell, usize::MAX),
        }
    }

    fn clear(&self) {
        let _bid_guard = lock_plain(&self.bid_write);
        let _ask_guard = lock_plain(&self.ask_write);
        let bid_keys: Vec<PriceKey> = self.bids.iter().map(|e| *e.key()).collect();
        for key in &bid_keys {
            self.bids.remove(key);
        }
        let ask_keys: Vec<PriceKey> = self.asks.iter().map(|e| *e.key()).collect();
        for key in &ask_keys {
            self.asks.remove(key);
        }
        self.order_locations.clear();
        let timestamp_ns = self.clock.now_nanos();
        let update = self.finish_mutation(None, timestamp_ns);
        drop(_ask_guard);
        drop(_bid_guard);
        self.notify(&update);
    }

    fn subscribe_updates(&self, listener: BookUpdateListener) {
        match self.listeners.write() {
            Ok(mut guard) => guard.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }
}

impl std::fmt::Debug for ConcurrentOrderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentOrderBook")
            .field("symbol", &self.symbol)
            .field("order_count", &self.order_count())
            .field("update_sequence", &self.update_sequence())
            .finish()
    }
}
