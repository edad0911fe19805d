//! Coarse-grained order book: one reader/writer lock, strict
//! linearizability.
//!
//! Ladders, id-index, and their invariants live inside a single [`RwLock`];
//! reads take shared access, mutations exclusive. The journal append for a
//! successful mutation happens inside the write section (journal order
//! equals effect order), subscriber callbacks fire after the lock is
//! released so callback code can read the book freely.

use super::book_ops::{BookOps, MarketSweep};
use super::events::{BookUpdate, BookUpdateListener};
use super::level::{PriceKey, PriceLevel};
use super::order::{Order, OrderKind, Side};
use super::snapshot::{BookSnapshot, LevelView};
use crate::persistence::journal::{Journal, JournalOp};
use crate::time::{MonotonicClock, TimeSource};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{trace, warn};

/// The lock-protected state: two ordered ladders and the order index.
///
/// The index owns the orders; levels hold id-handles into it.
pub(super) struct BookCore {
    pub(super) bids: BTreeMap<PriceKey, PriceLevel>,
    pub(super) asks: BTreeMap<PriceKey, PriceLevel>,
    pub(super) orders: HashMap<String, Order>,
}

impl BookCore {
    fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            orders: HashMap::new(),
        }
    }

    /// Builds a [`LevelView`] for one ladder entry.
    fn level_view(&self, level: &PriceLevel) -> LevelView {
        LevelView {
            price: level.price(),
            total_quantity: level.total_quantity(),
            orders: level
                .order_ids()
                .iter()
                .filter_map(|id| self.orders.get(id).cloned())
                .collect(),
        }
    }
}

/// Reader/writer-lock order book for a single symbol.
///
/// This is the strictly linearizable implementation: after any successful
/// mutation returns, every subsequent read on any thread reflects it. Use
/// [`ConcurrentOrderBook`](super::ConcurrentOrderBook) when contention
/// matters more than cross-side read consistency.
pub struct OrderBook {
    symbol: String,
    core: RwLock<BookCore>,
    order_count: AtomicUsize,
    update_sequence: AtomicU64,
    listeners: RwLock<Vec<BookUpdateListener>>,
    journal: RwLock<Option<Arc<dyn Journal>>>,
    journal_degraded: AtomicBool,
    clock: Arc<dyn TimeSource>,
}

impl OrderBook {
    /// Creates an empty book with the production clock.
    pub fn new(symbol: &str) -> Self {
        Self::with_clock(symbol, Arc::new(MonotonicClock::new()))
    }

    /// Creates an empty book with an injected clock.
    pub fn with_clock(symbol: &str, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            symbol: symbol.to_string(),
            core: RwLock::new(BookCore::new()),
            order_count: AtomicUsize::new(0),
            update_sequence: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
            journal: RwLock::new(None),
            journal_degraded: AtomicBool::new(false),
            clock,
        }
    }

    /// Attaches the journal this book appends to.
    ///
    /// The journal is a passive collaborator: recovery replays it into the
    /// book from the outside, so attach it only after replay is complete.
    pub fn attach_journal(&self, journal: Arc<dyn Journal>) {
        match self.journal.write() {
            Ok(mut slot) => *slot = Some(journal),
            Err(poisoned) => *poisoned.into_inner() = Some(journal),
        }
    }

    /// Whether a journal append has failed since the book was created.
    ///
    /// When raised, the in-memory book is ahead of the log; the maintenance
    /// layer surfaces the condition. The book keeps running.
    pub fn journal_degraded(&self) -> bool {
        self.journal_degraded.load(Ordering::Acquire)
    }

    /// The clock this book stamps mutations with.
    pub fn clock(&self) -> &Arc<dyn TimeSource> {
        &self.clock
    }

    // Lock poisoning means a panic mid-mutation elsewhere; the state itself
    // is guarded by the discipline, so recover the guard and continue.
    fn core_read(&self) -> RwLockReadGuard<'_, BookCore> {
        match self.core.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn core_write(&self) -> RwLockWriteGuard<'_, BookCore> {
        match self.core.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Applies a replayed journal operation through the non-journaling
    /// internals. Returns `false` when the entry could not be applied
    /// cleanly (unknown ids, stale quantities); the caller logs and
    /// continues.
    pub fn apply_journal_op(&self, op: &JournalOp) -> bool {
        match op {
            JournalOp::AddOrder { order } => self.add_order_internal(order.clone(), false),
            JournalOp::CancelOrder { order_id, .. } => {
                self.cancel_order_internal(order_id, false)
            }
            JournalOp::ExecuteOrder {
                order_id, quantity, ..
            } => self.execute_order_internal(order_id, *quantity, false),
            JournalOp::MarketOrder { fills, .. } => {
                let timestamp_ns = self.clock.now_nanos();
                let mut core = self.core_write();
                let skipped = core.apply_recorded_fills(fills, timestamp_ns);
                let update = self.finish_mutation(&core, None, timestamp_ns);
                drop(core);
                self.notify(&update);
                skipped == 0
            }
        }
    }

    /// Re-inserts a persisted order without matching, journaling, or
    /// notification. Snapshot loading uses this to reconstruct partially
    /// filled state exactly.
    pub fn restore_resting_order(&self, order: Order) -> bool {
        if order.symbol != self.symbol
            || !order.is_active()
            || order.remaining_quantity() <= 0.0
            || order.kind != OrderKind::Limit
        {
            return false;
        }
        let mut core = self.core_write();
        if core.orders.contains_key(&order.id) {
            return false;
        }
        core.insert_resting(order);
        self.order_count.store(core.orders.len(), Ordering::Release);
        true
    }

    fn add_order_internal(&self, order: Order, journal: bool) -> bool {
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
        let mut core = self.core_write();
        if core.orders.contains_key(&order.id) {
            trace!(id = %order.id, "rejected: duplicate id");
            return false;
        }

        let timestamp_ns = self.clock.now_nanos();
        let mut taker = order;
        core.match_incoming(&mut taker, timestamp_ns);

        // Residual limit quantity rests; market residual is discarded.
        if taker.kind == OrderKind::Limit && taker.is_active() && taker.remaining_quantity() > 0.0
        {
            core.insert_resting(taker);
        }

        let op = journal.then(|| JournalOp::AddOrder { order: submitted });
        let update = self.finish_mutation(&core, op, timestamp_ns);
        drop(core);
        self.notify(&update);
        true
    }

    fn cancel_order_internal(&self, order_id: &str, journal: bool) -> bool {
        let mut core = self.core_write();
        match core.orders.get(order_id) {
            Some(order) if order.is_active() => {}
            Some(_) => {
                trace!(id = %order_id, "cancel rejected: order terminal");
                return false;
            }
            None => {
                trace!(id = %order_id, "cancel rejected: not found");
                return false;
            }
        }

        let timestamp_ns = self.clock.now_nanos();
        if let Some(mut removed) = core.remove_resting(order_id) {
            removed.cancel(timestamp_ns);
        }

        let op = journal.then(|| JournalOp::CancelOrder {
            order_id: order_id.to_string(),
            timestamp_ns,
        });
        let update = self.finish_mutation(&core, op, timestamp_ns);
        drop(core);
        self.notify(&update);
        true
    }

    fn execute_order_internal(&self, order_id: &str, quantity: f64, journal: bool) -> bool {
        let mut core = self.core_write();
        let Some(order) = core.orders.get_mut(order_id) else {
            trace!(id = %order_id, "execute rejected: not found");
            return false;
        };
        if !order.is_active() {
            trace!(id = %order_id, "execute rejected: order terminal");
            return false;
        }
        if quantity <= 0.0 || quantity > order.remaining_quantity() {
            trace!(
                id = %order_id,
                quantity,
                remaining = order.remaining_quantity(),
                "execute rejected: bad quantity"
            );
            return false;
        }

        let timestamp_ns = self.clock.now_nanos();
        order.fill(quantity, timestamp_ns);
        let side = order.side;
        let price = order.price;
        if !order.is_active() {
            core.orders.remove(order_id);
        }
        core.reconcile_level(side, price);

        let op = journal.then(|| JournalOp::ExecuteOrder {
            order_id: order_id.to_string(),
            quantity,
            timestamp_ns,
        });
        let update = self.finish_mutation(&core, op, timestamp_ns);
        drop(core);
        self.notify(&update);
        true
    }

    fn execute_market_internal(&self, side: Side, quantity: f64, journal: bool) -> MarketSweep {
        let mut core = self.core_write();
        let timestamp_ns = self.clock.now_nanos();
        let sweep = core.sweep_market(side, quantity, timestamp_ns);
        if sweep.executed_quantity <= 0.0 {
            return sweep;
        }

        let op = journal.then(|| JournalOp::MarketOrder {
            side,
            quantity,
            fills: sweep.fills.clone(),
            timestamp_ns,
        });
        let update = self.finish_mutation(&core, op, timestamp_ns);
        drop(core);
        self.notify(&update);
        sweep
    }

    /// Seals a successful mutation: refresh the atomic counters, bump the
    /// update sequence, append to the journal (still inside the write
    /// section), and build the notification payload.
    fn finish_mutation(
        &self,
        core: &BookCore,
        op: Option<JournalOp>,
        timestamp_ns: u64,
    ) -> BookUpdate {
        self.order_count.store(core.orders.len(), Ordering::Release);
        let sequence = self.update_sequence.fetch_add(1, Ordering::AcqRel) + 1;

        if let Some(op) = op {
            self.journal_append(&op, timestamp_ns);
        }

        BookUpdate {
            sequence,
            best_bid: core.best_bid().unwrap_or(0.0),
            best_ask: core.best_ask().unwrap_or(f64::INFINITY),
            order_count: core.orders.len(),
            timestamp_ns,
        }
    }

    /// Best-effort journal append: the mutation stands even when the log
    /// write fails, and the divergence is flagged for maintenance.
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
}

impl BookOps for OrderBook {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn add_order(&self, order: Order) -> bool {
        self.add_order_internal(order, true)
    }

    fn cancel_order(&self, order_id: &str) -> bool {
        self.cancel_order_internal(order_id, true)
    }

    fn execute_order(&self, order_id: &str, quantity: f64) -> bool {
        self.execute_order_internal(order_id, quantity, true)
    }

    fn execute_market_order(&self, side: Side, quantity: f64) -> MarketSweep {
        self.execute_market_internal(side, quantity, true)
    }

    fn order(&self, order_id: &str) -> Option<Order> {
        self.core_read().orders.get(order_id).cloned()
    }

    fn best_bid_price(&self) -> f64 {
        self.core_read().best_bid().unwrap_or(0.0)
    }

    fn best_ask_price(&self) -> f64 {
        self.core_read().best_ask().unwrap_or(f64::INFINITY)
    }

    fn mid_price(&self) -> f64 {
        let core = self.core_read();
        match (core.best_bid(), core.best_ask()) {
            (Some(bid), Some(ask)) => (bid + ask) / 2.0,
            (Some(bid), None) => bid,
            (None, Some(ask)) => ask,
            (None, None) => 0.0,
        }
    }

    fn spread(&self) -> f64 {
        let core = self.core_read();
        match (core.best_bid(), core.best_ask()) {
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
        self.core_read().bids.len()
    }

    fn ask_level_count(&self) -> usize {
        self.core_read().asks.len()
    }

    fn bid_levels(&self, depth: usize) -> Vec<LevelView> {
        let core = self.core_read();
        core.bids
            .values()
            .rev()
            .take(depth)
            .map(|level| core.level_view(level))
            .collect()
    }

    fn ask_levels(&self, depth: usize) -> Vec<LevelView> {
        let core = self.core_read();
        core.asks
            .values()
            .take(depth)
            .map(|level| core.level_view(level))
            .collect()
    }

    fn volume_at_price(&self, price: f64) -> f64 {
        let core = self.core_read();
        let key = PriceKey::new(price);
        if let Some(level) = core.bids.get(&key) {
            return level.total_quantity();
        }
        if let Some(level) = core.asks.get(&key) {
            return level.total_quantity();
        }
        0.0
    }

    fn market_impact(&self, side: Side, quantity: f64) -> f64 {
        let core = self.core_read();
        let levels: Vec<(f64, f64)> = match side {
            Side::Buy => core
                .asks
                .values()
                .map(|l| (l.price(), l.total_quantity()))
                .collect(),
            Side::Sell => core
                .bids
                .values()
                .rev()
                .map(|l| (l.price(), l.total_quantity()))
                .collect(),
        };

        let mut remaining = quantity;
        let mut weighted = 0.0;
        let mut executed = 0.0;
        for (price, available) in &levels {
            if remaining <= 0.0 {
                break;
            }
            let take = remaining.min(*available);
            weighted += price * take;
            executed += take;
            remaining -= take;
        }

        if executed > 0.0 {
            weighted / executed
        } else {
            levels.first().map(|(price, _)| *price).unwrap_or(0.0)
        }
    }

    fn book_imbalance(&self, depth: usize) -> f64 {
        let core = self.core_read();
        let bid_volume: f64 = core
            .bids
            .values()
            .rev()
            .take(depth)
            .map(PriceLevel::total_quantity)
            .sum();
        let ask_volume: f64 = core
            .asks
            .values()
            .take(depth)
            .map(PriceLevel::total_quantity)
            .sum();
        let total = bid_volume + ask_volume;
        if total > 0.0 {
            (bid_volume - ask_volume) / total
        } else {
            0.0
        }
    }

    fn snapshot(&self) -> BookSnapshot {
        let core = self.core_read();
        BookSnapshot {
            symbol: self.symbol.clone(),
            timestamp_ns: self.clock.now_nanos(),
            bids: core
                .bids
                .values()
                .rev()
                .map(|level| core.level_view(level))
                .collect(),
            asks: core
                .asks
                .values()
                .map(|level| core.level_view(level))
                .collect(),
        }
    }

    fn clear(&self) {
        let mut core = self.core_write();
        core.bids.clear();
        core.asks.clear();
        core.orders.clear();
        let timestamp_ns = self.clock.now_nanos();
        let update = self.finish_mutation(&core, None, timestamp_ns);
        drop(core);
        self.notify(&update);
    }

    fn subscribe_updates(&self, listener: BookUpdateListener) {
        match self.listeners.write() {
            Ok(mut guard) => guard.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }
}

impl std::fmt::Debug for OrderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBook")
            .field("symbol", &self.symbol)
            .field("order_count", &self.order_count())
            .field("update_sequence", &self.update_sequence())
            .finish()
    }
}
