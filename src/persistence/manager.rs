//! Persistence root object: per-symbol journals, snapshot stores, and the
//! crash-recovery procedure.
//!
//! One [`PersistenceManager`] is constructed at startup and passed by
//! reference wherever persistence is needed; there is no process-wide
//! singleton. The per-symbol maps are held behind short-lived mutexes —
//! once a journal or store reference is obtained, it is used without the
//! map lock.

use super::journal::{FileJournal, Journal, JournalConfig, JournalError};
use super::snapshot_store::{SnapshotError, SnapshotStore};
use crate::config::EngineConfig;
use crate::orderbook::{BookOps, OrderBook};
use crate::time::{MonotonicClock, TimeSource};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{error, info, warn};

/// Outcome of [`PersistenceManager::recover_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStatus {
    /// Nothing on disk: the engine starts from empty books.
    CleanStart,
    /// At least one symbol was recovered and none failed.
    Success,
    /// At least one symbol could not be recovered.
    Failed,
}

/// Errors raised while setting up persistence.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The data directory tree could not be created.
    #[error("cannot create data directory {}: {source}", path.display())]
    CreateDirectories {
        /// The directory that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A journal could not be opened.
    #[error(transparent)]
    Journal(#[from] JournalError),

    /// A snapshot store could not be opened.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// An internal mutex was poisoned.
    #[error("persistence manager mutex poisoned")]
    MutexPoisoned,
}

/// Owns the on-disk layout and the registry of live books.
pub struct PersistenceManager {
    data_dir: PathBuf,
    config: EngineConfig,
    clock: Arc<dyn TimeSource>,
    journals: Mutex<HashMap<String, Arc<FileJournal>>>,
    snapshot_stores: Mutex<HashMap<String, Arc<SnapshotStore>>>,
    books: Mutex<HashMap<String, Arc<OrderBook>>>,
}

impl PersistenceManager {
    /// Creates the manager and the `journals/` and `snapshots/` directories.
    ///
    /// # Errors
    /// Returns [`PersistenceError::CreateDirectories`] when the layout
    /// cannot be created — a fatal startup condition.
    pub fn new(config: EngineConfig) -> Result<Self, PersistenceError> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Creates the manager with an injected clock.
    ///
    /// # Errors
    /// See [`PersistenceManager::new`].
    pub fn with_clock(
        config: EngineConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, PersistenceError> {
        let data_dir = config.data_directory.clone();
        for sub in ["journals", "snapshots"] {
            let path = data_dir.join(sub);
            fs::create_dir_all(&path)
                .map_err(|source| PersistenceError::CreateDirectories { path, source })?;
        }

        Ok(Self {
            data_dir,
            config,
            clock,
            journals: Mutex::new(HashMap::new()),
            snapshot_stores: Mutex::new(HashMap::new()),
            books: Mutex::new(HashMap::new()),
        })
    }

    /// The clock shared with recovered books.
    pub fn clock(&self) -> &Arc<dyn TimeSource> {
        &self.clock
    }

    /// Gets (opening on first use) the journal for `symbol`.
    ///
    /// # Errors
    /// Returns [`JournalError`] when the file cannot be opened or mapped.
    pub fn journal(&self, symbol: &str) -> Result<Arc<FileJournal>, PersistenceError> {
        let mut journals = self.lock_journals()?;
        if let Some(journal) = journals.get(symbol) {
            return Ok(Arc::clone(journal));
        }

        let path = self.data_dir.join("journals").join(format!("{symbol}.journal"));
        let journal = Arc::new(FileJournal::open_with_config(
            path,
            JournalConfig {
                initial_size: self.config.journal_initial_size,
                size_increment: self.config.journal_size_increment,
                max_size: self.config.journal_max_size,
            },
        )?);
        journals.insert(symbol.to_string(), Arc::clone(&journal));
        Ok(journal)
    }

    /// Gets (opening on first use) the snapshot store for `symbol`.
    ///
    /// # Errors
    /// Returns [`SnapshotError`] when the directory cannot be created.
    pub fn snapshot_store(&self, symbol: &str) -> Result<Arc<SnapshotStore>, PersistenceError> {
        let mut stores = self.lock_stores()?;
        if let Some(store) = stores.get(symbol) {
            return Ok(Arc::clone(store));
        }

        let dir = self.data_dir.join("snapshots").join(symbol);
        let store = Arc::new(SnapshotStore::open(dir, symbol, Arc::clone(&self.clock))?);
        stores.insert(symbol.to_string(), Arc::clone(&store));
        Ok(store)
    }

    /// Registers a live book for maintenance and lookup.
    pub fn register_book(&self, book: Arc<OrderBook>) {
        if let Ok(mut books) = self.books.lock() {
            books.insert(book.symbol().to_string(), book);
        }
    }

    /// Looks up a registered book by symbol.
    pub fn book(&self, symbol: &str) -> Option<Arc<OrderBook>> {
        self.books.lock().ok()?.get(symbol).cloned()
    }

    /// All registered books.
    pub fn books(&self) -> Vec<Arc<OrderBook>> {
        self.books
            .lock()
            .map(|books| books.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the registered book for `symbol`, recovering or creating it
    /// on first use and attaching its journal.
    ///
    /// # Errors
    /// Returns [`PersistenceError`] when the journal cannot be opened.
    pub fn open_book(&self, symbol: &str) -> Result<Arc<OrderBook>, PersistenceError> {
        if let Some(book) = self.book(symbol) {
            return Ok(book);
        }

        let book = Arc::new(OrderBook::with_clock(symbol, Arc::clone(&self.clock)));
        let journal = self.journal(symbol)?;
        book.attach_journal(journal);
        self.register_book(Arc::clone(&book));
        Ok(book)
    }

    /// Reconstructs every symbol found on disk: latest valid snapshot, then
    /// journal replay strictly after its checkpoint, then journal attach
    /// and registration.
    pub fn recover_state(&self) -> RecoveryStatus {
        let symbols = match self.discover_symbols() {
            Ok(symbols) => symbols,
            Err(e) => {
                error!(error = %e, "failed to enumerate persisted symbols");
                return RecoveryStatus::Failed;
            }
        };

        if symbols.is_empty() {
            info!("no persisted state found (clean start)");
            return RecoveryStatus::CleanStart;
        }

        let mut recovered = 0usize;
        let mut had_errors = false;

        for symbol in &symbols {
            match self.recover_symbol(symbol) {
                Ok(replayed) => {
                    info!(symbol = %symbol, replayed, "recovered book");
                    recovered += 1;
                }
                Err(e) => {
                    error!(symbol = %symbol, error = %e, "failed to recover book");
                    had_errors = true;
                }
            }
        }

        if had_errors {
            RecoveryStatus::Failed
        } else if recovered > 0 {
            info!(symbols = recovered, "recovery complete");
            RecoveryStatus::Success
        } else {
            RecoveryStatus::CleanStart
        }
    }

    /// Recovers one symbol; returns the number of replayed entries.
    fn recover_symbol(&self, symbol: &str) -> Result<usize, PersistenceError> {
        let store = self.snapshot_store(symbol)?;

        let (book, checkpoint) = match store.load_latest()? {
            Some(loaded) => {
                info!(
                    symbol = %symbol,
                    snapshot_id = loaded.snapshot_id,
                    checkpoint = loaded.checkpoint_sequence,
                    orders = loaded.book.order_count(),
                    "loaded snapshot"
                );
                (Arc::new(loaded.book), loaded.checkpoint_sequence)
            }
            None => (
                Arc::new(OrderBook::with_clock(symbol, Arc::clone(&self.clock))),
                0,
            ),
        };

        let journal = self.journal(symbol)?;
        let entries = journal.read_entries_after(checkpoint)?;
        let mut replayed = 0usize;
        for entry in &entries {
            // Replay goes through the non-journaling internals; entries the
            // book cannot apply (unknown ids in a malformed tail) are
            // skipped and replay continues.
            if book.apply_journal_op(&entry.op) {
                replayed += 1;
            } else {
                warn!(
                    symbol = %symbol,
                    sequence = entry.sequence,
                    "skipped unappliable journal entry"
                );
            }
        }

        book.attach_journal(journal);
        self.register_book(Arc::clone(&book));
        Ok(replayed)
    }

    /// Union of symbols seen under `journals/` and `snapshots/`.
    fn discover_symbols(&self) -> Result<Vec<String>, std::io::Error> {
        let mut symbols = Vec::new();

        let journals_dir = self.data_dir.join("journals");
        if journals_dir.is_dir() {
            for entry in fs::read_dir(&journals_dir)? {
                let name = entry?.file_name();
                let name = name.to_string_lossy();
                if let Some(symbol) = name.strip_suffix(".journal") {
                    if !symbols.iter().any(|s| s == symbol) {
                        symbols.push(symbol.to_string());
                    }
                }
            }
        }

        let snapshots_dir = self.data_dir.join("snapshots");
        if snapshots_dir.is_dir() {
            for entry in fs::read_dir(&snapshots_dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    let symbol = entry.file_name().to_string_lossy().to_string();
                    if !symbols.iter().any(|s| *s == symbol) {
                        symbols.push(symbol);
                    }
                }
            }
        }

        symbols.sort();
        Ok(symbols)
    }

    /// One maintenance pass over every registered book: time-driven
    /// snapshots, threshold-driven compaction, retention cleanup, and
    /// degraded-journal surfacing.
    pub fn perform_maintenance(&self) {
        for book in self.books() {
            let symbol = book.symbol().to_string();

            let journal = match self.journal(&symbol) {
                Ok(journal) => journal,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "maintenance: journal unavailable");
                    continue;
                }
            };
            let store = match self.snapshot_store(&symbol) {
                Ok(store) => store,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "maintenance: snapshot store unavailable");
                    continue;
                }
            };

            if journal.is_degraded() || book.journal_degraded() {
                warn!(symbol = %symbol, "journal degraded: book state is ahead of the log");
            }

            let latest_sequence = journal.latest_sequence();
            let checkpoint = store.latest_checkpoint_sequence();
            let entries_since_snapshot = latest_sequence.saturating_sub(checkpoint);

            if entries_since_snapshot > 0 {
                match store.create_snapshot(&book.snapshot(), latest_sequence) {
                    Ok(snapshot_id) => {
                        info!(symbol = %symbol, snapshot_id, checkpoint = latest_sequence, "maintenance snapshot");
                    }
                    Err(e) => {
                        warn!(symbol = %symbol, error = %e, "maintenance snapshot failed");
                        continue;
                    }
                }
            }

            if entries_since_snapshot > self.config.compaction_threshold {
                let new_checkpoint = store.latest_checkpoint_sequence();
                match journal.compact(new_checkpoint) {
                    Ok(()) => {
                        info!(symbol = %symbol, checkpoint = new_checkpoint, "compacted journal")
                    }
                    Err(e) => warn!(symbol = %symbol, error = %e, "journal compaction failed"),
                }
            }

            if let Err(e) = store.cleanup_old_snapshots(self.config.snapshot_retention_count) {
                warn!(symbol = %symbol, error = %e, "snapshot cleanup failed");
            }
        }
    }

    /// Flushes every journal; called on shutdown after in-flight writes
    /// have drained.
    pub fn shutdown(&self) {
        let journals: Vec<Arc<FileJournal>> = self
            .lock_journals()
            .map(|j| j.values().cloned().collect())
            .unwrap_or_default();
        for journal in journals {
            if let Err(e) = journal.flush() {
                warn!(path = %journal.path().display(), error = %e, "journal flush failed on shutdown");
            }
        }
        info!("persistence flushed");
    }

    fn lock_journals(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<String, Arc<FileJournal>>>, PersistenceError> {
        self.journals
            .lock()
            .map_err(|_| PersistenceError::MutexPoisoned)
    }

    fn lock_stores(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<String, Arc<SnapshotStore>>>, PersistenceError> {
        self.snapshot_stores
            .lock()
            .map_err(|_| PersistenceError::MutexPoisoned)
    }
}

impl std::fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager")
            .field("data_dir", &self.data_dir)
            .finish()
    }
}
