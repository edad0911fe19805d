//! Per-symbol store of immutable full-book snapshots.
//!
//! Snapshots are named `<symbol>-<snapshotId>.snapshot` where the id is a
//! nanosecond timestamp; files are written to a `.tmp` path and atomically
//! renamed into place. Each file records the journal checkpoint sequence
//! captured when the snapshot was taken — recovery replays journal entries
//! strictly after it.
//!
//! # File Layout (little-endian, length prefixes u64)
//!
//! ```text
//! symbol_len | symbol | snapshot_id | checkpoint_sequence
//! bid_count  | level* | ask_count | level*
//! sha256 digest (32 bytes, over everything before it)
//! level := price f64 | total_quantity f64 | order_count u64 | order*
//! order := id_len | id | side u8 | kind u8 | price f64 | quantity f64
//!          | filled_quantity f64 | created_at u64
//! ```
//!
//! A snapshot that fails digest or structural validation is treated as
//! absent: loading logs a warning and falls back to the next older file.

use crate::orderbook::{BookSnapshot, Order, OrderBook, OrderKind, Side};
use crate::time::TimeSource;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

/// Length of the sha256 trailer in bytes.
const DIGEST_SIZE: usize = 32;

/// Errors raised by the snapshot store.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Filesystem failure while reading or writing snapshot files.
    #[error("snapshot I/O error at {}: {source}", path.display())]
    Io {
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A snapshot file failed digest or structural validation.
    #[error("corrupt snapshot {}: {message}", path.display())]
    Corrupt {
        /// Path of the offending file.
        path: PathBuf,
        /// What failed to validate.
        message: String,
    },

    /// An internal mutex was poisoned.
    #[error("snapshot store mutex poisoned")]
    MutexPoisoned,
}

/// A successfully loaded snapshot: the reconstructed book plus the
/// checkpoint recovery should replay after.
pub struct LoadedSnapshot {
    /// Book rebuilt through non-journaling restores.
    pub book: OrderBook,
    /// The snapshot's ns-resolution id (filename component).
    pub snapshot_id: u64,
    /// Journal sequence the snapshot's state includes.
    pub checkpoint_sequence: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct LatestState {
    snapshot_id: u64,
    checkpoint_sequence: u64,
}

/// Store of immutable snapshots for one symbol.
pub struct SnapshotStore {
    dir: PathBuf,
    symbol: String,
    clock: Arc<dyn TimeSource>,
    /// Latest-known snapshot metadata; doubles as the directory mutex.
    latest: Mutex<LatestState>,
}

impl SnapshotStore {
    /// Opens (creating if needed) the snapshot directory for `symbol` and
    /// locates the latest valid snapshot.
    ///
    /// # Errors
    /// Returns [`SnapshotError::Io`] when the directory cannot be created
    /// or listed. Corrupt files are skipped with a warning.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        symbol: &str,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, SnapshotError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| SnapshotError::Io {
            path: dir.clone(),
            source,
        })?;

        let store = Self {
            dir,
            symbol: symbol.to_string(),
            clock,
            latest: Mutex::new(LatestState::default()),
        };

        // Newest file that validates becomes the latest checkpoint.
        let mut ids = store.list_snapshot_ids()?;
        ids.sort_unstable_by(|a, b| b.cmp(a));
        for id in ids {
            match store.read_snapshot_bytes(id) {
                Ok(bytes) => match parse_checkpoint(&bytes, &store.snapshot_path(id)) {
                    Ok(checkpoint_sequence) => {
                        let mut latest = store.lock_latest()?;
                        *latest = LatestState {
                            snapshot_id: id,
                            checkpoint_sequence,
                        };
                        break;
                    }
                    Err(e) => warn!(error = %e, "skipping invalid snapshot"),
                },
                Err(e) => warn!(error = %e, "skipping unreadable snapshot"),
            }
        }

        Ok(store)
    }

    /// The symbol this store serves.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Latest snapshot id, 0 when none exists.
    pub fn latest_snapshot_id(&self) -> u64 {
        self.lock_latest().map(|l| l.snapshot_id).unwrap_or(0)
    }

    /// Journal checkpoint of the latest snapshot, 0 when none exists.
    pub fn latest_checkpoint_sequence(&self) -> u64 {
        self.lock_latest()
            .map(|l| l.checkpoint_sequence)
            .unwrap_or(0)
    }

    /// Persists a snapshot, returning its id.
    ///
    /// The id is the current clock reading in nanoseconds; it names the
    /// file, while `checkpoint_sequence` records how far the journal was
    /// written when the state was captured.
    ///
    /// # Errors
    /// Returns [`SnapshotError::Io`] when writing or renaming fails; the
    /// previous latest snapshot is untouched.
    pub fn create_snapshot(
        &self,
        snapshot: &BookSnapshot,
        checkpoint_sequence: u64,
    ) -> Result<u64, SnapshotError> {
        let mut latest = self.lock_latest()?;
        let snapshot_id = self.clock.now_nanos();
        let bytes = encode_snapshot(snapshot, snapshot_id, checkpoint_sequence);

        let final_path = self.snapshot_path(snapshot_id);
        let tmp_path = {
            let mut p = final_path.as_os_str().to_owned();
            p.push(".tmp");
            PathBuf::from(p)
        };

        fs::write(&tmp_path, &bytes).map_err(|source| SnapshotError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        if let Err(source) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(SnapshotError::Io {
                path: final_path,
                source,
            });
        }

        *latest = LatestState {
            snapshot_id,
            checkpoint_sequence,
        };
        debug!(
            symbol = %self.symbol,
            snapshot_id,
            checkpoint_sequence,
            "created snapshot"
        );
        Ok(snapshot_id)
    }

    /// Loads the newest snapshot that validates, reconstructing the book
    /// through non-journaling restores.
    ///
    /// Corrupt or unreadable files are skipped with a warning (treated as
    /// absent). Returns `Ok(None)` when no valid snapshot exists.
    ///
    /// # Errors
    /// Returns [`SnapshotError::Io`] only when the directory itself cannot
    /// be listed.
    pub fn load_latest(&self) -> Result<Option<LoadedSnapshot>, SnapshotError> {
        let _latest = self.lock_latest()?;
        let mut ids = self.list_snapshot_ids()?;
        ids.sort_unstable_by(|a, b| b.cmp(a));

        for id in ids {
            let path = self.snapshot_path(id);
            let bytes = match self.read_snapshot_bytes(id) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable snapshot");
                    continue;
                }
            };
            match decode_snapshot(&bytes, &path, &self.symbol, Arc::clone(&self.clock)) {
                Ok(loaded) => return Ok(Some(loaded)),
                Err(e) => warn!(error = %e, "skipping corrupt snapshot"),
            }
        }

        Ok(None)
    }

    /// Deletes all but the `keep` most recent snapshot files.
    ///
    /// Returns the number of files removed.
    ///
    /// # Errors
    /// Returns [`SnapshotError::Io`] when the directory cannot be listed;
    /// individual deletion failures are logged and skipped.
    pub fn cleanup_old_snapshots(&self, keep: usize) -> Result<usize, SnapshotError> {
        let _latest = self.lock_latest()?;
        let mut ids = self.list_snapshot_ids()?;
        if ids.len() <= keep {
            return Ok(0);
        }
        ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut removed = 0usize;
        for id in ids.into_iter().skip(keep) {
            let path = self.snapshot_path(id);
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to delete old snapshot"),
            }
        }
        Ok(removed)
    }

    /// All snapshot ids present in the directory, unsorted.
    pub fn list_snapshot_ids(&self) -> Result<Vec<u64>, SnapshotError> {
        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|source| SnapshotError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let prefix = format!("{}-", self.symbol);
        for entry in entries {
            let entry = entry.map_err(|source| SnapshotError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix(&prefix) {
                if let Some(id_str) = rest.strip_suffix(".snapshot") {
                    if let Ok(id) = id_str.parse::<u64>() {
                        ids.push(id);
                    }
                }
            }
        }
        Ok(ids)
    }

    fn snapshot_path(&self, snapshot_id: u64) -> PathBuf {
        self.dir
            .join(format!("{}-{}.snapshot", self.symbol, snapshot_id))
    }

    fn read_snapshot_bytes(&self, snapshot_id: u64) -> Result<Vec<u8>, SnapshotError> {
        let path = self.snapshot_path(snapshot_id);
        fs::read(&path).map_err(|source| SnapshotError::Io { path, source })
    }

    fn lock_latest(&self) -> Result<MutexGuard<'_, LatestState>, SnapshotError> {
        self.latest.lock().map_err(|_| SnapshotError::MutexPoisoned)
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("dir", &self.dir)
            .field("symbol", &self.symbol)
            .field("latest_snapshot_id", &self.latest_snapshot_id())
            .finish()
    }
}

// ─── Encoding ───────────────────────────────────────────────────────────────

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn put_order(buf: &mut Vec<u8>, order: &Order) {
    put_bytes(buf, order.id.as_bytes());
    buf.push(match order.side {
        Side::Buy => 0,
        Side::Sell => 1,
    });
    buf.push(match order.kind {
        OrderKind::Limit => 0,
        OrderKind::Market => 1,
    });
    buf.extend_from_slice(&order.price.to_le_bytes());
    buf.extend_from_slice(&order.quantity.to_le_bytes());
    buf.extend_from_slice(&order.filled_quantity.to_le_bytes());
    buf.extend_from_slice(&order.created_at.to_le_bytes());
}

fn put_levels(buf: &mut Vec<u8>, levels: &[crate::orderbook::LevelView]) {
    buf.extend_from_slice(&(levels.len() as u64).to_le_bytes());
    for level in levels {
        buf.extend_from_slice(&level.price.to_le_bytes());
        buf.extend_from_slice(&level.total_quantity.to_le_bytes());
        buf.extend_from_slice(&(level.orders.len() as u64).to_le_bytes());
        for order in &level.orders {
            put_order(buf, order);
        }
    }
}

fn encode_snapshot(snapshot: &BookSnapshot, snapshot_id: u64, checkpoint_sequence: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    put_bytes(&mut buf, snapshot.symbol.as_bytes());
    buf.extend_from_slice(&snapshot_id.to_le_bytes());
    buf.extend_from_slice(&checkpoint_sequence.to_le_bytes());
    put_levels(&mut buf, &snapshot.bids);
    put_levels(&mut buf, &snapshot.asks);

    let digest = Sha256::digest(&buf);
    buf.extend_from_slice(&digest);
    buf
}

// ─── Decoding ───────────────────────────────────────────────────────────────

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| format!("truncated at offset {}", self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u64(&mut self) -> Result<u64, String> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().map_err(
            |_| "bad u64".to_string(),
        )?))
    }

    fn read_f64(&mut self) -> Result<f64, String> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().map_err(
            |_| "bad f64".to_string(),
        )?))
    }

    fn read_u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn read_string(&mut self) -> Result<String, String> {
        let len = self.read_u64()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| "invalid utf-8".to_string())
    }
}

fn corrupt(path: &Path, message: impl Into<String>) -> SnapshotError {
    SnapshotError::Corrupt {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

/// Validates the digest trailer and returns the payload slice.
fn validated_payload<'a>(bytes: &'a [u8], path: &Path) -> Result<&'a [u8], SnapshotError> {
    if bytes.len() < DIGEST_SIZE {
        return Err(corrupt(path, "file shorter than digest trailer"));
    }
    let (payload, stored) = bytes.split_at(bytes.len() - DIGEST_SIZE);
    let computed = Sha256::digest(payload);
    if stored != computed.as_slice() {
        return Err(corrupt(path, "sha256 digest mismatch"));
    }
    Ok(payload)
}

/// Reads just the header far enough to recover the checkpoint sequence.
fn parse_checkpoint(bytes: &[u8], path: &Path) -> Result<u64, SnapshotError> {
    let payload = validated_payload(bytes, path)?;
    let mut cursor = Cursor::new(payload);
    cursor.read_string().map_err(|m| corrupt(path, m))?;
    cursor.read_u64().map_err(|m| corrupt(path, m))?; // snapshot_id
    cursor.read_u64().map_err(|m| corrupt(path, m))
}

fn read_order(cursor: &mut Cursor<'_>, symbol: &str) -> Result<Order, String> {
    let id = cursor.read_string()?;
    let side = match cursor.read_u8()? {
        0 => Side::Buy,
        1 => Side::Sell,
        other => return Err(format!("invalid side byte {other}")),
    };
    let kind = match cursor.read_u8()? {
        0 => OrderKind::Limit,
        1 => OrderKind::Market,
        other => return Err(format!("invalid kind byte {other}")),
    };
    let price = cursor.read_f64()?;
    let quantity = cursor.read_f64()?;
    let filled_quantity = cursor.read_f64()?;
    let created_at = cursor.read_u64()?;
    Ok(Order::restored(
        id,
        symbol.to_string(),
        side,
        kind,
        price,
        quantity,
        filled_quantity,
        created_at,
    ))
}

fn restore_side(
    cursor: &mut Cursor<'_>,
    book: &OrderBook,
    symbol: &str,
    expected_side: Side,
) -> Result<(), String> {
    let level_count = cursor.read_u64()? as usize;
    for _ in 0..level_count {
        let _price = cursor.read_f64()?;
        let _total_quantity = cursor.read_f64()?;
        let order_count = cursor.read_u64()? as usize;
        for _ in 0..order_count {
            let order = read_order(cursor, symbol)?;
            if order.side != expected_side {
                return Err(format!(
                    "order {} on the wrong side of the snapshot",
                    order.id
                ));
            }
            if !book.restore_resting_order(order) {
                return Err("snapshot order failed to restore".to_string());
            }
        }
    }
    Ok(())
}

fn decode_snapshot(
    bytes: &[u8],
    path: &Path,
    expected_symbol: &str,
    clock: Arc<dyn TimeSource>,
) -> Result<LoadedSnapshot, SnapshotError> {
    let payload = validated_payload(bytes, path)?;
    let mut cursor = Cursor::new(payload);

    let symbol = cursor.read_string().map_err(|m| corrupt(path, m))?;
    if symbol != expected_symbol {
        return Err(corrupt(
            path,
            format!("symbol mismatch: file says {symbol}, store is {expected_symbol}"),
        ));
    }
    let snapshot_id = cursor.read_u64().map_err(|m| corrupt(path, m))?;
    let checkpoint_sequence = cursor.read_u64().map_err(|m| corrupt(path, m))?;

    let book = OrderBook::with_clock(&symbol, clock);
    restore_side(&mut cursor, &book, &symbol, Side::Buy).map_err(|m| corrupt(path, m))?;
    restore_side(&mut cursor, &book, &symbol, Side::Sell).map_err(|m| corrupt(path, m))?;

    if cursor.pos != payload.len() {
        return Err(corrupt(path, "trailing bytes after ask levels"));
    }

    Ok(LoadedSnapshot {
        book,
        snapshot_id,
        checkpoint_sequence,
    })
}
