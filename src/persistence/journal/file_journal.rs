//! Memory-mapped file journal implementation.
//!
//! [`FileJournal`] persists [`JournalOp`] values to a single append-only,
//! memory-mapped file per symbol. The file is pre-allocated (default
//! 10 MiB), grows by fixed increments when an append does not fit, and is
//! capped at a hard maximum (default 1 GiB) — appends past the cap fail
//! until the journal is compacted against a snapshot checkpoint.
//!
//! # Thread Safety
//!
//! The write state (file handle, mapping, length) lives behind a [`Mutex`];
//! the intended usage is single-writer with the book's write discipline
//! already serializing mutations. The write watermark and latest sequence
//! are release-stored atomics so lock-free readers (hot-path health checks)
//! observe them consistently. While the mapping is being grown or swapped,
//! the mutex is held, so no other journal operation runs in that window.

use super::entry::{
    decode_payload, encode_entry, next_raw_entry, JournalEntry, JournalOp,
};
use super::error::JournalError;
use super::Journal;
use crate::config::{
    DEFAULT_JOURNAL_INITIAL_SIZE, DEFAULT_JOURNAL_MAX_SIZE, DEFAULT_JOURNAL_SIZE_INCREMENT,
};
use memmap2::MmapMut;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Sizing parameters for a [`FileJournal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalConfig {
    /// File size at creation, in bytes.
    pub initial_size: u64,
    /// Growth increment, in bytes.
    pub size_increment: u64,
    /// Hard cap on file size, in bytes.
    pub max_size: u64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            initial_size: DEFAULT_JOURNAL_INITIAL_SIZE,
            size_increment: DEFAULT_JOURNAL_SIZE_INCREMENT,
            max_size: DEFAULT_JOURNAL_MAX_SIZE,
        }
    }
}

/// The mapped file and its bookkeeping, guarded by the writer mutex.
struct MappedFile {
    file: File,
    mmap: MmapMut,
    len: usize,
}

/// A memory-mapped, append-only operation journal for one symbol.
pub struct FileJournal {
    /// Path of the journal file.
    path: PathBuf,
    /// Sizing configuration.
    config: JournalConfig,
    /// Write state; single-writer discipline.
    writer: Mutex<MappedFile>,
    /// End of the written region. Release-stored after each append.
    write_position: AtomicUsize,
    /// Sequence of the last appended entry; 0 when empty.
    latest_sequence: AtomicU64,
    /// Raised when an I/O failure left the log behind the in-memory state.
    degraded: AtomicBool,
}

impl FileJournal {
    /// Opens or creates a journal at `path` with default sizing.
    ///
    /// # Errors
    /// Returns [`JournalError`] when the file cannot be created or mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, JournalError> {
        Self::open_with_config(path, JournalConfig::default())
    }

    /// Opens or creates a journal with explicit sizing.
    ///
    /// An existing file is scanned from the start to recover the write
    /// position and latest sequence; the scan stops at the first invalid
    /// or torn entry, so a crash mid-append is healed by truncating the
    /// logical log at the tear.
    ///
    /// # Errors
    /// Returns [`JournalError`] when the file cannot be created or mapped.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: JournalConfig,
    ) -> Result<Self, JournalError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| JournalError::Io {
                message: e.to_string(),
                path: Some(path.clone()),
            })?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| JournalError::Io {
                message: e.to_string(),
                path: Some(path.clone()),
            })?;

        let existing_len = file
            .metadata()
            .map_err(|e| JournalError::Io {
                message: e.to_string(),
                path: Some(path.clone()),
            })?
            .len();

        let len = if existing_len == 0 {
            file.set_len(config.initial_size)
                .map_err(|e| JournalError::Io {
                    message: e.to_string(),
                    path: Some(path.clone()),
                })?;
            config.initial_size as usize
        } else {
            existing_len as usize
        };

        // SAFETY: the file is exclusively owned by this journal and is not
        // truncated or modified externally while the mapping is live.
        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| JournalError::Io {
                message: e.to_string(),
                path: Some(path.clone()),
            })?
        };

        let (write_position, latest_sequence) =
            scan_log(&mmap, len, config.max_size as usize);
        debug!(
            path = %path.display(),
            write_position,
            latest_sequence,
            "opened journal"
        );

        Ok(Self {
            path,
            config,
            writer: Mutex::new(MappedFile { file, mmap, len }),
            write_position: AtomicUsize::new(write_position),
            latest_sequence: AtomicU64::new(latest_sequence),
            degraded: AtomicBool::new(false),
        })
    }

    /// Path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether an I/O failure has left the log behind the book state.
    ///
    /// The maintenance layer surfaces this; the book keeps running.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Current end of the written region, in bytes.
    pub fn write_position(&self) -> usize {
        self.write_position.load(Ordering::Acquire)
    }

    /// Grows the mapped file to hold at least `required` bytes.
    ///
    /// Rounds up to the next size-increment multiple, extends the file, and
    /// swaps in a fresh mapping. The writer mutex is held by the caller, so
    /// no other journal operation observes the intermediate state.
    fn grow(&self, mapped: &mut MappedFile, required: u64) -> Result<(), JournalError> {
        let increments = required / self.config.size_increment + 1;
        let new_len = (increments * self.config.size_increment).min(self.config.max_size);

        mapped.mmap.flush().map_err(|e| JournalError::Io {
            message: e.to_string(),
            path: Some(self.path.clone()),
        })?;
        mapped
            .file
            .set_len(new_len)
            .map_err(|e| JournalError::Io {
                message: e.to_string(),
                path: Some(self.path.clone()),
            })?;

        // SAFETY: same exclusively-owned file, remapped at its new length.
        let new_mmap = unsafe {
            MmapMut::map_mut(&mapped.file).map_err(|e| JournalError::Io {
                message: e.to_string(),
                path: Some(self.path.clone()),
            })?
        };

        debug!(
            path = %self.path.display(),
            old_len = mapped.len,
            new_len,
            "grew journal file"
        );
        mapped.mmap = new_mmap;
        mapped.len = new_len as usize;
        Ok(())
    }

    /// Collects decoded entries with sequence strictly greater than `after`,
    /// scanning the given mapping up to `limit`.
    fn collect_entries(
        &self,
        data: &[u8],
        limit: usize,
        after: u64,
    ) -> Vec<JournalEntry> {
        let mut entries = Vec::new();
        let mut offset = 0usize;
        let max_entry = self.config.max_size as usize;

        while let Some(raw) = next_raw_entry(data, offset, limit, max_entry) {
            offset = raw.next_offset;
            if raw.sequence <= after {
                continue;
            }
            match decode_payload(data, &raw) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    // First undecodable payload ends the log.
                    warn!(error = %e, "stopping journal scan at undecodable entry");
                    break;
                }
            }
        }

        entries
    }
}

impl Journal for FileJournal {
    fn append(&self, op: &JournalOp, timestamp_ns: u64) -> Result<u64, JournalError> {
        let mut mapped = self.writer.lock().map_err(|_| JournalError::MutexPoisoned)?;

        let sequence = self.latest_sequence.load(Ordering::Relaxed) + 1;
        let bytes = encode_entry(sequence, timestamp_ns, op)?;

        let position = self.write_position.load(Ordering::Relaxed);
        let required = position as u64 + bytes.len() as u64;
        if required > self.config.max_size {
            return Err(JournalError::CapacityExceeded {
                required,
                max_size: self.config.max_size,
            });
        }
        if required > mapped.len as u64 {
            if let Err(e) = self.grow(&mut mapped, required) {
                self.degraded.store(true, Ordering::Release);
                return Err(e);
            }
        }

        let end = position + bytes.len();
        mapped.mmap[position..end].copy_from_slice(&bytes);
        self.write_position.store(end, Ordering::Release);
        self.latest_sequence.store(sequence, Ordering::Release);

        Ok(sequence)
    }

    fn read_entries_after(&self, sequence: u64) -> Result<Vec<JournalEntry>, JournalError> {
        let mapped = self.writer.lock().map_err(|_| JournalError::MutexPoisoned)?;
        let limit = self.write_position.load(Ordering::Acquire);
        Ok(self.collect_entries(&mapped.mmap[..], limit, sequence))
    }

    fn latest_sequence(&self) -> u64 {
        self.latest_sequence.load(Ordering::Acquire)
    }

    fn compact(&self, checkpoint_sequence: u64) -> Result<(), JournalError> {
        let mut mapped = self.writer.lock().map_err(|_| JournalError::MutexPoisoned)?;
        let limit = self.write_position.load(Ordering::Relaxed);

        // Re-encode surviving entries from the live mapping. The original
        // mapping stays valid until the rename below has succeeded.
        let survivors = self.collect_entries(&mapped.mmap[..], limit, checkpoint_sequence);
        let mut payload = Vec::new();
        for entry in &survivors {
            payload.extend_from_slice(&encode_entry(
                entry.sequence,
                entry.timestamp_ns,
                &entry.op,
            )?);
        }

        let tmp_path = {
            let mut p = self.path.as_os_str().to_owned();
            p.push(".tmp");
            PathBuf::from(p)
        };

        let write_tmp = || -> Result<(), JournalError> {
            let mut tmp = File::create(&tmp_path).map_err(|e| JournalError::Io {
                message: e.to_string(),
                path: Some(tmp_path.clone()),
            })?;
            tmp.write_all(&payload).map_err(|e| JournalError::Io {
                message: e.to_string(),
                path: Some(tmp_path.clone()),
            })?;
            let increments = payload.len() as u64 / self.config.size_increment + 1;
            let new_len = (increments * self.config.size_increment)
                .max(self.config.initial_size)
                .min(self.config.max_size);
            tmp.set_len(new_len).map_err(|e| JournalError::Io {
                message: e.to_string(),
                path: Some(tmp_path.clone()),
            })?;
            tmp.sync_all().map_err(|e| JournalError::Io {
                message: e.to_string(),
                path: Some(tmp_path.clone()),
            })?;
            Ok(())
        };

        if let Err(e) = write_tmp() {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(JournalError::Io {
                message: e.to_string(),
                path: Some(self.path.clone()),
            });
        }

        // Rename succeeded: swap in a mapping of the new file. The old
        // mapping (now of an unlinked inode) is dropped by the assignment.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| {
                self.degraded.store(true, Ordering::Release);
                JournalError::Io {
                    message: e.to_string(),
                    path: Some(self.path.clone()),
                }
            })?;
        let len = file
            .metadata()
            .map_err(|e| JournalError::Io {
                message: e.to_string(),
                path: Some(self.path.clone()),
            })?
            .len() as usize;
        // SAFETY: freshly opened, exclusively owned file.
        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| {
                self.degraded.store(true, Ordering::Release);
                JournalError::Io {
                    message: e.to_string(),
                    path: Some(self.path.clone()),
                }
            })?
        };

        *mapped = MappedFile { file, mmap, len };
        self.write_position.store(payload.len(), Ordering::Release);
        debug!(
            path = %self.path.display(),
            checkpoint_sequence,
            survivors = survivors.len(),
            "compacted journal"
        );
        Ok(())
    }

    fn flush(&self) -> Result<(), JournalError> {
        let mapped = self.writer.lock().map_err(|_| JournalError::MutexPoisoned)?;
        let position = self.write_position.load(Ordering::Acquire);
        if position > 0 {
            mapped
                .mmap
                .flush_range(0, position)
                .map_err(|e| JournalError::Io {
                    message: e.to_string(),
                    path: Some(self.path.clone()),
                })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileJournal")
            .field("path", &self.path)
            .field("write_position", &self.write_position())
            .field("latest_sequence", &self.latest_sequence())
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

/// Scans a mapping from the start, returning the write position (end of the
/// last valid entry) and the highest sequence seen.
fn scan_log(data: &[u8], len: usize, max_entry_size: usize) -> (usize, u64) {
    let mut offset = 0usize;
    let mut latest = 0u64;

    while let Some(raw) = next_raw_entry(data, offset, len, max_entry_size) {
        latest = latest.max(raw.sequence);
        offset = raw.next_offset;
    }

    (offset, latest)
}
