//! Append-only operation journal with deterministic replay.
//!
//! Every successful book mutation is appended here before subscribers are
//! notified; replaying the entries in sequence order reconstructs the book
//! exactly, either from the empty state or from a snapshot checkpoint.
//!
//! - [`JournalOp`] / [`JournalEntry`] — the journaled operations and their
//!   decoded form
//! - [`Journal`] — the storage contract
//! - [`FileJournal`] — the memory-mapped file implementation
//! - [`JournalError`] — failure modes

pub mod entry;
pub mod error;
pub mod file_journal;

pub use entry::{JournalEntry, JournalOp, ENTRY_CRC_SIZE, ENTRY_HEADER_SIZE, ENTRY_OVERHEAD};
pub use error::JournalError;
pub use file_journal::{FileJournal, JournalConfig};

/// An append-only operation journal.
///
/// Implementations must assign dense, strictly monotonic sequence numbers
/// and never mutate appended entries. The journal is injected into books as
/// a passive collaborator; recovery replays it from the outside through the
/// books' non-journaling internals.
pub trait Journal: Send + Sync {
    /// Appends an operation, assigning the next sequence number.
    ///
    /// Returns the assigned sequence. On failure nothing is written and the
    /// watermark does not move.
    ///
    /// # Errors
    /// Returns [`JournalError`] on serialization or I/O failure, or
    /// [`JournalError::CapacityExceeded`] at the file size cap.
    fn append(&self, op: &JournalOp, timestamp_ns: u64) -> Result<u64, JournalError>;

    /// Returns entries with sequence strictly greater than `sequence`, in
    /// order. The scan stops at the first invalid or torn entry.
    ///
    /// # Errors
    /// Returns [`JournalError`] when the file cannot be read.
    fn read_entries_after(&self, sequence: u64) -> Result<Vec<JournalEntry>, JournalError>;

    /// Sequence of the last appended entry; 0 when the journal is empty.
    fn latest_sequence(&self) -> u64;

    /// Rewrites the journal keeping only entries with sequence strictly
    /// greater than `checkpoint_sequence`. On failure the original file is
    /// intact.
    ///
    /// # Errors
    /// Returns [`JournalError`] when the rewrite or atomic rename fails.
    fn compact(&self, checkpoint_sequence: u64) -> Result<(), JournalError>;

    /// Synchronously flushes the written region to disk.
    ///
    /// # Errors
    /// Returns [`JournalError`] when the sync fails.
    fn flush(&self) -> Result<(), JournalError>;
}
