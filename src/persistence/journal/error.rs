//! Error types for the journal subsystem.
//!
//! [`JournalError`] covers all failure modes of the append-only journal:
//! I/O, corruption, malformed entries, and the file size cap.

use std::fmt;
use std::path::PathBuf;

/// Errors that can occur within the journal subsystem.
#[derive(Debug)]
#[non_exhaustive]
pub enum JournalError {
    /// An I/O error occurred while mapping, growing, or syncing the file.
    Io {
        /// The underlying I/O error message.
        message: String,
        /// The file path involved, if known.
        path: Option<PathBuf>,
    },

    /// An entry failed CRC32 verification.
    CorruptEntry {
        /// The sequence number of the corrupt entry.
        sequence: u64,
        /// The CRC32 stored on disk.
        expected_crc: u32,
        /// The CRC32 computed from the entry bytes.
        actual_crc: u32,
    },

    /// The entry payload could not be deserialized.
    DeserializationError {
        /// The sequence number of the entry that failed to deserialize.
        sequence: u64,
        /// The underlying deserialization error message.
        message: String,
    },

    /// The operation payload could not be serialized.
    SerializationError {
        /// The underlying serialization error message.
        message: String,
    },

    /// An entry has an invalid header (truncated or malformed).
    InvalidEntryHeader {
        /// Byte offset within the file where the error occurred.
        offset: usize,
        /// Description of the header problem.
        message: String,
    },

    /// The append would push the file past its configured cap.
    ///
    /// The write position is unchanged; callers may compact and retry.
    CapacityExceeded {
        /// Bytes the file would need to hold the entry.
        required: u64,
        /// The configured maximum file size.
        max_size: u64,
    },

    /// An internal mutex was poisoned (a thread panicked while holding it).
    MutexPoisoned,
}

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalError::Io { message, path } => {
                if let Some(p) = path {
                    write!(f, "journal I/O error at {}: {message}", p.display())
                } else {
                    write!(f, "journal I/O error: {message}")
                }
            }
            JournalError::CorruptEntry {
                sequence,
                expected_crc,
                actual_crc,
            } => {
                write!(
                    f,
                    "corrupt journal entry at sequence {sequence}: \
                     expected CRC {expected_crc:#010x}, got {actual_crc:#010x}"
                )
            }
            JournalError::DeserializationError { sequence, message } => {
                write!(
                    f,
                    "journal deserialization error at sequence {sequence}: {message}"
                )
            }
            JournalError::SerializationError { message } => {
                write!(f, "journal serialization error: {message}")
            }
            JournalError::InvalidEntryHeader { offset, message } => {
                write!(
                    f,
                    "invalid journal entry header at offset {offset}: {message}"
                )
            }
            JournalError::CapacityExceeded { required, max_size } => {
                write!(
                    f,
                    "journal capacity exceeded: {required} bytes required, cap is {max_size}"
                )
            }
            JournalError::MutexPoisoned => {
                write!(f, "journal internal mutex poisoned")
            }
        }
    }
}

impl std::error::Error for JournalError {}

impl From<std::io::Error> for JournalError {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        JournalError::Io {
            message: err.to_string(),
            path: None,
        }
    }
}
