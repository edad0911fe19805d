//! Journal operations and the on-disk entry codec.
//!
//! # On-Disk Entry Format (little-endian)
//!
//! ```text
//! [8 bytes: sequence][8 bytes: timestamp_ns][1 byte: op_tag]
//! [3 bytes: reserved][4 bytes: entry_size][entry_size bytes: JSON payload]
//! [4 bytes: CRC32]
//! ```
//!
//! - `entry_size` — payload bytes only (header and CRC excluded).
//! - CRC32 covers FixedHeader ‖ Payload.
//!
//! A scan treats the first invalid header, torn entry, or CRC mismatch as
//! the end of the log.

use super::error::JournalError;
use crate::orderbook::{Fill, Order, Side};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Size of the fixed entry header in bytes.
///
/// Layout: `[8 sequence][8 timestamp_ns][1 op_tag][3 reserved][4 entry_size]`.
pub const ENTRY_HEADER_SIZE: usize = 8 + 8 + 1 + 3 + 4;

/// Size of the CRC32 trailer in bytes.
pub const ENTRY_CRC_SIZE: usize = 4;

/// Total per-entry overhead (header + CRC trailer) in bytes.
pub const ENTRY_OVERHEAD: usize = ENTRY_HEADER_SIZE + ENTRY_CRC_SIZE;

/// A journaled book operation.
///
/// Replaying these in sequence order against an empty book (or a snapshot
/// at checkpoint `S`, starting after `S`) reconstructs the book exactly:
/// `AddOrder` re-runs deterministic matching, `MarketOrder` re-applies the
/// recorded fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalOp {
    /// An order was submitted, captured as it arrived (pre-match).
    AddOrder {
        /// The order as submitted.
        order: Order,
    },
    /// A resting order was canceled.
    CancelOrder {
        /// Id of the canceled order.
        order_id: String,
        /// Cancellation timestamp, nanoseconds.
        timestamp_ns: u64,
    },
    /// A resting order was filled by an external execution.
    ExecuteOrder {
        /// Id of the filled order.
        order_id: String,
        /// Quantity filled.
        quantity: f64,
        /// Fill timestamp, nanoseconds.
        timestamp_ns: u64,
    },
    /// A market order swept the book.
    MarketOrder {
        /// Taker side.
        side: Side,
        /// Requested quantity.
        quantity: f64,
        /// Maker fills in execution order.
        fills: Vec<Fill>,
        /// Execution timestamp, nanoseconds.
        timestamp_ns: u64,
    },
}

impl JournalOp {
    /// The header tag byte for this operation.
    pub fn tag(&self) -> u8 {
        match self {
            JournalOp::AddOrder { .. } => 1,
            JournalOp::CancelOrder { .. } => 2,
            JournalOp::ExecuteOrder { .. } => 3,
            JournalOp::MarketOrder { .. } => 4,
        }
    }
}

/// A single decoded journal entry.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    /// Strictly monotonic sequence within the journal.
    pub sequence: u64,
    /// Timestamp assigned at append time, nanoseconds.
    pub timestamp_ns: u64,
    /// The journaled operation.
    pub op: JournalOp,
}

/// Encodes one entry into its on-disk byte representation.
pub(crate) fn encode_entry(
    sequence: u64,
    timestamp_ns: u64,
    op: &JournalOp,
) -> Result<Vec<u8>, JournalError> {
    let payload = serde_json::to_vec(op).map_err(|e| JournalError::SerializationError {
        message: e.to_string(),
    })?;

    let entry_size =
        u32::try_from(payload.len()).map_err(|_| JournalError::SerializationError {
            message: "payload exceeds u32 size field".to_string(),
        })?;

    let mut buf = Vec::with_capacity(ENTRY_OVERHEAD + payload.len());
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf.extend_from_slice(&timestamp_ns.to_le_bytes());
    buf.push(op.tag());
    buf.extend_from_slice(&[0u8; 3]);
    buf.extend_from_slice(&entry_size.to_le_bytes());
    buf.extend_from_slice(&payload);

    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());

    Ok(buf)
}

/// A raw entry located by [`next_raw_entry`]: header fields plus the
/// payload's byte range.
pub(crate) struct RawEntry {
    pub sequence: u64,
    pub timestamp_ns: u64,
    pub op_tag: u8,
    pub payload_start: usize,
    pub payload_end: usize,
    pub next_offset: usize,
}

/// Reads the entry at `offset`, bounded by `limit` (the write watermark).
///
/// Returns `None` at end-of-log: zero or oversized `entry_size`, an entry
/// running past the watermark, an unknown tag, or a CRC mismatch (logged).
pub(crate) fn next_raw_entry(
    data: &[u8],
    offset: usize,
    limit: usize,
    max_entry_size: usize,
) -> Option<RawEntry> {
    let limit = limit.min(data.len());
    let header_end = offset.checked_add(ENTRY_HEADER_SIZE)?;
    if header_end > limit {
        return None;
    }

    let sequence = u64::from_le_bytes(data.get(offset..offset + 8)?.try_into().ok()?);
    let timestamp_ns = u64::from_le_bytes(data.get(offset + 8..offset + 16)?.try_into().ok()?);
    let op_tag = *data.get(offset + 16)?;
    let entry_size =
        u32::from_le_bytes(data.get(offset + 20..offset + 24)?.try_into().ok()?) as usize;

    if entry_size == 0 || entry_size > max_entry_size {
        return None;
    }
    if !(1..=4).contains(&op_tag) {
        return None;
    }

    let payload_start = header_end;
    let payload_end = payload_start.checked_add(entry_size)?;
    let entry_end = payload_end.checked_add(ENTRY_CRC_SIZE)?;
    if entry_end > limit {
        // Torn write: the declared size runs past the watermark.
        return None;
    }

    let stored_crc = u32::from_le_bytes(data.get(payload_end..entry_end)?.try_into().ok()?);
    let computed_crc = crc32fast::hash(data.get(offset..payload_end)?);
    if stored_crc != computed_crc {
        warn!(
            sequence,
            expected = stored_crc,
            actual = computed_crc,
            "journal entry failed CRC check, treating as end of log"
        );
        return None;
    }

    Some(RawEntry {
        sequence,
        timestamp_ns,
        op_tag,
        payload_start,
        payload_end,
        next_offset: entry_end,
    })
}

/// Decodes the payload of a raw entry.
pub(crate) fn decode_payload(data: &[u8], raw: &RawEntry) -> Result<JournalEntry, JournalError> {
    let payload = data
        .get(raw.payload_start..raw.payload_end)
        .ok_or(JournalError::InvalidEntryHeader {
            offset: raw.payload_start,
            message: "payload out of bounds".to_string(),
        })?;

    let op: JournalOp =
        serde_json::from_slice(payload).map_err(|e| JournalError::DeserializationError {
            sequence: raw.sequence,
            message: e.to_string(),
        })?;

    if op.tag() != raw.op_tag {
        return Err(JournalError::DeserializationError {
            sequence: raw.sequence,
            message: format!(
                "op tag mismatch: header says {}, payload decodes to {}",
                raw.op_tag,
                op.tag()
            ),
        });
    }

    Ok(JournalEntry {
        sequence: raw.sequence,
        timestamp_ns: raw.timestamp_ns,
        op,
    })
}
