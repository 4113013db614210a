//! Key ranges and batches.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::record::MigrationKey;

/// Rejected attempt to build an empty or inverted range.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid key range: start {start} is not before end {end}")]
pub struct InvalidRange {
    /// Requested start
    pub start: MigrationKey,
    /// Requested end
    pub end: MigrationKey,
}

/// Half-open interval `[start, end)` over the migration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    start: MigrationKey,
    end: MigrationKey,
}

impl KeyRange {
    /// Build a range, enforcing `start < end`.
    pub fn new(start: MigrationKey, end: MigrationKey) -> Result<Self, InvalidRange> {
        if start < end {
            Ok(KeyRange { start, end })
        } else {
            Err(InvalidRange { start, end })
        }
    }

    /// Smallest range holding every key from `min` to `max` inclusive.
    pub fn covering(min: MigrationKey, max: MigrationKey) -> Result<Self, InvalidRange> {
        Self::new(min, max.successor())
    }

    /// Inclusive lower bound.
    pub fn start(&self) -> MigrationKey {
        self.start
    }

    /// Exclusive upper bound.
    pub fn end(&self) -> MigrationKey {
        self.end
    }

    /// Whether `key` falls inside the range.
    pub fn contains(&self, key: &MigrationKey) -> bool {
        self.start <= *key && *key < self.end
    }

    /// Remainder of the range from `from` onward, or `None` if nothing is left.
    pub fn tail_from(&self, from: MigrationKey) -> Option<KeyRange> {
        let start = from.max(self.start);
        KeyRange::new(start, self.end).ok()
    }

    /// Whether two ranges share at least one key.
    pub fn overlaps(&self, other: &KeyRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Processing state of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    /// Planned, untouched
    NotStarted,
    /// Records read from the source
    Read,
    /// Records applied to the destination
    Written,
    /// Applied and accounted for in the checkpoint
    Verified,
    /// Gave up after exhausting retries
    Failed,
}

/// One unit of migration work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// 0-based, strictly increasing
    pub sequence: u64,
    /// Keys covered by the batch
    pub range: KeyRange,
    /// Records observed when the batch was read
    pub record_count: u64,
    /// Current state
    pub status: BatchStatus,
}

impl Batch {
    /// New, not yet started batch.
    pub fn new(sequence: u64, range: KeyRange) -> Self {
        Batch {
            sequence,
            range,
            record_count: 0,
            status: BatchStatus::NotStarted,
        }
    }
}
