//! Durable progress markers and quarantine entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::record::MigrationKey;

/// Progress of a job as of the highest contiguous completed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Owning job
    pub job_id: Uuid,
    /// Highest sequence number such that it and every lower batch completed
    pub last_completed_sequence: u64,
    /// Exclusive end of that batch's range; resume starts here
    pub last_completed_range_end: MigrationKey,
    /// Records written or found already present, summed over completed batches
    pub total_records_migrated: u64,
    /// Records quarantined, summed over completed batches
    pub total_records_quarantined: u64,
    /// Records carrying a suspicious timestamp, summed over completed batches
    pub total_suspicious_timestamps: u64,
    /// When the checkpoint was taken
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    /// Sequence number of the first batch a resumed run must process.
    pub fn next_sequence(&self) -> u64 {
        self.last_completed_sequence + 1
    }
}

/// Why a record was set aside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineKind {
    /// Source row could not be decoded
    MalformedRecord,
    /// Destination rejected the record, or the source repeated its key
    ConstraintViolation,
}

impl fmt::Display for QuarantineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuarantineKind::MalformedRecord => f.write_str("malformed_record"),
            QuarantineKind::ConstraintViolation => f.write_str("constraint_violation"),
        }
    }
}

/// A record excluded from the migration, with enough context to remediate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantinedRecord {
    /// Key of the record
    pub key: MigrationKey,
    /// Batch the record belonged to
    pub sequence: u64,
    /// Category
    pub kind: QuarantineKind,
    /// Detailed reason
    pub reason: String,
}
