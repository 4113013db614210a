//! Collaborator interfaces the migration engine is written against.
//!
//! The source historian, destination store, backup facility and checkpoint
//! persistence are all external. The engine only sees these traits, so the
//! SQL implementations in `historiandb-sql` and the in-memory ones in
//! [`crate::memory`] are interchangeable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::checkpoint::{Checkpoint, QuarantinedRecord};
use crate::error::StoreResult;
use crate::job::{BackupHandle, BackupScope, MigrationJob};
use crate::range::KeyRange;
use crate::record::{MigrationKey, RawRow, Record};

/// Aggregate statistics over a key range of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    /// Rows, duplicates included
    pub row_count: u64,
    /// Distinct `(tagid, t_stamp)` keys
    pub key_count: u64,
    /// Distinct tags
    pub tag_count: u64,
    /// Smallest key, `None` when empty
    pub min_key: Option<MigrationKey>,
    /// Largest key, `None` when empty
    pub max_key: Option<MigrationKey>,
}

impl TableStats {
    /// Whether the range holds no rows.
    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }
}

/// Conflict handling when a destination key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMode {
    /// Leave the existing row untouched
    FirstWriteWins,
    /// Replace the existing row
    Repair,
}

/// Per-call upsert accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    /// Rows newly inserted
    pub inserted: u64,
    /// Rows overwritten (repair mode only)
    pub updated: u64,
    /// Rows already present and left alone
    pub unchanged: u64,
}

impl UpsertOutcome {
    /// Rows the call accounted for.
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.unchanged
    }

    /// Accumulate another outcome.
    pub fn merge(&mut self, other: UpsertOutcome) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

/// Read-only access to the source historian table.
#[async_trait]
pub trait SourceTable: Send + Sync {
    /// Rows in `range`, ordered by key ascending, at most `limit` of them.
    async fn scan(&self, range: &KeyRange, limit: usize) -> StoreResult<Vec<RawRow>>;

    /// Up to `count` keys in `range`, starting at the `offset`-th row in key order.
    ///
    /// Duplicate keys are returned once per row.
    async fn keys_at(
        &self,
        range: &KeyRange,
        offset: u64,
        count: usize,
    ) -> StoreResult<Vec<MigrationKey>>;

    /// Aggregate statistics; `None` means the whole table.
    async fn stats(&self, range: Option<&KeyRange>) -> StoreResult<TableStats>;

    /// Up to `count` rows drawn uniformly at random from `range`.
    async fn sample(&self, range: &KeyRange, count: usize) -> StoreResult<Vec<RawRow>>;
}

/// Write access to the destination store.
#[async_trait]
pub trait DestinationSink: Send + Sync {
    /// Create the destination table if it does not exist.
    async fn ensure_schema(&self) -> StoreResult<()>;

    /// Idempotent upsert keyed on `Record::key`, applied atomically.
    async fn upsert(&self, records: &[Record], mode: WriteMode) -> StoreResult<UpsertOutcome>;

    /// Aggregate statistics over `range`.
    async fn stats(&self, range: &KeyRange) -> StoreResult<TableStats>;

    /// Records stored under `keys`; absent keys are skipped.
    async fn fetch(&self, keys: &[MigrationKey]) -> StoreResult<Vec<Record>>;
}

/// Point-in-time copies of the destination, the sole rollback mechanism.
#[async_trait]
pub trait BackupManager: Send + Sync {
    /// Snapshot `scope` and confirm it is readable.
    ///
    /// Fails with `StoreError::BackupFailed` when verification fails, and with
    /// `StoreError::Cancelled` when `cancel` fires first. Neither case leaves an
    /// artifact that could pass for a valid backup.
    async fn create_backup(
        &self,
        scope: &BackupScope,
        cancel: &CancellationToken,
    ) -> StoreResult<BackupHandle>;

    /// Restore the backed-up table to the snapshot; returns rows restored.
    async fn restore(&self, handle: &BackupHandle) -> StoreResult<u64>;
}

/// Durable job, checkpoint and quarantine persistence keyed by job id.
///
/// `save` must not return before the checkpoint is on stable storage.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist the latest checkpoint for its job.
    async fn save(&self, checkpoint: &Checkpoint) -> StoreResult<()>;

    /// Most recently saved checkpoint.
    async fn load(&self, job_id: Uuid) -> StoreResult<Option<Checkpoint>>;

    /// Persist the job record.
    async fn save_job(&self, job: &MigrationJob) -> StoreResult<()>;

    /// Load a job record.
    async fn load_job(&self, job_id: Uuid) -> StoreResult<Option<MigrationJob>>;

    /// Append quarantine entries; re-recording an identical entry is a no-op.
    async fn record_quarantine(&self, job_id: Uuid, records: &[QuarantinedRecord])
        -> StoreResult<()>;

    /// All quarantine entries of a job, ordered by key.
    async fn load_quarantine(&self, job_id: Uuid) -> StoreResult<Vec<QuarantinedRecord>>;

    /// Forget everything stored for a job.
    async fn clear(&self, job_id: Uuid) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_outcome_merges() {
        let mut total = UpsertOutcome {
            inserted: 3,
            ..Default::default()
        };
        total.merge(UpsertOutcome {
            inserted: 1,
            updated: 0,
            unchanged: 2,
        });
        assert_eq!(total.inserted, 4);
        assert_eq!(total.total(), 6);
    }
}
