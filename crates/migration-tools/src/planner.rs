//! Batch planning over the source key space.
//!
//! The planner walks the planned range with `SourceTable::keys_at`, so it
//! never holds more than two keys in memory per batch. Boundaries only fall
//! between distinct keys, which is what makes a checkpoint's range end a
//! safe place to resume from.

use historiandb_core::{Batch, Checkpoint, KeyRange, MigrationKey, SourceTable};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{MigrationError, MigrationResult};

/// Where batch boundaries are allowed to fall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryGranularity {
    /// Between any two distinct `(timestamp, tag)` keys
    Key,
    /// Only between distinct timestamps, so one instant is never split
    Timestamp,
}

/// Lazy, restartable batch sequence.
pub struct BatchPlanner {
    source: Arc<dyn SourceTable>,
    batch_size: u64,
    granularity: BoundaryGranularity,
    remaining: Option<KeyRange>,
    next_sequence: u64,
}

impl BatchPlanner {
    /// Planner over `full_range`, starting at sequence 0.
    pub fn new(
        source: Arc<dyn SourceTable>,
        full_range: KeyRange,
        batch_size: u64,
        granularity: BoundaryGranularity,
    ) -> MigrationResult<Self> {
        if batch_size == 0 {
            return Err(MigrationError::Config(
                "batch size must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            source,
            batch_size,
            granularity,
            remaining: Some(full_range),
            next_sequence: 0,
        })
    }

    /// Skip everything up to and including the checkpointed batch.
    pub fn resume_after(mut self, checkpoint: &Checkpoint) -> Self {
        self.remaining = self
            .remaining
            .and_then(|range| range.tail_from(checkpoint.last_completed_range_end));
        self.next_sequence = checkpoint.next_sequence();
        self
    }

    /// Next batch, or `None` once no source rows remain in the range.
    pub async fn next_batch(&mut self) -> MigrationResult<Option<Batch>> {
        let Some(remaining) = self.remaining else {
            return Ok(None);
        };

        let Some(first) = self.source.keys_at(&remaining, 0, 1).await?.first().copied() else {
            self.remaining = None;
            return Ok(None);
        };

        let candidates = self
            .source
            .keys_at(&remaining, self.batch_size - 1, 2)
            .await?;
        let boundary = match candidates.as_slice() {
            [last, next] => self.boundary(first, *last, *next, &remaining),
            _ => None,
        };

        let boundary = match boundary {
            Some(boundary) => self.extend_over_empty_tail(boundary, &remaining).await?,
            None => None,
        };

        let range = match boundary {
            Some(boundary) => {
                self.remaining = remaining.tail_from(boundary);
                KeyRange::new(remaining.start(), boundary)?
            }
            None => {
                self.remaining = None;
                remaining
            }
        };

        let batch = Batch::new(self.next_sequence, range);
        self.next_sequence += 1;
        debug!(sequence = batch.sequence, range = %batch.range, "planned batch");
        Ok(Some(batch))
    }

    /// Drain the planner.
    pub async fn plan_all(mut self) -> MigrationResult<Vec<Batch>> {
        let mut batches = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            batches.push(batch);
        }
        Ok(batches)
    }

    /// Boundary after a full batch whose last row has key `last` and whose
    /// successor row has key `next`; `None` means the batch runs to the end.
    fn boundary(
        &self,
        first: MigrationKey,
        last: MigrationKey,
        next: MigrationKey,
        remaining: &KeyRange,
    ) -> Option<MigrationKey> {
        let boundary = match self.granularity {
            BoundaryGranularity::Key => {
                if next == last {
                    last.successor()
                } else {
                    next
                }
            }
            BoundaryGranularity::Timestamp => {
                let at_next = MigrationKey::first_at(next.timestamp_millis);
                if at_next > first {
                    at_next
                } else if next.timestamp_millis < i64::MAX {
                    // the whole batch shares one timestamp; take all of it
                    MigrationKey::first_at(next.timestamp_millis + 1)
                } else {
                    return None;
                }
            }
        };
        (boundary < remaining.end()).then_some(boundary)
    }

    /// Let the batch absorb the rest of the range when no rows lie beyond `boundary`.
    async fn extend_over_empty_tail(
        &self,
        boundary: MigrationKey,
        remaining: &KeyRange,
    ) -> MigrationResult<Option<MigrationKey>> {
        match remaining.tail_from(boundary) {
            Some(tail) if !self.source.keys_at(&tail, 0, 1).await?.is_empty() => {
                Ok(Some(boundary))
            }
            _ => Ok(None),
        }
    }
}
