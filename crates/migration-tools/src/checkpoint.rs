//! Highest-contiguous progress tracking.
//!
//! Workers may finish batches out of order. The durable checkpoint only moves
//! forward once every lower-numbered batch has completed, so resuming from it
//! never skips a batch.

use chrono::Utc;
use historiandb_core::{Checkpoint, MigrationKey};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::writer::BatchOutcome;

#[derive(Debug, Clone, Copy)]
struct Completed {
    range_end: MigrationKey,
    migrated: u64,
    quarantined: u64,
    suspicious: u64,
}

/// Folds batch completions into checkpoints.
#[derive(Debug)]
pub struct ProgressTracker {
    job_id: Uuid,
    current: Option<Checkpoint>,
    next_expected: u64,
    out_of_order: BTreeMap<u64, Completed>,
}

impl ProgressTracker {
    /// Tracker continuing from `resume_from`, or from scratch.
    pub fn new(job_id: Uuid, resume_from: Option<Checkpoint>) -> Self {
        let next_expected = resume_from
            .as_ref()
            .map(Checkpoint::next_sequence)
            .unwrap_or(0);
        Self {
            job_id,
            current: resume_from,
            next_expected,
            out_of_order: BTreeMap::new(),
        }
    }

    /// Record a finished batch. Returns the new checkpoint if it advanced.
    pub fn complete(&mut self, outcome: &BatchOutcome) -> Option<Checkpoint> {
        let sequence = outcome.batch.sequence;
        if sequence < self.next_expected {
            return None;
        }
        self.out_of_order.insert(
            sequence,
            Completed {
                range_end: outcome.batch.range.end(),
                migrated: outcome.migrated(),
                quarantined: outcome.quarantined.len() as u64,
                suspicious: outcome.suspicious,
            },
        );

        let mut advanced = false;
        while let Some(done) = self.out_of_order.remove(&self.next_expected) {
            let previous = self.current.take();
            let (migrated, quarantined, suspicious) = previous
                .as_ref()
                .map(|cp| {
                    (
                        cp.total_records_migrated,
                        cp.total_records_quarantined,
                        cp.total_suspicious_timestamps,
                    )
                })
                .unwrap_or_default();
            self.current = Some(Checkpoint {
                job_id: self.job_id,
                last_completed_sequence: self.next_expected,
                last_completed_range_end: done.range_end,
                total_records_migrated: migrated + done.migrated,
                total_records_quarantined: quarantined + done.quarantined,
                total_suspicious_timestamps: suspicious + done.suspicious,
                timestamp: Utc::now(),
            });
            self.next_expected += 1;
            advanced = true;
        }

        if advanced {
            self.current.clone()
        } else {
            None
        }
    }

    /// Latest checkpoint, if any batch has completed.
    pub fn current(&self) -> Option<&Checkpoint> {
        self.current.as_ref()
    }

    /// Completed batches still waiting on a lower-numbered one.
    #[cfg(test)]
    fn waiting(&self) -> usize {
        self.out_of_order.len()
    }
}
