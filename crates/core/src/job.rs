//! Migration job record and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::range::KeyRange;

/// What a job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobMode {
    /// Back up, migrate every batch, then validate
    FullMigration,
    /// Only compare source and destination
    ValidateOnly,
}

/// Whether a backup is taken before writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupPolicy {
    /// Snapshot the destination before the first write
    CreateBackup,
    /// No snapshot; rollback becomes impossible
    SkipBackup,
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Created, nothing done yet
    Pending,
    /// Backup in progress
    BackingUp,
    /// Computing the batch plan
    Planning,
    /// Batch loop running
    Migrating,
    /// Comparing source and destination
    Validating,
    /// Finished with a Pass or Warn verdict
    Completed,
    /// Stopped; see the failure reason
    Failed,
    /// Destination restored from backup by an operator
    RolledBack,
}

impl JobStatus {
    /// Whether `self -> to` is an edge of the forward state machine.
    pub fn can_advance_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, BackingUp)
                | (Pending, Planning)
                | (Pending, Validating)
                | (BackingUp, Planning)
                | (Planning, Migrating)
                | (Planning, Completed)
                | (Migrating, Validating)
                | (Validating, Completed)
        )
    }

    /// States a failed job may resume into.
    pub fn is_resumable_phase(self) -> bool {
        matches!(
            self,
            JobStatus::BackingUp | JobStatus::Planning | JobStatus::Migrating | JobStatus::Validating
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Pending => "pending",
            JobStatus::BackingUp => "backing_up",
            JobStatus::Planning => "planning",
            JobStatus::Migrating => "migrating",
            JobStatus::Validating => "validating",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// Why a job is in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Operator interrupt; a resume is expected
    Cancelled,
    /// Backup could not be created or verified
    BackupFailed(String),
    /// A batch exhausted its retry budget
    BatchFailed {
        /// Sequence number of the batch
        sequence: u64,
        /// Last error seen
        error: String,
    },
    /// Validation verdict was `Fail`
    ValidationFailed(String),
    /// Any other fatal error
    Error(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Cancelled => f.write_str("cancelled by operator"),
            FailureReason::BackupFailed(msg) => write!(f, "backup failed: {msg}"),
            FailureReason::BatchFailed { sequence, error } => {
                write!(f, "batch {sequence} failed: {error}")
            }
            FailureReason::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            FailureReason::Error(msg) => f.write_str(msg),
        }
    }
}

/// What a backup covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupScope {
    /// Table to snapshot
    pub table: String,
    /// Restrict the snapshot to a key range; `None` copies the whole table
    pub range: Option<KeyRange>,
}

/// Reference to a verified point-in-time copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupHandle {
    /// Identifier of the copy (for SQL stores, the backup table name)
    pub id: String,
    /// Table the copy was taken from
    pub table: String,
    /// Rows confirmed readable right after creation
    pub row_count: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Illegal state change.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("job {job_id}: cannot move from {from} to {to}")]
pub struct InvalidTransition {
    /// Job identifier
    pub job_id: Uuid,
    /// Current status
    pub from: JobStatus,
    /// Requested status
    pub to: JobStatus,
}

/// One migration run, persisted until explicitly cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationJob {
    /// Job identifier used for `--resume`
    pub id: Uuid,
    /// Qualified source table
    pub source_table: String,
    /// Qualified destination table
    pub destination_table: String,
    /// Records per batch
    pub batch_size: u64,
    /// Full migration or validation only
    pub mode: JobMode,
    /// Backup policy
    pub backup_policy: BackupPolicy,
    /// Current status
    pub status: JobStatus,
    /// Phase the job was in when it failed
    pub failed_phase: Option<JobStatus>,
    /// Why the job failed
    pub failure: Option<FailureReason>,
    /// Range fixed at planning time; later source writes above it are out of scope
    pub planned_range: Option<KeyRange>,
    /// Number of batches the first planning pass produced
    pub planned_batches: Option<u64>,
    /// Verified backup, if one was taken
    pub backup: Option<BackupHandle>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl MigrationJob {
    /// Create a pending job with a fresh identifier.
    pub fn new(
        source_table: impl Into<String>,
        destination_table: impl Into<String>,
        batch_size: u64,
        mode: JobMode,
        backup_policy: BackupPolicy,
    ) -> Self {
        let now = Utc::now();
        MigrationJob {
            id: Uuid::new_v4(),
            source_table: source_table.into(),
            destination_table: destination_table.into(),
            batch_size,
            mode,
            backup_policy,
            status: JobStatus::Pending,
            failed_phase: None,
            failure: None,
            planned_range: None,
            planned_batches: None,
            backup: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Advance along the forward state machine.
    pub fn advance(&mut self, to: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_advance_to(to) {
            return Err(self.invalid(to));
        }
        self.set_status(to);
        Ok(())
    }

    /// Move to `Failed`, remembering the phase the failure happened in.
    pub fn fail(&mut self, reason: FailureReason) {
        if self.status != JobStatus::Failed {
            self.failed_phase = Some(self.status);
        }
        self.failure = Some(reason);
        self.set_status(JobStatus::Failed);
    }

    /// Re-enter the phase a failed job stopped in.
    pub fn resume(&mut self) -> Result<JobStatus, InvalidTransition> {
        match (self.status, self.failed_phase) {
            (JobStatus::Failed, Some(phase)) if phase.is_resumable_phase() => {
                self.failure = None;
                self.failed_phase = None;
                self.set_status(phase);
                Ok(phase)
            }
            (JobStatus::Failed, Some(JobStatus::Pending)) | (JobStatus::Failed, None) => {
                self.failure = None;
                self.failed_phase = None;
                self.set_status(JobStatus::Pending);
                Ok(JobStatus::Pending)
            }
            (from, _) => Err(self.invalid(from)),
        }
    }

    /// Operator-triggered side transition; only possible while a backup exists.
    pub fn roll_back(&mut self) -> Result<(), InvalidTransition> {
        if self.backup.is_none() || self.status == JobStatus::RolledBack {
            return Err(self.invalid(JobStatus::RolledBack));
        }
        self.set_status(JobStatus::RolledBack);
        Ok(())
    }

    /// Whether the job reached `Completed`, `RolledBack`, or a failure.
    pub fn is_settled(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Completed | JobStatus::Failed | JobStatus::RolledBack
        )
    }

    fn set_status(&mut self, to: JobStatus) {
        self.status = to;
        self.updated_at = Utc::now();
    }

    fn invalid(&self, to: JobStatus) -> InvalidTransition {
        InvalidTransition {
            job_id: self.id,
            from: self.status,
            to,
        }
    }
}
