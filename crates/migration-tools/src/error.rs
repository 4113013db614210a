//! Error types for migration operations.

use historiandb_core::{InvalidRange, InvalidTransition, StoreError};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during migration operations.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Configuration or input error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A collaborator failed outside of batch processing
    #[error("Store error: {0}")]
    Store(StoreError),

    /// Backup could not be created or verified
    #[error("Backup failed: {0}")]
    BackupFailed(String),

    /// A batch exhausted its retry budget or hit a non-retryable error
    #[error("Batch {sequence} failed after {attempts} attempt(s): {source}")]
    BatchFailed {
        /// Sequence number of the batch
        sequence: u64,
        /// Attempts made
        attempts: u32,
        /// Last error
        #[source]
        source: StoreError,
    },

    /// Operator requested cancellation
    #[error("Cancelled by operator")]
    Cancelled,

    /// Empty or inverted key range
    #[error(transparent)]
    InvalidRange(#[from] InvalidRange),

    /// Illegal job state change
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// No job stored under the identifier
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for MigrationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Cancelled(_) => MigrationError::Cancelled,
            StoreError::BackupFailed(msg) => MigrationError::BackupFailed(msg),
            StoreError::InvalidConfig(msg) => MigrationError::Config(msg),
            other => MigrationError::Store(other),
        }
    }
}

/// Result type for migration operations.
pub type MigrationResult<T> = Result<T, MigrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_store_error_becomes_cancellation() {
        let err: MigrationError = StoreError::Cancelled("backup".into()).into();
        assert!(matches!(err, MigrationError::Cancelled));
    }

    #[test]
    fn backup_store_error_keeps_message() {
        let err: MigrationError = StoreError::BackupFailed("row count mismatch".into()).into();
        assert_eq!(err.to_string(), "Backup failed: row count mismatch");
    }

    #[test]
    fn batch_failure_names_sequence_and_attempts() {
        let err = MigrationError::BatchFailed {
            sequence: 7,
            attempts: 5,
            source: StoreError::ConnectionLost("reset".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("Batch 7"));
        assert!(msg.contains("5 attempt"));
    }
}
