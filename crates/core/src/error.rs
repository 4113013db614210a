//! Error types shared by the migration collaborators.
//!
//! Two families exist:
//!
//! - `CodecError` is produced when a raw source row cannot become a `Record`.
//!   It is a *data* error: the row is quarantined and migration continues.
//! - `StoreError` is produced by source, destination, backup and checkpoint
//!   collaborators. `StoreError::is_transient` separates errors worth retrying
//!   (`ConnectionLost`, `Timeout`) from everything else.

use std::io;
use thiserror::Error;

use crate::record::MigrationKey;

/// Failure to decode one raw source row.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// The row does not describe exactly one typed value, or its timestamp is unusable.
    #[error("malformed record {key}: {reason}")]
    MalformedRecord {
        /// Key of the offending row
        key: MigrationKey,
        /// Human-readable reason
        reason: String,
    },
}

impl CodecError {
    /// Key of the row that failed to decode.
    pub fn key(&self) -> MigrationKey {
        match self {
            CodecError::MalformedRecord { key, .. } => *key,
        }
    }
}

/// Errors raised by storage collaborators.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The connection to the store dropped or could not be established
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The store did not answer in time
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// A write was rejected by an integrity constraint
    #[error("constraint violation{}: {reason}", key.map(|k| format!(" at {k}")).unwrap_or_default())]
    ConstraintViolation {
        /// Key of the rejected record, when the store can tell
        key: Option<MigrationKey>,
        /// Reason reported by the store
        reason: String,
    },

    /// A backup could not be created or verified
    #[error("backup failed: {0}")]
    BackupFailed(String),

    /// Referenced object (table, backup, job) does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Collaborator was configured with invalid parameters
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation was interrupted by an operator
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Failed to (de)serialize persisted state
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Local filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Anything else the store reported
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::ConnectionLost(_) | StoreError::Timeout(_))
    }

    /// Whether the error is a data-integrity rejection.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StoreError::ConstraintViolation { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result alias for collaborator calls.
pub type StoreResult<T> = Result<T, StoreError>;
