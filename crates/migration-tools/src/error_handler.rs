//! Error classification and operator guidance.

use historiandb_core::{FailureReason, StoreError};

use crate::error::MigrationError;

/// Error taxonomy behind the `histmig` exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connection loss or timeout; retried automatically
    Transient,
    /// Malformed or rejected records; quarantined, never retried
    Data,
    /// Backup could not be created or verified
    Backup,
    /// Bad arguments, configuration or job id
    Configuration,
    /// Validation verdict `Fail`
    Validation,
    /// Operator interrupt
    Cancelled,
    /// Any other unrecoverable error
    Fatal,
}

impl ErrorClass {
    /// Classify an engine error.
    pub fn of(error: &MigrationError) -> Self {
        match error {
            MigrationError::Cancelled => ErrorClass::Cancelled,
            MigrationError::BatchFailed { source, .. } => Self::of_store(source),
            MigrationError::Store(err) => Self::of_store(err),
            MigrationError::BackupFailed(_) => ErrorClass::Backup,
            MigrationError::Config(_) | MigrationError::JobNotFound(_) => {
                ErrorClass::Configuration
            }
            MigrationError::InvalidRange(_)
            | MigrationError::InvalidTransition(_)
            | MigrationError::Io(_) => ErrorClass::Fatal,
        }
    }

    /// Classify a persisted failure reason.
    pub fn of_failure(reason: &FailureReason) -> Self {
        match reason {
            FailureReason::Cancelled => ErrorClass::Cancelled,
            FailureReason::BackupFailed(_) => ErrorClass::Backup,
            FailureReason::BatchFailed { .. } => ErrorClass::Transient,
            FailureReason::ValidationFailed(_) => ErrorClass::Validation,
            FailureReason::Error(_) => ErrorClass::Fatal,
        }
    }

    /// Process exit code: `1` validation failure, `2` migration failure or
    /// cancellation, `3` configuration error, `4` backup failure.
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorClass::Validation => 1,
            ErrorClass::Transient
            | ErrorClass::Data
            | ErrorClass::Cancelled
            | ErrorClass::Fatal => 2,
            ErrorClass::Configuration => 3,
            ErrorClass::Backup => 4,
        }
    }

    fn of_store(error: &StoreError) -> Self {
        match error {
            err if err.is_transient() => ErrorClass::Transient,
            err if err.is_constraint_violation() => ErrorClass::Data,
            StoreError::Cancelled(_) => ErrorClass::Cancelled,
            StoreError::BackupFailed(_) => ErrorClass::Backup,
            StoreError::InvalidConfig(_) => ErrorClass::Configuration,
            _ => ErrorClass::Fatal,
        }
    }
}

/// Operator guidance for a failed job.
pub struct ErrorRecovery;

impl ErrorRecovery {
    /// Steps an operator should take, given the failure and the job id.
    pub fn recovery_steps(reason: &FailureReason, job_id: uuid::Uuid) -> Vec<String> {
        let resume = format!("histmig migrate --resume {job_id}");
        match reason {
            FailureReason::Cancelled => vec![format!(
                "1. Resume from the last checkpoint with `{resume}`"
            )],
            FailureReason::BackupFailed(_) => vec![
                "1. Check free space and permissions on the destination database".to_string(),
                "2. Nothing was migrated; the destination is untouched".to_string(),
                format!("3. Retry with `{resume}`"),
            ],
            FailureReason::BatchFailed { .. } => vec![
                "1. Check connectivity to the source and destination databases".to_string(),
                "2. Completed batches are checkpointed and will not be re-run".to_string(),
                format!("3. Resume with `{resume}`"),
            ],
            FailureReason::ValidationFailed(_) => vec![
                "1. Inspect the validation report; migrated data was left in place".to_string(),
                format!("2. Roll back with `histmig rollback {job_id}` if the data is wrong"),
                format!("3. Re-run validation with `{resume}` after fixing the cause"),
            ],
            FailureReason::Error(_) => vec![
                "1. Check logs for more details".to_string(),
                format!("2. Resume with `{resume}`"),
            ],
        }
    }
}
