//! Classification of database errors into collaborator errors.

use historiandb_core::StoreError;

/// SQLite extended result codes for constraint failures.
const SQLITE_CONSTRAINT_CODES: &[&str] = &["19", "275", "531", "787", "1043", "1299", "1555", "2067"];
/// SQLite busy and locked result codes.
const SQLITE_BUSY_CODES: &[&str] = &["5", "6", "261", "262", "517"];

/// Map a `sqlx::Error` onto the retry taxonomy of `StoreError`.
///
/// Connection-level failures become `ConnectionLost`, pool exhaustion and
/// lock contention become `Timeout`, and integrity violations (SQLSTATE class
/// 23, SQLite constraint codes) become `ConstraintViolation`. The offending key
/// is not recoverable from the driver error, so `key` is always `None`.
pub fn store_err(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            StoreError::ConnectionLost(err.to_string())
        }
        sqlx::Error::PoolTimedOut => StoreError::Timeout(err.to_string()),
        sqlx::Error::Configuration(_) => StoreError::InvalidConfig(err.to_string()),
        sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => StoreError::Serialization(err.to_string()),
        sqlx::Error::Database(ref db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            let message = db.message().to_string();
            if db.is_unique_violation()
                || db.is_foreign_key_violation()
                || db.is_check_violation()
                || code.starts_with("23")
                || SQLITE_CONSTRAINT_CODES.contains(&code.as_str())
            {
                StoreError::ConstraintViolation {
                    key: None,
                    reason: message,
                }
            } else if code.starts_with("08") || code == "57P01" || code == "57P02" || code == "57P03" {
                StoreError::ConnectionLost(message)
            } else if code == "57014" || code == "40001" || code == "40P01" || SQLITE_BUSY_CODES.contains(&code.as_str()) {
                StoreError::Timeout(message)
            } else if code == "42P01" {
                StoreError::NotFound(message)
            } else {
                StoreError::Other(format!("database error {code}: {message}"))
            }
        }
        other => StoreError::Other(other.to_string()),
    }
}
