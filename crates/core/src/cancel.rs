//! Operator cancellation shared between the orchestrator, workers and
//! long-running collaborator calls such as backups.

pub use tokio_util::sync::CancellationToken;

use crate::error::StoreError;

/// Turns a cancelled token into a `StoreError` at safe stopping points.
pub trait CancellationExt {
    /// `Err(StoreError::Cancelled)` once cancellation was requested.
    fn checkpoint(&self, what: &str) -> Result<(), StoreError>;
}

impl CancellationExt for CancellationToken {
    fn checkpoint(&self, what: &str) -> Result<(), StoreError> {
        if self.is_cancelled() {
            Err(StoreError::Cancelled(what.to_string()))
        } else {
            Ok(())
        }
    }
}
