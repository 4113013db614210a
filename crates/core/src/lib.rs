//! historiandb-core
//!
//! Domain model for migrating historian sensor data into a partitioned
//! time-series store: the canonical record and its codec, key ranges and
//! batches, the migration job state machine, checkpoints, and the traits the
//! migration engine uses to reach its external collaborators.

#![warn(missing_docs)]

pub mod cancel;
pub mod checkpoint;
pub mod codec;
pub mod error;
pub mod job;
pub mod memory;
pub mod range;
pub mod record;
pub mod traits;

pub use cancel::{CancellationExt, CancellationToken};
pub use checkpoint::{Checkpoint, QuarantineKind, QuarantinedRecord};
pub use codec::{DecodeWarning, Decoded, RecordCodec, MAX_FUTURE_SKEW_MILLIS};
pub use error::{CodecError, StoreError, StoreResult};
pub use job::{
    BackupHandle, BackupPolicy, BackupScope, FailureReason, InvalidTransition, JobMode,
    JobStatus, MigrationJob,
};
pub use range::{Batch, BatchStatus, InvalidRange, KeyRange};
pub use record::{MigrationKey, Quality, RawRow, Record, Value};
pub use traits::{
    BackupManager, CheckpointStore, DestinationSink, SourceTable, TableStats, UpsertOutcome,
    WriteMode,
};
