//! Resumable, validated migration of historian data.
//!
//! The engine reads a historian partition table in `(t_stamp, tagid)` order,
//! splits it into disjoint key-range batches, writes each batch idempotently
//! to the destination with retries and quarantine of bad records, checkpoints
//! the highest contiguous completed batch, and validates the result. Every
//! external system is reached through the collaborator traits of
//! `historiandb-core`, so the same engine runs against SQL databases and the
//! in-memory collaborators used by the test suites.

#![warn(missing_docs)]

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod db_handler;
pub mod error;
pub mod error_handler;
pub mod file_store;
pub mod logging;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod reader;
pub mod report;
pub mod retry;
pub mod validator;
pub mod writer;

pub use checkpoint::ProgressTracker;
pub use config::{CheckpointBackend, MigrationConfig};
pub use error::{MigrationError, MigrationResult};
pub use error_handler::{ErrorClass, ErrorRecovery};
pub use file_store::FileCheckpointStore;
pub use orchestrator::{
    Collaborators, JobRequest, JobSnapshot, MigrationOutcome, Migrator, Start,
};
pub use planner::{BatchPlanner, BoundaryGranularity};
pub use progress::MigrationProgress;
pub use reader::{ReadPage, SourceReader};
pub use retry::{RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};
pub use validator::{ValidationConfig, ValidationReport, Validator, Verdict};
pub use writer::{BatchOutcome, BatchWriter};
