//! historiandb-sql
//!
//! PostgreSQL and SQLite implementations of the migration collaborators:
//! the historian source table, the destination table, table-copy backups and
//! durable job/checkpoint/quarantine persistence.

#![warn(missing_docs)]

/// Table-copy backups.
pub mod backup;
/// Job, checkpoint and quarantine tables.
pub mod checkpoint;
/// Pooled connections and dialects.
pub mod connection;
/// `sqlx::Error` classification.
pub mod error;
/// Historian table layout.
pub mod schema;
/// Destination table writer.
pub mod sink;
/// Source table reader.
pub mod source;
/// Validated table names.
pub mod table;

pub use backup::SqlBackupManager;
pub use checkpoint::SqlCheckpointStore;
pub use connection::{redact, Database, DatabaseConfig, Dialect};
pub use error::store_err;
pub use schema::{create_table, table_stats};
pub use sink::SqlSink;
pub use source::SqlSource;
pub use table::TableName;
