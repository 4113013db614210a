//! Database connections and collaborator wiring for the `histmig` commands.

use historiandb_core::CheckpointStore;
use historiandb_sql::{
    redact, Database, DatabaseConfig, SqlBackupManager, SqlCheckpointStore, SqlSink, SqlSource,
    TableName,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::{CheckpointBackend, MigrationConfig};
use crate::error::{MigrationError, MigrationResult};
use crate::file_store::FileCheckpointStore;
use crate::orchestrator::Collaborators;

/// Source and destination databases of a run.
///
/// When both DSNs are equal the destination shares the source pool.
#[derive(Debug, Clone)]
pub struct Connections {
    source: Database,
    destination: Database,
}

impl Connections {
    /// Connect to the databases named by `config`.
    pub async fn connect(config: &MigrationConfig) -> MigrationResult<Self> {
        let source_dsn = config.source_dsn.as_deref().ok_or_else(|| {
            MigrationError::Config(
                "no source database: pass --source-dsn or set HISTMIG_SOURCE_DSN".to_string(),
            )
        })?;
        let source = DatabaseConfig::new(source_dsn)
            .for_workers(config.workers)
            .connect()
            .await?;

        let destination = match config.effective_destination_dsn() {
            Some(dsn) if !source.is_same(dsn) => {
                DatabaseConfig::new(dsn)
                    .for_workers(config.workers)
                    .connect()
                    .await?
            }
            _ => source.clone(),
        };
        let shared = config
            .effective_destination_dsn()
            .map_or(true, |dsn| source.is_same(dsn));
        info!(
            source = %redact(source_dsn),
            destination = %config.effective_destination_dsn().map(redact).unwrap_or_default(),
            shared,
            "connected"
        );
        Ok(Self {
            source,
            destination,
        })
    }

    /// Source database.
    pub fn source_db(&self) -> &Database {
        &self.source
    }

    /// Destination database.
    pub fn destination_db(&self) -> &Database {
        &self.destination
    }

    /// Reader over `table` in the source database.
    pub fn source(&self, table: &str) -> MigrationResult<SqlSource> {
        Ok(SqlSource::new(self.source.clone(), TableName::parse(table)?))
    }

    /// Job state persistence chosen by `config`.
    pub async fn checkpoint_store(
        &self,
        config: &MigrationConfig,
    ) -> MigrationResult<Arc<dyn CheckpointStore>> {
        Ok(match config.checkpoint_backend {
            CheckpointBackend::File => {
                Arc::new(FileCheckpointStore::open(&config.checkpoint_dir)?)
            }
            CheckpointBackend::Database => {
                Arc::new(SqlCheckpointStore::open(self.destination.clone()).await?)
            }
        })
    }

    /// Collaborators for a migration from `source_table` to `destination_table`.
    pub fn collaborators(
        &self,
        source_table: &str,
        destination_table: &str,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> MigrationResult<Collaborators> {
        let destination = TableName::parse(destination_table)?;
        Ok(Collaborators {
            source: Arc::new(self.source(source_table)?),
            sink: Arc::new(SqlSink::new(self.destination.clone(), destination)),
            backups: Arc::new(SqlBackupManager::new(self.destination.clone())),
            checkpoints,
        })
    }

    /// Collaborators for the tables of a persisted job.
    pub async fn collaborators_for_job(
        &self,
        job_id: Uuid,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> MigrationResult<Collaborators> {
        let job = checkpoints
            .load_job(job_id)
            .await?
            .ok_or(MigrationError::JobNotFound(job_id))?;
        self.collaborators(&job.source_table, &job.destination_table, checkpoints)
    }

    /// Close both pools.
    pub async fn close(&self) {
        self.source.close().await;
        self.destination.close().await;
    }
}
