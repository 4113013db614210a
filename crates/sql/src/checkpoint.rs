//! Job, checkpoint and quarantine persistence in the destination database.
//!
//! Jobs and checkpoints are stored as JSON payloads keyed by job id, one row
//! each, overwritten in place. Quarantine entries get one row per entry so an
//! operator can query them with plain SQL.

use async_trait::async_trait;
use chrono::Utc;
use historiandb_core::{
    Checkpoint, CheckpointStore, MigrationJob, QuarantinedRecord, StoreResult,
};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::connection::Database;
use crate::error::store_err;

const JOBS_TABLE: &str = "histmig_jobs";
const CHECKPOINTS_TABLE: &str = "histmig_checkpoints";
const QUARANTINE_TABLE: &str = "histmig_quarantine";

/// Checkpoint store backed by `histmig_*` tables.
#[derive(Debug, Clone)]
pub struct SqlCheckpointStore {
    db: Database,
}

impl SqlCheckpointStore {
    /// Open the store, creating its tables if needed.
    pub async fn open(db: Database) -> StoreResult<Self> {
        let store = Self { db };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> StoreResult<()> {
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {JOBS_TABLE} (
                    job_id VARCHAR(36) PRIMARY KEY,
                    status VARCHAR(32) NOT NULL,
                    payload TEXT NOT NULL,
                    updated_at VARCHAR(40) NOT NULL
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {CHECKPOINTS_TABLE} (
                    job_id VARCHAR(36) PRIMARY KEY,
                    last_completed_sequence BIGINT NOT NULL,
                    payload TEXT NOT NULL,
                    updated_at VARCHAR(40) NOT NULL
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {QUARANTINE_TABLE} (
                    job_id VARCHAR(36) NOT NULL,
                    tagid BIGINT NOT NULL,
                    t_stamp BIGINT NOT NULL,
                    sequence BIGINT NOT NULL,
                    kind VARCHAR(32) NOT NULL,
                    reason TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    PRIMARY KEY (job_id, tagid, t_stamp, sequence, kind, reason)
                )"
            ),
        ];
        for statement in &statements {
            sqlx::query(statement)
                .execute(self.db.pool())
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }

    async fn load_payload(&self, table: &str, job_id: Uuid) -> StoreResult<Option<String>> {
        let sql = format!(
            "SELECT payload FROM {table} WHERE job_id = {}",
            self.db.dialect().param(1)
        );
        let row = sqlx::query(&sql)
            .bind(job_id.to_string())
            .fetch_optional(self.db.pool())
            .await
            .map_err(store_err)?;
        row.map(|row| row.try_get("payload").map_err(store_err))
            .transpose()
    }
}

#[async_trait]
impl CheckpointStore for SqlCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> StoreResult<()> {
        let dialect = self.db.dialect();
        let sql = format!(
            "INSERT INTO {CHECKPOINTS_TABLE} (job_id, last_completed_sequence, payload, updated_at) \
             VALUES {} ON CONFLICT (job_id) DO UPDATE SET \
             last_completed_sequence = excluded.last_completed_sequence, \
             payload = excluded.payload, updated_at = excluded.updated_at",
            dialect.tuple(1, 4)
        );
        sqlx::query(&sql)
            .bind(checkpoint.job_id.to_string())
            .bind(i64::try_from(checkpoint.last_completed_sequence).unwrap_or(i64::MAX))
            .bind(serde_json::to_string(checkpoint)?)
            .bind(Utc::now().to_rfc3339())
            .execute(self.db.pool())
            .await
            .map_err(store_err)?;
        debug!(job_id = %checkpoint.job_id, sequence = checkpoint.last_completed_sequence, "checkpoint committed");
        Ok(())
    }

    async fn load(&self, job_id: Uuid) -> StoreResult<Option<Checkpoint>> {
        match self.load_payload(CHECKPOINTS_TABLE, job_id).await? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn save_job(&self, job: &MigrationJob) -> StoreResult<()> {
        let dialect = self.db.dialect();
        let sql = format!(
            "INSERT INTO {JOBS_TABLE} (job_id, status, payload, updated_at) VALUES {} \
             ON CONFLICT (job_id) DO UPDATE SET status = excluded.status, \
             payload = excluded.payload, updated_at = excluded.updated_at",
            dialect.tuple(1, 4)
        );
        sqlx::query(&sql)
            .bind(job.id.to_string())
            .bind(job.status.to_string())
            .bind(serde_json::to_string(job)?)
            .bind(Utc::now().to_rfc3339())
            .execute(self.db.pool())
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn load_job(&self, job_id: Uuid) -> StoreResult<Option<MigrationJob>> {
        match self.load_payload(JOBS_TABLE, job_id).await? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn record_quarantine(
        &self,
        job_id: Uuid,
        records: &[QuarantinedRecord],
    ) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "INSERT INTO {QUARANTINE_TABLE} (job_id, tagid, t_stamp, sequence, kind, reason, payload) \
             VALUES {} ON CONFLICT DO NOTHING",
            self.db.dialect().tuple(1, 7)
        );
        let mut tx = self.db.pool().begin().await.map_err(store_err)?;
        for record in records {
            sqlx::query(&sql)
                .bind(job_id.to_string())
                .bind(record.key.tag_id)
                .bind(record.key.timestamp_millis)
                .bind(i64::try_from(record.sequence).unwrap_or(i64::MAX))
                .bind(record.kind.to_string())
                .bind(record.reason.clone())
                .bind(serde_json::to_string(record)?)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn load_quarantine(&self, job_id: Uuid) -> StoreResult<Vec<QuarantinedRecord>> {
        let sql = format!(
            "SELECT payload FROM {QUARANTINE_TABLE} WHERE job_id = {} \
             ORDER BY t_stamp, tagid, sequence, kind, reason",
            self.db.dialect().param(1)
        );
        let rows = sqlx::query(&sql)
            .bind(job_id.to_string())
            .fetch_all(self.db.pool())
            .await
            .map_err(store_err)?;
        rows.iter()
            .map(|row| -> StoreResult<QuarantinedRecord> {
                let payload: String = row.try_get("payload").map_err(store_err)?;
                Ok(serde_json::from_str(&payload)?)
            })
            .collect()
    }

    async fn clear(&self, job_id: Uuid) -> StoreResult<()> {
        let mut tx = self.db.pool().begin().await.map_err(store_err)?;
        for table in [QUARANTINE_TABLE, CHECKPOINTS_TABLE, JOBS_TABLE] {
            let sql = format!(
                "DELETE FROM {table} WHERE job_id = {}",
                self.db.dialect().param(1)
            );
            sqlx::query(&sql)
                .bind(job_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }
}
