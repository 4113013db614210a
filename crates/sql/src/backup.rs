//! Table-copy backups of the destination.
//!
//! A backup is built as `<table>_backup_<YYYYmmdd_HHMMSS>_partial`, its row
//! count checked against the live table, and only then renamed to its final
//! name. An interrupted or unverifiable backup is dropped, so a table without
//! the `_partial` suffix is always a complete copy.

use async_trait::async_trait;
use chrono::Utc;
use historiandb_core::{
    BackupHandle, BackupManager, BackupScope, CancellationExt, CancellationToken, StoreError,
    StoreResult,
};
use sqlx::Row;
use tracing::{info, warn};

use crate::connection::Database;
use crate::error::store_err;
use crate::schema;
use crate::table::TableName;

const PARTIAL_SUFFIX: &str = "_partial";

/// Backups stored as sibling tables in the destination database.
#[derive(Debug, Clone)]
pub struct SqlBackupManager {
    db: Database,
}

impl SqlBackupManager {
    /// Backup manager for tables in `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn row_count(&self, table: &TableName) -> StoreResult<u64> {
        let sql = format!("SELECT COUNT(*) AS row_count FROM {}", table.quoted());
        let row = sqlx::query(&sql)
            .fetch_one(self.db.pool())
            .await
            .map_err(store_err)?;
        let count: i64 = row.try_get("row_count").map_err(store_err)?;
        Ok(count.max(0) as u64)
    }

    async fn drop_table(&self, table: &TableName) {
        let sql = format!("DROP TABLE IF EXISTS {}", table.quoted());
        if let Err(err) = sqlx::query(&sql).execute(self.db.pool()).await {
            warn!(table = %table, error = %err, "failed to drop partial backup");
        }
    }

    async fn copy_and_verify(
        &self,
        source: &TableName,
        partial: &TableName,
        cancel: &CancellationToken,
    ) -> StoreResult<u64> {
        let copy = format!(
            "CREATE TABLE {} AS SELECT * FROM {}",
            partial.quoted(),
            source.quoted()
        );
        tokio::select! {
            result = sqlx::query(&copy).execute(self.db.pool()) => {
                result.map_err(store_err)?;
            }
            _ = cancel.cancelled() => {
                return Err(StoreError::Cancelled("backup interrupted while copying".to_string()));
            }
        }
        cancel.checkpoint("backup aborted before verification")?;

        let expected = self.row_count(source).await?;
        let copied = self.row_count(partial).await.map_err(|err| {
            StoreError::BackupFailed(format!("backup table {partial} unreadable: {err}"))
        })?;
        if copied != expected {
            return Err(StoreError::BackupFailed(format!(
                "backup table {partial} holds {copied} rows, {source} holds {expected}"
            )));
        }
        Ok(copied)
    }
}

#[async_trait]
impl BackupManager for SqlBackupManager {
    async fn create_backup(
        &self,
        scope: &BackupScope,
        cancel: &CancellationToken,
    ) -> StoreResult<BackupHandle> {
        if scope.range.is_some() {
            return Err(StoreError::InvalidConfig(
                "table-copy backups cover whole tables; a key range cannot be given".to_string(),
            ));
        }
        let source = TableName::parse(&scope.table)?;
        // A first migration backs up the empty table it is about to create.
        schema::create_table(&self.db, &source).await?;

        let created_at = Utc::now();
        let name = source.with_bounded_suffix(
            &format!("_backup_{}", created_at.format("%Y%m%d_%H%M%S")),
            PARTIAL_SUFFIX.len(),
        )?;
        let partial = name.with_suffix(PARTIAL_SUFFIX)?;
        self.drop_table(&partial).await;

        info!(table = %source, backup = %name, "creating backup");
        let row_count = match self.copy_and_verify(&source, &partial, cancel).await {
            Ok(count) => count,
            Err(err) => {
                self.drop_table(&partial).await;
                return Err(match err {
                    err @ (StoreError::Cancelled(_) | StoreError::BackupFailed(_)) => err,
                    other => StoreError::BackupFailed(other.to_string()),
                });
            }
        };

        let rename = format!(
            "ALTER TABLE {} RENAME TO {}",
            partial.quoted(),
            name.quoted_name()
        );
        if let Err(err) = sqlx::query(&rename).execute(self.db.pool()).await {
            self.drop_table(&partial).await;
            return Err(StoreError::BackupFailed(format!(
                "could not finalize backup {name}: {err}"
            )));
        }
        info!(table = %source, backup = %name, row_count, "backup verified");

        Ok(BackupHandle {
            id: name.to_string(),
            table: source.to_string(),
            row_count,
            created_at,
        })
    }

    async fn restore(&self, handle: &BackupHandle) -> StoreResult<u64> {
        let table = TableName::parse(&handle.table)?;
        let backup = TableName::parse(&handle.id)?;

        let mut tx = self.db.pool().begin().await.map_err(store_err)?;
        sqlx::query(&format!("DELETE FROM {}", table.quoted()))
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        let restored = sqlx::query(&format!(
            "INSERT INTO {} SELECT * FROM {}",
            table.quoted(),
            backup.quoted()
        ))
        .execute(&mut *tx)
        .await
        .map_err(|err| match store_err(err) {
            StoreError::NotFound(msg) => StoreError::NotFound(format!("backup {}: {msg}", handle.id)),
            other => other,
        })?
        .rows_affected();
        tx.commit().await.map_err(store_err)?;

        if restored != handle.row_count {
            warn!(backup = %handle.id, restored, expected = handle.row_count, "restored row count differs from backup");
        }
        info!(table = %table, backup = %handle.id, restored, "restore committed");
        Ok(restored)
    }
}
