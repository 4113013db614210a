//! Read-only access to a historian partition table.

use async_trait::async_trait;
use historiandb_core::{KeyRange, MigrationKey, RawRow, SourceTable, StoreResult, TableStats};
use tracing::trace;

use crate::connection::Database;
use crate::error::store_err;
use crate::schema::{self, bind_range, key_of, range_predicate, raw_row, select_list, KEY_LIST};
use crate::table::TableName;

/// Historian table read in `(t_stamp, tagid)` order.
///
/// Rows sharing a key come back in physical order (`rowid` on SQLite,
/// `ctid` on PostgreSQL), so the first of a duplicate run is the one that
/// gets written and later ones are quarantined.
#[derive(Debug, Clone)]
pub struct SqlSource {
    db: Database,
    table: TableName,
}

impl SqlSource {
    /// Source reading `table` through `db`.
    pub fn new(db: Database, table: TableName) -> Self {
        Self { db, table }
    }

    /// Table being read.
    pub fn table(&self) -> &TableName {
        &self.table
    }
}

fn clamp_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl SourceTable for SqlSource {
    async fn scan(&self, range: &KeyRange, limit: usize) -> StoreResult<Vec<RawRow>> {
        let dialect = self.db.dialect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY t_stamp, tagid, {} LIMIT {}",
            select_list(dialect),
            self.table.quoted(),
            range_predicate(dialect, 1),
            dialect.row_locator(),
            dialect.param(5)
        );
        trace!(table = %self.table, %range, limit, "scan");
        let rows = bind_range(sqlx::query(&sql), range)
            .bind(clamp_limit(limit))
            .fetch_all(self.db.pool())
            .await
            .map_err(store_err)?;
        rows.iter().map(raw_row).collect()
    }

    async fn keys_at(
        &self,
        range: &KeyRange,
        offset: u64,
        count: usize,
    ) -> StoreResult<Vec<MigrationKey>> {
        let dialect = self.db.dialect();
        let sql = format!(
            "SELECT {KEY_LIST} FROM {} WHERE {} ORDER BY t_stamp, tagid, {} LIMIT {} OFFSET {}",
            self.table.quoted(),
            range_predicate(dialect, 1),
            dialect.row_locator(),
            dialect.param(5),
            dialect.param(6)
        );
        let rows = bind_range(sqlx::query(&sql), range)
            .bind(clamp_limit(count))
            .bind(i64::try_from(offset).unwrap_or(i64::MAX))
            .fetch_all(self.db.pool())
            .await
            .map_err(store_err)?;
        rows.iter().map(key_of).collect()
    }

    async fn stats(&self, range: Option<&KeyRange>) -> StoreResult<TableStats> {
        schema::table_stats(&self.db, &self.table, range).await
    }

    async fn sample(&self, range: &KeyRange, count: usize) -> StoreResult<Vec<RawRow>> {
        let dialect = self.db.dialect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY random() LIMIT {}",
            select_list(dialect),
            self.table.quoted(),
            range_predicate(dialect, 1),
            dialect.param(5)
        );
        let rows = bind_range(sqlx::query(&sql), range)
            .bind(clamp_limit(count))
            .fetch_all(self.db.pool())
            .await
            .map_err(store_err)?;
        rows.iter().map(raw_row).collect()
    }
}
