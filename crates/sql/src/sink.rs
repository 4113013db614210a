//! Destination table written with conflict-aware multi-row upserts.

use async_trait::async_trait;
use historiandb_core::{
    DestinationSink, KeyRange, MigrationKey, Record, RecordCodec, StoreError, StoreResult,
    TableStats, UpsertOutcome, WriteMode,
};
use sqlx::Row;
use tracing::debug;

use crate::connection::{Database, Dialect};
use crate::error::store_err;
use crate::schema::{self, raw_row, select_list, ValueColumns, INSERT_COLUMNS, PARAMS_PER_RECORD};
use crate::table::TableName;

/// Records per `INSERT` statement; keeps bind counts under every driver limit.
const ROWS_PER_STATEMENT: usize = 500;

/// Destination table with a unique `(tagid, t_stamp)` key.
#[derive(Debug, Clone)]
pub struct SqlSink {
    db: Database,
    table: TableName,
}

impl SqlSink {
    /// Sink writing `table` through `db`.
    pub fn new(db: Database, table: TableName) -> Self {
        Self { db, table }
    }

    /// Table being written.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    fn insert_sql(&self, rows: usize, mode: WriteMode) -> String {
        let dialect = self.db.dialect();
        let values: Vec<String> = (0..rows)
            .map(|i| value_tuple(dialect, i * PARAMS_PER_RECORD + 1))
            .collect();
        let conflict = match mode {
            WriteMode::FirstWriteWins => "DO NOTHING",
            WriteMode::Repair => {
                "DO UPDATE SET intvalue = excluded.intvalue, floatvalue = excluded.floatvalue, \
                 stringvalue = excluded.stringvalue, datevalue = excluded.datevalue, \
                 dataintegrity = excluded.dataintegrity"
            }
        };
        format!(
            "INSERT INTO {} ({INSERT_COLUMNS}) VALUES {} ON CONFLICT (tagid, t_stamp) {conflict}",
            self.table.quoted(),
            values.join(", ")
        )
    }
}

fn value_tuple(dialect: Dialect, first: usize) -> String {
    let p = |offset: usize| dialect.param(first + offset);
    format!(
        "({}, {}, {}, {}, {}, {}, {})",
        p(0),
        p(1),
        p(2),
        p(3),
        dialect.millis_as_date(&p(4)),
        p(5),
        p(6)
    )
}

/// `(tagid, t_stamp) IN (VALUES ..)` over `keys` parameters starting at 1.
fn key_filter(dialect: Dialect, keys: usize) -> String {
    let tuples: Vec<String> = (0..keys).map(|i| dialect.tuple(i * 2 + 1, 2)).collect();
    format!("(tagid, t_stamp) IN (VALUES {})", tuples.join(", "))
}

#[async_trait]
impl DestinationSink for SqlSink {
    async fn ensure_schema(&self) -> StoreResult<()> {
        schema::create_table(&self.db, &self.table).await
    }

    async fn upsert(&self, records: &[Record], mode: WriteMode) -> StoreResult<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();
        if records.is_empty() {
            return Ok(outcome);
        }
        let dialect = self.db.dialect();
        let mut tx = self.db.pool().begin().await.map_err(store_err)?;

        for chunk in records.chunks(ROWS_PER_STATEMENT) {
            let existing = if mode == WriteMode::Repair {
                let sql = format!(
                    "SELECT COUNT(*) AS existing FROM {} WHERE {}",
                    self.table.quoted(),
                    key_filter(dialect, chunk.len())
                );
                let mut query = sqlx::query(&sql);
                for record in chunk {
                    query = query.bind(record.key.tag_id).bind(record.key.timestamp_millis);
                }
                let row = query.fetch_one(&mut *tx).await.map_err(store_err)?;
                let existing: i64 = row.try_get("existing").map_err(store_err)?;
                existing.max(0) as u64
            } else {
                0
            };

            let sql = self.insert_sql(chunk.len(), mode);
            let mut query = sqlx::query(&sql);
            for record in chunk {
                let columns = ValueColumns::from(&record.value);
                query = query
                    .bind(record.key.tag_id)
                    .bind(columns.int)
                    .bind(columns.float)
                    .bind(columns.string)
                    .bind(columns.date)
                    .bind(record.quality.0)
                    .bind(record.key.timestamp_millis);
            }
            let affected = query
                .execute(&mut *tx)
                .await
                .map_err(store_err)?
                .rows_affected();

            let rows = chunk.len() as u64;
            match mode {
                WriteMode::FirstWriteWins => {
                    outcome.inserted += affected;
                    outcome.unchanged += rows.saturating_sub(affected);
                }
                WriteMode::Repair => {
                    outcome.updated += existing;
                    outcome.inserted += rows.saturating_sub(existing);
                }
            }
        }

        tx.commit().await.map_err(store_err)?;
        debug!(table = %self.table, inserted = outcome.inserted, updated = outcome.updated, unchanged = outcome.unchanged, "upsert committed");
        Ok(outcome)
    }

    async fn stats(&self, range: &KeyRange) -> StoreResult<TableStats> {
        schema::table_stats(&self.db, &self.table, Some(range)).await
    }

    async fn fetch(&self, keys: &[MigrationKey]) -> StoreResult<Vec<Record>> {
        let dialect = self.db.dialect();
        let codec = RecordCodec::at_current_time();
        let mut records = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(ROWS_PER_STATEMENT) {
            let sql = format!(
                "SELECT {} FROM {} WHERE {}",
                select_list(dialect),
                self.table.quoted(),
                key_filter(dialect, chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for key in chunk {
                query = query.bind(key.tag_id).bind(key.timestamp_millis);
            }
            let rows = query.fetch_all(self.db.pool()).await.map_err(store_err)?;
            for row in &rows {
                let raw = raw_row(row)?;
                let decoded = codec.decode(&raw).map_err(|err| {
                    StoreError::Serialization(format!("destination row unreadable: {err}"))
                })?;
                records.push(decoded.record);
            }
        }
        Ok(records)
    }
}
