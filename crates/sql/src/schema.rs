//! Historian table layout shared by the source, destination and backups.
//!
//! Both sides use the historian partition layout
//! `(tagid, intvalue, floatvalue, stringvalue, datevalue, dataintegrity, t_stamp)`
//! ordered by `(t_stamp, tagid)`. Reads cast every column to a portable type so
//! the same decoding works on PostgreSQL and SQLite, and `datevalue` is always
//! exchanged as epoch milliseconds.

use historiandb_core::{KeyRange, MigrationKey, RawRow, StoreResult, TableStats, Value};
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, Row};

use crate::connection::{Database, Dialect};
use crate::error::store_err;
use crate::table::TableName;

pub(crate) type AnyQuery<'q> = Query<'q, Any, AnyArguments<'q>>;

/// Columns written per record, in insert order.
pub(crate) const INSERT_COLUMNS: &str =
    "tagid, intvalue, floatvalue, stringvalue, datevalue, dataintegrity, t_stamp";
/// Number of bind parameters per inserted record.
pub(crate) const PARAMS_PER_RECORD: usize = 7;

/// Portable select list decoding into [`RawRow`].
pub(crate) fn select_list(dialect: Dialect) -> String {
    format!(
        "CAST(tagid AS BIGINT) AS tagid, CAST(t_stamp AS BIGINT) AS t_stamp, \
         CAST(intvalue AS BIGINT) AS intvalue, CAST(floatvalue AS DOUBLE PRECISION) AS floatvalue, \
         stringvalue, {} AS datevalue, CAST(dataintegrity AS BIGINT) AS dataintegrity",
        dialect.date_as_millis("datevalue")
    )
}

/// Select list decoding into a [`MigrationKey`].
pub(crate) const KEY_LIST: &str = "CAST(tagid AS BIGINT) AS tagid, CAST(t_stamp AS BIGINT) AS t_stamp";

/// Half-open range predicate consuming four parameters starting at `first`.
pub(crate) fn range_predicate(dialect: Dialect, first: usize) -> String {
    format!(
        "(t_stamp, tagid) >= {} AND (t_stamp, tagid) < {}",
        dialect.tuple(first, 2),
        dialect.tuple(first + 2, 2)
    )
}

/// Bind the four parameters of [`range_predicate`].
pub(crate) fn bind_range<'q>(query: AnyQuery<'q>, range: &KeyRange) -> AnyQuery<'q> {
    query
        .bind(range.start().timestamp_millis)
        .bind(range.start().tag_id)
        .bind(range.end().timestamp_millis)
        .bind(range.end().tag_id)
}

/// Decode a row produced by [`select_list`].
pub(crate) fn raw_row(row: &AnyRow) -> StoreResult<RawRow> {
    let quality: Option<i64> = row.try_get("dataintegrity").map_err(store_err)?;
    Ok(RawRow {
        tag_id: row.try_get("tagid").map_err(store_err)?,
        t_stamp: row.try_get("t_stamp").map_err(store_err)?,
        int_value: row.try_get("intvalue").map_err(store_err)?,
        float_value: row.try_get("floatvalue").map_err(store_err)?,
        string_value: row.try_get("stringvalue").map_err(store_err)?,
        date_value: row.try_get("datevalue").map_err(store_err)?,
        // Out-of-range codes decode as missing and are quarantined by the codec.
        quality: quality.and_then(|q| i32::try_from(q).ok()),
    })
}

/// Decode a row produced by [`KEY_LIST`].
pub(crate) fn key_of(row: &AnyRow) -> StoreResult<MigrationKey> {
    Ok(MigrationKey::new(
        row.try_get("tagid").map_err(store_err)?,
        row.try_get("t_stamp").map_err(store_err)?,
    ))
}

/// Value columns of one record; exactly one is populated.
#[derive(Debug, Default)]
pub(crate) struct ValueColumns {
    pub(crate) int: Option<i64>,
    pub(crate) float: Option<f64>,
    pub(crate) string: Option<String>,
    pub(crate) date: Option<i64>,
}

impl From<&Value> for ValueColumns {
    fn from(value: &Value) -> Self {
        match value {
            Value::Integer(v) => ValueColumns {
                int: Some(*v),
                ..Default::default()
            },
            Value::Float(v) => ValueColumns {
                float: Some(*v),
                ..Default::default()
            },
            Value::String(v) => ValueColumns {
                string: Some(v.clone()),
                ..Default::default()
            },
            Value::Date(v) => ValueColumns {
                date: Some(*v),
                ..Default::default()
            },
        }
    }
}

/// Create `table` with the historian layout and its `(tagid, t_stamp)` key.
pub async fn create_table(db: &Database, table: &TableName) -> StoreResult<()> {
    let dialect = db.dialect();
    let ddl = format!(
        "CREATE TABLE IF NOT EXISTS {} (
            tagid BIGINT NOT NULL,
            intvalue BIGINT,
            floatvalue DOUBLE PRECISION,
            stringvalue VARCHAR(255),
            datevalue {},
            dataintegrity INTEGER NOT NULL,
            t_stamp BIGINT NOT NULL,
            UNIQUE (tagid, t_stamp)
        )",
        table.quoted(),
        dialect.date_type()
    );
    sqlx::query(&ddl)
        .execute(db.pool())
        .await
        .map_err(store_err)?;
    sqlx::query(&create_index_sql(dialect, table)?)
        .execute(db.pool())
        .await
        .map_err(store_err)?;
    Ok(())
}

fn create_index_sql(dialect: Dialect, table: &TableName) -> StoreResult<String> {
    let index = table.with_bounded_suffix("_t_stamp_idx", 0)?;
    Ok(match dialect {
        Dialect::Postgres => format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (t_stamp, tagid)",
            index.quoted_name(),
            table.quoted()
        ),
        // SQLite qualifies the index, not the table.
        Dialect::Sqlite => format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (t_stamp, tagid)",
            index.quoted(),
            table.quoted_name()
        ),
    })
}

/// Bind the range parameters when a range is given.
pub(crate) fn bind_optional_range<'q>(query: AnyQuery<'q>, range: Option<&KeyRange>) -> AnyQuery<'q> {
    match range {
        Some(range) => bind_range(query, range),
        None => query,
    }
}

/// Row, key and tag counts plus key bounds of `table`, optionally restricted to `range`.
pub async fn table_stats(
    db: &Database,
    table: &TableName,
    range: Option<&KeyRange>,
) -> StoreResult<TableStats> {
    let filter = match range {
        Some(_) => format!("WHERE {}", range_predicate(db.dialect(), 1)),
        None => String::new(),
    };

    let counts_sql = format!(
        "SELECT COUNT(*) AS row_count, COUNT(DISTINCT tagid) AS tag_count FROM {} {filter}",
        table.quoted()
    );
    let counts = bind_optional_range(sqlx::query(&counts_sql), range)
        .fetch_one(db.pool())
        .await
        .map_err(store_err)?;
    let row_count: i64 = counts.try_get("row_count").map_err(store_err)?;
    let tag_count: i64 = counts.try_get("tag_count").map_err(store_err)?;
    if row_count == 0 {
        return Ok(TableStats::default());
    }

    let keys_sql = format!(
        "SELECT COUNT(*) AS key_count FROM (SELECT DISTINCT tagid, t_stamp FROM {} {filter}) AS distinct_keys",
        table.quoted()
    );
    let key_count: i64 = bind_optional_range(sqlx::query(&keys_sql), range)
        .fetch_one(db.pool())
        .await
        .map_err(store_err)?
        .try_get("key_count")
        .map_err(store_err)?;

    let min_key = boundary_key(db, table, &filter, range, "ASC").await?;
    let max_key = boundary_key(db, table, &filter, range, "DESC").await?;

    Ok(TableStats {
        row_count: row_count.max(0) as u64,
        key_count: key_count.max(0) as u64,
        tag_count: tag_count.max(0) as u64,
        min_key,
        max_key,
    })
}

async fn boundary_key(
    db: &Database,
    table: &TableName,
    filter: &str,
    range: Option<&KeyRange>,
    order: &str,
) -> StoreResult<Option<MigrationKey>> {
    let sql = format!(
        "SELECT {KEY_LIST} FROM {} {filter} ORDER BY t_stamp {order}, tagid {order} LIMIT 1",
        table.quoted()
    );
    let row = bind_optional_range(sqlx::query(&sql), range)
        .fetch_optional(db.pool())
        .await
        .map_err(store_err)?;
    row.as_ref().map(key_of).transpose()
}
