//! Batch writer: read one batch, decode, quarantine, upsert, retry.

use historiandb_core::{
    Batch, BatchStatus, CancellationExt, CancellationToken, DestinationSink, QuarantineKind,
    QuarantinedRecord, Record, StoreError, StoreResult, UpsertOutcome, WriteMode,
};
use historiandb_observability as observability;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{MigrationError, MigrationResult};
use crate::reader::SourceReader;
use crate::retry::{RetryPolicy, Sleeper};

/// Result of a successfully written batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// The batch, with `record_count` and `status` filled in
    pub batch: Batch,
    /// Destination accounting
    pub upsert: UpsertOutcome,
    /// Records set aside instead of written
    pub quarantined: Vec<QuarantinedRecord>,
    /// Written records carrying a suspicious timestamp
    pub suspicious: u64,
    /// Attempts it took
    pub attempts: u32,
}

impl BatchOutcome {
    /// Records now present at the destination because of this batch.
    pub fn migrated(&self) -> u64 {
        self.upsert.total()
    }

    /// Rows actually inserted or overwritten.
    pub fn written(&self) -> u64 {
        self.upsert.inserted + self.upsert.updated
    }
}

struct Prepared {
    records: Vec<Record>,
    quarantined: Vec<QuarantinedRecord>,
    suspicious: u64,
    rows_read: u64,
}

/// Applies batches to the destination.
///
/// Each attempt re-reads the batch from the source, so a retry after a partial
/// failure sees exactly the same records. The upsert is idempotent, which makes
/// re-applying a batch safe.
pub struct BatchWriter {
    reader: SourceReader,
    sink: Arc<dyn DestinationSink>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    mode: WriteMode,
    page_size: usize,
}

impl BatchWriter {
    /// Create a writer.
    pub fn new(
        reader: SourceReader,
        sink: Arc<dyn DestinationSink>,
        retry: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
        mode: WriteMode,
        page_size: usize,
    ) -> Self {
        Self {
            reader,
            sink,
            retry,
            sleeper,
            mode,
            page_size: page_size.max(1),
        }
    }

    /// Write `batch`, retrying transient failures per the retry policy.
    pub async fn write(
        &self,
        job_id: Uuid,
        mut batch: Batch,
        cancel: &CancellationToken,
    ) -> MigrationResult<BatchOutcome> {
        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.attempt(job_id, &mut batch, cancel).await {
                Ok((upsert, quarantined, suspicious)) => {
                    batch.status = BatchStatus::Written;
                    let outcome = BatchOutcome {
                        batch,
                        upsert,
                        quarantined,
                        suspicious,
                        attempts: attempt,
                    };
                    observability::record_batch_latency(
                        job_id,
                        outcome.batch.sequence,
                        started.elapsed(),
                        outcome.batch.record_count,
                    );
                    observability::record_quarantine(
                        job_id,
                        outcome.batch.sequence,
                        outcome.quarantined.len() as u64,
                    );
                    return Ok(outcome);
                }
                Err(StoreError::Cancelled(what)) => {
                    info!(sequence = batch.sequence, %what, "batch abandoned before writing");
                    return Err(MigrationError::Cancelled);
                }
                Err(err) => {
                    observability::record_batch_failure(
                        job_id,
                        batch.sequence,
                        attempt,
                        &err.to_string(),
                    );
                    if !err.is_transient() || !self.retry.allows_retry_after(attempt) {
                        batch.status = BatchStatus::Failed;
                        return Err(MigrationError::BatchFailed {
                            sequence: batch.sequence,
                            attempts: attempt,
                            source: err,
                        });
                    }
                    let delay = self.retry.backoff_for(attempt);
                    warn!(
                        sequence = batch.sequence,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying batch"
                    );
                    tokio::select! {
                        _ = self.sleeper.sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(MigrationError::Cancelled),
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        job_id: Uuid,
        batch: &mut Batch,
        cancel: &CancellationToken,
    ) -> StoreResult<(UpsertOutcome, Vec<QuarantinedRecord>, u64)> {
        let prepared = self.prepare(batch, cancel).await?;
        batch.record_count = prepared.rows_read;
        batch.status = BatchStatus::Read;

        // last point at which the batch can be dropped without a partial write
        cancel.checkpoint("cancelled before batch write")?;

        let mut quarantined = prepared.quarantined;
        let upsert = self
            .upsert_with_quarantine(job_id, batch.sequence, prepared.records, &mut quarantined)
            .await?;
        Ok((upsert, quarantined, prepared.suspicious))
    }

    async fn prepare(&self, batch: &Batch, cancel: &CancellationToken) -> StoreResult<Prepared> {
        let mut decoded = Vec::new();
        let mut quarantined = Vec::new();
        let mut rows_read = 0u64;
        let mut next = Some(batch.range);

        while let Some(range) = next {
            cancel.checkpoint("cancelled before batch read")?;
            let page = self.reader.read(&range, self.page_size).await?;
            rows_read += page.rows_read() as u64;
            for err in page.malformed {
                warn!(sequence = batch.sequence, key = %err.key(), error = %err, "quarantining malformed record");
                quarantined.push(QuarantinedRecord {
                    key: err.key(),
                    sequence: batch.sequence,
                    kind: QuarantineKind::MalformedRecord,
                    reason: err.to_string(),
                });
            }
            decoded.extend(page.records);
            next = page.next;
        }

        let mut records = Vec::with_capacity(decoded.len());
        let mut suspicious = 0u64;
        let mut occurrence = 1u32;
        for item in decoded {
            let repeat = records
                .last()
                .is_some_and(|prev: &Record| prev.key == item.record.key);
            if repeat {
                occurrence += 1;
                warn!(sequence = batch.sequence, key = %item.record.key, occurrence, "quarantining duplicate source key");
                quarantined.push(QuarantinedRecord {
                    key: item.record.key,
                    sequence: batch.sequence,
                    kind: QuarantineKind::ConstraintViolation,
                    reason: format!("duplicate key in source (occurrence {occurrence})"),
                });
                continue;
            }
            occurrence = 1;
            if item.is_suspicious() {
                suspicious += 1;
            }
            records.push(item.record);
        }

        Ok(Prepared {
            records,
            quarantined,
            suspicious,
            rows_read,
        })
    }

    /// Upsert `records`; rows the destination rejects are quarantined and the
    /// rest of the batch is still applied.
    async fn upsert_with_quarantine(
        &self,
        job_id: Uuid,
        sequence: u64,
        mut records: Vec<Record>,
        quarantined: &mut Vec<QuarantinedRecord>,
    ) -> StoreResult<UpsertOutcome> {
        let mut total = UpsertOutcome::default();
        while !records.is_empty() {
            match self.sink.upsert(&records, self.mode).await {
                Ok(outcome) => {
                    total.merge(outcome);
                    break;
                }
                Err(StoreError::ConstraintViolation {
                    key: Some(key),
                    reason,
                }) if records.iter().any(|r| r.key == key) => {
                    warn!(%job_id, sequence, %key, %reason, "destination rejected record");
                    records.retain(|r| r.key != key);
                    quarantined.push(constraint_violation(key, sequence, reason));
                }
                Err(StoreError::ConstraintViolation { reason, .. }) => {
                    debug!(sequence, %reason, "constraint violation without key, isolating records");
                    total.merge(self.upsert_one_by_one(job_id, sequence, &records, quarantined).await?);
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(total)
    }

    async fn upsert_one_by_one(
        &self,
        job_id: Uuid,
        sequence: u64,
        records: &[Record],
        quarantined: &mut Vec<QuarantinedRecord>,
    ) -> StoreResult<UpsertOutcome> {
        let mut total = UpsertOutcome::default();
        for record in records {
            match self.sink.upsert(std::slice::from_ref(record), self.mode).await {
                Ok(outcome) => total.merge(outcome),
                Err(StoreError::ConstraintViolation { reason, .. }) => {
                    warn!(%job_id, sequence, key = %record.key, %reason, "destination rejected record");
                    quarantined.push(constraint_violation(record.key, sequence, reason));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(total)
    }
}

fn constraint_violation(
    key: historiandb_core::MigrationKey,
    sequence: u64,
    reason: String,
) -> QuarantinedRecord {
    QuarantinedRecord {
        key,
        sequence,
        kind: QuarantineKind::ConstraintViolation,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RecordingSleeper;
    use historiandb_core::memory::{MemorySink, MemorySource};
    use historiandb_core::{KeyRange, MigrationKey, RawRow, RecordCodec};
    use std::time::Duration;

    struct Fixture {
        source: MemorySource,
        sink: MemorySink,
        sleeper: Arc<RecordingSleeper>,
    }

    impl Fixture {
        fn new(rows: Vec<RawRow>) -> Self {
            Self {
                source: MemorySource::new(rows),
                sink: MemorySink::new(),
                sleeper: Arc::new(RecordingSleeper::new()),
            }
        }

        fn writer(&self, retry: RetryPolicy) -> BatchWriter {
            BatchWriter::new(
                SourceReader::new(Arc::new(self.source.clone()), RecordCodec::at_current_time()),
                Arc::new(self.sink.clone()),
                retry,
                self.sleeper.clone(),
                WriteMode::FirstWriteWins,
                4,
            )
        }
    }

    fn batch() -> Batch {
        Batch::new(
            0,
            KeyRange::new(MigrationKey::first_at(0), MigrationKey::first_at(1_000)).unwrap(),
        )
    }

    fn rows(n: i64) -> Vec<RawRow> {
        (0..n).map(|ts| RawRow::integer(1, ts, ts)).collect()
    }

    #[tokio::test]
    async fn writes_all_pages_of_a_batch() {
        let fx = Fixture::new(rows(10));
        let outcome = fx
            .writer(RetryPolicy::default())
            .write(Uuid::new_v4(), batch(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.batch.record_count, 10);
        assert_eq!(outcome.upsert.inserted, 10);
        assert_eq!(outcome.batch.status, BatchStatus::Written);
        assert_eq!(fx.sink.len(), 10);
    }

    #[tokio::test]
    async fn rewriting_a_batch_changes_nothing() {
        let fx = Fixture::new(rows(5));
        let writer = fx.writer(RetryPolicy::default());
        let token = CancellationToken::new();
        writer.write(Uuid::new_v4(), batch(), &token).await.unwrap();
        let again = writer.write(Uuid::new_v4(), batch(), &token).await.unwrap();
        assert_eq!(again.upsert.unchanged, 5);
        assert_eq!(again.written(), 0);
        assert_eq!(fx.sink.rows_written(), 5);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_with_backoff() {
        let fx = Fixture::new(rows(3));
        fx.sink.fail_next_upserts(2);
        let outcome = fx
            .writer(RetryPolicy::default())
            .write(Uuid::new_v4(), batch(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 3);
        assert_eq!(
            fx.sleeper.delays(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        assert_eq!(fx.sink.len(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_batch() {
        let fx = Fixture::new(rows(3));
        fx.source.fail_next_scans(10);
        let err = fx
            .writer(RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::default()
            })
            .write(Uuid::new_v4(), batch(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MigrationError::BatchFailed {
                sequence: 0,
                attempts: 3,
                ..
            }
        ));
        assert_eq!(fx.sleeper.delays().len(), 2);
        assert!(fx.sink.is_empty());
    }

    #[tokio::test]
    async fn malformed_record_is_quarantined_and_rest_written() {
        let mut source_rows = rows(6);
        source_rows[2].float_value = Some(1.0);
        let fx = Fixture::new(source_rows);
        let outcome = fx
            .writer(RetryPolicy::default())
            .write(Uuid::new_v4(), batch(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.quarantined.len(), 1);
        assert_eq!(outcome.quarantined[0].key, MigrationKey::new(1, 2));
        assert_eq!(outcome.quarantined[0].kind, QuarantineKind::MalformedRecord);
        assert_eq!(fx.sink.len(), 5);
    }

    #[tokio::test]
    async fn rejected_record_is_quarantined_and_rest_written() {
        let fx = Fixture::new(rows(6));
        fx.sink.reject_key(MigrationKey::new(1, 4), "check constraint");
        let outcome = fx
            .writer(RetryPolicy::default())
            .write(Uuid::new_v4(), batch(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.quarantined.len(), 1);
        assert_eq!(outcome.quarantined[0].kind, QuarantineKind::ConstraintViolation);
        assert_eq!(fx.sink.len(), 5);
        assert!(fx.sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn duplicate_source_keys_keep_first_occurrence() {
        let fx = Fixture::new(vec![
            RawRow::integer(1, 1, 10),
            RawRow::integer(1, 1, 20),
            RawRow::integer(1, 1, 30),
            RawRow::integer(1, 2, 0),
        ]);
        let outcome = fx
            .writer(RetryPolicy::default())
            .write(Uuid::new_v4(), batch(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.batch.record_count, 4);
        assert_eq!(outcome.quarantined.len(), 2);
        assert!(outcome.quarantined[1].reason.contains("occurrence 3"));
        assert_eq!(fx.sink.len(), 2);
    }

    #[tokio::test]
    async fn cancellation_before_write_leaves_destination_untouched() {
        let fx = Fixture::new(rows(3));
        let token = CancellationToken::new();
        fx.source.cancel_when_scanning(token.clone(), MigrationKey::new(1, 0));
        let err = fx
            .writer(RetryPolicy::default())
            .write(Uuid::new_v4(), batch(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Cancelled));
        assert!(fx.sink.is_empty());
    }

    #[tokio::test]
    async fn suspicious_timestamps_are_counted_and_written() {
        let fx = Fixture::new(vec![RawRow::integer(1, -5, 0), RawRow::integer(1, 5, 0)]);
        let range = KeyRange::new(MigrationKey::first_at(-100), MigrationKey::first_at(100)).unwrap();
        let outcome = fx
            .writer(RetryPolicy::default())
            .write(Uuid::new_v4(), Batch::new(0, range), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.suspicious, 1);
        assert_eq!(fx.sink.len(), 2);
    }
}
