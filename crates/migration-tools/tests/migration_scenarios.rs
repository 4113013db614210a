//! End-to-end migration scenarios over in-memory collaborators.

use historiandb_core::memory::{
    MemoryBackupManager, MemoryCheckpointStore, MemorySink, MemorySource,
};
use historiandb_core::{
    BackupPolicy, CheckpointStore, FailureReason, JobMode, JobStatus, KeyRange, MigrationKey,
    Quality, QuarantineKind, RawRow, Record, Value,
};
use historiandb_migration_tools::{
    BatchPlanner, BoundaryGranularity, Collaborators, FileCheckpointStore, JobRequest,
    MigrationConfig, Migrator, RecordingSleeper, Start, Verdict,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    source: MemorySource,
    sink: MemorySink,
    backups: MemoryBackupManager,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl Fixture {
    fn new(rows: Vec<RawRow>) -> Self {
        Self::with_checkpoints(rows, Arc::new(MemoryCheckpointStore::new()))
    }

    fn with_checkpoints(rows: Vec<RawRow>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        let sink = MemorySink::new();
        Self {
            source: MemorySource::new(rows),
            backups: MemoryBackupManager::new(sink.clone()),
            sink,
            checkpoints,
        }
    }

    fn migrator(&self, config: MigrationConfig) -> Migrator {
        let collaborators = Collaborators {
            source: Arc::new(self.source.clone()),
            sink: Arc::new(self.sink.clone()),
            backups: Arc::new(self.backups.clone()),
            checkpoints: self.checkpoints.clone(),
        };
        Migrator::new(collaborators, config).with_sleeper(Arc::new(RecordingSleeper::new()))
    }
}

fn config(batch_size: u64) -> MigrationConfig {
    MigrationConfig {
        batch_size,
        read_page_size: 7,
        ..Default::default()
    }
}

fn new_job(backup_policy: BackupPolicy) -> Start {
    Start::New(JobRequest {
        source_table: "sqlth_1_data".into(),
        destination_table: "ts.sqlth_1_data".into(),
        mode: JobMode::FullMigration,
        backup_policy,
    })
}

fn base_millis() -> i64 {
    chrono::Utc::now().timestamp_millis() - 3_600_000
}

/// One row per timestamp, cycling over three tags.
fn rows(n: i64) -> Vec<RawRow> {
    let base = base_millis();
    (0..n)
        .map(|i| RawRow::integer(i % 3 + 1, base + i * 1_000, i))
        .collect()
}

#[tokio::test]
async fn rerunning_a_completed_job_writes_nothing() {
    let fx = Fixture::new(rows(50));
    let first = fx
        .migrator(config(10))
        .run(new_job(BackupPolicy::SkipBackup))
        .await
        .unwrap();
    assert_eq!(first.job.status, JobStatus::Completed);
    assert_eq!(first.records_written, 50);
    let before = fx.sink.records();

    let again = fx
        .migrator(config(10))
        .run(Start::Resume(first.job.id))
        .await
        .unwrap();
    assert_eq!(again.job.status, JobStatus::Completed);
    assert_eq!(again.records_written, 0);
    assert_eq!(again.batches_processed, 0);
    assert_eq!(again.report.unwrap().verdict, Verdict::Pass);
    assert_eq!(fx.sink.records(), before);
    assert_eq!(fx.sink.rows_written(), 50);
}

#[tokio::test]
async fn crash_then_resume_matches_an_uninterrupted_run() {
    let fx = Fixture::new(rows(100));
    fx.sink.crash_after_upserts(3);
    let crashed = fx
        .migrator(config(10))
        .run(new_job(BackupPolicy::CreateBackup))
        .await
        .unwrap();
    assert_eq!(crashed.job.status, JobStatus::Failed);
    assert_eq!(crashed.job.failed_phase, Some(JobStatus::Migrating));
    assert_eq!(crashed.exit_code(), 2);
    let checkpoint = crashed.checkpoint.unwrap();
    assert_eq!(checkpoint.last_completed_sequence, 2);
    assert_eq!(checkpoint.total_records_migrated, 30);
    assert_eq!(fx.sink.len(), 30);

    fx.sink.heal();
    let resumed = fx
        .migrator(config(10))
        .run(Start::Resume(crashed.job.id))
        .await
        .unwrap();
    assert_eq!(resumed.job.status, JobStatus::Completed);
    assert_eq!(resumed.batches_processed, 7);
    assert_eq!(resumed.records_written, 70);
    assert_eq!(resumed.checkpoint.unwrap().last_completed_sequence, 9);
    // a resume must not take a second backup
    assert_eq!(fx.backups.backup_calls(), 1);

    let reference = Fixture::new(rows(100));
    reference
        .migrator(config(10))
        .run(new_job(BackupPolicy::SkipBackup))
        .await
        .unwrap();
    assert_eq!(fx.sink.records(), reference.sink.records());
}

#[tokio::test]
async fn planned_batches_are_disjoint_and_cover_every_row() {
    let mut rng = StdRng::seed_from_u64(7);
    for round in 0..20 {
        let base = base_millis();
        let rows: Vec<RawRow> = (0..rng.gen_range(1..400))
            .map(|i| {
                // few timestamps and tags, so keys repeat often
                let ts = base + rng.gen_range(0..40) * 1_000;
                RawRow::integer(rng.gen_range(1..6), ts, i)
            })
            .collect();
        let source = MemorySource::new(rows.clone());
        let min = rows.iter().map(RawRow::key).min().unwrap();
        let max = rows.iter().map(RawRow::key).max().unwrap();
        let full = KeyRange::covering(min, max).unwrap();

        for granularity in [BoundaryGranularity::Key, BoundaryGranularity::Timestamp] {
            let batch_size = rng.gen_range(1..30);
            let batches = BatchPlanner::new(Arc::new(source.clone()), full, batch_size, granularity)
                .unwrap()
                .plan_all()
                .await
                .unwrap();

            assert_eq!(batches.first().unwrap().range.start(), full.start());
            assert_eq!(batches.last().unwrap().range.end(), full.end());
            for (seq, pair) in batches.windows(2).enumerate() {
                assert_eq!(pair[0].sequence, seq as u64);
                assert_eq!(pair[0].range.end(), pair[1].range.start(), "round {round}");
            }
            for row in &rows {
                let owners = batches
                    .iter()
                    .filter(|b| b.range.contains(&row.key()))
                    .count();
                assert_eq!(owners, 1, "round {round}: {} owned {owners} times", row.key());
            }
            if granularity == BoundaryGranularity::Timestamp {
                let mut seen = HashSet::new();
                for batch in &batches {
                    let stamps: HashSet<i64> = rows
                        .iter()
                        .filter(|r| batch.range.contains(&r.key()))
                        .map(|r| r.t_stamp)
                        .collect();
                    for ts in stamps {
                        assert!(seen.insert(ts), "round {round}: timestamp {ts} split");
                    }
                }
            }
        }
    }
}

#[tokio::test]
async fn duplicate_source_keys_are_quarantined_not_written_twice() {
    let mut source_rows = rows(30);
    let repeated = source_rows[0].key();
    source_rows.push(RawRow::integer(repeated.tag_id, repeated.timestamp_millis, 999));
    source_rows.push(RawRow::integer(repeated.tag_id, repeated.timestamp_millis, 998));
    let fx = Fixture::new(source_rows);

    let outcome = fx
        .migrator(config(8))
        .run(new_job(BackupPolicy::SkipBackup))
        .await
        .unwrap();
    assert_eq!(outcome.job.status, JobStatus::Completed);
    assert_eq!(fx.sink.len(), 30);
    assert_eq!(outcome.quarantined.len(), 2);
    assert!(outcome
        .quarantined
        .iter()
        .all(|q| q.key == repeated && q.kind == QuarantineKind::ConstraintViolation));

    let report = outcome.report.unwrap();
    assert_eq!(report.source_row_count, 32);
    assert_eq!(report.expected_destination_rows, 30);
    assert_eq!(report.destination_row_count, 30);
    assert_eq!(report.verdict, Verdict::Pass);
}

#[tokio::test]
async fn malformed_row_is_quarantined_once() {
    let mut source_rows = rows(40);
    let bad = RawRow {
        tag_id: 2,
        t_stamp: source_rows[20].t_stamp + 500,
        int_value: Some(1),
        float_value: Some(2.5),
        quality: Some(192),
        ..Default::default()
    };
    source_rows.push(bad.clone());
    let fx = Fixture::new(source_rows);

    let outcome = fx
        .migrator(config(10))
        .run(new_job(BackupPolicy::SkipBackup))
        .await
        .unwrap();
    assert_eq!(outcome.job.status, JobStatus::Completed);
    assert_eq!(outcome.quarantined.len(), 1);
    let entry = &outcome.quarantined[0];
    assert_eq!(entry.key, bad.key());
    assert_eq!(entry.kind, QuarantineKind::MalformedRecord);
    assert_eq!(fx.sink.len(), 40);

    let checkpoint = outcome.checkpoint.unwrap();
    assert_eq!(checkpoint.total_records_quarantined, 1);
    assert_eq!(checkpoint.total_records_migrated, 40);
    assert_eq!(outcome.report.unwrap().verdict, Verdict::Pass);
}

#[tokio::test]
async fn validation_detects_a_diverging_destination_record() {
    let source_rows = rows(40);
    let tampered = source_rows[17].key();
    let fx = Fixture::new(source_rows);
    fx.sink.preload([Record::new(tampered, Value::Integer(-1), Quality::GOOD)]);

    let outcome = fx
        .migrator(config(10))
        .run(new_job(BackupPolicy::SkipBackup))
        .await
        .unwrap();
    assert_eq!(outcome.job.status, JobStatus::Failed);
    assert!(matches!(
        outcome.job.failure,
        Some(FailureReason::ValidationFailed(_))
    ));
    assert_eq!(outcome.exit_code(), 1);
    let report = outcome.report.unwrap();
    assert_eq!(report.verdict, Verdict::Fail);
    assert_eq!(report.mismatches.len(), 1);
    assert_eq!(report.mismatches[0].key, tampered);
    assert_eq!(report.source_row_count, report.destination_row_count);
}

#[tokio::test]
async fn large_table_runs_in_full_batches() {
    let now = chrono::Utc::now().timestamp_millis();
    let start = now - 25_000 * 103_680;
    let mut source_rows = Vec::with_capacity(250_000);
    for step in 0..25_000_i64 {
        for tag in 1..=10_i64 {
            source_rows.push(RawRow::integer(tag, start + step * 103_680, step));
        }
    }
    let fx = Fixture::new(source_rows);

    let outcome = fx
        .migrator(MigrationConfig {
            batch_size: 10_000,
            ..Default::default()
        })
        .run(new_job(BackupPolicy::SkipBackup))
        .await
        .unwrap();
    assert_eq!(outcome.job.status, JobStatus::Completed);
    assert_eq!(outcome.job.planned_batches, Some(25));
    assert_eq!(outcome.batches_processed, 25);
    assert_eq!(outcome.records_written, 250_000);
    assert_eq!(fx.sink.len(), 250_000);
    let report = outcome.report.unwrap();
    assert_eq!(report.verdict, Verdict::Pass);
    assert_eq!(report.suspicious_count, 0);
    assert_eq!(report.destination_tag_count, 10);
}

#[tokio::test]
async fn backup_precedes_first_write() {
    let fx = Fixture::new(rows(20));
    fx.sink
        .preload([Record::new(MigrationKey::new(7, 1), Value::Integer(1), Quality::GOOD)]);

    let outcome = fx
        .migrator(config(10))
        .run(new_job(BackupPolicy::CreateBackup))
        .await
        .unwrap();
    assert_eq!(fx.backups.backup_calls(), 1);
    // the backup holds the destination as it was before the job
    assert_eq!(outcome.job.backup.as_ref().unwrap().row_count, 1);

    let fresh = Fixture::new(rows(20));
    fresh
        .migrator(config(10))
        .run(new_job(BackupPolicy::SkipBackup))
        .await
        .unwrap();
    assert_eq!(fresh.backups.backup_calls(), 0);
    assert_eq!(fresh.sink.len(), 20);
}

#[tokio::test]
async fn cancel_mid_run_keeps_completed_batches_only() {
    let source_rows = rows(100);
    let trigger = source_rows[40].key();
    let fx = Fixture::new(source_rows.clone());
    let migrator = fx.migrator(config(10));
    fx.source
        .cancel_when_scanning(migrator.cancellation_token(), trigger);

    let outcome = migrator
        .run(new_job(BackupPolicy::SkipBackup))
        .await
        .unwrap();
    assert_eq!(outcome.job.status, JobStatus::Failed);
    assert_eq!(outcome.job.failure, Some(FailureReason::Cancelled));
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(outcome.checkpoint.unwrap().last_completed_sequence, 3);

    let written: Vec<MigrationKey> = fx.sink.records().iter().map(|r| r.key).collect();
    let mut expected: Vec<MigrationKey> = source_rows[..40].iter().map(RawRow::key).collect();
    expected.sort();
    assert_eq!(written, expected);

    let resumed = fx
        .migrator(config(10))
        .run(Start::Resume(outcome.job.id))
        .await
        .unwrap();
    assert_eq!(resumed.job.status, JobStatus::Completed);
    assert_eq!(resumed.batches_processed, 6);
    assert_eq!(fx.sink.len(), 100);
}

#[tokio::test]
async fn parallel_workers_reach_the_same_state() {
    let fx = Fixture::new(rows(200));
    let outcome = fx
        .migrator(MigrationConfig {
            workers: 4,
            ..config(15)
        })
        .run(new_job(BackupPolicy::SkipBackup))
        .await
        .unwrap();
    assert_eq!(outcome.job.status, JobStatus::Completed);
    let checkpoint = outcome.checkpoint.unwrap();
    assert_eq!(checkpoint.last_completed_sequence + 1, outcome.batches_processed);
    assert_eq!(checkpoint.total_records_migrated, 200);

    let serial = Fixture::new(rows(200));
    serial
        .migrator(config(15))
        .run(new_job(BackupPolicy::SkipBackup))
        .await
        .unwrap();
    assert_eq!(fx.sink.records(), serial.sink.records());
}

#[tokio::test]
async fn file_checkpoints_survive_a_new_process() {
    let dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::open(dir.path()).unwrap();
    let fx = Fixture::with_checkpoints(rows(60), Arc::new(store));
    fx.sink.crash_after_upserts(2);
    let crashed = fx
        .migrator(config(10))
        .run(new_job(BackupPolicy::SkipBackup))
        .await
        .unwrap();
    assert_eq!(crashed.job.status, JobStatus::Failed);

    // a fresh store over the same directory stands in for a restarted process
    let reopened = FileCheckpointStore::open(dir.path()).unwrap();
    let checkpoint = reopened.load(crashed.job.id).await.unwrap().unwrap();
    assert_eq!(checkpoint.last_completed_sequence, 1);

    fx.sink.heal();
    let restarted = Fixture {
        source: fx.source.clone(),
        sink: fx.sink.clone(),
        backups: fx.backups.clone(),
        checkpoints: Arc::new(reopened),
    };
    let resumed = restarted
        .migrator(config(10))
        .run(Start::Resume(crashed.job.id))
        .await
        .unwrap();
    assert_eq!(resumed.job.status, JobStatus::Completed);
    assert_eq!(resumed.batches_processed, 4);
    assert_eq!(fx.sink.len(), 60);
}
