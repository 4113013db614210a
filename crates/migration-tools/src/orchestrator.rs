//! Migration orchestrator: drives a job through its state machine.
//!
//! ```text
//! Pending -> BackingUp -> Planning -> Migrating -> Validating -> Completed
//!    |                       |                         |
//!    +-> Planning (no backup)+-> Completed (empty)     +-> Failed (verdict Fail)
//! ```
//!
//! The job record is persisted after every transition, and the checkpoint
//! after every batch that extends the contiguous completed prefix.

use historiandb_core::{
    BackupHandle, BackupManager, BackupPolicy, BackupScope, Batch, CancellationToken, Checkpoint,
    CheckpointStore, DestinationSink, FailureReason, JobMode, JobStatus, KeyRange, MigrationJob,
    QuarantinedRecord, RecordCodec, SourceTable, StoreError, TableStats,
};
use historiandb_observability as observability;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::checkpoint::ProgressTracker;
use crate::config::MigrationConfig;
use crate::error::{MigrationError, MigrationResult};
use crate::error_handler::ErrorClass;
use crate::planner::BatchPlanner;
use crate::progress::MigrationProgress;
use crate::reader::SourceReader;
use crate::retry::{Sleeper, TokioSleeper};
use crate::validator::{ValidationReport, Validator, Verdict};
use crate::writer::{BatchOutcome, BatchWriter};

/// External systems a migration talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Source historian table
    pub source: Arc<dyn SourceTable>,
    /// Destination table
    pub sink: Arc<dyn DestinationSink>,
    /// Backups of the destination
    pub backups: Arc<dyn BackupManager>,
    /// Job, checkpoint and quarantine persistence
    pub checkpoints: Arc<dyn CheckpointStore>,
}

/// Parameters of a new job.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Source table name
    pub source_table: String,
    /// Destination table name
    pub destination_table: String,
    /// Full migration or validation only
    pub mode: JobMode,
    /// Whether to back up the destination first
    pub backup_policy: BackupPolicy,
}

/// How a run starts.
#[derive(Debug, Clone)]
pub enum Start {
    /// Create and run a new job
    New(JobRequest),
    /// Continue a persisted job
    Resume(Uuid),
}

/// Result of one orchestrator run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationOutcome {
    /// Job as persisted at the end of the run
    pub job: MigrationJob,
    /// Latest durable checkpoint
    pub checkpoint: Option<Checkpoint>,
    /// Validation report, when validation ran
    pub report: Option<ValidationReport>,
    /// Every quarantined record of the job
    pub quarantined: Vec<QuarantinedRecord>,
    /// Batches completed during this run
    pub batches_processed: u64,
    /// Rows inserted or overwritten during this run
    pub records_written: u64,
}

impl MigrationOutcome {
    /// Process exit code for the CLI.
    ///
    /// `0` completed or rolled back, otherwise the code of the failure's
    /// [`ErrorClass`]. A completed re-validation with a `Fail` verdict is `1`.
    pub fn exit_code(&self) -> u8 {
        match self.job.status {
            JobStatus::Completed | JobStatus::RolledBack => {
                match self.report.as_ref().map(|r| r.verdict) {
                    Some(Verdict::Fail) => ErrorClass::Validation.exit_code(),
                    _ => 0,
                }
            }
            JobStatus::Failed => {
                let class = match (&self.job.failure, self.job.failed_phase) {
                    (Some(FailureReason::Cancelled), _) => ErrorClass::Cancelled,
                    (_, Some(JobStatus::BackingUp)) => ErrorClass::Backup,
                    (Some(reason), _) => ErrorClass::of_failure(reason),
                    (None, _) => ErrorClass::Fatal,
                };
                class.exit_code()
            }
            _ => ErrorClass::Fatal.exit_code(),
        }
    }
}

/// Persisted state of a job, for `status`.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    /// The job record
    pub job: MigrationJob,
    /// Latest checkpoint
    pub checkpoint: Option<Checkpoint>,
    /// Quarantined records
    pub quarantined: Vec<QuarantinedRecord>,
}

#[derive(Debug, Default)]
struct RunTotals {
    batches_processed: u64,
    records_written: u64,
    report: Option<ValidationReport>,
}

/// Runs migration jobs.
pub struct Migrator {
    collaborators: Collaborators,
    config: MigrationConfig,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationToken,
    progress: MigrationProgress,
    codec: RecordCodec,
}

impl Migrator {
    /// Migrator with a real sleeper, a fresh cancellation token and a hidden progress bar.
    pub fn new(collaborators: Collaborators, config: MigrationConfig) -> Self {
        Self {
            collaborators,
            config,
            sleeper: Arc::new(TokioSleeper),
            cancel: CancellationToken::new(),
            progress: MigrationProgress::hidden(),
            codec: RecordCodec::at_current_time(),
        }
    }

    /// Replace the backoff sleeper.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Report progress on `progress`.
    pub fn with_progress(mut self, progress: MigrationProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Decode with `codec` instead of one referenced to the current clock.
    pub fn with_codec(mut self, codec: RecordCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Token that cancels this migrator's runs.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run a job until it settles.
    pub async fn run(&self, start: Start) -> MigrationResult<MigrationOutcome> {
        self.config.validate()?;
        let job = match start {
            Start::New(request) => {
                let job = MigrationJob::new(
                    request.source_table,
                    request.destination_table,
                    self.config.batch_size,
                    request.mode,
                    request.backup_policy,
                );
                self.collaborators.checkpoints.save_job(&job).await?;
                info!(job_id = %job.id, source = %job.source_table, destination = %job.destination_table, "created migration job");
                job
            }
            Start::Resume(job_id) => self
                .collaborators
                .checkpoints
                .load_job(job_id)
                .await?
                .ok_or(MigrationError::JobNotFound(job_id))?,
        };

        let span = info_span!("migration_job", job_id = %job.id);
        self.drive(job).instrument(span).await
    }

    async fn drive(&self, mut job: MigrationJob) -> MigrationResult<MigrationOutcome> {
        let mut totals = RunTotals::default();

        match job.status {
            JobStatus::Failed => {
                let phase = job.resume()?;
                info!(phase = %phase, "resuming failed job");
                self.collaborators.checkpoints.save_job(&job).await?;
            }
            JobStatus::Completed => {
                info!("job already completed; re-validating without writes");
                let report = self.validate(&job).await?;
                totals.report = Some(report);
                return self.outcome(job, totals).await;
            }
            JobStatus::RolledBack => {
                return Err(MigrationError::Config(format!(
                    "job {} was rolled back; start a new job instead",
                    job.id
                )));
            }
            status => info!(%status, "continuing job"),
        }

        let mut planned: Option<Vec<Batch>> = None;
        while !job.is_settled() {
            let step = self.step(&mut job, &mut planned, &mut totals).await;
            if let Err(err) = step {
                let reason = failure_reason(&err);
                error!(phase = %job.status, error = %err, "job failed");
                job.fail(reason);
            }
            self.collaborators.checkpoints.save_job(&job).await?;
        }

        let msg = match job.status {
            JobStatus::Completed => "Migration complete".to_string(),
            _ => format!("Migration {}", job.status),
        };
        self.progress.finish(msg);
        self.outcome(job, totals).await
    }

    async fn step(
        &self,
        job: &mut MigrationJob,
        planned: &mut Option<Vec<Batch>>,
        totals: &mut RunTotals,
    ) -> MigrationResult<()> {
        match job.status {
            JobStatus::Pending => match (job.mode, job.backup_policy) {
                (JobMode::ValidateOnly, _) => job.advance(JobStatus::Validating)?,
                (JobMode::FullMigration, BackupPolicy::CreateBackup) => {
                    job.advance(JobStatus::BackingUp)?
                }
                (JobMode::FullMigration, BackupPolicy::SkipBackup) => {
                    warn!(
                        destination = %job.destination_table,
                        "RUNNING WITHOUT BACKUP: rollback will not be possible for this job"
                    );
                    job.advance(JobStatus::Planning)?
                }
            },
            JobStatus::BackingUp => {
                if job.backup.is_none() {
                    job.backup = Some(self.backup(job).await?);
                }
                job.advance(JobStatus::Planning)?;
            }
            JobStatus::Planning => {
                self.collaborators.sink.ensure_schema().await?;
                let stats = self.analyze().await?;
                log_analysis(&stats);
                match (stats.min_key, stats.max_key) {
                    (Some(min), Some(max)) => {
                        if job.planned_range.is_none() {
                            job.planned_range = Some(KeyRange::covering(min, max)?);
                        }
                        let batches = self.plan(job).await?;
                        if job.planned_batches.is_none() {
                            job.planned_batches = Some(batches.len() as u64);
                        }
                        info!(batches = batches.len(), range = ?job.planned_range, "planned batches");
                        *planned = Some(batches);
                        job.advance(JobStatus::Migrating)?;
                    }
                    _ => {
                        info!("source is empty; nothing to migrate");
                        job.planned_batches = Some(0);
                        job.advance(JobStatus::Completed)?;
                    }
                }
            }
            JobStatus::Migrating => {
                let batches = match planned.take() {
                    Some(batches) => batches,
                    None => self.plan(job).await?,
                };
                self.migrate(job, batches, totals).await?;
                job.advance(JobStatus::Validating)?;
            }
            JobStatus::Validating => {
                let report = self.validate(job).await?;
                let verdict = report.verdict;
                let summary = report.summary();
                totals.report = Some(report);
                match verdict {
                    Verdict::Pass | Verdict::Warn => job.advance(JobStatus::Completed)?,
                    Verdict::Fail => job.fail(FailureReason::ValidationFailed(summary)),
                }
            }
            JobStatus::Completed | JobStatus::Failed | JobStatus::RolledBack => {}
        }
        Ok(())
    }

    async fn backup(&self, job: &MigrationJob) -> MigrationResult<BackupHandle> {
        let scope = BackupScope {
            table: job.destination_table.clone(),
            range: None,
        };
        info!(table = %scope.table, "creating backup");
        let started = Instant::now();
        let handle = self
            .collaborators
            .backups
            .create_backup(&scope, &self.cancel)
            .await?;
        observability::record_backup_latency(job.id, handle.row_count, started.elapsed());
        info!(backup = %handle.id, rows = handle.row_count, "backup verified");
        Ok(handle)
    }

    /// Batches still to run, starting after the checkpoint if there is one.
    async fn plan(&self, job: &MigrationJob) -> MigrationResult<Vec<Batch>> {
        let Some(range) = job.planned_range else {
            return Ok(Vec::new());
        };
        let mut planner = BatchPlanner::new(
            self.collaborators.source.clone(),
            range,
            job.batch_size,
            self.config.boundary,
        )?;
        if let Some(checkpoint) = self.collaborators.checkpoints.load(job.id).await? {
            info!(
                last_completed_sequence = checkpoint.last_completed_sequence,
                resume_from = %checkpoint.last_completed_range_end,
                "resuming after checkpoint"
            );
            planner = planner.resume_after(&checkpoint);
        }
        planner.plan_all().await
    }

    async fn migrate(
        &self,
        job: &MigrationJob,
        batches: Vec<Batch>,
        totals: &mut RunTotals,
    ) -> MigrationResult<()> {
        let checkpoint = self.collaborators.checkpoints.load(job.id).await?;
        let already_done = checkpoint.as_ref().map(Checkpoint::next_sequence).unwrap_or(0);
        let mut tracker = ProgressTracker::new(job.id, checkpoint);

        let planned_total = job
            .planned_batches
            .unwrap_or(0)
            .max(already_done + batches.len() as u64);
        self.progress.set_total(planned_total);
        self.progress.set_done(already_done);

        let writer = Arc::new(BatchWriter::new(
            SourceReader::new(self.collaborators.source.clone(), self.codec),
            self.collaborators.sink.clone(),
            self.config.retry.clone(),
            self.sleeper.clone(),
            self.config.write_mode,
            self.config.read_page_size,
        ));

        let mut queue = batches.into_iter();
        let mut in_flight = JoinSet::new();
        let mut first_error: Option<MigrationError> = None;

        loop {
            while first_error.is_none()
                && !self.cancel.is_cancelled()
                && in_flight.len() < self.config.workers
            {
                let Some(batch) = queue.next() else {
                    break;
                };
                let writer = writer.clone();
                let cancel = self.cancel.child_token();
                let job_id = job.id;
                let span = info_span!("batch", sequence = batch.sequence);
                in_flight.spawn(
                    async move { writer.write(job_id, batch, &cancel).await }.instrument(span),
                );
            }
            observability::set_pending_batches(queue.len() as u64 + in_flight.len() as u64);

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let result = joined.unwrap_or_else(|err| {
                Err(MigrationError::Store(StoreError::Other(format!(
                    "batch worker panicked: {err}"
                ))))
            });
            match result {
                Ok(outcome) => {
                    if let Err(err) = self.complete(job, &outcome, &mut tracker, totals).await {
                        first_error.get_or_insert(err);
                    }
                }
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        observability::set_pending_batches(0);

        if let Some(err) = first_error {
            return Err(err);
        }
        if !queue.as_slice().is_empty() {
            return Err(MigrationError::Cancelled);
        }
        Ok(())
    }

    async fn complete(
        &self,
        job: &MigrationJob,
        outcome: &BatchOutcome,
        tracker: &mut ProgressTracker,
        totals: &mut RunTotals,
    ) -> MigrationResult<()> {
        let checkpoints = &self.collaborators.checkpoints;
        checkpoints
            .record_quarantine(job.id, &outcome.quarantined)
            .await?;
        totals.batches_processed += 1;
        totals.records_written += outcome.written();

        if let Some(checkpoint) = tracker.complete(outcome) {
            checkpoints.save(&checkpoint).await?;
        }
        let (migrated_total, quarantined_total) = tracker
            .current()
            .map(|cp| (cp.total_records_migrated, cp.total_records_quarantined))
            .unwrap_or_default();
        info!(
            sequence = outcome.batch.sequence,
            range = %outcome.batch.range,
            records = outcome.batch.record_count,
            inserted = outcome.upsert.inserted,
            unchanged = outcome.upsert.unchanged,
            quarantined = outcome.quarantined.len(),
            migrated_total,
            quarantined_total,
            "batch complete"
        );
        self.progress.inc(outcome.batch.sequence, migrated_total);
        Ok(())
    }

    async fn validate(&self, job: &MigrationJob) -> MigrationResult<ValidationReport> {
        let checkpoints = &self.collaborators.checkpoints;
        let checkpoint = checkpoints.load(job.id).await?;
        let quarantined = checkpoints.load_quarantine(job.id).await?;
        self.progress.set_message("Validating...");
        Validator::new(
            self.collaborators.source.clone(),
            self.collaborators.sink.clone(),
            self.codec,
            self.config.validation.clone(),
        )
        .validate(job, checkpoint.as_ref(), &quarantined)
        .await
    }

    async fn outcome(
        &self,
        job: MigrationJob,
        totals: RunTotals,
    ) -> MigrationResult<MigrationOutcome> {
        let checkpoints = &self.collaborators.checkpoints;
        Ok(MigrationOutcome {
            checkpoint: checkpoints.load(job.id).await?,
            quarantined: checkpoints.load_quarantine(job.id).await?,
            job,
            report: totals.report,
            batches_processed: totals.batches_processed,
            records_written: totals.records_written,
        })
    }

    /// Restore the destination from the job's backup and mark it `RolledBack`.
    pub async fn rollback(&self, job_id: Uuid) -> MigrationResult<(MigrationJob, u64)> {
        let checkpoints = &self.collaborators.checkpoints;
        let mut job = checkpoints
            .load_job(job_id)
            .await?
            .ok_or(MigrationError::JobNotFound(job_id))?;
        let handle = job.backup.clone().ok_or_else(|| {
            MigrationError::Config(format!(
                "job {job_id} has no backup; it was run without one or failed before backing up"
            ))
        })?;
        let mut rolled_back = job.clone();
        rolled_back.roll_back()?;
        warn!(%job_id, backup = %handle.id, table = %handle.table, "restoring destination from backup");
        let restored = self.collaborators.backups.restore(&handle).await?;
        job = rolled_back;
        checkpoints.save_job(&job).await?;
        info!(%job_id, restored, "rollback complete");
        Ok((job, restored))
    }

    /// Persisted job, checkpoint and quarantine.
    pub async fn status(&self, job_id: Uuid) -> MigrationResult<JobSnapshot> {
        let checkpoints = &self.collaborators.checkpoints;
        let job = checkpoints
            .load_job(job_id)
            .await?
            .ok_or(MigrationError::JobNotFound(job_id))?;
        Ok(JobSnapshot {
            checkpoint: checkpoints.load(job_id).await?,
            quarantined: checkpoints.load_quarantine(job_id).await?,
            job,
        })
    }

    /// Whole-table statistics of the source.
    pub async fn analyze(&self) -> MigrationResult<TableStats> {
        Ok(self.collaborators.source.stats(None).await?)
    }
}

fn log_analysis(stats: &TableStats) {
    info!(
        total_records = stats.row_count,
        unique_keys = stats.key_count,
        unique_tags = stats.tag_count,
        earliest = ?stats.min_key.map(|k| k.timestamp_millis),
        latest = ?stats.max_key.map(|k| k.timestamp_millis),
        "source analysis"
    );
}

fn failure_reason(err: &MigrationError) -> FailureReason {
    match err {
        MigrationError::Cancelled => FailureReason::Cancelled,
        MigrationError::BackupFailed(msg) => FailureReason::BackupFailed(msg.clone()),
        MigrationError::BatchFailed {
            sequence, source, ..
        } => FailureReason::BatchFailed {
            sequence: *sequence,
            error: source.to_string(),
        },
        other => FailureReason::Error(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RecordingSleeper;
    use historiandb_core::memory::{
        MemoryBackupManager, MemoryCheckpointStore, MemorySink, MemorySource,
    };
    use historiandb_core::{MigrationKey, RawRow};

    struct Fixture {
        source: MemorySource,
        sink: MemorySink,
        backups: MemoryBackupManager,
        checkpoints: MemoryCheckpointStore,
    }

    impl Fixture {
        fn new(rows: Vec<RawRow>) -> Self {
            let sink = MemorySink::new();
            Self {
                source: MemorySource::new(rows),
                backups: MemoryBackupManager::new(sink.clone()),
                sink,
                checkpoints: MemoryCheckpointStore::new(),
            }
        }

        fn migrator(&self, batch_size: u64) -> Migrator {
            let collaborators = Collaborators {
                source: Arc::new(self.source.clone()),
                sink: Arc::new(self.sink.clone()),
                backups: Arc::new(self.backups.clone()),
                checkpoints: Arc::new(self.checkpoints.clone()),
            };
            let config = MigrationConfig {
                batch_size,
                read_page_size: 7,
                ..Default::default()
            };
            Migrator::new(collaborators, config).with_sleeper(Arc::new(RecordingSleeper::new()))
        }
    }

    fn request(backup_policy: BackupPolicy) -> Start {
        Start::New(JobRequest {
            source_table: "sqlth_1_data".into(),
            destination_table: "ts.sqlth_1_data".into(),
            mode: JobMode::FullMigration,
            backup_policy,
        })
    }

    fn rows(n: i64) -> Vec<RawRow> {
        let base = chrono::Utc::now().timestamp_millis() - 3_600_000;
        (0..n)
            .map(|i| RawRow::integer(i % 3 + 1, base + i * 1_000, i))
            .collect()
    }

    #[tokio::test]
    async fn full_run_completes_with_pass() {
        let fx = Fixture::new(rows(40));
        let outcome = fx
            .migrator(10)
            .run(request(BackupPolicy::CreateBackup))
            .await
            .unwrap();
        assert_eq!(outcome.job.status, JobStatus::Completed);
        assert_eq!(outcome.report.as_ref().unwrap().verdict, Verdict::Pass);
        assert_eq!(outcome.batches_processed, 4);
        assert_eq!(outcome.checkpoint.as_ref().unwrap().total_records_migrated, 40);
        assert_eq!(outcome.exit_code(), 0);
        assert!(outcome.job.backup.is_some());
        assert_eq!(fx.sink.len(), 40);
    }

    #[tokio::test]
    async fn empty_source_completes_without_validation() {
        let fx = Fixture::new(vec![]);
        let outcome = fx
            .migrator(10)
            .run(request(BackupPolicy::SkipBackup))
            .await
            .unwrap();
        assert_eq!(outcome.job.status, JobStatus::Completed);
        assert!(outcome.report.is_none());
        assert_eq!(outcome.job.planned_batches, Some(0));
    }

    #[tokio::test]
    async fn failed_backup_stops_before_writes() {
        let fx = Fixture::new(rows(10));
        fx.backups.fail_verification();
        let outcome = fx
            .migrator(5)
            .run(request(BackupPolicy::CreateBackup))
            .await
            .unwrap();
        assert_eq!(outcome.job.status, JobStatus::Failed);
        assert_eq!(outcome.job.failed_phase, Some(JobStatus::BackingUp));
        assert_eq!(outcome.exit_code(), 4);
        assert!(fx.sink.is_empty());
        assert_eq!(fx.source.scan_count(), 0);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_in_migrating() {
        let fx = Fixture::new(rows(30));
        fx.sink.crash_after_upserts(1);
        let outcome = fx
            .migrator(10)
            .run(request(BackupPolicy::SkipBackup))
            .await
            .unwrap();
        assert_eq!(outcome.job.status, JobStatus::Failed);
        assert!(matches!(
            outcome.job.failure,
            Some(FailureReason::BatchFailed { sequence: 1, .. })
        ));
        assert_eq!(outcome.exit_code(), 2);
        assert_eq!(outcome.checkpoint.unwrap().last_completed_sequence, 0);
    }

    #[tokio::test]
    async fn validate_only_never_writes() {
        let fx = Fixture::new(rows(12));
        let outcome = fx
            .migrator(5)
            .run(Start::New(JobRequest {
                source_table: "a".into(),
                destination_table: "b".into(),
                mode: JobMode::ValidateOnly,
                backup_policy: BackupPolicy::CreateBackup,
            }))
            .await
            .unwrap();
        assert_eq!(outcome.job.status, JobStatus::Failed);
        assert_eq!(outcome.job.failed_phase, Some(JobStatus::Validating));
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(fx.backups.backup_calls(), 0);
        assert!(fx.sink.is_empty());
    }

    #[tokio::test]
    async fn lost_destination_during_validation_is_not_a_failed_verdict() {
        let fx = Fixture::new(rows(30));
        fx.sink.fail_next_fetches(1);
        let outcome = fx
            .migrator(10)
            .run(request(BackupPolicy::SkipBackup))
            .await
            .unwrap();
        assert_eq!(outcome.job.status, JobStatus::Failed);
        assert_eq!(outcome.job.failed_phase, Some(JobStatus::Validating));
        assert!(matches!(outcome.job.failure, Some(FailureReason::Error(_))));
        assert!(outcome.report.is_none());
        assert_eq!(outcome.exit_code(), 2);
        assert_eq!(fx.sink.len(), 30);
    }

    #[tokio::test]
    async fn unknown_job_cannot_resume() {
        let fx = Fixture::new(rows(1));
        let err = fx
            .migrator(5)
            .run(Start::Resume(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn rollback_restores_pre_migration_state() {
        let fx = Fixture::new(rows(20));
        let key = MigrationKey::new(9, 1);
        fx.sink.preload([historiandb_core::Record::new(
            key,
            historiandb_core::Value::Integer(7),
            historiandb_core::Quality::GOOD,
        )]);
        let migrator = fx.migrator(5);
        let outcome = migrator
            .run(request(BackupPolicy::CreateBackup))
            .await
            .unwrap();
        assert_eq!(fx.sink.len(), 21);

        let (job, restored) = migrator.rollback(outcome.job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::RolledBack);
        assert_eq!(restored, 1);
        assert_eq!(fx.sink.len(), 1);
        assert!(migrator.rollback(outcome.job.id).await.is_err());
    }

    #[tokio::test]
    async fn rollback_without_backup_is_refused() {
        let fx = Fixture::new(rows(5));
        let migrator = fx.migrator(5);
        let outcome = migrator
            .run(request(BackupPolicy::SkipBackup))
            .await
            .unwrap();
        let err = migrator.rollback(outcome.job.id).await.unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));
    }

    #[tokio::test]
    async fn status_reports_persisted_state() {
        let fx = Fixture::new(rows(10));
        let migrator = fx.migrator(5);
        let outcome = migrator
            .run(request(BackupPolicy::SkipBackup))
            .await
            .unwrap();
        let snapshot = migrator.status(outcome.job.id).await.unwrap();
        assert_eq!(snapshot.job.status, JobStatus::Completed);
        assert_eq!(snapshot.checkpoint.unwrap().last_completed_sequence, 1);
    }
}
