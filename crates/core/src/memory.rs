//! In-memory collaborators.
//!
//! Used by the test suites. Each type exposes a few
//! fault-injection knobs (transient failures, rejected keys, a crash point)
//! so retry, quarantine and resume paths can be exercised without a database.

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::cancel::{CancellationExt, CancellationToken};
use crate::checkpoint::{Checkpoint, QuarantinedRecord};
use crate::error::{StoreError, StoreResult};
use crate::job::{BackupHandle, BackupScope, MigrationJob};
use crate::range::KeyRange;
use crate::record::{MigrationKey, RawRow, Record};
use crate::traits::{
    BackupManager, CheckpointStore, DestinationSink, SourceTable, TableStats, UpsertOutcome,
    WriteMode,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn stats_of<'a>(keys: impl Iterator<Item = &'a MigrationKey>) -> TableStats {
    let mut stats = TableStats::default();
    let mut distinct = BTreeSet::new();
    let mut tags = HashSet::new();
    for key in keys {
        stats.row_count += 1;
        distinct.insert(*key);
        tags.insert(key.tag_id);
    }
    stats.key_count = distinct.len() as u64;
    stats.tag_count = tags.len() as u64;
    stats.min_key = distinct.first().copied();
    stats.max_key = distinct.last().copied();
    stats
}

struct ScanHook {
    token: CancellationToken,
    trigger: MigrationKey,
}

/// Source table held in memory, kept sorted by key.
#[derive(Clone)]
pub struct MemorySource {
    rows: Arc<Mutex<Vec<RawRow>>>,
    failing_scans: Arc<AtomicU64>,
    scans: Arc<AtomicU64>,
    hook: Arc<Mutex<Option<ScanHook>>>,
    seed: u64,
}

impl MemorySource {
    /// Source holding `rows`; duplicates are kept.
    pub fn new(mut rows: Vec<RawRow>) -> Self {
        rows.sort_by_key(RawRow::key);
        MemorySource {
            rows: Arc::new(Mutex::new(rows)),
            failing_scans: Arc::new(AtomicU64::new(0)),
            scans: Arc::new(AtomicU64::new(0)),
            hook: Arc::new(Mutex::new(None)),
            seed: 0x5eed,
        }
    }

    /// Insert a row as the historian would while a migration runs.
    pub fn push(&self, row: RawRow) {
        let mut rows = lock(&self.rows);
        let at = rows.partition_point(|r| r.key() <= row.key());
        rows.insert(at, row);
    }

    /// Make the next `n` scans fail with `ConnectionLost`.
    pub fn fail_next_scans(&self, n: u64) {
        self.failing_scans.store(n, Ordering::SeqCst);
    }

    /// Cancel `token` as soon as a scan covers `trigger`.
    pub fn cancel_when_scanning(&self, token: CancellationToken, trigger: MigrationKey) {
        *lock(&self.hook) = Some(ScanHook { token, trigger });
    }

    /// Number of `scan` calls served.
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::SeqCst)
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    /// Whether no rows are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn in_range<'a>(rows: &'a [RawRow], range: &KeyRange) -> &'a [RawRow] {
        let from = rows.partition_point(|r| r.key() < range.start());
        let to = rows.partition_point(|r| r.key() < range.end());
        &rows[from..to]
    }
}

#[async_trait]
impl SourceTable for MemorySource {
    async fn scan(&self, range: &KeyRange, limit: usize) -> StoreResult<Vec<RawRow>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_scans
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::ConnectionLost("injected source failure".into()));
        }
        if let Some(hook) = lock(&self.hook).as_ref() {
            if range.contains(&hook.trigger) {
                hook.token.cancel();
            }
        }
        let rows = lock(&self.rows);
        Ok(Self::in_range(&rows, range)
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn keys_at(
        &self,
        range: &KeyRange,
        offset: u64,
        count: usize,
    ) -> StoreResult<Vec<MigrationKey>> {
        let rows = lock(&self.rows);
        Ok(Self::in_range(&rows, range)
            .iter()
            .skip(offset as usize)
            .take(count)
            .map(RawRow::key)
            .collect())
    }

    async fn stats(&self, range: Option<&KeyRange>) -> StoreResult<TableStats> {
        let rows = lock(&self.rows);
        let slice = match range {
            Some(range) => Self::in_range(&rows, range),
            None => &rows[..],
        };
        let keys: Vec<MigrationKey> = slice.iter().map(RawRow::key).collect();
        Ok(stats_of(keys.iter()))
    }

    async fn sample(&self, range: &KeyRange, count: usize) -> StoreResult<Vec<RawRow>> {
        let rows = lock(&self.rows);
        let mut rng = StdRng::seed_from_u64(self.seed);
        Ok(Self::in_range(&rows, range)
            .choose_multiple(&mut rng, count)
            .cloned()
            .collect())
    }
}

/// Destination table held in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    rows: Arc<Mutex<BTreeMap<MigrationKey, Record>>>,
    rejected: Arc<Mutex<HashMap<MigrationKey, String>>>,
    failing_upserts: Arc<AtomicU64>,
    failing_fetches: Arc<AtomicU64>,
    crash_after: Arc<Mutex<Option<u64>>>,
    successful_upserts: Arc<AtomicU64>,
    rows_written: Arc<AtomicU64>,
}

impl MemorySink {
    /// Empty destination.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any upsert containing `key` with a constraint violation.
    pub fn reject_key(&self, key: MigrationKey, reason: impl Into<String>) {
        lock(&self.rejected).insert(key, reason.into());
    }

    /// Make the next `n` upserts fail with `ConnectionLost`.
    pub fn fail_next_upserts(&self, n: u64) {
        self.failing_upserts.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` fetches fail with `ConnectionLost`.
    pub fn fail_next_fetches(&self, n: u64) {
        self.failing_fetches.store(n, Ordering::SeqCst);
    }

    /// After `n` more successful upserts, fail every upsert until [`heal`](Self::heal).
    pub fn crash_after_upserts(&self, n: u64) {
        let done = self.successful_upserts.load(Ordering::SeqCst);
        *lock(&self.crash_after) = Some(done + n);
    }

    /// Clear the crash point.
    pub fn heal(&self) {
        *lock(&self.crash_after) = None;
    }

    /// Rows inserted or overwritten since creation.
    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::SeqCst)
    }

    /// Stored row count.
    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    /// Whether the destination is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every stored record, in key order.
    pub fn records(&self) -> Vec<Record> {
        lock(&self.rows).values().cloned().collect()
    }

    /// Seed the destination directly, bypassing upsert accounting.
    pub fn preload(&self, records: impl IntoIterator<Item = Record>) {
        let mut rows = lock(&self.rows);
        for record in records {
            rows.insert(record.key, record);
        }
    }

    fn snapshot(&self) -> BTreeMap<MigrationKey, Record> {
        lock(&self.rows).clone()
    }

    fn replace(&self, rows: BTreeMap<MigrationKey, Record>) {
        *lock(&self.rows) = rows;
    }
}

#[async_trait]
impl DestinationSink for MemorySink {
    async fn ensure_schema(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn upsert(&self, records: &[Record], mode: WriteMode) -> StoreResult<UpsertOutcome> {
        if self
            .failing_upserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::ConnectionLost("injected destination failure".into()));
        }
        if let Some(limit) = *lock(&self.crash_after) {
            if self.successful_upserts.load(Ordering::SeqCst) >= limit {
                return Err(StoreError::ConnectionLost("destination unreachable".into()));
            }
        }
        {
            let rejected = lock(&self.rejected);
            if let Some(record) = records.iter().find(|r| rejected.contains_key(&r.key)) {
                return Err(StoreError::ConstraintViolation {
                    key: Some(record.key),
                    reason: rejected[&record.key].clone(),
                });
            }
        }

        let mut rows = lock(&self.rows);
        let mut outcome = UpsertOutcome::default();
        for record in records {
            match (rows.contains_key(&record.key), mode) {
                (false, _) => {
                    rows.insert(record.key, record.clone());
                    outcome.inserted += 1;
                }
                (true, WriteMode::Repair) => {
                    rows.insert(record.key, record.clone());
                    outcome.updated += 1;
                }
                (true, WriteMode::FirstWriteWins) => outcome.unchanged += 1,
            }
        }
        self.successful_upserts.fetch_add(1, Ordering::SeqCst);
        self.rows_written
            .fetch_add(outcome.inserted + outcome.updated, Ordering::SeqCst);
        Ok(outcome)
    }

    async fn stats(&self, range: &KeyRange) -> StoreResult<TableStats> {
        let rows = lock(&self.rows);
        Ok(stats_of(
            rows.range(range.start()..range.end()).map(|(key, _)| key),
        ))
    }

    async fn fetch(&self, keys: &[MigrationKey]) -> StoreResult<Vec<Record>> {
        if self
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::ConnectionLost("injected fetch failure".into()));
        }
        let rows = lock(&self.rows);
        Ok(keys.iter().filter_map(|k| rows.get(k).cloned()).collect())
    }
}

/// Backups of a [`MemorySink`].
#[derive(Clone)]
pub struct MemoryBackupManager {
    sink: MemorySink,
    backups: Arc<Mutex<HashMap<String, BTreeMap<MigrationKey, Record>>>>,
    calls: Arc<AtomicU64>,
    fail_verification: Arc<Mutex<bool>>,
    block_until_cancelled: Arc<Mutex<bool>>,
}

impl MemoryBackupManager {
    /// Backup manager for `sink`.
    pub fn new(sink: MemorySink) -> Self {
        MemoryBackupManager {
            sink,
            backups: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(AtomicU64::new(0)),
            fail_verification: Arc::new(Mutex::new(false)),
            block_until_cancelled: Arc::new(Mutex::new(false)),
        }
    }

    /// Make created backups fail their readability check.
    pub fn fail_verification(&self) {
        *lock(&self.fail_verification) = true;
    }

    /// Make `create_backup` hang until the caller cancels it.
    pub fn block_until_cancelled(&self) {
        *lock(&self.block_until_cancelled) = true;
    }

    /// Number of `create_backup` calls.
    pub fn backup_calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of retained backups.
    pub fn backup_count(&self) -> usize {
        lock(&self.backups).len()
    }
}

#[async_trait]
impl BackupManager for MemoryBackupManager {
    async fn create_backup(
        &self,
        scope: &BackupScope,
        cancel: &CancellationToken,
    ) -> StoreResult<BackupHandle> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let blocking = *lock(&self.block_until_cancelled);
        if blocking {
            cancel.cancelled().await;
        }
        cancel.checkpoint("backup aborted before verification")?;

        let mut snapshot = self.sink.snapshot();
        if let Some(range) = &scope.range {
            snapshot.retain(|key, _| range.contains(key));
        }
        if *lock(&self.fail_verification) {
            return Err(StoreError::BackupFailed(format!(
                "snapshot of {} could not be read back",
                scope.table
            )));
        }
        let created_at = Utc::now();
        let id = format!(
            "{}_backup_{}_{}",
            scope.table,
            created_at.format("%Y%m%d_%H%M%S"),
            self.calls.load(Ordering::SeqCst)
        );
        let handle = BackupHandle {
            id: id.clone(),
            table: scope.table.clone(),
            row_count: snapshot.len() as u64,
            created_at,
        };
        lock(&self.backups).insert(id, snapshot);
        Ok(handle)
    }

    async fn restore(&self, handle: &BackupHandle) -> StoreResult<u64> {
        let snapshot = lock(&self.backups)
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("backup {}", handle.id)))?;
        let restored = snapshot.len() as u64;
        self.sink.replace(snapshot);
        Ok(restored)
    }
}

/// Checkpoint store held in memory; "durable" for the life of the value.
#[derive(Clone, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Arc<Mutex<HashMap<Uuid, Checkpoint>>>,
    jobs: Arc<Mutex<HashMap<Uuid, MigrationJob>>>,
    quarantine: Arc<Mutex<HashMap<Uuid, Vec<QuarantinedRecord>>>>,
    saves: Arc<AtomicU64>,
}

impl MemoryCheckpointStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of checkpoint saves.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> StoreResult<()> {
        lock(&self.checkpoints).insert(checkpoint.job_id, checkpoint.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self, job_id: Uuid) -> StoreResult<Option<Checkpoint>> {
        Ok(lock(&self.checkpoints).get(&job_id).cloned())
    }

    async fn save_job(&self, job: &MigrationJob) -> StoreResult<()> {
        lock(&self.jobs).insert(job.id, job.clone());
        Ok(())
    }

    async fn load_job(&self, job_id: Uuid) -> StoreResult<Option<MigrationJob>> {
        Ok(lock(&self.jobs).get(&job_id).cloned())
    }

    async fn record_quarantine(
        &self,
        job_id: Uuid,
        records: &[QuarantinedRecord],
    ) -> StoreResult<()> {
        let mut quarantine = lock(&self.quarantine);
        let entries = quarantine.entry(job_id).or_default();
        for record in records {
            if !entries.contains(record) {
                entries.push(record.clone());
            }
        }
        Ok(())
    }

    async fn load_quarantine(&self, job_id: Uuid) -> StoreResult<Vec<QuarantinedRecord>> {
        let mut entries = lock(&self.quarantine)
            .get(&job_id)
            .cloned()
            .unwrap_or_default();
        entries.sort_by_key(|r| (r.key, r.sequence));
        Ok(entries)
    }

    async fn clear(&self, job_id: Uuid) -> StoreResult<()> {
        lock(&self.checkpoints).remove(&job_id);
        lock(&self.jobs).remove(&job_id);
        lock(&self.quarantine).remove(&job_id);
        Ok(())
    }
}
