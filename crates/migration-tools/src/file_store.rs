//! Checkpoint store backed by JSON files in a local directory.
//!
//! Layout, one set of files per job:
//!
//! ```text
//! <dir>/<job-id>.job.json
//! <dir>/<job-id>.checkpoint.json
//! <dir>/<job-id>.quarantine.json
//! ```
//!
//! Every write goes to a temporary file in the same directory, is synced,
//! renamed over the target, and the directory itself is synced, so a crash
//! leaves either the old or the new contents and never a torn file.

use async_trait::async_trait;
use historiandb_core::{
    Checkpoint, CheckpointStore, MigrationJob, QuarantinedRecord, StoreError, StoreResult,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Durable, file-based [`CheckpointStore`].
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    quarantine_lock: Mutex<()>,
}

impl FileCheckpointStore {
    /// Store rooted at `dir`, created if missing.
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            quarantine_lock: Mutex::new(()),
        })
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, job_id: Uuid, kind: &str) -> PathBuf {
        self.dir.join(format!("{job_id}.{kind}.json"))
    }

    fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|err| StoreError::Io(err.error))?;
        sync_dir(&self.dir)
    }

    fn read<T: DeserializeOwned>(&self, path: &Path) -> StoreResult<Option<T>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn remove(&self, path: &Path) -> StoreResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> StoreResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> StoreResult<()> {
    Ok(())
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> StoreResult<()> {
        self.write_atomic(&self.path(checkpoint.job_id, "checkpoint"), checkpoint)
    }

    async fn load(&self, job_id: Uuid) -> StoreResult<Option<Checkpoint>> {
        self.read(&self.path(job_id, "checkpoint"))
    }

    async fn save_job(&self, job: &MigrationJob) -> StoreResult<()> {
        self.write_atomic(&self.path(job.id, "job"), job)
    }

    async fn load_job(&self, job_id: Uuid) -> StoreResult<Option<MigrationJob>> {
        self.read(&self.path(job_id, "job"))
    }

    async fn record_quarantine(
        &self,
        job_id: Uuid,
        records: &[QuarantinedRecord],
    ) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self.quarantine_lock.lock().await;
        let path = self.path(job_id, "quarantine");
        let mut entries: Vec<QuarantinedRecord> = self.read(&path)?.unwrap_or_default();
        let before = entries.len();
        for record in records {
            if !entries.contains(record) {
                entries.push(record.clone());
            }
        }
        if entries.len() == before {
            return Ok(());
        }
        entries.sort_by_key(|r| (r.key, r.sequence));
        self.write_atomic(&path, &entries)
    }

    async fn load_quarantine(&self, job_id: Uuid) -> StoreResult<Vec<QuarantinedRecord>> {
        Ok(self
            .read(&self.path(job_id, "quarantine"))?
            .unwrap_or_default())
    }

    async fn clear(&self, job_id: Uuid) -> StoreResult<()> {
        for kind in ["checkpoint", "job", "quarantine"] {
            self.remove(&self.path(job_id, kind))?;
        }
        Ok(())
    }
}
