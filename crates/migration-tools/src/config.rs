//! Engine configuration.
//!
//! Values start from conservative defaults, are overlaid by `HISTMIG_*`
//! environment variables, and finally by command-line flags in the binary.

use historiandb_core::WriteMode;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{MigrationError, MigrationResult};
use crate::planner::BoundaryGranularity;
use crate::retry::RetryPolicy;
use crate::validator::ValidationConfig;

/// Default batch size, matching the historian export tooling.
pub const DEFAULT_BATCH_SIZE: u64 = 100_000;
/// Default number of rows fetched per source round trip.
pub const DEFAULT_READ_PAGE_SIZE: usize = 10_000;
/// Default directory for file-based checkpoints.
pub const DEFAULT_CHECKPOINT_DIR: &str = "./.histmig";

/// Where job, checkpoint and quarantine state is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointBackend {
    /// JSON files under `checkpoint_dir`
    File,
    /// `histmig_*` tables in the destination database
    Database,
}

impl FromStr for CheckpointBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(CheckpointBackend::File),
            "database" | "db" => Ok(CheckpointBackend::Database),
            other => Err(format!("unknown checkpoint backend '{other}', expected file or database")),
        }
    }
}

/// Full configuration of a migration run.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Source connection string
    pub source_dsn: Option<String>,
    /// Destination connection string; defaults to the source DSN
    pub destination_dsn: Option<String>,
    /// Records per batch
    pub batch_size: u64,
    /// Rows fetched per source scan
    pub read_page_size: usize,
    /// Concurrent batch workers
    pub workers: usize,
    /// Retry policy for transient errors
    pub retry: RetryPolicy,
    /// Validator settings
    pub validation: ValidationConfig,
    /// Conflict handling on the destination
    pub write_mode: WriteMode,
    /// Where batch boundaries may fall
    pub boundary: BoundaryGranularity,
    /// Where job state is persisted
    pub checkpoint_backend: CheckpointBackend,
    /// Directory for job, checkpoint and quarantine files
    pub checkpoint_dir: PathBuf,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            source_dsn: None,
            destination_dsn: None,
            batch_size: DEFAULT_BATCH_SIZE,
            read_page_size: DEFAULT_READ_PAGE_SIZE,
            workers: 1,
            retry: RetryPolicy::default(),
            validation: ValidationConfig::default(),
            write_mode: WriteMode::FirstWriteWins,
            boundary: BoundaryGranularity::Timestamp,
            checkpoint_backend: CheckpointBackend::File,
            checkpoint_dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
        }
    }
}

impl MigrationConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> MigrationResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with values returned by `lookup`.
    pub fn from_lookup<F>(lookup: F) -> MigrationResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let defaults = Self::default();

        config.source_dsn = lookup("HISTMIG_SOURCE_DSN").filter(|s| !s.is_empty());
        config.destination_dsn = lookup("HISTMIG_DESTINATION_DSN").filter(|s| !s.is_empty());
        config.batch_size = parse_or(&lookup, "HISTMIG_BATCH_SIZE", defaults.batch_size)?;
        config.read_page_size =
            parse_or(&lookup, "HISTMIG_READ_PAGE_SIZE", defaults.read_page_size)?;
        config.workers = parse_or(&lookup, "HISTMIG_WORKERS", defaults.workers)?;

        config.retry.max_attempts =
            parse_or(&lookup, "HISTMIG_MAX_ATTEMPTS", defaults.retry.max_attempts)?;
        config.retry.initial_backoff = Duration::from_millis(parse_or(
            &lookup,
            "HISTMIG_INITIAL_BACKOFF_MS",
            defaults.retry.initial_backoff.as_millis() as u64,
        )?);
        config.retry.max_backoff = Duration::from_millis(parse_or(
            &lookup,
            "HISTMIG_MAX_BACKOFF_MS",
            defaults.retry.max_backoff.as_millis() as u64,
        )?);
        config.retry.multiplier = parse_or(
            &lookup,
            "HISTMIG_BACKOFF_MULTIPLIER",
            defaults.retry.multiplier,
        )?;

        config.validation.sample_size = parse_or(
            &lookup,
            "HISTMIG_SAMPLE_SIZE",
            defaults.validation.sample_size,
        )?;
        config.validation.row_count_tolerance = parse_or(
            &lookup,
            "HISTMIG_ROW_COUNT_TOLERANCE",
            defaults.validation.row_count_tolerance,
        )?;
        config.validation.suspicious_fraction = parse_or(
            &lookup,
            "HISTMIG_SUSPICIOUS_FRACTION",
            defaults.validation.suspicious_fraction,
        )?;

        config.checkpoint_backend = parse_or(
            &lookup,
            "HISTMIG_CHECKPOINT_BACKEND",
            defaults.checkpoint_backend,
        )?;
        if let Some(dir) = lookup("HISTMIG_CHECKPOINT_DIR").filter(|s| !s.is_empty()) {
            config.checkpoint_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> MigrationResult<()> {
        if self.batch_size == 0 {
            return Err(MigrationError::Config(
                "batch size must be greater than 0".to_string(),
            ));
        }
        if self.read_page_size == 0 {
            return Err(MigrationError::Config(
                "read page size must be greater than 0".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(MigrationError::Config(
                "worker count must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(MigrationError::Config(
                "max attempts must be at least 1".to_string(),
            ));
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return Err(MigrationError::Config(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if self.retry.max_backoff < self.retry.initial_backoff {
            return Err(MigrationError::Config(
                "max backoff must not be shorter than the initial backoff".to_string(),
            ));
        }
        let fraction = self.validation.suspicious_fraction;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(MigrationError::Config(format!(
                "suspicious timestamp fraction must be within [0, 1], got {fraction}"
            )));
        }
        Ok(())
    }

    /// Destination DSN, falling back to the source DSN for same-database runs.
    pub fn effective_destination_dsn(&self) -> Option<&str> {
        self.destination_dsn
            .as_deref()
            .or(self.source_dsn.as_deref())
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> MigrationResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            MigrationError::Config(format!("{name}={raw:?} is not valid: {e}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = MigrationConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.batch_size, 100_000);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff, Duration::from_secs(1));
        assert_eq!(config.validation.sample_size, 1_000);
        assert_eq!(config.validation.row_count_tolerance, 0);
        assert_eq!(config.workers, 1);
        assert_eq!(config.write_mode, WriteMode::FirstWriteWins);
        assert!(config.source_dsn.is_none());
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = MigrationConfig::from_lookup(lookup(&[
            ("HISTMIG_SOURCE_DSN", "sqlite://hist.db"),
            ("HISTMIG_BATCH_SIZE", "5000"),
            ("HISTMIG_MAX_ATTEMPTS", "3"),
            ("HISTMIG_INITIAL_BACKOFF_MS", "250"),
            ("HISTMIG_SAMPLE_SIZE", "50"),
            ("HISTMIG_WORKERS", "4"),
            ("HISTMIG_CHECKPOINT_DIR", "/var/lib/histmig"),
        ]))
        .unwrap();
        assert_eq!(config.batch_size, 5_000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(250));
        assert_eq!(config.validation.sample_size, 50);
        assert_eq!(config.workers, 4);
        assert_eq!(config.checkpoint_dir, PathBuf::from("/var/lib/histmig"));
        assert_eq!(config.effective_destination_dsn(), Some("sqlite://hist.db"));
    }

    #[test]
    fn unparsable_value_is_a_config_error() {
        let err = MigrationConfig::from_lookup(lookup(&[("HISTMIG_BATCH_SIZE", "lots")]))
            .unwrap_err();
        assert!(matches!(err, MigrationError::Config(msg) if msg.contains("HISTMIG_BATCH_SIZE")));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err =
            MigrationConfig::from_lookup(lookup(&[("HISTMIG_BATCH_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));
    }

    #[test]
    fn suspicious_fraction_must_be_a_fraction() {
        let err = MigrationConfig::from_lookup(lookup(&[("HISTMIG_SUSPICIOUS_FRACTION", "1.5")]))
            .unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));
    }

    #[test]
    fn checkpoint_backend_is_selectable() {
        let config =
            MigrationConfig::from_lookup(lookup(&[("HISTMIG_CHECKPOINT_BACKEND", "Database")]))
                .unwrap();
        assert_eq!(config.checkpoint_backend, CheckpointBackend::Database);
        assert!(
            MigrationConfig::from_lookup(lookup(&[("HISTMIG_CHECKPOINT_BACKEND", "redis")]))
                .is_err()
        );
    }

    #[test]
    fn explicit_destination_wins_over_source() {
        let config = MigrationConfig {
            source_dsn: Some("postgres://a/hist".into()),
            destination_dsn: Some("postgres://b/ts".into()),
            ..Default::default()
        };
        assert_eq!(config.effective_destination_dsn(), Some("postgres://b/ts"));
    }
}
