//! CLI interface for the historian migration engine.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use historiandb_core::{BackupPolicy, JobMode, WriteMode};
use uuid::Uuid;

use crate::config::MigrationConfig;
use crate::orchestrator::{JobRequest, Start};
use crate::report::OutputFormat;

/// Historian data migration tools.
#[derive(Parser, Debug)]
#[command(name = "histmig")]
#[command(about = "Resumable, validated migration of historian data", long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also append log output to this file
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Migrate a historian table into the destination store
    Migrate(MigrateArgs),

    /// Restore the destination from a job's backup
    Rollback {
        /// Job to roll back
        #[arg(value_name = "JOB_ID")]
        job_id: Uuid,
    },

    /// Show the persisted state of a job
    Status {
        /// Job to inspect
        #[arg(value_name = "JOB_ID")]
        job_id: Uuid,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Print statistics of a source table
    Analyze {
        /// Source table
        #[arg(long)]
        source: String,

        /// Source connection string
        #[arg(long)]
        source_dsn: Option<String>,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

/// Arguments for the migrate command.
#[derive(Parser, Debug, Clone)]
pub struct MigrateArgs {
    /// Source historian table (e.g. sqlth_1_data)
    #[arg(long)]
    pub source: Option<String>,

    /// Destination table
    #[arg(long)]
    pub destination: Option<String>,

    /// Source connection string (postgres://, sqlite://)
    #[arg(long)]
    pub source_dsn: Option<String>,

    /// Destination connection string; defaults to the source
    #[arg(long)]
    pub destination_dsn: Option<String>,

    /// Records per batch
    #[arg(long)]
    pub batch_size: Option<u64>,

    /// Do not back up the destination before writing
    #[arg(long)]
    pub no_backup: bool,

    /// Acknowledge that --no-backup leaves no way to roll back
    #[arg(long)]
    pub i_understand_no_rollback: bool,

    /// Only validate; write nothing
    #[arg(long)]
    pub validate_only: bool,

    /// Resume a previously started job
    #[arg(long, value_name = "JOB_ID")]
    pub resume: Option<Uuid>,

    /// Overwrite rows already present in the destination
    #[arg(long)]
    pub repair: bool,

    /// Concurrent batch workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Records compared field by field during validation
    #[arg(long)]
    pub sample_size: Option<usize>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

impl MigrateArgs {
    /// Validate arguments and return error if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.no_backup && !self.i_understand_no_rollback {
            return Err(
                "--no-backup requires --i-understand-no-rollback: without a backup the job cannot be rolled back"
                    .to_string(),
            );
        }
        if self.resume.is_none() && (self.source.is_none() || self.destination.is_none()) {
            return Err("--source and --destination are required unless --resume is given".to_string());
        }
        if self.resume.is_some() && (self.validate_only || self.no_backup) {
            return Err(
                "--validate-only and --no-backup are fixed when a job is created and cannot change on --resume"
                    .to_string(),
            );
        }
        Ok(())
    }

    /// Overlay the flags on a configuration loaded from the environment.
    pub fn apply_to(&self, config: &mut MigrationConfig) {
        if let Some(dsn) = &self.source_dsn {
            config.source_dsn = Some(dsn.clone());
        }
        if let Some(dsn) = &self.destination_dsn {
            config.destination_dsn = Some(dsn.clone());
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(sample_size) = self.sample_size {
            config.validation.sample_size = sample_size;
        }
        if self.repair {
            config.write_mode = WriteMode::Repair;
        }
    }

    /// How the run starts. Call after [`MigrateArgs::validate`].
    pub fn start(&self) -> Result<Start, String> {
        if let Some(job_id) = self.resume {
            return Ok(Start::Resume(job_id));
        }
        let (Some(source), Some(destination)) = (&self.source, &self.destination) else {
            return Err("--source and --destination are required".to_string());
        };
        Ok(Start::New(JobRequest {
            source_table: source.clone(),
            destination_table: destination.clone(),
            mode: if self.validate_only {
                JobMode::ValidateOnly
            } else {
                JobMode::FullMigration
            },
            backup_policy: if self.no_backup {
                BackupPolicy::SkipBackup
            } else {
                BackupPolicy::CreateBackup
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("histmig").chain(args.iter().copied())).unwrap()
    }

    fn migrate_args(args: &[&str]) -> MigrateArgs {
        match parse(args).command {
            Commands::Migrate(args) => args,
            other => panic!("expected migrate, got {other:?}"),
        }
    }

    #[test]
    fn test_no_backup_requires_acknowledgement() {
        let args = migrate_args(&[
            "migrate",
            "--source",
            "sqlth_1_data",
            "--destination",
            "ts_data",
            "--no-backup",
        ]);
        assert!(args.validate().is_err());

        let args = migrate_args(&[
            "migrate",
            "--source",
            "sqlth_1_data",
            "--destination",
            "ts_data",
            "--no-backup",
            "--i-understand-no-rollback",
        ]);
        assert!(args.validate().is_ok());
        match args.start().unwrap() {
            Start::New(request) => assert_eq!(request.backup_policy, BackupPolicy::SkipBackup),
            Start::Resume(_) => panic!("expected a new job"),
        }
    }

    #[test]
    fn test_new_job_needs_tables() {
        let args = migrate_args(&["migrate", "--source", "sqlth_1_data"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_resume_needs_no_tables() {
        let job_id = Uuid::new_v4();
        let args = migrate_args(&["migrate", "--resume", &job_id.to_string()]);
        assert!(args.validate().is_ok());
        assert!(matches!(args.start().unwrap(), Start::Resume(id) if id == job_id));
    }

    #[test]
    fn test_flags_override_config() {
        let args = migrate_args(&[
            "migrate",
            "--source",
            "a",
            "--destination",
            "b",
            "--batch-size",
            "500",
            "--workers",
            "4",
            "--sample-size",
            "50",
            "--repair",
            "--format",
            "json",
        ]);
        let mut config = MigrationConfig::default();
        args.apply_to(&mut config);
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.workers, 4);
        assert_eq!(config.validation.sample_size, 50);
        assert_eq!(config.write_mode, WriteMode::Repair);
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn test_validate_only_selects_mode() {
        let args = migrate_args(&[
            "migrate",
            "--source",
            "a",
            "--destination",
            "b",
            "--validate-only",
        ]);
        match args.start().unwrap() {
            Start::New(request) => assert_eq!(request.mode, JobMode::ValidateOnly),
            Start::Resume(_) => panic!("expected a new job"),
        }
    }

    #[test]
    fn test_subcommands_parse() {
        let job_id = Uuid::new_v4();
        assert!(matches!(
            parse(&["rollback", &job_id.to_string()]).command,
            Commands::Rollback { job_id: id } if id == job_id
        ));
        assert!(matches!(
            parse(&["analyze", "--source", "sqlth_1_data"]).command,
            Commands::Analyze { .. }
        ));
        assert!(parse(&["-v", "status", &job_id.to_string()]).verbose);
    }

    #[test]
    fn test_log_file_is_global_and_optional() {
        let job_id = Uuid::new_v4();
        assert_eq!(parse(&["status", &job_id.to_string()]).log_file, None);
        let cli = parse(&["status", &job_id.to_string(), "--log-file", "migration.log"]);
        assert_eq!(cli.log_file, Some(PathBuf::from("migration.log")));
        let cli = parse(&["--log-file", "/var/log/histmig.log", "rollback", &job_id.to_string()]);
        assert_eq!(cli.log_file, Some(PathBuf::from("/var/log/histmig.log")));
    }
}
