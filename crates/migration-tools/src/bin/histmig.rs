//! CLI binary for historian data migrations.

use anyhow::Context;
use clap::Parser;
use historiandb_core::{CancellationToken, SourceTable};
use historiandb_migration_tools::cli::{Cli, Commands, MigrateArgs};
use historiandb_migration_tools::db_handler::Connections;
use historiandb_migration_tools::logging;
use historiandb_migration_tools::report::{self, OutputFormat};
use historiandb_migration_tools::{
    ErrorClass, MigrationConfig, MigrationError, MigrationProgress, Migrator,
};
use std::io::IsTerminal;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _log_guard = match logging::init(cli.verbose, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(ErrorClass::of(&err).exit_code());
        }
    };

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            // errors outside the engine come from arguments or bootstrap
            let class = err
                .downcast_ref::<MigrationError>()
                .map_or(ErrorClass::Configuration, ErrorClass::of);
            let code = class.exit_code();
            error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let mut config = MigrationConfig::from_env()?;
    match cli.command {
        Commands::Migrate(args) => {
            args.validate().map_err(MigrationError::Config)?;
            args.apply_to(&mut config);
            config.validate()?;
            cmd_migrate(args, config).await
        }
        Commands::Rollback { job_id } => {
            let connections = Connections::connect(&config).await?;
            let checkpoints = connections.checkpoint_store(&config).await?;
            let collaborators = connections
                .collaborators_for_job(job_id, checkpoints)
                .await?;
            let migrator = Migrator::new(collaborators, config);
            let (job, restored) = migrator
                .rollback(job_id)
                .await
                .with_context(|| format!("rollback of job {job_id} failed"))?;
            println!(
                "Job {} rolled back: {} restored to {} rows",
                job.id, job.destination_table, restored
            );
            connections.close().await;
            Ok(0)
        }
        Commands::Status { job_id, format } => {
            let connections = Connections::connect(&config).await?;
            let checkpoints = connections.checkpoint_store(&config).await?;
            let collaborators = connections
                .collaborators_for_job(job_id, checkpoints)
                .await?;
            let snapshot = Migrator::new(collaborators, config).status(job_id).await?;
            print!("{}", report::render_status(&snapshot, format));
            connections.close().await;
            Ok(0)
        }
        Commands::Analyze {
            source,
            source_dsn,
            format,
        } => {
            if source_dsn.is_some() {
                config.source_dsn = source_dsn;
            }
            let connections = Connections::connect(&config).await?;
            let stats = connections
                .source(&source)?
                .stats(None)
                .await
                .map_err(MigrationError::from)?;
            print!("{}", report::render_analysis(&source, &stats, format));
            connections.close().await;
            Ok(0)
        }
    }
}

async fn cmd_migrate(args: MigrateArgs, config: MigrationConfig) -> anyhow::Result<u8> {
    if args.no_backup {
        warn!("--no-backup given: the destination will be written without a backup and this job cannot be rolled back");
    }

    let start = args.start().map_err(MigrationError::Config)?;
    let connections = Connections::connect(&config).await?;
    let checkpoints = connections.checkpoint_store(&config).await?;
    let collaborators = match (&args.resume, &args.source, &args.destination) {
        (Some(job_id), _, _) => {
            connections
                .collaborators_for_job(*job_id, checkpoints)
                .await?
        }
        (None, Some(source), Some(destination)) => {
            connections.collaborators(source, destination, checkpoints)?
        }
        _ => {
            return Err(MigrationError::Config(
                "--source and --destination are required".to_string(),
            )
            .into())
        }
    };

    let progress = if args.format == OutputFormat::Text && std::io::stderr().is_terminal() {
        MigrationProgress::new()
    } else {
        MigrationProgress::hidden()
    };
    let cancel = CancellationToken::new();
    let migrator = Migrator::new(collaborators, config)
        .with_cancellation(cancel.clone())
        .with_progress(progress.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after in-flight batches");
            cancel.cancel();
        }
    });

    let outcome = migrator.run(start).await?;
    info!(job_id = %outcome.job.id, status = %outcome.job.status, elapsed_secs = progress.elapsed().as_secs_f64(), "migration run finished");

    print!("{}", report::render_outcome(&outcome, args.format));
    connections.close().await;
    Ok(outcome.exit_code())
}
