//! Terminal summaries printed by `histmig`.

use clap::ValueEnum;
use historiandb_core::{Checkpoint, JobStatus, TableStats};
use serde::Serialize;
use std::fmt::Write;

use crate::error_handler::ErrorRecovery;
use crate::orchestrator::{JobSnapshot, MigrationOutcome};

/// Quarantine entries listed in text output before truncating.
const QUARANTINE_LISTING_LIMIT: usize = 20;

/// Output format of the terminal summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    exit_code: u8,
    #[serde(flatten)]
    outcome: &'a MigrationOutcome,
    recovery_steps: Vec<String>,
}

/// Summary of a migration run.
pub fn render_outcome(outcome: &MigrationOutcome, format: OutputFormat) -> String {
    let recovery_steps = outcome
        .job
        .failure
        .as_ref()
        .map(|reason| ErrorRecovery::recovery_steps(reason, outcome.job.id))
        .unwrap_or_default();

    if format == OutputFormat::Json {
        let summary = JsonSummary {
            exit_code: outcome.exit_code(),
            outcome,
            recovery_steps,
        };
        return to_json(&summary);
    }

    let job = &outcome.job;
    let mut out = String::new();
    let _ = writeln!(out, "Migration job {}", job.id);
    let _ = writeln!(out, "  Source:            {}", job.source_table);
    let _ = writeln!(out, "  Destination:       {}", job.destination_table);
    let _ = writeln!(out, "  Status:            {}", job.status);
    if let Some(backup) = &job.backup {
        let _ = writeln!(out, "  Backup:            {} ({} rows)", backup.id, backup.row_count);
    }
    let _ = writeln!(out, "  Batches this run:  {}", outcome.batches_processed);
    let _ = writeln!(out, "  Rows written:      {}", outcome.records_written);
    if let Some(cp) = &outcome.checkpoint {
        let _ = writeln!(out, "  Records migrated:  {}", cp.total_records_migrated);
        let _ = writeln!(out, "  Suspicious stamps: {}", cp.total_suspicious_timestamps);
    }
    let _ = writeln!(out, "  Quarantined:       {}", outcome.quarantined.len());
    for entry in outcome.quarantined.iter().take(QUARANTINE_LISTING_LIMIT) {
        let _ = writeln!(
            out,
            "    - {} (batch {}, {}): {}",
            entry.key, entry.sequence, entry.kind, entry.reason
        );
    }
    if outcome.quarantined.len() > QUARANTINE_LISTING_LIMIT {
        let _ = writeln!(
            out,
            "    ... and {} more",
            outcome.quarantined.len() - QUARANTINE_LISTING_LIMIT
        );
    }

    if let Some(report) = &outcome.report {
        let _ = writeln!(out, "\nValidation: {}", report.verdict);
        let _ = writeln!(
            out,
            "  Rows:  source {} / destination {} (expected {})",
            report.source_row_count, report.destination_row_count, report.expected_destination_rows
        );
        let _ = writeln!(
            out,
            "  Keys:  source {} / destination {}",
            report.source_key_count, report.destination_key_count
        );
        let _ = writeln!(
            out,
            "  Tags:  source {} / destination {}",
            report.source_tag_count, report.destination_tag_count
        );
        let _ = writeln!(
            out,
            "  Sample: {} compared, {} mismatched",
            report.sampled,
            report.mismatches.len()
        );
        for finding in &report.findings {
            let _ = writeln!(out, "  ! {finding}");
        }
    }

    if job.status == JobStatus::Failed {
        if let Some(reason) = &job.failure {
            let _ = writeln!(out, "\nFailed: {reason}");
        }
        if let Some(phase) = job.failed_phase {
            let _ = writeln!(out, "  Phase: {phase}");
        }
        let _ = writeln!(out, "  {}", checkpoint_line(outcome.checkpoint.as_ref()));
        for step in &recovery_steps {
            let _ = writeln!(out, "  {step}");
        }
    }
    out
}

/// Persisted job state for `histmig status`.
pub fn render_status(snapshot: &JobSnapshot, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return to_json(snapshot);
    }
    let job = &snapshot.job;
    let mut out = String::new();
    let _ = writeln!(out, "Job {}", job.id);
    let _ = writeln!(out, "  Status:      {}", job.status);
    let _ = writeln!(out, "  Source:      {}", job.source_table);
    let _ = writeln!(out, "  Destination: {}", job.destination_table);
    let _ = writeln!(out, "  Batch size:  {}", job.batch_size);
    if let Some(batches) = job.planned_batches {
        let _ = writeln!(out, "  Planned:     {batches} batches");
    }
    if let Some(range) = job.planned_range {
        let _ = writeln!(out, "  Range:       {range}");
    }
    if let Some(reason) = &job.failure {
        let _ = writeln!(out, "  Failure:     {reason}");
    }
    let _ = writeln!(out, "  {}", checkpoint_line(snapshot.checkpoint.as_ref()));
    let _ = writeln!(out, "  Quarantined: {}", snapshot.quarantined.len());
    out
}

/// Source statistics for `histmig analyze`.
pub fn render_analysis(table: &str, stats: &TableStats, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return to_json(&serde_json::json!({ "table": table, "stats": stats }));
    }
    let mut out = String::new();
    let _ = writeln!(out, "Source table {table}");
    let _ = writeln!(out, "  Total records: {}", stats.row_count);
    let _ = writeln!(out, "  Unique keys:   {}", stats.key_count);
    let _ = writeln!(out, "  Unique tags:   {}", stats.tag_count);
    let _ = writeln!(out, "  Earliest:      {}", format_timestamp(stats.min_key.map(|k| k.timestamp_millis)));
    let _ = writeln!(out, "  Latest:        {}", format_timestamp(stats.max_key.map(|k| k.timestamp_millis)));
    out
}

fn checkpoint_line(checkpoint: Option<&Checkpoint>) -> String {
    match checkpoint {
        Some(cp) => format!(
            "Checkpoint: batch {} complete, resume from {} ({} records migrated)",
            cp.last_completed_sequence, cp.last_completed_range_end, cp.total_records_migrated
        ),
        None => "Checkpoint: none, a resume starts from the first batch".to_string(),
    }
}

fn format_timestamp(millis: Option<i64>) -> String {
    millis
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|err| format!("{{\"error\": \"failed to serialize summary: {err}\"}}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use historiandb_core::{
        BackupPolicy, FailureReason, JobMode, MigrationJob, MigrationKey, QuarantineKind,
        QuarantinedRecord,
    };

    fn failed_outcome() -> MigrationOutcome {
        let mut job = MigrationJob::new(
            "sqlth_1_data",
            "ts.sqlth_1_data",
            10,
            JobMode::FullMigration,
            BackupPolicy::SkipBackup,
        );
        job.advance(JobStatus::Planning).unwrap();
        job.advance(JobStatus::Migrating).unwrap();
        job.fail(FailureReason::Cancelled);
        MigrationOutcome {
            checkpoint: Some(Checkpoint {
                job_id: job.id,
                last_completed_sequence: 3,
                last_completed_range_end: MigrationKey::first_at(4_000),
                total_records_migrated: 40,
                total_records_quarantined: 1,
                total_suspicious_timestamps: 0,
                timestamp: Utc::now(),
            }),
            quarantined: vec![QuarantinedRecord {
                key: MigrationKey::new(2, 1_500),
                sequence: 1,
                kind: QuarantineKind::MalformedRecord,
                reason: "2 value columns populated, expected exactly one".into(),
            }],
            job,
            report: None,
            batches_processed: 4,
            records_written: 40,
        }
    }

    #[test]
    fn text_summary_explains_how_to_resume() {
        let outcome = failed_outcome();
        let text = render_outcome(&outcome, OutputFormat::Text);
        assert!(text.contains("cancelled by operator"));
        assert!(text.contains("batch 3 complete"));
        assert!(text.contains(&format!("--resume {}", outcome.job.id)));
        assert!(text.contains("tag 2@1500"));
    }

    #[test]
    fn json_summary_carries_exit_code() {
        let outcome = failed_outcome();
        let json: serde_json::Value =
            serde_json::from_str(&render_outcome(&outcome, OutputFormat::Json)).unwrap();
        assert_eq!(json["exit_code"], 2);
        assert_eq!(json["batches_processed"], 4);
        assert_eq!(json["quarantined"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn analysis_formats_timestamps() {
        let stats = TableStats {
            row_count: 2,
            key_count: 2,
            tag_count: 1,
            min_key: Some(MigrationKey::new(1, 0)),
            max_key: Some(MigrationKey::new(1, 1_000)),
        };
        let text = render_analysis("sqlth_1_data", &stats, OutputFormat::Text);
        assert!(text.contains("1970-01-01 00:00:00.000 UTC"));
        assert!(text.contains("1970-01-01 00:00:01.000 UTC"));
    }
}
