//! Post-migration validation.
//!
//! Compares the source and destination over the job's planned range: row,
//! key and tag counts, min/max keys, and a random sample compared field by
//! field. Validation only reads from either side.

use historiandb_core::{
    Checkpoint, DestinationSink, KeyRange, MigrationJob, MigrationKey, QuarantinedRecord,
    Record, RecordCodec, SourceTable, TableStats,
};
use historiandb_observability as observability;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::error::MigrationResult;

/// Validator thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Keys sampled for field-by-field comparison
    pub sample_size: usize,
    /// Allowed row-count difference before the verdict is `Fail`
    pub row_count_tolerance: u64,
    /// Fraction of suspicious timestamps above which the verdict is `Warn`
    pub suspicious_fraction: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            sample_size: 1_000,
            row_count_tolerance: 0,
            suspicious_fraction: 0.01,
        }
    }
}

/// Outcome of a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    /// Everything matched
    Pass,
    /// Data is consistent but something needs an operator's attention
    Warn,
    /// Counts or sampled values disagree
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => f.write_str("PASS"),
            Verdict::Warn => f.write_str("WARN"),
            Verdict::Fail => f.write_str("FAIL"),
        }
    }
}

/// A sampled key whose source and destination records differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledMismatch {
    /// Key compared
    pub key: MigrationKey,
    /// Record decoded from the source
    pub source: Record,
    /// Record stored at the destination
    pub destination: Record,
}

/// Full validation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Range that was compared
    pub range: KeyRange,
    /// Source rows in range, duplicates included
    pub source_row_count: u64,
    /// Destination rows in range
    pub destination_row_count: u64,
    /// Distinct source keys in range
    pub source_key_count: u64,
    /// Distinct destination keys in range
    pub destination_key_count: u64,
    /// Distinct source tags in range
    pub source_tag_count: u64,
    /// Distinct destination tags in range
    pub destination_tag_count: u64,
    /// Smallest source key, over the whole table
    pub source_min_key: Option<MigrationKey>,
    /// Largest source key, over the whole table
    pub source_max_key: Option<MigrationKey>,
    /// Smallest destination key in range
    pub destination_min_key: Option<MigrationKey>,
    /// Largest destination key in range
    pub destination_max_key: Option<MigrationKey>,
    /// Records quarantined by the migration
    pub quarantined_count: u64,
    /// Destination rows expected given the quarantine
    pub expected_destination_rows: u64,
    /// Records flagged with a suspicious timestamp
    pub suspicious_count: u64,
    /// `suspicious_count` over the records it was measured against
    pub suspicious_fraction: f64,
    /// Sampled keys compared field by field
    pub sampled: usize,
    /// Sampled keys missing from the destination
    pub sampled_missing: usize,
    /// Sampled keys whose records differ
    pub mismatches: Vec<SampledMismatch>,
    /// Human-readable findings behind the verdict
    pub findings: Vec<String>,
    /// Overall verdict
    pub verdict: Verdict,
}

impl ValidationReport {
    /// One-line summary for logs and failure reasons.
    pub fn summary(&self) -> String {
        if self.findings.is_empty() {
            format!(
                "{}: {} source rows, {} destination rows",
                self.verdict, self.source_row_count, self.destination_row_count
            )
        } else {
            format!("{}: {}", self.verdict, self.findings.join("; "))
        }
    }
}

/// Compares source and destination.
pub struct Validator {
    source: Arc<dyn SourceTable>,
    sink: Arc<dyn DestinationSink>,
    codec: RecordCodec,
    config: ValidationConfig,
}

impl Validator {
    /// Create a validator.
    pub fn new(
        source: Arc<dyn SourceTable>,
        sink: Arc<dyn DestinationSink>,
        codec: RecordCodec,
        config: ValidationConfig,
    ) -> Self {
        Self {
            source,
            sink,
            codec,
            config,
        }
    }

    /// Validate `job`.
    ///
    /// `checkpoint` supplies the suspicious-timestamp totals of a migration;
    /// without one (validate-only runs) the fraction is estimated from the sample.
    pub async fn validate(
        &self,
        job: &MigrationJob,
        checkpoint: Option<&Checkpoint>,
        quarantined: &[QuarantinedRecord],
    ) -> MigrationResult<ValidationReport> {
        let started = Instant::now();
        let whole_source = self.source.stats(None).await?;
        let range = match job.planned_range {
            Some(range) => range,
            None => match (whole_source.min_key, whole_source.max_key) {
                (Some(min), Some(max)) => KeyRange::covering(min, max)?,
                _ => KeyRange::new(MigrationKey::MIN, MigrationKey::MAX)?,
            },
        };

        let source = self.source.stats(Some(&range)).await?;
        let destination = self.sink.stats(&range).await?;

        let quarantined_keys: HashSet<MigrationKey> = quarantined.iter().map(|q| q.key).collect();
        let sample = self.compare_sample(&range, &quarantined_keys).await?;

        let (suspicious_count, measured) = match checkpoint {
            Some(cp) => (cp.total_suspicious_timestamps, cp.total_records_migrated),
            None => (sample.suspicious, sample.decoded as u64),
        };
        let suspicious_fraction = if measured == 0 {
            0.0
        } else {
            suspicious_count as f64 / measured as f64
        };

        let report = self.judge(
            range,
            &whole_source,
            &source,
            &destination,
            quarantined.len() as u64,
            suspicious_count,
            suspicious_fraction,
            sample,
        );

        observability::record_validation_verdict(
            job.id,
            &report.verdict.to_string(),
            started.elapsed(),
        );
        match report.verdict {
            Verdict::Pass => info!(job_id = %job.id, "validation passed"),
            Verdict::Warn | Verdict::Fail => {
                warn!(job_id = %job.id, verdict = %report.verdict, findings = ?report.findings, "validation finished with findings")
            }
        }
        Ok(report)
    }

    async fn compare_sample(
        &self,
        range: &KeyRange,
        quarantined: &HashSet<MigrationKey>,
    ) -> MigrationResult<SampleResult> {
        let mut result = SampleResult::default();
        if self.config.sample_size == 0 {
            return Ok(result);
        }

        let rows = self.source.sample(range, self.config.sample_size).await?;
        let mut expected: HashMap<MigrationKey, Record> = HashMap::new();
        for row in &rows {
            let Ok(decoded) = self.codec.decode(row) else {
                continue;
            };
            result.decoded += 1;
            if decoded.is_suspicious() {
                result.suspicious += 1;
            }
            if quarantined.contains(&decoded.record.key) {
                continue;
            }
            expected.insert(decoded.record.key, decoded.record);
        }

        let mut keys: Vec<MigrationKey> = expected.keys().copied().collect();
        keys.sort();
        let stored: HashMap<MigrationKey, Record> = self
            .sink
            .fetch(&keys)
            .await?
            .into_iter()
            .map(|r| (r.key, r))
            .collect();

        for key in keys {
            let Some(source) = expected.remove(&key) else {
                continue;
            };
            match stored.get(&key) {
                None => result.missing += 1,
                Some(destination) => {
                    result.compared += 1;
                    if !source.same_content(destination) {
                        result.mismatches.push(SampledMismatch {
                            key,
                            source,
                            destination: destination.clone(),
                        });
                    }
                }
            }
        }
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn judge(
        &self,
        range: KeyRange,
        whole_source: &TableStats,
        source: &TableStats,
        destination: &TableStats,
        quarantined_count: u64,
        suspicious_count: u64,
        suspicious_fraction: f64,
        sample: SampleResult,
    ) -> ValidationReport {
        let mut findings = Vec::new();
        let mut verdict = Verdict::Pass;

        let expected_destination_rows = source.row_count.saturating_sub(quarantined_count);
        let diff = expected_destination_rows.abs_diff(destination.row_count);
        if diff > self.config.row_count_tolerance {
            verdict = Verdict::Fail;
            findings.push(format!(
                "row count mismatch: expected {expected_destination_rows} destination rows, found {} (tolerance {})",
                destination.row_count, self.config.row_count_tolerance
            ));
        }
        if !sample.mismatches.is_empty() {
            verdict = Verdict::Fail;
            findings.push(format!(
                "{} of {} sampled records differ",
                sample.mismatches.len(),
                sample.compared
            ));
        }

        let mut flag = |finding: String| {
            verdict = verdict.max(Verdict::Warn);
            findings.push(finding);
        };
        if (whole_source.min_key, whole_source.max_key)
            != (destination.min_key, destination.max_key)
        {
            flag(format!(
                "key range differs: source {} .. {}, destination {} .. {}",
                display_key(whole_source.min_key),
                display_key(whole_source.max_key),
                display_key(destination.min_key),
                display_key(destination.max_key)
            ));
        }
        if source.tag_count != destination.tag_count {
            flag(format!(
                "tag count differs: source {}, destination {}",
                source.tag_count, destination.tag_count
            ));
        }
        if suspicious_fraction > self.config.suspicious_fraction {
            flag(format!(
                "{suspicious_count} records ({:.2}%) carry suspicious timestamps",
                suspicious_fraction * 100.0
            ));
        }
        if sample.missing > 0 {
            findings.push(format!(
                "{} sampled keys are missing from the destination",
                sample.missing
            ));
        }

        ValidationReport {
            range,
            source_row_count: source.row_count,
            destination_row_count: destination.row_count,
            source_key_count: source.key_count,
            destination_key_count: destination.key_count,
            source_tag_count: source.tag_count,
            destination_tag_count: destination.tag_count,
            source_min_key: whole_source.min_key,
            source_max_key: whole_source.max_key,
            destination_min_key: destination.min_key,
            destination_max_key: destination.max_key,
            quarantined_count,
            expected_destination_rows,
            suspicious_count,
            suspicious_fraction,
            sampled: sample.compared,
            sampled_missing: sample.missing,
            mismatches: sample.mismatches,
            findings,
            verdict,
        }
    }
}

#[derive(Debug, Default)]
struct SampleResult {
    decoded: usize,
    suspicious: u64,
    compared: usize,
    missing: usize,
    mismatches: Vec<SampledMismatch>,
}

fn display_key(key: Option<MigrationKey>) -> String {
    key.map(|k| k.to_string()).unwrap_or_else(|| "none".to_string())
}
