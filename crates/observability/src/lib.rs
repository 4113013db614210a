use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

static BATCHES_COMPLETED_TOTAL: AtomicU64 = AtomicU64::new(0);
static BATCH_FAILURES_TOTAL: AtomicU64 = AtomicU64::new(0);
static RECORDS_QUARANTINED_TOTAL: AtomicU64 = AtomicU64::new(0);
static PENDING_BATCHES: AtomicU64 = AtomicU64::new(0);

fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Records batch latency and increments the completed-batches counter.
pub fn record_batch_latency(job_id: Uuid, sequence: u64, duration: Duration, records: u64) {
    let total = BATCHES_COMPLETED_TOTAL.fetch_add(1, Ordering::Relaxed) + 1;
    info!(
        metric = "batch_latency_ms",
        job_id = %job_id,
        sequence,
        records,
        latency_ms = duration_ms(duration),
        batches_completed_total = total
    );
}

/// Records one failed batch attempt.
pub fn record_batch_failure(job_id: Uuid, sequence: u64, attempt: u32, error: &str) {
    let total = BATCH_FAILURES_TOTAL.fetch_add(1, Ordering::Relaxed) + 1;
    warn!(
        metric = "batch_failure",
        job_id = %job_id,
        sequence,
        attempt,
        error,
        batch_failures_total = total
    );
}

/// Records quarantined records for a batch.
pub fn record_quarantine(job_id: Uuid, sequence: u64, count: u64) {
    if count == 0 {
        return;
    }
    let total = RECORDS_QUARANTINED_TOTAL.fetch_add(count, Ordering::Relaxed) + count;
    warn!(
        metric = "records_quarantined",
        job_id = %job_id,
        sequence,
        count,
        records_quarantined_total = total
    );
}

/// Sets the pending batches gauge.
pub fn set_pending_batches(pending: u64) {
    PENDING_BATCHES.store(pending, Ordering::Relaxed);
    info!(metric = "pending_batches_gauge", pending);
}

/// Records the verdict of a validation run.
pub fn record_validation_verdict(job_id: Uuid, verdict: &str, duration: Duration) {
    info!(
        metric = "validation_verdict",
        job_id = %job_id,
        verdict,
        latency_ms = duration_ms(duration)
    );
}

/// Records the duration of a backup.
pub fn record_backup_latency(job_id: Uuid, rows: u64, duration: Duration) {
    info!(
        metric = "backup_latency_ms",
        job_id = %job_id,
        rows,
        latency_ms = duration_ms(duration)
    );
}
