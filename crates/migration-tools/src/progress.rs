//! Progress reporting for migration runs.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

/// Batch-granularity progress bar.
#[derive(Clone)]
pub struct MigrationProgress {
    bar: ProgressBar,
    start_time: Instant,
}

impl MigrationProgress {
    /// Visible progress bar on stderr.
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} batches ({percent}%) | {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message("Planning...");
        Self {
            bar,
            start_time: Instant::now(),
        }
    }

    /// Progress that draws nothing; used for JSON output and tests.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden()),
            start_time: Instant::now(),
        }
    }

    /// Set the number of batches in the run.
    pub fn set_total(&self, batches: u64) {
        self.bar.set_length(batches);
    }

    /// Account for batches finished in an earlier run.
    pub fn set_done(&self, batches: u64) {
        self.bar.set_position(batches);
    }

    /// One more batch done.
    pub fn inc(&self, sequence: u64, migrated_total: u64) {
        self.bar.inc(1);
        self.bar
            .set_message(format!("batch {sequence} | {migrated_total} records"));
    }

    /// Set a custom message.
    pub fn set_message(&self, msg: impl Into<String>) {
        self.bar.set_message(msg.into());
    }

    /// Finish and return elapsed time.
    pub fn finish(&self, msg: impl Into<String>) -> Duration {
        self.bar.finish_with_message(msg.into());
        self.start_time.elapsed()
    }

    /// Batches done so far.
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Elapsed time so far.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for MigrationProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_progress_counts_batches() {
        let progress = MigrationProgress::hidden();
        progress.set_total(3);
        progress.set_done(1);
        progress.inc(1, 200);
        assert_eq!(progress.position(), 2);
        assert!(progress.elapsed().as_secs_f64() < 1.0);
    }
}
