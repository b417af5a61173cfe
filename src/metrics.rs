//! Run metrics: timing of a pipeline run and the `<output>.metrics.json`
//! file written next to every successful output table.
//!
//! # Example
//!
//! ```no_run
//! use salesflow::metrics::{RunClock, RunMetricsFile, metrics_path};
//! use salesflow::config::ExecMode;
//! use salesflow::{GroupBy, RunCounts};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut clock = RunClock::start();
//! // ... run the pipeline ...
//! clock.record_end();
//! let metrics = RunMetricsFile::new(&clock, GroupBy::default(), ExecMode::Sequential, 3, RunCounts::default());
//! metrics.print();
//! metrics.save_to_file(metrics_path("out/summary.csv"))?;
//! # Ok(())
//! # }
//! ```

use crate::config::ExecMode;
use crate::error::{Result, RunCounts};
use crate::io::write_json;
use crate::schema::{GroupBy, RejectReason};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Path of the metrics file that accompanies `output`.
pub fn metrics_path(output: impl AsRef<Path>) -> PathBuf {
    let mut s = output.as_ref().as_os_str().to_owned();
    s.push(".metrics.json");
    PathBuf::from(s)
}

/// Wall-clock and monotonic timing of one run.
#[derive(Clone, Debug)]
pub struct RunClock {
    started_at: DateTime<Utc>,
    start: Instant,
    finished_at: Option<DateTime<Utc>>,
    end: Option<Instant>,
}

impl RunClock {
    #[must_use]
    pub fn start() -> Self {
        Self { started_at: Utc::now(), start: Instant::now(), finished_at: None, end: None }
    }

    pub fn record_end(&mut self) {
        self.finished_at = Some(Utc::now());
        self.end = Some(Instant::now());
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time from start to `record_end`, or to now if the run is still going.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.end.unwrap_or_else(Instant::now).duration_since(self.start)
    }
}

/// Contents of `<output>.metrics.json`.
#[derive(Clone, Debug, Serialize)]
pub struct RunMetricsFile {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub group_by: GroupBy,
    pub exec_mode: ExecMode,
    pub input_files: usize,
    pub rejection_rate: f64,
    #[serde(flatten)]
    pub counts: RunCounts,
}

impl RunMetricsFile {
    pub fn new(
        clock: &RunClock,
        group_by: GroupBy,
        exec_mode: ExecMode,
        input_files: usize,
        counts: RunCounts,
    ) -> Self {
        Self {
            started_at: clock.started_at,
            finished_at: clock.finished_at.unwrap_or_else(Utc::now),
            elapsed_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
            group_by,
            exec_mode,
            input_files,
            rejection_rate: counts.rejection_rate(),
            counts,
        }
    }

    /// Print a human-readable summary to stdout.
    pub fn print(&self) {
        let c = &self.counts;
        println!("\n========== Run Metrics ==========");
        println!(
            "Execution Time: {:.3}s ({} ms)",
            Duration::from_millis(self.elapsed_ms).as_secs_f64(),
            self.elapsed_ms
        );
        println!("---------------------------------");
        println!("files_read: {} of {}", c.files_read, self.input_files);
        println!("rows_read: {}", c.rows_read);
        println!("rows_rejected: {} ({:.2}%)", c.rows_rejected, self.rejection_rate * 100.0);
        for (reason, n) in &c.rejections {
            println!("  {reason}: {n}");
        }
        println!("records_emitted: {}", c.records_emitted);
        println!("aggregate_rows: {}", c.aggregate_rows);
        for path in &c.skipped_files {
            println!("skipped: {}", path.display());
        }
        if let Some(row) = c.dedup_degraded_at_row {
            println!("dedup disabled at row {row}");
        }
        println!("=================================\n");
    }

    /// Write the metrics as pretty JSON, staged and renamed like the table.
    ///
    /// # Errors
    /// `DestinationUnwritable` if the file cannot be written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(path, self)
    }

    pub fn rejections_of(&self, reason: RejectReason) -> u64 {
        self.counts.rejections.get(&reason).copied().unwrap_or(0)
    }
}
