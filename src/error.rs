//! Error taxonomy for pipeline runs, validation and benchmarking.
//!
//! Row-level problems never surface here: they are [`RejectReason`]s, tallied
//! by the driver and reported in [`RunCounts`]. Everything in
//! [`PipelineError`] aborts the current run (or benchmark report).

use crate::schema::RejectReason;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Fatal conditions for a run, a validation or a benchmark.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source unavailable: {}: {reason}", path.display())]
    SourceUnavailable { path: PathBuf, reason: String },

    #[error("source corrupt: {}: {reason}", path.display())]
    SourceCorrupt { path: PathBuf, reason: String },

    #[error("schema mismatch in {}: expected header [{expected}], found [{found}]", path.display())]
    SchemaMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("read of {} stalled for more than {timeout:?}", path.display())]
    ReadTimeout { path: PathBuf, timeout: Duration },

    #[error("rejection rate {rate:.4} exceeds the configured ceiling {threshold:.4}")]
    QualityThresholdExceeded { rate: f64, threshold: f64 },

    #[error("destination unwritable: {}: {reason}", path.display())]
    DestinationUnwritable { path: PathBuf, reason: String },

    #[error("only {retained} trial(s) survived outlier rejection, {required} required")]
    InsufficientTrials { retained: usize, required: usize },

    #[error("run cancelled")]
    Cancelled,

    #[error("aggregate overflow while accumulating {measure} for key {key}")]
    AggregateOverflow { key: String, measure: &'static str },

    #[error("duplicate detection exceeded its capacity of {max_keys} keys")]
    DedupCapacityExceeded { max_keys: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Process exit code for this error.
    ///
    /// Code 1 is reserved for a validator mismatch, which is not an error.
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Config(_) => 2,
            PipelineError::SourceUnavailable { .. } => 3,
            PipelineError::SchemaMismatch { .. } => 4,
            PipelineError::ReadTimeout { .. } => 5,
            PipelineError::QualityThresholdExceeded { .. } => 6,
            PipelineError::DestinationUnwritable { .. } => 7,
            PipelineError::InsufficientTrials { .. } => 8,
            PipelineError::Cancelled => 9,
            PipelineError::AggregateOverflow { .. } => 10,
            PipelineError::DedupCapacityExceeded { .. } => 11,
            PipelineError::SourceCorrupt { .. } => 12,
            PipelineError::Io(_) => 70,
        }
    }

    /// Short machine-readable tag, used in benchmark samples and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::SourceUnavailable { .. } => "SourceUnavailable",
            PipelineError::SourceCorrupt { .. } => "SourceCorrupt",
            PipelineError::SchemaMismatch { .. } => "SchemaMismatch",
            PipelineError::ReadTimeout { .. } => "ReadTimeout",
            PipelineError::QualityThresholdExceeded { .. } => "QualityThresholdExceeded",
            PipelineError::DestinationUnwritable { .. } => "DestinationUnwritable",
            PipelineError::InsufficientTrials { .. } => "InsufficientTrials",
            PipelineError::Cancelled => "Cancelled",
            PipelineError::AggregateOverflow { .. } => "AggregateOverflow",
            PipelineError::DedupCapacityExceeded { .. } => "DedupCapacityExceeded",
            PipelineError::Config(_) => "Config",
            PipelineError::Io(_) => "Io",
        }
    }
}

/// Counters gathered during one pipeline run.
///
/// On success they describe the whole run; attached to a [`RunFailure`] they
/// are the partial counts gathered up to the fatal condition.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub rows_read: u64,
    pub rows_rejected: u64,
    pub records_emitted: u64,
    pub aggregate_rows: u64,
    pub rejections: BTreeMap<RejectReason, u64>,
    pub files_read: u64,
    pub skipped_files: Vec<PathBuf>,
    /// Row number at which duplicate detection stopped, if it did.
    pub dedup_degraded_at_row: Option<u64>,
}

impl RunCounts {
    pub fn record_rejection(&mut self, reason: RejectReason) {
        self.rows_rejected += 1;
        *self.rejections.entry(reason).or_insert(0) += 1;
    }

    /// Fraction of read rows that were rejected; `0.0` for an empty run.
    #[allow(clippy::cast_precision_loss)]
    pub fn rejection_rate(&self) -> f64 {
        if self.rows_read == 0 {
            0.0
        } else {
            self.rows_rejected as f64 / self.rows_read as f64
        }
    }
}

/// A fatal run outcome together with the counts gathered before it happened.
#[derive(Debug, Error)]
pub struct RunFailure {
    #[source]
    pub error: PipelineError,
    pub counts: RunCounts,
}

impl RunFailure {
    pub fn new(error: PipelineError, counts: RunCounts) -> Self {
        Self { error, counts }
    }

    pub fn exit_code(&self) -> u8 {
        self.error.exit_code()
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (after {} rows read, {} rejected, {} emitted)",
            self.error, self.counts.rows_read, self.counts.rows_rejected, self.counts.records_emitted
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let errors = [
            PipelineError::Config("x".into()),
            PipelineError::SourceUnavailable { path: "a".into(), reason: "gone".into() },
            PipelineError::SourceCorrupt { path: "a".into(), reason: "truncated".into() },
            PipelineError::SchemaMismatch { path: "a".into(), expected: "a".into(), found: "b".into() },
            PipelineError::ReadTimeout { path: "a".into(), timeout: Duration::from_secs(1) },
            PipelineError::QualityThresholdExceeded { rate: 0.5, threshold: 0.1 },
            PipelineError::DestinationUnwritable { path: "a".into(), reason: "ro".into() },
            PipelineError::InsufficientTrials { retained: 1, required: 2 },
            PipelineError::Cancelled,
            PipelineError::AggregateOverflow { key: "k".into(), measure: "total_revenue" },
            PipelineError::DedupCapacityExceeded { max_keys: 1 },
            PipelineError::Io(std::io::Error::other("boom")),
        ];
        let mut codes: Vec<u8> = errors.iter().map(PipelineError::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0));
        assert!(!codes.contains(&1));
    }

    #[test]
    fn rejection_rate_of_empty_run_is_zero() {
        assert_eq!(RunCounts::default().rejection_rate(), 0.0);
    }

    #[test]
    fn failure_display_carries_partial_counts() {
        let mut counts = RunCounts { rows_read: 10, ..RunCounts::default() };
        counts.record_rejection(RejectReason::MissingField);
        let failure = RunFailure::new(PipelineError::Cancelled, counts);
        let msg = failure.to_string();
        assert!(msg.contains("run cancelled"));
        assert!(msg.contains("10 rows read"));
        assert!(msg.contains("1 rejected"));
    }
}
