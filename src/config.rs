//! Run configuration.
//!
//! Every field has a default, so an empty TOML file (or no file at all) is a
//! valid configuration. CLI flags are applied on top of the loaded values.
//!
//! ```toml
//! [reader]
//! chunk_size = 4096
//! read_ahead = 2
//! read_timeout_ms = 30000
//! on_missing_source = "skip"
//!
//! [cleaning]
//! max_rejection_rate = 0.1
//! dedup = { max_keys = 1000000, on_exhausted = "degrade" }
//!
//! [aggregation]
//! group_by = "region-category"
//! exec_mode = "parallel"
//! ```

use crate::error::{PipelineError, Result};
use crate::schema::GroupBy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub reader: ReaderConfig,
    pub cleaning: CleaningConfig,
    pub aggregation: AggregationConfig,
}

/// What to do when an input file cannot be opened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingSourcePolicy {
    /// Abort the run with `SourceUnavailable`.
    #[default]
    Fail,
    /// Record the file as skipped and continue with the next one.
    Skip,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReaderConfig {
    /// Rows per chunk handed from a reader thread to the pipeline.
    pub chunk_size: usize,
    /// Files read concurrently. Rows are still consumed in file-list order.
    pub read_ahead: usize,
    /// Chunks buffered per in-flight file.
    pub channel_capacity: usize,
    /// Longest wait for the next chunk before failing with `ReadTimeout`.
    pub read_timeout_ms: u64,
    pub on_missing_source: MissingSourcePolicy,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            read_ahead: 2,
            channel_capacity: 2,
            read_timeout_ms: 30_000,
            on_missing_source: MissingSourcePolicy::Fail,
        }
    }
}

impl ReaderConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// What duplicate detection does once its key set is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupExhaustion {
    /// Stop deduplicating for the rest of the run, recording where it stopped.
    #[default]
    Degrade,
    /// Abort with `DedupCapacityExceeded`.
    Fail,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DedupConfig {
    /// Maximum number of row fingerprints remembered (16 bytes each).
    pub max_keys: usize,
    pub on_exhausted: DedupExhaustion,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { max_keys: 4_000_000, on_exhausted: DedupExhaustion::Degrade }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CleaningConfig {
    /// Largest tolerated `rejected / read` ratio for a completed run.
    pub max_rejection_rate: f64,
    /// Duplicate detection; disabled when absent.
    pub dedup: Option<DedupConfig>,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self { max_rejection_rate: 0.25, dedup: None }
    }
}

/// How enriched records reach the aggregator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// One aggregator, fed record by record.
    #[default]
    Sequential,
    /// Each chunk is split across a rayon pool into partial aggregators that
    /// are merged back in shard order.
    Parallel,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AggregationConfig {
    pub group_by: GroupBy,
    pub exec_mode: ExecMode,
    /// Worker threads for `Parallel`; defaults to the number of CPUs.
    pub threads: Option<usize>,
}

impl PipelineConfig {
    /// Load a TOML file and validate it.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: PipelineConfig =
            toml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        let r = &self.reader;
        if r.chunk_size == 0 {
            return Err(PipelineError::Config("reader.chunk_size must be at least 1".into()));
        }
        if r.read_ahead == 0 {
            return Err(PipelineError::Config("reader.read_ahead must be at least 1".into()));
        }
        if r.channel_capacity == 0 {
            return Err(PipelineError::Config(
                "reader.channel_capacity must be at least 1".into(),
            ));
        }
        if r.read_timeout_ms == 0 {
            return Err(PipelineError::Config("reader.read_timeout_ms must be positive".into()));
        }
        let rate = self.cleaning.max_rejection_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(PipelineError::Config(format!(
                "cleaning.max_rejection_rate must be within [0, 1], got {rate}"
            )));
        }
        if let Some(dedup) = &self.cleaning.dedup
            && dedup.max_keys == 0
        {
            return Err(PipelineError::Config("cleaning.dedup.max_keys must be at least 1".into()));
        }
        if self.aggregation.threads == Some(0) {
            return Err(PipelineError::Config("aggregation.threads must be at least 1".into()));
        }
        Ok(())
    }
}
