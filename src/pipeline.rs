//! The pipeline driver.
//!
//! Composes reader → cleaner → transformer → aggregator → writer for one run.
//! Rows are pulled one at a time through the [`StageExt`] adapters; the only
//! state that grows with the input is the aggregator's bucket map, which is
//! bounded by the number of distinct keys.
//!
//! Every fatal condition becomes a [`RunFailure`] carrying the counts gathered
//! so far, and no fatal path leaves an output file behind.

use crate::aggregate::Aggregator;
use crate::cancel::CancellationToken;
use crate::clean::{Cleaner, Outcome};
use crate::config::{ExecMode, PipelineConfig};
use crate::error::{PipelineError, Result, RunCounts, RunFailure};
use crate::io::{RowStream, discover_inputs, write_aggregates};
use crate::metrics::{RunClock, RunMetricsFile, metrics_path};
use crate::schema::{AggregateRow, EnrichedRecord, GroupBy, SourceSet};
use crate::stage::StageExt;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of a successful run.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub output: PathBuf,
    pub metrics_path: PathBuf,
    pub counts: RunCounts,
    pub elapsed: Duration,
    /// What was written to `metrics_path`.
    pub metrics: RunMetricsFile,
}

/// A configured pipeline. Cheap to clone; every run builds fresh state.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// # Errors
    /// `Config` if `config` fails validation.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Discover the inputs in `data_dir` and run to `output`.
    pub fn run(
        &self,
        data_dir: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> std::result::Result<RunSummary, RunFailure> {
        self.run_with_cancel(data_dir, output, &CancellationToken::new())
    }

    pub fn run_with_cancel(
        &self,
        data_dir: impl AsRef<Path>,
        output: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> std::result::Result<RunSummary, RunFailure> {
        let sources =
            discover_inputs(data_dir).map_err(|e| RunFailure::new(e, RunCounts::default()))?;
        self.run_sources(sources, output, cancel)
    }

    /// Run over an explicit, ordered file list.
    pub fn run_sources(
        &self,
        sources: SourceSet,
        output: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> std::result::Result<RunSummary, RunFailure> {
        let output = output.as_ref();
        let mut clock = RunClock::start();
        let mut counts = RunCounts::default();
        let input_files = sources.len();
        info!(
            files = input_files,
            output = %output.display(),
            group_by = ?self.config.aggregation.group_by,
            exec_mode = ?self.config.aggregation.exec_mode,
            "run started"
        );

        let rows = match self.aggregate(sources, cancel, &mut counts) {
            Ok(rows) => rows,
            Err(error) => {
                warn!(error = %error, rows = counts.rows_read, "run failed");
                return Err(RunFailure::new(error, counts));
            }
        };
        clock.record_end();

        let metrics_file = metrics_path(output);
        let metrics = RunMetricsFile::new(
            &clock,
            self.config.aggregation.group_by,
            self.config.aggregation.exec_mode,
            input_files,
            counts.clone(),
        );
        if let Err(error) = metrics.save_to_file(&metrics_file) {
            return Err(RunFailure::new(error, counts));
        }
        if let Err(error) = write_aggregates(output, self.config.aggregation.group_by, rows) {
            let _ = std::fs::remove_file(&metrics_file);
            return Err(RunFailure::new(error, counts));
        }

        info!(
            rows = counts.rows_read,
            rejected = counts.rows_rejected,
            emitted = counts.records_emitted,
            aggregates = counts.aggregate_rows,
            elapsed_ms = metrics.elapsed_ms,
            "run finished"
        );
        Ok(RunSummary {
            output: output.to_path_buf(),
            metrics_path: metrics_file,
            counts,
            elapsed: clock.elapsed(),
            metrics,
        })
    }

    /// Stream `sources` through clean/enrich/aggregate and return the
    /// finalized table without writing it. `counts` is updated as rows flow,
    /// so it holds partial counts if this fails.
    ///
    /// # Errors
    /// Any fatal reader, dedup or aggregation error, `Cancelled`, or
    /// `QualityThresholdExceeded` once the stream is exhausted.
    pub fn aggregate(
        &self,
        sources: SourceSet,
        cancel: &CancellationToken,
        counts: &mut RunCounts,
    ) -> Result<Vec<AggregateRow>> {
        let stream = RowStream::open(sources, self.config.reader.clone(), cancel.clone())?;
        let report = stream.report_handle();
        let mut cleaner = Cleaner::new(self.config.cleaning.dedup.clone());
        let mut sink = AggregateSink::new(&self.config)?;

        let result: Result<()> = (|| {
            for item in stream.clean(&mut cleaner).enrich() {
                let outcome = item?;
                counts.rows_read += 1;
                match outcome {
                    Outcome::Accepted(rec) => {
                        counts.records_emitted += 1;
                        sink.add(rec)?;
                    }
                    Outcome::Rejected(reason) => {
                        debug!(%reason, row = counts.rows_read, "row rejected");
                        counts.record_rejection(reason);
                    }
                }
            }
            Ok(())
        })();

        let read = report.snapshot();
        counts.files_read = read.files_read;
        counts.skipped_files = read.skipped_files;
        counts.dedup_degraded_at_row = cleaner.dedup_degraded_at();
        result?;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let rate = counts.rejection_rate();
        let threshold = self.config.cleaning.max_rejection_rate;
        if rate > threshold {
            return Err(PipelineError::QualityThresholdExceeded { rate, threshold });
        }

        let rows = sink.finish()?;
        counts.aggregate_rows = rows.len() as u64;
        Ok(rows)
    }
}

/// Where enriched records go: one aggregator, or sharded partials merged per
/// batch.
enum AggregateSink {
    Sequential(Aggregator),
    Parallel(ShardedAggregator),
}

impl AggregateSink {
    fn new(cfg: &PipelineConfig) -> Result<Self> {
        let group_by = cfg.aggregation.group_by;
        Ok(match cfg.aggregation.exec_mode {
            ExecMode::Sequential => AggregateSink::Sequential(Aggregator::new(group_by)),
            ExecMode::Parallel => AggregateSink::Parallel(ShardedAggregator::new(
                group_by,
                cfg.aggregation.threads,
                cfg.reader.chunk_size,
            )?),
        })
    }

    fn add(&mut self, rec: EnrichedRecord) -> Result<()> {
        match self {
            AggregateSink::Sequential(agg) => agg.add(&rec),
            AggregateSink::Parallel(sharded) => sharded.push(rec),
        }
    }

    fn finish(self) -> Result<Vec<AggregateRow>> {
        match self {
            AggregateSink::Sequential(agg) => Ok(agg.finalize()),
            AggregateSink::Parallel(sharded) => sharded.finish(),
        }
    }
}

/// Buffers up to one batch of records, then aggregates the batch on a rayon
/// pool, one partial aggregator per shard, and merges the partials into the
/// running total in shard order.
struct ShardedAggregator {
    pool: rayon::ThreadPool,
    shards: usize,
    batch: usize,
    pending: Vec<EnrichedRecord>,
    total: Aggregator,
}

impl ShardedAggregator {
    fn new(group_by: GroupBy, threads: Option<usize>, batch: usize) -> Result<Self> {
        let threads = threads.unwrap_or_else(num_cpus::get).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("salesflow-agg-{i}"))
            .build()
            .map_err(|e| PipelineError::Config(format!("cannot build aggregation pool: {e}")))?;
        let batch = batch.max(1);
        Ok(Self {
            pool,
            shards: 2 * threads,
            batch,
            pending: Vec::with_capacity(batch),
            total: Aggregator::new(group_by),
        })
    }

    fn push(&mut self, rec: EnrichedRecord) -> Result<()> {
        self.pending.push(rec);
        if self.pending.len() >= self.batch {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let group_by = self.total.group_by();
        let shard_len = self.pending.len().div_ceil(self.shards);
        let pending = &self.pending;
        let partials: Vec<Result<Aggregator>> = self.pool.install(|| {
            pending
                .par_chunks(shard_len)
                .map(|shard| -> Result<Aggregator> {
                    let mut part = Aggregator::new(group_by);
                    for rec in shard {
                        part.add(rec)?;
                    }
                    Ok(part)
                })
                .collect()
        });
        for part in partials {
            self.total.merge(part?)?;
        }
        self.pending.clear();
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<AggregateRow>> {
        self.flush()?;
        Ok(self.total.finalize())
    }
}
