//! # Salesflow
//!
//! A **bounded-memory rollup pipeline** for daily sales CSV exports. Salesflow
//! reads every matching file in a data directory, rejects malformed rows with a
//! typed reason, computes per-row revenue with exact decimal arithmetic and
//! writes a canonical, deterministically ordered aggregate table.
//!
//! ## Key Features
//!
//! - **Streaming reader** - files are read in fixed-size chunks by background
//!   threads, so memory stays bounded by the number of distinct groups
//! - **Typed rejections** - every dropped row is counted under a [`RejectReason`]
//! - **Exact money** - prices and revenue are [`rust_decimal::Decimal`], rounded
//!   half-to-even only at output
//! - **Sequential and parallel execution** - both produce byte-identical output
//! - **Atomic output** - the table and its metrics file appear whole or not at all
//! - **Equivalence validator** - diff two output tables field by field
//! - **Benchmark harness** - interleaved trials with memory and CPU sampling,
//!   outlier rejection and a JSON report
//!
//! ## Quick Start
//!
//! ```no_run
//! use salesflow::*;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let summary = Pipeline::default().run("data/", "out/aggregates.csv")?;
//! println!(
//!     "{} rows read, {} rejected, {} groups",
//!     summary.counts.rows_read, summary.counts.rows_rejected, summary.counts.aggregate_rows
//! );
//! # Ok(())
//! # }
//! ```
//!
//! Grouping and execution are chosen through [`PipelineConfig`]:
//!
//! ```no_run
//! use salesflow::*;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let mut config = PipelineConfig::default();
//! config.aggregation.group_by = GroupBy::RegionCategoryMonth;
//! config.aggregation.exec_mode = ExecMode::Parallel;
//!
//! let pipeline = Pipeline::new(config)?;
//! pipeline.run("data/", "out/monthly.csv")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Stages are pull-based iterators chained from the reader to the sink:
//! 1. [`io::reader`] streams [`RawRow`]s out of each input file in order
//! 2. [`clean`] parses and validates each row into a [`Record`] (or a rejection)
//! 3. [`transform`] derives revenue and calendar fields
//! 4. [`aggregate`] folds records into per-key buckets built from [`combiners`]
//! 5. [`io::writer`] renders the sorted table atomically
//!
//! ## Module Overview
//!
//! - [`pipeline`] - Run driver, counts and the metrics file
//! - [`schema`] - Row, record, key and output types
//! - [`clean`], [`transform`], [`stage`] - Per-row stages
//! - [`aggregate`], [`combiners`] - Grouping and measures
//! - [`io`] - Input discovery, decompression, reading and writing
//! - [`validator`] - Output equivalence checking
//! - [`bench`] - Benchmark harness
//! - [`config`], [`error`], [`logging`] - Ambient concerns

pub mod aggregate;
pub mod bench;
pub mod cancel;
pub mod clean;
pub mod combiners;
pub mod config;
pub mod error;
pub mod io;
pub mod logging;
pub mod metrics;
pub mod money;
pub mod pipeline;
pub mod schema;
pub mod stage;
pub mod testing;
pub mod transform;
pub mod validator;

// General re-exports
pub use aggregate::{Aggregator, aggregate_all};
pub use cancel::CancellationToken;
pub use clean::{Cleaner, Outcome, parse_record};
pub use combiners::{CombineFn, Count, Max, Mean, Min, Sum};
pub use config::{
    AggregationConfig, CleaningConfig, DedupConfig, DedupExhaustion, ExecMode,
    MissingSourcePolicy, PipelineConfig, ReaderConfig,
};
pub use error::{PipelineError, Result, RunCounts, RunFailure};
pub use io::{discover_inputs, read_rows, write_aggregates};
pub use metrics::{RunMetricsFile, metrics_path};
pub use pipeline::{Pipeline, RunSummary};
pub use schema::{
    AggregateKey, AggregateRow, Category, EnrichedRecord, GroupBy, RawRow, Record, Region,
    RejectReason, SourceSet,
};
pub use stage::StageExt;
pub use transform::enrich;
pub use validator::{ReportMode, compare_files};
