//! Repeated-trial benchmark harness.
//!
//! The [`Harness`] runs every [`PipelineUnderTest`] `trials` times, strictly
//! one trial at a time, with a cooldown between rounds. Each trial is timed
//! and sampled for peak memory and CPU (see [`sampler`]), and yields an
//! immutable [`RunMetrics`]. Sampling covers only the process a target
//! reports through [`TrialContext::watch_process`], normally the child it
//! spawned for that trial. A trial that fails or exceeds `trial_timeout` is
//! recorded as a failed sample and never retried.
//!
//! After the last trial, outliers among the successful wall times are
//! discarded (see [`stats::outlier_flags`]) and each implementation is
//! summarized. The resulting [`BenchmarkReport`] compares every
//! implementation with the first one.
//!
//! ```no_run
//! use salesflow::bench::{CommandTarget, Harness, HarnessConfig, PipelineUnderTest};
//!
//! # fn main() -> anyhow::Result<()> {
//! let own = CommandTarget::salesflow("salesflow", &std::env::current_exe()?, None);
//! let other = CommandTarget::from_spec("py=python pipeline.py {data_dir}")?;
//! let targets: Vec<Box<dyn PipelineUnderTest>> = vec![Box::new(own), Box::new(other)];
//! let report = Harness::new(HarnessConfig::default())?.run("data", &targets)?;
//! report.print();
//! report.save_to_file("results/benchmark.json")?;
//! # Ok(())
//! # }
//! ```

pub mod sampler;
pub mod stats;
pub mod target;

pub use sampler::{ResourceSamples, WatchedPid};
pub use stats::{Stats, outlier_flags};
pub use target::{CommandTarget, PipelineUnderTest, TrialContext};

use crate::cancel::CancellationToken;
use crate::error::{PipelineError, Result};
use crate::io::write_json;
use chrono::{DateTime, Utc};
use crossbeam_channel::bounded;
use sampler::{SamplerArgs, sample_until_stopped};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{info, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Harness settings.
#[derive(Clone, Debug, PartialEq)]
pub struct HarnessConfig {
    pub trials: usize,
    /// Pause between rounds of trials.
    pub cooldown: Duration,
    pub trial_timeout: Duration,
    pub sample_interval: Duration,
    /// Fewest trials that must survive outlier rejection.
    pub min_retained: usize,
    /// Outlier distance, in standard deviations of the other trials.
    pub outlier_sigma: f64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            trials: 5,
            cooldown: Duration::from_secs(2),
            trial_timeout: Duration::from_secs(3600),
            sample_interval: Duration::from_millis(50),
            min_retained: 2,
            outlier_sigma: 2.0,
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.trials == 0 {
            return Err(PipelineError::Config("trials must be at least 1".into()));
        }
        if self.min_retained == 0 || self.min_retained > self.trials {
            return Err(PipelineError::Config(format!(
                "min_retained must be within 1..={}, got {}",
                self.trials, self.min_retained
            )));
        }
        if self.sample_interval.is_zero() || self.trial_timeout.is_zero() {
            return Err(PipelineError::Config(
                "sample_interval and trial_timeout must be positive".into(),
            ));
        }
        if self.outlier_sigma.is_nan() || self.outlier_sigma <= 0.0 {
            return Err(PipelineError::Config("outlier_sigma must be positive".into()));
        }
        Ok(())
    }
}

/// Measurements of one trial.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunMetrics {
    pub implementation: String,
    pub trial: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub wall_time_secs: f64,
    pub peak_memory_mb: f64,
    pub avg_cpu_percent: f64,
    pub rows_read: Option<u64>,
    pub rows_rejected: Option<u64>,
    pub records_emitted: Option<u64>,
    pub success: bool,
    /// Error kind and message of a failed trial.
    pub error: Option<String>,
    /// Set during summarization for successful trials judged outliers.
    pub outlier: bool,
}

/// Statistics of one implementation over its retained trials.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Summary {
    pub trials: usize,
    pub successful: usize,
    pub failed: usize,
    pub retained: usize,
    pub wall_time_secs: Stats,
    pub peak_memory_mb: Stats,
    pub cpu_percent: Stats,
}

impl Summary {
    /// Flag outliers in `samples` (in place) and summarize them.
    ///
    /// # Errors
    /// `InsufficientTrials` when fewer than `min_retained` trials survive.
    pub fn from_samples(samples: &mut [RunMetrics], cfg: &HarnessConfig) -> Result<Self> {
        let successful: Vec<usize> =
            (0..samples.len()).filter(|&i| samples[i].success).collect();
        let times: Vec<f64> = successful.iter().map(|&i| samples[i].wall_time_secs).collect();
        let flags = outlier_flags(&times, cfg.outlier_sigma);
        for (&i, &flag) in successful.iter().zip(&flags) {
            samples[i].outlier = flag;
        }

        let retained: Vec<&RunMetrics> = samples.iter().filter(|s| s.success && !s.outlier).collect();
        if retained.len() < cfg.min_retained {
            return Err(PipelineError::InsufficientTrials {
                retained: retained.len(),
                required: cfg.min_retained,
            });
        }

        let ok: Vec<&RunMetrics> = samples.iter().filter(|s| s.success).collect();
        let stats_of = |f: fn(&RunMetrics) -> f64| {
            let all: Vec<f64> = ok.iter().map(|s| f(s)).collect();
            let kept: Vec<f64> = retained.iter().map(|s| f(s)).collect();
            Stats::new(&all, &kept)
        };
        Ok(Self {
            trials: samples.len(),
            successful: ok.len(),
            failed: samples.len() - ok.len(),
            retained: retained.len(),
            wall_time_secs: stats_of(|s| s.wall_time_secs),
            peak_memory_mb: stats_of(|s| s.peak_memory_mb),
            cpu_percent: stats_of(|s| s.avg_cpu_percent),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImplementationReport {
    pub name: String,
    pub summary: Summary,
    pub samples: Vec<RunMetrics>,
}

/// One implementation measured against the baseline (the first one).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Comparison {
    pub name: String,
    pub baseline: String,
    /// Baseline trimmed mean wall time over this one's; above 1 is faster.
    pub speedup: f64,
    /// Percent less peak memory than the baseline; negative means more.
    pub memory_reduction_percent: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BenchmarkReport {
    pub timestamp: DateTime<Utc>,
    pub data_dir: PathBuf,
    pub trials: usize,
    pub implementations: Vec<ImplementationReport>,
    pub comparison: Vec<Comparison>,
}

impl BenchmarkReport {
    fn compare(implementations: &[ImplementationReport]) -> Vec<Comparison> {
        let Some(base) = implementations.first() else {
            return Vec::new();
        };
        let base_time = base.summary.wall_time_secs.trimmed_mean;
        let base_mem = base.summary.peak_memory_mb.trimmed_mean;
        implementations[1..]
            .iter()
            .map(|imp| {
                let time = imp.summary.wall_time_secs.trimmed_mean;
                let mem = imp.summary.peak_memory_mb.trimmed_mean;
                Comparison {
                    name: imp.name.clone(),
                    baseline: base.name.clone(),
                    speedup: if time > 0.0 { base_time / time } else { 0.0 },
                    memory_reduction_percent: if base_mem > 0.0 {
                        (base_mem - mem) / base_mem * 100.0
                    } else {
                        0.0
                    },
                }
            })
            .collect()
    }

    /// Print a human-readable summary to stdout.
    pub fn print(&self) {
        println!("\n{}", "=".repeat(60));
        println!("Benchmark Results ({} trials, {})", self.trials, self.data_dir.display());
        println!("{}", "=".repeat(60));
        for imp in &self.implementations {
            let s = &imp.summary;
            println!("{}:", imp.name);
            println!(
                "  Duration:  {:.3}s (±{:.3}s), median {:.3}s, {} of {} trials retained",
                s.wall_time_secs.trimmed_mean,
                s.wall_time_secs.stdev,
                s.wall_time_secs.median,
                s.retained,
                s.trials
            );
            println!(
                "  Memory:    {:.2}MB (±{:.2}MB)",
                s.peak_memory_mb.trimmed_mean, s.peak_memory_mb.stdev
            );
            println!("  CPU:       {:.1}%", s.cpu_percent.trimmed_mean);
        }
        for c in &self.comparison {
            println!("{} vs {}:", c.name, c.baseline);
            println!("  Speed:     {:.2}x", c.speedup);
            println!("  Memory:    {:.1}% less", c.memory_reduction_percent);
        }
        println!("{}\n", "=".repeat(60));
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(path, self)
    }
}

/// Runs trials and builds the report.
pub struct Harness {
    cfg: HarnessConfig,
    shutdown: CancellationToken,
}

impl Harness {
    pub fn new(cfg: HarnessConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { cfg, shutdown: CancellationToken::new() })
    }

    /// Token that, once cancelled, stops the current trial and the run.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Measure every target on `data_dir`.
    ///
    /// # Errors
    /// `Cancelled` on shutdown, `InsufficientTrials` if any implementation
    /// keeps fewer than `min_retained` trials.
    pub fn run(
        &self,
        data_dir: impl AsRef<Path>,
        targets: &[Box<dyn PipelineUnderTest>],
    ) -> Result<BenchmarkReport> {
        let data_dir = data_dir.as_ref();
        let scratch = TempDir::new()?;
        let timestamp = Utc::now();
        let mut samples: Vec<Vec<RunMetrics>> = vec![Vec::new(); targets.len()];

        for trial in 1..=self.cfg.trials {
            for (target, out) in targets.iter().zip(samples.iter_mut()) {
                if self.shutdown.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                let metrics = self.run_trial(target.as_ref(), data_dir, scratch.path(), trial);
                out.push(metrics);
            }
            if trial < self.cfg.trials && !self.cfg.cooldown.is_zero() {
                thread::sleep(self.cfg.cooldown);
            }
        }

        let mut implementations = Vec::with_capacity(targets.len());
        for (target, mut samples) in targets.iter().zip(samples) {
            let summary = Summary::from_samples(&mut samples, &self.cfg)?;
            info!(
                implementation = target.name(),
                retained = summary.retained,
                mean_secs = summary.wall_time_secs.trimmed_mean,
                "implementation summarized"
            );
            implementations.push(ImplementationReport {
                name: target.name().to_string(),
                summary,
                samples,
            });
        }

        Ok(BenchmarkReport {
            timestamp,
            data_dir: data_dir.to_path_buf(),
            trials: self.cfg.trials,
            comparison: BenchmarkReport::compare(&implementations),
            implementations,
        })
    }

    /// One sampled, time-limited trial. Failures become failed samples.
    fn run_trial(
        &self,
        target: &dyn PipelineUnderTest,
        data_dir: &Path,
        scratch_dir: &Path,
        trial: usize,
    ) -> RunMetrics {
        let cancel = CancellationToken::new();
        let watched = WatchedPid::default();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let started_at = Utc::now();
        let start = Instant::now();

        let (result, samples) = thread::scope(|scope| {
            let args = SamplerArgs {
                pid: watched.clone(),
                interval: self.cfg.sample_interval,
                timeout: self.cfg.trial_timeout,
                cancel: cancel.clone(),
                stop: stop_rx,
            };
            let sampler = scope.spawn(move || sample_until_stopped(args));
            let relay = scope.spawn(|| {
                // forward harness shutdown into this trial
                while !cancel.is_cancelled() {
                    if self.shutdown.is_cancelled() {
                        cancel.cancel();
                        break;
                    }
                    thread::sleep(self.cfg.sample_interval);
                }
            });

            let ctx = TrialContext { trial, data_dir, scratch_dir, cancel: &cancel, watched: &watched };
            let result = target.run_trial(&ctx);
            let _ = stop_tx.send(());
            let samples = sampler.join().unwrap_or_default();
            cancel.cancel();
            let _ = relay.join();
            (result, samples)
        });
        let wall = start.elapsed();

        let (success, error, counts) = match result {
            Ok(counts) => (true, None, counts),
            Err(PipelineError::Cancelled) if samples.timed_out => {
                (false, Some(format!("Timeout: exceeded {:?}", self.cfg.trial_timeout)), None)
            }
            Err(e) => (false, Some(format!("{}: {e}", e.kind())), None),
        };
        if let Some(err) = &error {
            warn!(implementation = target.name(), trial, error = %err, "trial failed");
        } else {
            info!(
                implementation = target.name(),
                trial,
                secs = wall.as_secs_f64(),
                "trial finished"
            );
        }

        RunMetrics {
            implementation: target.name().to_string(),
            trial,
            started_at,
            finished_at: Utc::now(),
            wall_time_secs: wall.as_secs_f64(),
            peak_memory_mb: samples.peak_memory_bytes as f64 / BYTES_PER_MB,
            avg_cpu_percent: samples.avg_cpu_percent(),
            rows_read: counts.as_ref().map(|c| c.rows_read),
            rows_rejected: counts.as_ref().map(|c| c.rows_rejected),
            records_emitted: counts.as_ref().map(|c| c.records_emitted),
            success,
            error,
            outlier: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(trial: usize, secs: f64, success: bool) -> RunMetrics {
        RunMetrics {
            implementation: "x".into(),
            trial,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            wall_time_secs: secs,
            peak_memory_mb: 100.0,
            avg_cpu_percent: 50.0,
            rows_read: None,
            rows_rejected: None,
            records_emitted: None,
            success,
            error: None,
            outlier: false,
        }
    }

    #[test]
    fn slow_trial_is_discarded() {
        let mut samples: Vec<RunMetrics> = [1.0, 1.01, 0.99, 10.0, 1.0]
            .iter()
            .enumerate()
            .map(|(i, &t)| sample(i + 1, t, true))
            .collect();
        let summary = Summary::from_samples(&mut samples, &HarnessConfig::default()).unwrap();
        assert_eq!(summary.retained, 4);
        assert!(samples[3].outlier);
        assert!((summary.wall_time_secs.trimmed_mean - 1.0).abs() < 1e-9);
        assert!((summary.wall_time_secs.mean - 2.8).abs() < 1e-9);
        assert_eq!(summary.wall_time_secs.max, 1.01);
    }

    #[test]
    fn failed_trials_are_counted_not_summarized() {
        let mut samples = vec![sample(1, 1.0, true), sample(2, 0.1, false), sample(3, 1.2, true)];
        let summary = Summary::from_samples(&mut samples, &HarnessConfig::default()).unwrap();
        assert_eq!((summary.successful, summary.failed, summary.retained), (2, 1, 2));
        assert_eq!(summary.wall_time_secs.min, 1.0);
    }

    #[test]
    fn too_few_survivors() {
        let mut samples = vec![sample(1, 1.0, true), sample(2, 1.0, false)];
        let err = Summary::from_samples(&mut samples, &HarnessConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientTrials { retained: 1, required: 2 }));
        assert_eq!(err.exit_code(), 8);
    }

    #[test]
    fn comparison_against_first() {
        let mut fast = vec![sample(1, 1.0, true), sample(2, 1.0, true)];
        for s in &mut fast {
            s.peak_memory_mb = 25.0;
        }
        let mut slow = vec![sample(1, 4.0, true), sample(2, 4.0, true)];
        let cfg = HarnessConfig::default();
        let imps = vec![
            ImplementationReport {
                name: "slow".into(),
                summary: Summary::from_samples(&mut slow, &cfg).unwrap(),
                samples: slow,
            },
            ImplementationReport {
                name: "fast".into(),
                summary: Summary::from_samples(&mut fast, &cfg).unwrap(),
                samples: fast,
            },
        ];
        let cmp = BenchmarkReport::compare(&imps);
        assert_eq!(cmp.len(), 1);
        assert_eq!(cmp[0].speedup, 4.0);
        assert_eq!(cmp[0].memory_reduction_percent, 75.0);
    }

    #[test]
    fn config_validation() {
        assert!(HarnessConfig::default().validate().is_ok());
        let bad = HarnessConfig { trials: 1, min_retained: 2, ..HarnessConfig::default() };
        assert_eq!(bad.validate().unwrap_err().exit_code(), 2);
        let bad = HarnessConfig { outlier_sigma: f64::NAN, ..HarnessConfig::default() };
        assert!(bad.validate().is_err());
    }
}
