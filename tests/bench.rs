//! Harness runs against synthetic and real targets.

use anyhow::Result;
use salesflow::bench::{CommandTarget, Harness, HarnessConfig, PipelineUnderTest, TrialContext};
use salesflow::testing::{SalesFixture, generated_rows};
use salesflow::{PipelineError, RunCounts};
use std::hint::black_box;
use std::path::Path;
use std::thread;
use std::time::Duration;

const MIB: usize = 1 << 20;

/// Sleeps `base`, or `slow` on the listed trials; fails on `failing` trials.
struct Sleeper {
    name: &'static str,
    base: Duration,
    slow: Duration,
    slow_trials: Vec<usize>,
    failing: Vec<usize>,
}

impl Sleeper {
    fn steady(name: &'static str, base: Duration) -> Self {
        Self { name, base, slow: base, slow_trials: Vec::new(), failing: Vec::new() }
    }
}

impl PipelineUnderTest for Sleeper {
    fn name(&self) -> &str {
        self.name
    }

    fn run_trial(&self, ctx: &TrialContext<'_>) -> salesflow::Result<Option<RunCounts>> {
        if self.failing.contains(&ctx.trial) {
            return Err(PipelineError::Config(format!("trial {} refused", ctx.trial)));
        }
        let pause = if self.slow_trials.contains(&ctx.trial) { self.slow } else { self.base };
        thread::sleep(pause);
        Ok(None)
    }
}

/// Never finishes on its own; returns once cancelled.
struct Hang;

impl PipelineUnderTest for Hang {
    fn name(&self) -> &str {
        "hang"
    }

    fn run_trial(&self, ctx: &TrialContext<'_>) -> salesflow::Result<Option<RunCounts>> {
        while !ctx.cancel.is_cancelled() {
            thread::sleep(Duration::from_millis(2));
        }
        Err(PipelineError::Cancelled)
    }
}

fn own_binary() -> CommandTarget {
    CommandTarget::salesflow("salesflow", Path::new(env!("CARGO_BIN_EXE_salesflow")), None)
}

fn quick(trials: usize) -> HarnessConfig {
    HarnessConfig {
        trials,
        cooldown: Duration::ZERO,
        sample_interval: Duration::from_millis(5),
        ..HarnessConfig::default()
    }
}

#[mark_flaky_tests::flaky]
#[test]
fn ten_times_slower_trial_is_an_outlier() {
    let dir = tempfile::tempdir().unwrap();
    let target = Sleeper {
        name: "sleeper",
        base: Duration::from_millis(20),
        slow: Duration::from_millis(200),
        slow_trials: vec![3],
        failing: Vec::new(),
    };
    let targets: Vec<Box<dyn PipelineUnderTest>> = vec![Box::new(target)];

    let report = Harness::new(quick(5)).unwrap().run(dir.path(), &targets).unwrap();
    let imp = &report.implementations[0];
    assert_eq!(imp.summary.successful, 5);
    assert_eq!(imp.summary.retained, 4);
    let flagged: Vec<usize> = imp.samples.iter().filter(|s| s.outlier).map(|s| s.trial).collect();
    assert_eq!(flagged, vec![3]);
    assert!(imp.summary.wall_time_secs.trimmed_mean < 0.1);
    assert!(imp.summary.wall_time_secs.mean > imp.summary.wall_time_secs.trimmed_mean);
}

#[test]
fn failures_are_recorded_not_retried() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let target = Sleeper {
        failing: vec![2],
        ..Sleeper::steady("flaky", Duration::from_millis(1))
    };
    let targets: Vec<Box<dyn PipelineUnderTest>> = vec![Box::new(target)];

    let report = Harness::new(quick(3))?.run(dir.path(), &targets)?;
    let imp = &report.implementations[0];
    assert_eq!(imp.samples.len(), 3);
    assert_eq!((imp.summary.successful, imp.summary.failed), (2, 1));
    let failed = &imp.samples[1];
    assert!(!failed.success);
    assert!(failed.error.as_deref().unwrap_or("").starts_with("Config:"));
    Ok(())
}

#[test]
fn timed_out_trials_fail_the_report() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg = HarnessConfig { trial_timeout: Duration::from_millis(50), ..quick(2) };
    let targets: Vec<Box<dyn PipelineUnderTest>> = vec![Box::new(Hang)];

    let err = Harness::new(cfg)?.run(dir.path(), &targets).unwrap_err();
    assert!(matches!(err, PipelineError::InsufficientTrials { retained: 0, required: 2 }));
    Ok(())
}

#[test]
fn shutdown_stops_the_run() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::new(quick(3))?;
    harness.shutdown_token().cancel();
    let targets: Vec<Box<dyn PipelineUnderTest>> = vec![Box::new(Hang)];
    let err = harness.run(dir.path(), &targets).unwrap_err();
    assert_eq!(err.exit_code(), 9);
    Ok(())
}

#[test]
fn report_compares_against_the_first_target() -> Result<()> {
    let fx = SalesFixture::new()?;
    fx.write_csv("day.csv", &generated_rows(500, 8))?;
    let targets: Vec<Box<dyn PipelineUnderTest>> = vec![
        Box::new(own_binary()),
        Box::new(Sleeper::steady("idle", Duration::from_millis(2))),
    ];

    let report = Harness::new(quick(2))?.run(fx.data_dir(), &targets)?;
    assert_eq!(report.implementations.len(), 2);
    let own = &report.implementations[0];
    for s in &own.samples {
        assert!(s.success, "{:?}", s.error);
        assert_eq!(s.rows_read, Some(500));
        assert_eq!(s.rows_rejected, Some(0));
        assert_eq!(s.records_emitted, Some(500));
    }
    assert_eq!(report.comparison.len(), 1);
    assert_eq!(report.comparison[0].baseline, "salesflow");
    assert_eq!(report.comparison[0].name, "idle");

    let path = fx.output_path("bench.json");
    report.save_to_file(&path)?;
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(json["trials"], 2);
    assert_eq!(json["implementations"][0]["summary"]["retained"], 2);
    Ok(())
}

#[test]
fn rejected_rows_reach_the_trial_metrics() -> Result<()> {
    let fx = SalesFixture::new()?;
    let mut rows = generated_rows(18, 4);
    rows.push(rows[0].clone().with_price(""));
    rows.push(rows[1].clone().with_quantity("0"));
    fx.write_csv("day.csv", &rows)?;
    let targets: Vec<Box<dyn PipelineUnderTest>> = vec![Box::new(own_binary())];

    let report = Harness::new(quick(2))?.run(fx.data_dir(), &targets)?;
    let trial = &report.implementations[0].samples[0];
    assert_eq!(trial.rows_read, Some(20));
    assert_eq!(trial.rows_rejected, Some(2));
    assert_eq!(trial.records_emitted, Some(18));
    Ok(())
}

#[cfg(unix)]
#[test]
fn external_trial_memory_excludes_the_harness() -> Result<()> {
    let ballast = black_box(vec![1u8; 300 * MIB]);
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("wait.sh"), "sleep 0.3\n")?;
    let target = CommandTarget::new("shell", "sh {data_dir}/wait.sh")?;
    let targets: Vec<Box<dyn PipelineUnderTest>> = vec![Box::new(target)];

    let report = Harness::new(quick(2))?.run(dir.path(), &targets)?;
    for s in &report.implementations[0].samples {
        assert!(s.success, "{:?}", s.error);
        assert!(s.peak_memory_mb > 0.0);
        assert!(s.peak_memory_mb < 100.0, "harness memory leaked into {} MB", s.peak_memory_mb);
    }
    drop(ballast);
    Ok(())
}

#[cfg(unix)]
#[test]
fn own_pipeline_runs_in_a_fresh_process_per_trial() -> Result<()> {
    let ballast = black_box(vec![1u8; 300 * MIB]);
    let fx = SalesFixture::new()?;
    fx.write_csv("day.csv", &generated_rows(50, 9))?;
    let targets: Vec<Box<dyn PipelineUnderTest>> = vec![Box::new(own_binary())];

    let report = Harness::new(quick(2))?.run(fx.data_dir(), &targets)?;
    for s in &report.implementations[0].samples {
        assert!(s.success, "{:?}", s.error);
        assert_eq!(s.rows_read, Some(50));
        assert!(s.peak_memory_mb < 200.0, "harness memory leaked into {} MB", s.peak_memory_mb);
    }
    drop(ballast);
    Ok(())
}
