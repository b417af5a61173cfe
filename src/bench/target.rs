//! Implementations the harness can measure.
//!
//! Every trial of a [`CommandTarget`] is a fresh child process, and resource
//! sampling follows that child only. [`CommandTarget::salesflow`] measures
//! this crate's own binary the same way.

use super::sampler::WatchedPid;
use crate::cancel::CancellationToken;
use crate::error::{PipelineError, Result, RunCounts};
use crate::metrics::metrics_path;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Handed to a target for the duration of one trial.
pub struct TrialContext<'a> {
    pub trial: usize,
    pub data_dir: &'a Path,
    /// Scratch directory for trial outputs, removed after the run.
    pub scratch_dir: &'a Path,
    /// Fires on harness shutdown or when the trial exceeds its timeout.
    pub cancel: &'a CancellationToken,
    pub(crate) watched: &'a WatchedPid,
}

impl TrialContext<'_> {
    /// Start resource sampling on `pid`. Nothing is sampled until a target
    /// calls this.
    pub fn watch_process(&self, pid: u32) {
        self.watched.watch(pid);
    }
}

/// A pipeline implementation under measurement.
///
/// Each call to `run_trial` must be independent of the previous ones and
/// should return `Cancelled` promptly once the context's token fires.
pub trait PipelineUnderTest: Send + Sync {
    fn name(&self) -> &str;

    /// Run the pipeline once. Returns the run's counts when known.
    fn run_trial(&self, ctx: &TrialContext<'_>) -> Result<Option<RunCounts>>;
}

/// Counters read back from a `<output>.metrics.json` file.
#[derive(Deserialize)]
struct ReportedCounts {
    rows_read: u64,
    rows_rejected: u64,
    records_emitted: u64,
    #[serde(default)]
    aggregate_rows: u64,
}

impl From<ReportedCounts> for RunCounts {
    fn from(c: ReportedCounts) -> Self {
        RunCounts {
            rows_read: c.rows_read,
            rows_rejected: c.rows_rejected,
            records_emitted: c.records_emitted,
            aggregate_rows: c.aggregate_rows,
            ..RunCounts::default()
        }
    }
}

fn counts_from_metrics(output: &Path) -> Option<RunCounts> {
    let text = fs::read_to_string(metrics_path(output)).ok()?;
    serde_json::from_str::<ReportedCounts>(&text).ok().map(RunCounts::from)
}

/// An external program, e.g. another implementation of the same pipeline.
///
/// The command line is split on whitespace. `{data_dir}` is replaced by the
/// data directory; without the placeholder the directory is appended as the
/// last argument. `{output}` is replaced by a per-trial path in the scratch
/// directory; if the program leaves a metrics file next to it, the trial's
/// row counts are read from there. Success is exit status 0.
#[derive(Clone, Debug)]
pub struct CommandTarget {
    name: String,
    program: String,
    args: Vec<String>,
    poll: Duration,
}

impl CommandTarget {
    /// # Errors
    /// `Config` for an empty command line.
    pub fn new(name: impl Into<String>, command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(String::from);
        let program = parts
            .next()
            .ok_or_else(|| PipelineError::Config("empty benchmark command".into()))?;
        Ok(Self {
            name: name.into(),
            program,
            args: parts.collect(),
            poll: Duration::from_millis(10),
        })
    }

    /// Parse a `NAME=COMMAND` specification.
    pub fn from_spec(spec: &str) -> Result<Self> {
        let (name, command) = spec.split_once('=').ok_or_else(|| {
            PipelineError::Config(format!("expected NAME=COMMAND, got {spec:?}"))
        })?;
        if name.trim().is_empty() {
            return Err(PipelineError::Config(format!("missing name in {spec:?}")));
        }
        Self::new(name.trim(), command)
    }

    /// The salesflow binary at `exe`, run as `salesflow run <data> <output>`.
    /// Paths are passed as single arguments, spaces included.
    pub fn salesflow(name: impl Into<String>, exe: &Path, config: Option<&Path>) -> Self {
        let mut args = vec!["run".to_string(), "{data_dir}".to_string(), "{output}".to_string()];
        if let Some(config) = config {
            args.push("--config".into());
            args.push(config.to_string_lossy().into_owned());
        }
        Self {
            name: name.into(),
            program: exe.to_string_lossy().into_owned(),
            args,
            poll: Duration::from_millis(10),
        }
    }

    fn output_for(&self, scratch_dir: &Path, trial: usize) -> PathBuf {
        let safe: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        scratch_dir.join(format!("{safe}-trial-{trial}.csv"))
    }

    /// Arguments for one trial, and whether `{output}` was used.
    fn build_args(&self, data_dir: &Path, output: &Path) -> (Vec<String>, bool) {
        let dir = data_dir.to_string_lossy();
        let out = output.to_string_lossy();
        let mut saw_dir = false;
        let mut saw_output = false;
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                saw_dir |= a.contains("{data_dir}");
                saw_output |= a.contains("{output}");
                a.replace("{data_dir}", &dir).replace("{output}", &out)
            })
            .collect();
        if !saw_dir {
            args.push(dir.into_owned());
        }
        (args, saw_output)
    }

    fn wait(&self, child: &mut Child, cancel: &CancellationToken) -> Result<()> {
        loop {
            let status = match child.try_wait() {
                Ok(status) => status,
                Err(e) => {
                    reap(child);
                    return Err(e.into());
                }
            };
            if let Some(status) = status {
                if status.success() {
                    return Ok(());
                }
                return Err(PipelineError::Io(std::io::Error::other(format!(
                    "{} exited with {status}",
                    self.name
                ))));
            }
            if cancel.is_cancelled() {
                reap(child);
                return Err(PipelineError::Cancelled);
            }
            thread::sleep(self.poll);
        }
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl PipelineUnderTest for CommandTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_trial(&self, ctx: &TrialContext<'_>) -> Result<Option<RunCounts>> {
        let output = self.output_for(ctx.scratch_dir, ctx.trial);
        let (args, writes_output) = self.build_args(ctx.data_dir, &output);
        debug!(program = %self.program, ?args, trial = ctx.trial, "spawning");
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PipelineError::SourceUnavailable {
                path: PathBuf::from(&self.program),
                reason: e.to_string(),
            })?;
        ctx.watch_process(child.id());
        self.wait(&mut child, ctx.cancel)?;

        if !writes_output {
            return Ok(None);
        }
        let counts = counts_from_metrics(&output);
        let _ = fs::remove_file(&output);
        let _ = fs::remove_file(metrics_path(&output));
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context<'a>(
        dir: &'a Path,
        cancel: &'a CancellationToken,
        watched: &'a WatchedPid,
    ) -> TrialContext<'a> {
        TrialContext { trial: 1, data_dir: dir, scratch_dir: dir, cancel, watched }
    }

    #[test]
    fn parses_name_and_command() {
        let t = CommandTarget::from_spec("py=python pipeline.py --data-dir {data_dir}").unwrap();
        assert_eq!(t.name(), "py");
        assert_eq!(t.program, "python");
        let (args, writes_output) = t.build_args(Path::new("/data"), Path::new("/tmp/o.csv"));
        assert_eq!(args, vec!["pipeline.py", "--data-dir", "/data"]);
        assert!(!writes_output);

        let appended = CommandTarget::from_spec("bin=./run --fast").unwrap();
        assert_eq!(appended.build_args(Path::new("d"), Path::new("o")).0, vec!["--fast", "d"]);
    }

    #[test]
    fn rejects_bad_specs() {
        assert!(CommandTarget::from_spec("no-equals-sign").is_err());
        assert!(CommandTarget::from_spec("=cmd").is_err());
        assert!(CommandTarget::from_spec("name=   ").is_err());
    }

    #[test]
    fn own_binary_gets_whole_path_arguments() {
        let t = CommandTarget::salesflow("salesflow", Path::new("/opt/my tools/salesflow"), None);
        assert_eq!(t.program, "/opt/my tools/salesflow");
        let output = t.output_for(Path::new("/scratch"), 3);
        assert_eq!(output, Path::new("/scratch/salesflow-trial-3.csv"));
        let (args, writes_output) = t.build_args(Path::new("/data dir"), &output);
        assert_eq!(args, vec!["run", "/data dir", "/scratch/salesflow-trial-3.csv"]);
        assert!(writes_output);

        let with_cfg = CommandTarget::salesflow("s", Path::new("sf"), Some(Path::new("c.toml")));
        assert_eq!(with_cfg.args[3..], ["--config", "c.toml"]);
    }

    #[test]
    fn counts_come_from_the_metrics_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("agg.csv");
        assert!(counts_from_metrics(&output).is_none());
        fs::write(
            metrics_path(&output),
            r#"{"elapsed_ms": 5, "rows_read": 10, "rows_rejected": 2, "records_emitted": 8, "aggregate_rows": 3}"#,
        )
        .unwrap();
        let counts = counts_from_metrics(&output).unwrap();
        assert_eq!(
            (counts.rows_read, counts.rows_rejected, counts.records_emitted, counts.aggregate_rows),
            (10, 2, 8, 3)
        );
    }

    #[cfg(unix)]
    #[test]
    fn reports_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let watched = WatchedPid::default();
        let ctx = context(dir.path(), &cancel, &watched);

        assert!(CommandTarget::new("ok", "true").unwrap().run_trial(&ctx).is_ok());
        assert!(watched.get().is_some());
        assert!(CommandTarget::new("bad", "false").unwrap().run_trial(&ctx).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn cancellation_kills_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let watched = WatchedPid::default();
        let ctx = context(dir.path(), &cancel, &watched);
        std::fs::write(dir.path().join("input"), "").unwrap();
        // follows the file until killed
        let target = CommandTarget::new("follow", "tail -f {data_dir}/input").unwrap();

        let canceller = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });
        let err = target.run_trial(&ctx).unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[cfg(unix)]
    #[test]
    fn reaped_child_has_exited() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        reap(&mut child);
        let status = child.try_wait().unwrap().expect("child still running");
        assert!(!status.success());
    }
}
