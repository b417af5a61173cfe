//! Resource sampling for one trial.
//!
//! A sampler thread polls the monitored process with `sysinfo` every
//! `interval` until the trial ends, tracking peak resident memory and the
//! CPU utilization of each interval. The same thread enforces the trial
//! timeout by cancelling the trial's token.
//!
//! Nothing is sampled until a process is being watched. When the watched
//! process changes, the samples taken so far are discarded, so a trial's
//! figures always describe a single process.

use crate::cancel::CancellationToken;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};
use tracing::warn;

/// Which process the sampler watches. Starts unset; a target points it at
/// the child it spawned.
#[derive(Clone, Debug, Default)]
pub struct WatchedPid(Arc<AtomicU32>);

impl WatchedPid {
    /// Watching the calling process.
    pub fn current() -> Self {
        let watched = Self::default();
        watched.watch(sysinfo::get_current_pid().map_or(std::process::id(), |p| p.as_u32()));
        watched
    }

    pub fn watch(&self, pid: u32) {
        self.0.store(pid, Ordering::SeqCst);
    }

    /// `None` until something is watched.
    pub fn get(&self) -> Option<u32> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }
}

/// What the sampler observed over one trial.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceSamples {
    pub peak_memory_bytes: u64,
    /// Per-interval CPU utilization, percent of one core.
    pub cpu_percent: Vec<f32>,
    pub timed_out: bool,
}

impl ResourceSamples {
    pub fn avg_cpu_percent(&self) -> f64 {
        if self.cpu_percent.is_empty() {
            return 0.0;
        }
        let total: f64 = self.cpu_percent.iter().map(|c| f64::from(*c)).sum();
        total / self.cpu_percent.len() as f64
    }
}

pub(crate) struct SamplerArgs {
    pub pid: WatchedPid,
    pub interval: Duration,
    pub timeout: Duration,
    pub cancel: CancellationToken,
    pub stop: Receiver<()>,
}

/// Body of the sampler thread. Returns once `stop` fires or disconnects.
pub(crate) fn sample_until_stopped(args: SamplerArgs) -> ResourceSamples {
    let started = Instant::now();
    let mut sys = System::new();
    let mut out = ResourceSamples::default();
    let mut watched = None;
    let mut primed = false;

    loop {
        if let Some(raw) = args.pid.get() {
            let pid = Pid::from_u32(raw);
            if watched != Some(pid) {
                out.peak_memory_bytes = 0;
                out.cpu_percent.clear();
                watched = Some(pid);
                primed = false;
            }
            if sys.refresh_process(pid) {
                if let Some(process) = sys.process(pid) {
                    out.peak_memory_bytes = out.peak_memory_bytes.max(process.memory());
                    // the first refresh of a process has no interval to measure
                    if primed {
                        out.cpu_percent.push(process.cpu_usage());
                    }
                    primed = true;
                }
            }
        }

        if !out.timed_out && started.elapsed() > args.timeout {
            out.timed_out = true;
            warn!(timeout = ?args.timeout, "trial exceeded its timeout; cancelling");
            args.cancel.cancel();
        }

        match args.stop.recv_timeout(args.interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::thread;

    #[test]
    fn samples_own_process_until_stopped() {
        let (tx, rx) = bounded(0);
        let cancel = CancellationToken::new();
        let args = SamplerArgs {
            pid: WatchedPid::current(),
            interval: Duration::from_millis(5),
            timeout: Duration::from_secs(60),
            cancel: cancel.clone(),
            stop: rx,
        };
        let handle = thread::spawn(move || sample_until_stopped(args));
        thread::sleep(Duration::from_millis(40));
        tx.send(()).unwrap();
        let samples = handle.join().unwrap();
        assert!(samples.peak_memory_bytes > 0);
        assert!(!samples.timed_out);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn nothing_is_sampled_while_unwatched() {
        let (tx, rx) = bounded(0);
        let args = SamplerArgs {
            pid: WatchedPid::default(),
            interval: Duration::from_millis(5),
            timeout: Duration::from_secs(60),
            cancel: CancellationToken::new(),
            stop: rx,
        };
        let handle = thread::spawn(move || sample_until_stopped(args));
        thread::sleep(Duration::from_millis(30));
        tx.send(()).unwrap();
        assert_eq!(handle.join().unwrap(), ResourceSamples::default());
    }

    #[cfg(unix)]
    #[test]
    fn switching_process_discards_earlier_samples() {
        // hold ballast so this process is clearly larger than the child
        let ballast = std::hint::black_box(vec![1u8; 256 << 20]);
        let (tx, rx) = bounded(0);
        let watched = WatchedPid::current();
        let args = SamplerArgs {
            pid: watched.clone(),
            interval: Duration::from_millis(5),
            timeout: Duration::from_secs(60),
            cancel: CancellationToken::new(),
            stop: rx,
        };
        let handle = thread::spawn(move || sample_until_stopped(args));
        thread::sleep(Duration::from_millis(30));

        let mut child = std::process::Command::new("sleep").arg("5").spawn().unwrap();
        watched.watch(child.id());
        thread::sleep(Duration::from_millis(60));
        tx.send(()).unwrap();
        let samples = handle.join().unwrap();
        let _ = child.kill();
        let _ = child.wait();

        assert!(samples.peak_memory_bytes > 0);
        assert!(samples.peak_memory_bytes < 64 << 20);
        drop(ballast);
    }

    #[test]
    fn timeout_cancels_the_trial() {
        let (tx, rx) = bounded::<()>(0);
        let cancel = CancellationToken::new();
        let args = SamplerArgs {
            pid: WatchedPid::current(),
            interval: Duration::from_millis(2),
            timeout: Duration::from_millis(10),
            cancel: cancel.clone(),
            stop: rx,
        };
        let handle = thread::spawn(move || sample_until_stopped(args));
        while !cancel.is_cancelled() {
            thread::sleep(Duration::from_millis(2));
        }
        drop(tx);
        assert!(handle.join().unwrap().timed_out);
    }

    #[test]
    fn average_cpu_of_no_samples_is_zero() {
        assert_eq!(ResourceSamples::default().avg_cpu_percent(), 0.0);
    }
}
