//! Times the installer's resolver against a materialized wheelhouse.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::cancel::CancelToken;
use crate::extract::process::{run_supervised, ProcessEnd};

#[derive(Debug, Clone)]
pub struct BenchOptions {
    pub python: PathBuf,
    pub wheelhouse: PathBuf,
    pub requirements: Vec<String>,
    pub warmups: usize,
    pub runs: usize,
    /// Directory receiving one installer log per invocation.
    pub log_dir: PathBuf,
    /// Prefix for log file names, usually the scenario name.
    pub label: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timings {
    pub seconds: Vec<f64>,
    pub mean: f64,
    pub stdev: f64,
}

impl Timings {
    pub fn from_durations(durations: &[Duration]) -> Self {
        let seconds = durations.iter().map(Duration::as_secs_f64).collect::<Vec<_>>();
        let (mean, stdev) = mean_and_pstdev(&seconds);
        Self {
            seconds,
            mean,
            stdev,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchReport {
    pub warmups: Timings,
    pub runs: Timings,
}

/// Mean and population standard deviation; both zero for an empty sample.
pub fn mean_and_pstdev(samples: &[f64]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    #[allow(clippy::cast_precision_loss)]
    let count = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / count;
    let variance = samples
        .iter()
        .map(|sample| (sample - mean).powi(2))
        .sum::<f64>()
        / count;
    (mean, variance.sqrt())
}

pub fn run_benchmark(options: &BenchOptions, cancel: &CancelToken) -> Result<BenchReport> {
    if options.runs == 0 {
        bail!("at least one timed run is required");
    }
    let index_url = wheelhouse_url(&options.wheelhouse)?;
    fs::create_dir_all(&options.log_dir)
        .with_context(|| format!("failed to create {}", options.log_dir.display()))?;
    let mut warmups = Vec::with_capacity(options.warmups);
    for n in 1..=options.warmups {
        warmups.push(invoke(options, &index_url, "warmup", n, cancel)?);
    }
    let mut runs = Vec::with_capacity(options.runs);
    for n in 1..=options.runs {
        runs.push(invoke(options, &index_url, "run", n, cancel)?);
    }
    let report = BenchReport {
        warmups: Timings::from_durations(&warmups),
        runs: Timings::from_durations(&runs),
    };
    info!(mean = report.runs.mean, stdev = report.runs.stdev, runs = options.runs, "benchmark finished");
    Ok(report)
}

fn wheelhouse_url(wheelhouse: &Path) -> Result<String> {
    let absolute = wheelhouse
        .canonicalize()
        .with_context(|| format!("wheelhouse {} does not exist", wheelhouse.display()))?;
    Url::from_directory_path(&absolute)
        .map(String::from)
        .map_err(|()| anyhow!("cannot express {} as a file URL", absolute.display()))
}

pub(crate) fn installer_args(index_url: &str, log: &Path, requirements: &[String]) -> Vec<String> {
    let mut args = vec![
        "-m".to_string(),
        "pip".to_string(),
        "install".to_string(),
        "--index-url".to_string(),
        index_url.to_string(),
        "--disable-pip-version-check".to_string(),
        "--dry-run".to_string(),
        "--ignore-installed".to_string(),
        "--log".to_string(),
        log.display().to_string(),
        "--quiet".to_string(),
    ];
    args.extend(requirements.iter().cloned());
    args
}

fn invoke(
    options: &BenchOptions,
    index_url: &str,
    stage: &str,
    n: usize,
    cancel: &CancelToken,
) -> Result<Duration> {
    let log = options
        .log_dir
        .join(format!("{}-{stage}-{n}.log", options.label));
    let console = options
        .log_dir
        .join(format!("{}-{stage}-{n}.out", options.label));
    let mut command = Command::new(&options.python);
    command.args(installer_args(index_url, &log, &options.requirements));
    info!(stage, n, "starting installer");
    let started = Instant::now();
    let end = run_supervised(command, &console, options.timeout, cancel, || {})
        .with_context(|| format!("failed to run {}", options.python.display()))?;
    let elapsed = started.elapsed();
    if let Err(err) = fs::remove_file(&console) {
        debug!(path = %console.display(), %err, "failed to remove installer console log");
    }
    match end {
        ProcessEnd::Exited { status, .. } if status.success() => {
            info!(stage, n, seconds = elapsed.as_secs_f64(), "installer finished");
            Ok(elapsed)
        }
        ProcessEnd::Exited { status, log_tail } => bail!(
            "installer {stage} {n} exited with {status}; see {}\n{log_tail}",
            log.display()
        ),
        ProcessEnd::TimedOut => bail!(
            "installer {stage} {n} timed out after {}s; see {}",
            options.timeout.as_secs(),
            log.display()
        ),
        ProcessEnd::Cancelled => bail!("benchmark cancelled during {stage} {n}"),
    }
}
