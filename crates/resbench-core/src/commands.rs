//! Command entry points shared by the CLI: each turns a request into an
//! [`ExecutionOutcome`] whose status picks the exit code.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use pep508_rs::Requirement;
use resbench_domain::{
    load_allow_list, load_scenario, normalize_dist_name, save_scenario, PlatformInfo, Scenario,
    ScenarioError,
};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::bench::{run_benchmark, BenchOptions};
use crate::cache::MetadataCache;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::extract::{select_builder, SdistBuilder};
use crate::index::{PackageIndex, SimpleIndexClient};
use crate::outcome::ExecutionOutcome;
use crate::platform::{detect_python, inspect_platform};
use crate::traverse::{TraverseError, TraverseOptions, Traverser};
use crate::wheelhouse::materialize;

pub const SCENARIOS_DIR: &str = "scenarios";
pub const WHEELHOUSE_DIR: &str = "wheelhouse";
const INSTALLER_TIMEOUT: Duration = Duration::from_secs(3600);

pub struct CommandContext {
    config: Config,
    cancel: CancelToken,
}

impl CommandContext {
    pub fn new(config: Config, cancel: CancelToken) -> Self {
        Self { config, cancel }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub roots: Vec<String>,
    pub sdists_file: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct WheelsRequest {
    pub scenario: PathBuf,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct BenchRequest {
    pub scenario: PathBuf,
    pub wheelhouse: Option<PathBuf>,
    pub warmups: usize,
    pub runs: usize,
}

#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub scenario: PathBuf,
}

/// Explores the roots against the configured index and writes a scenario.
pub fn fetch(ctx: &CommandContext, request: &FetchRequest) -> Result<ExecutionOutcome> {
    let config = ctx.config();
    let Some(python) = detect_python(config.build().python.as_deref()) else {
        return Ok(ExecutionOutcome::user_error(
            "no Python interpreter found to describe the target platform",
            json!({ "hint": "put python3 on PATH or set RESBENCH_PYTHON" }),
        ));
    };
    let platform = match inspect_platform(&python) {
        Ok(platform) => platform,
        Err(err) => {
            return Ok(ExecutionOutcome::failure(
                format!("failed to query {}", python.display()),
                json!({ "reason": format!("{err:#}") }),
            ))
        }
    };
    let cache = match MetadataCache::open(&config.cache().path) {
        Ok(cache) => cache,
        Err(err) => return Ok(cache_failure(&err.to_string(), &config.cache().path)),
    };
    let index = match SimpleIndexClient::new(&config.cache().path, config.network()) {
        Ok(index) => index,
        Err(err) => {
            return Ok(ExecutionOutcome::failure(
                "failed to set up the index client",
                json!({ "reason": err.to_string(), "code": err.code() }),
            ))
        }
    };
    let builder = select_builder(config.build(), config.network());
    run_fetch(
        ctx,
        request,
        &FetchInputs {
            platform,
            cache: &cache,
            index: &index,
            builder: builder.as_ref(),
            generated_at: OffsetDateTime::now_utc(),
        },
    )
}

struct FetchInputs<'a> {
    platform: PlatformInfo,
    cache: &'a MetadataCache,
    index: &'a dyn PackageIndex,
    builder: &'a dyn SdistBuilder,
    generated_at: OffsetDateTime,
}

fn run_fetch(
    ctx: &CommandContext,
    request: &FetchRequest,
    inputs: &FetchInputs<'_>,
) -> Result<ExecutionOutcome> {
    let basename = match scenario_basename(&request.roots) {
        Ok(basename) => basename,
        Err(reason) => {
            return Ok(ExecutionOutcome::user_error(
                "invalid root requirement",
                json!({ "reason": reason }),
            ))
        }
    };
    let allowed_sdists = match load_allow_list(request.sdists_file.as_deref()) {
        Ok(allowed) => allowed,
        Err(err) => {
            return Ok(ExecutionOutcome::user_error(
                "failed to load the sdist allow-list",
                json!({ "reason": format!("{err:#}") }),
            ))
        }
    };
    info!(allowed = allowed_sdists.len(), "sdists allowed");

    let config = ctx.config();
    let traverser = Traverser::new(inputs.cache, inputs.index, inputs.builder, ctx.cancel())
        .with_index_epoch(config.network().index_epoch.clone());
    let options = TraverseOptions {
        roots: request.roots.clone(),
        allowed_sdists,
        platform: inputs.platform.clone(),
        generated_at: inputs.generated_at,
        jobs: config.traversal().jobs,
    };
    let traversal = match traverser.traverse(&options) {
        Ok(traversal) => traversal,
        Err(err) => return Ok(traverse_failure(&err)),
    };

    let output = request
        .output
        .clone()
        .unwrap_or_else(|| next_scenario_path(Path::new(SCENARIOS_DIR), &basename));
    if let Err(err) = traversal.scenario.validate() {
        return Ok(ExecutionOutcome::failure(
            "traversal produced an invalid scenario; nothing was written",
            json!({ "reason": err.to_string(), "code": err.code() }),
        ));
    }
    if let Err(err) = save_scenario(&output, &traversal.scenario) {
        return Ok(ExecutionOutcome::failure(
            "failed to write the scenario",
            json!({ "reason": err.to_string(), "code": err.code() }),
        ));
    }
    info!(path = %output.display(), "scenario written");

    let diagnostics = traversal.scenario.issues().messages();
    for message in &diagnostics {
        warn!("{message}");
    }
    Ok(ExecutionOutcome::success(
        format!("wrote {}", output.display()),
        json!({
            "scenario": output.display().to_string(),
            "packages": traversal.scenario.packages().len(),
            "versions": version_count(&traversal.scenario),
            "unlisted": traversal.unlisted,
            "diagnostics": diagnostics,
        }),
    ))
}

/// Renders the scenario as a local wheel index.
pub fn wheels(request: &WheelsRequest) -> Result<ExecutionOutcome> {
    let scenario = match load_scenario(&request.scenario) {
        Ok(scenario) => scenario,
        Err(err) => return Ok(scenario_error(&err)),
    };
    let output = request
        .output_dir
        .clone()
        .unwrap_or_else(|| default_wheelhouse(&request.scenario));
    match materialize(&scenario, &output) {
        Ok(summary) => Ok(ExecutionOutcome::success(
            format!("wrote {} wheels to {}", summary.wheels, summary.root.display()),
            json!({
                "wheelhouse": summary.root.display().to_string(),
                "projects": summary.projects,
                "wheels": summary.wheels,
            }),
        )),
        Err(err) => Ok(ExecutionOutcome::failure(
            "failed to materialize the wheelhouse",
            json!({ "reason": format!("{err:#}") }),
        )),
    }
}

/// Times the installer resolving the scenario's roots against its wheelhouse.
pub fn bench(ctx: &CommandContext, request: &BenchRequest) -> Result<ExecutionOutcome> {
    if request.runs == 0 {
        return Ok(ExecutionOutcome::user_error(
            "at least one timed run is required",
            json!({ "hint": "pass --runs 1 or more" }),
        ));
    }
    let scenario = match load_scenario(&request.scenario) {
        Ok(scenario) => scenario,
        Err(err) => return Ok(scenario_error(&err)),
    };
    let wheelhouse = request
        .wheelhouse
        .clone()
        .unwrap_or_else(|| default_wheelhouse(&request.scenario));
    if !wheelhouse.is_dir() {
        return Ok(ExecutionOutcome::user_error(
            format!("wheelhouse {} does not exist", wheelhouse.display()),
            json!({
                "hint": format!("run `resbench wheels {}` first", request.scenario.display()),
            }),
        ));
    }
    let Some(python) = detect_python(ctx.config().build().python.as_deref()) else {
        return Ok(ExecutionOutcome::user_error(
            "no Python interpreter found to run the installer",
            json!({ "hint": "put python3 on PATH or set RESBENCH_PYTHON" }),
        ));
    };
    let options = BenchOptions {
        python,
        log_dir: wheelhouse
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
        label: scenario_label(&request.scenario),
        wheelhouse,
        requirements: scenario.root_requirements().to_vec(),
        warmups: request.warmups,
        runs: request.runs,
        timeout: INSTALLER_TIMEOUT,
    };
    match run_benchmark(&options, ctx.cancel()) {
        Ok(report) => Ok(ExecutionOutcome::success(
            format!(
                "mean {:.3}s, stdev {:.3}s over {} runs",
                report.runs.mean,
                report.runs.stdev,
                report.runs.seconds.len()
            ),
            serde_json::to_value(&report)?,
        )),
        Err(err) => Ok(ExecutionOutcome::failure(
            "benchmark aborted",
            json!({ "reason": format!("{err:#}") }),
        )),
    }
}

/// Loads and validates a scenario, reporting its diagnostics.
pub fn check(request: &CheckRequest) -> Result<ExecutionOutcome> {
    let scenario = match load_scenario(&request.scenario) {
        Ok(scenario) => scenario,
        Err(err) => return Ok(scenario_error(&err)),
    };
    let issues = scenario.issues();
    let outcomes = issues
        .outcome_counts
        .iter()
        .map(|(outcome, count)| (outcome.to_string(), *count))
        .collect::<BTreeMap<_, _>>();
    Ok(ExecutionOutcome::success(
        format!("{} is valid", request.scenario.display()),
        json!({
            "packages": scenario.packages().len(),
            "versions": version_count(&scenario),
            "empty_packages": issues.empty_packages,
            "outcomes": outcomes,
            "diagnostics": issues.messages(),
        }),
    ))
}

fn scenario_basename(roots: &[String]) -> Result<String, String> {
    if roots.is_empty() {
        return Err("at least one root requirement is required".to_string());
    }
    roots
        .iter()
        .map(|raw| {
            Requirement::from_str(raw.trim())
                .map(|requirement| normalize_dist_name(&requirement.name.to_string()))
                .map_err(|err| format!("`{raw}`: {err}"))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(|names| names.join("-"))
}

/// First `<dir>/<basename>-<n>.json` that does not exist yet.
fn next_scenario_path(dir: &Path, basename: &str) -> PathBuf {
    (0..)
        .map(|n| dir.join(format!("{basename}-{n}.json")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| dir.join(format!("{basename}.json")))
}

fn scenario_label(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| "scenario".to_string(), |stem| stem.to_string_lossy().into_owned())
}

fn default_wheelhouse(scenario: &Path) -> PathBuf {
    Path::new(WHEELHOUSE_DIR).join(scenario_label(scenario))
}

fn version_count(scenario: &Scenario) -> usize {
    scenario
        .packages()
        .values()
        .map(|package| package.versions.len())
        .sum()
}

fn scenario_error(err: &ScenarioError) -> ExecutionOutcome {
    ExecutionOutcome::user_error(
        "scenario is not usable",
        json!({ "reason": err.to_string(), "code": err.code() }),
    )
}

fn cache_failure(reason: &str, path: &Path) -> ExecutionOutcome {
    ExecutionOutcome::failure(
        format!("failed to open the metadata cache at {}", path.display()),
        json!({ "reason": reason }),
    )
}

fn traverse_failure(err: &TraverseError) -> ExecutionOutcome {
    let details = json!({ "reason": err.to_string(), "code": err.code() });
    match err {
        TraverseError::InvalidRequirement(_) => {
            ExecutionOutcome::user_error("invalid root requirement", details)
        }
        TraverseError::Cancelled => {
            let mut outcome = ExecutionOutcome::failure("traversal cancelled", details);
            if let Value::Object(map) = &mut outcome.details {
                map.insert(
                    "hint".into(),
                    json!("no scenario was written; rerun to resume from the cache"),
                );
            }
            outcome
        }
        _ => ExecutionOutcome::failure("traversal failed", details),
    }
}
