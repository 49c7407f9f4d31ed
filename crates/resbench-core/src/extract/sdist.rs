//! The one place third-party build code runs.
//!
//! Every builder receives a private scratch copy of the archive and reports
//! metadata through `pip install --dry-run --report`, so the build backend
//! never sees the cache directory.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, warn};

use super::metadata::DistMetadata;
use super::process::{run_supervised, ProcessEnd};
use crate::cancel::CancelToken;
use crate::config::{BuildConfig, NetworkConfig, SdistIsolation};
use crate::platform::detect_python;

const REPORT_FILE: &str = "report.json";
const LOG_FILE: &str = "build.log";
const NOBODY: &str = "65534:65534";

static BUILD_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Capability boundary for executing sdist build backends.
pub trait SdistBuilder: Send + Sync {
    fn build(&self, archive: &Path, cancel: &CancelToken) -> Result<DistMetadata, BuildError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("[RB310] sdist build failed: {0}")]
    Failed(String),
    #[error("[RB311] sdist build timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("[RB312] sdist build cancelled")]
    Cancelled,
    #[error("[RB313] sdist builds unavailable: {0}")]
    Unavailable(String),
    #[error("[RB314] sdist build workspace error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    pub fn code(&self) -> &'static str {
        match self {
            BuildError::Failed(_) => "RB310",
            BuildError::TimedOut(_) => "RB311",
            BuildError::Cancelled => "RB312",
            BuildError::Unavailable(_) => "RB313",
            BuildError::Io(_) => "RB314",
        }
    }

    /// Only a build that ran and failed says something about the archive itself.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, BuildError::Failed(_))
    }
}

/// Picks the builder for the configured isolation mode. A missing backend is
/// reported per build, so runs that never build an sdist still succeed.
pub fn select_builder(build: &BuildConfig, network: &NetworkConfig) -> Box<dyn SdistBuilder> {
    let common = BuildSettings {
        index_url: network.index_url.clone(),
        timeout: build.timeout,
        proxy_env: network.proxy_env.clone(),
    };
    match build.isolation {
        SdistIsolation::Container => {
            match detect_container_backend(build.sandbox_backend.as_deref()) {
                Ok(program) => Box::new(ContainerSdistBuilder {
                    program,
                    image: build.image.clone(),
                    settings: common,
                }),
                Err(reason) => Box::new(UnavailableBuilder { reason }),
            }
        }
        SdistIsolation::Process => match detect_python(build.python.as_deref()) {
            Some(python) => Box::new(ProcessSdistBuilder {
                python,
                settings: common,
            }),
            None => Box::new(UnavailableBuilder {
                reason: "no python interpreter found for process isolation".into(),
            }),
        },
    }
}

#[derive(Debug, Clone)]
struct BuildSettings {
    index_url: String,
    timeout: Duration,
    proxy_env: Vec<(String, String)>,
}

struct Workspace {
    dir: TempDir,
    archive_name: String,
}

impl Workspace {
    fn prepare(archive: &Path) -> Result<Self, BuildError> {
        let archive_name = archive
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| BuildError::Failed(format!("{} has no file name", archive.display())))?;
        let dir = tempfile::Builder::new().prefix("resbench-build-").tempdir()?;
        for sub in ["src", "home", "tmp"] {
            fs::create_dir_all(dir.path().join(sub))?;
        }
        fs::copy(archive, dir.path().join("src").join(&archive_name))?;
        Ok(Self { dir, archive_name })
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn report(&self) -> PathBuf {
        self.root().join(REPORT_FILE)
    }

    fn log(&self) -> PathBuf {
        self.root().join(LOG_FILE)
    }

    #[cfg(unix)]
    fn open_to_unprivileged(&self) -> Result<(), BuildError> {
        use std::os::unix::fs::PermissionsExt;
        for sub in ["", "src", "home", "tmp"] {
            fs::set_permissions(self.root().join(sub), fs::Permissions::from_mode(0o777))?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn open_to_unprivileged(&self) -> Result<(), BuildError> {
        Ok(())
    }
}

fn pip_report_args(index_url: &str, report: &str, archive: &str) -> Vec<String> {
    [
        "-m",
        "pip",
        "install",
        "--dry-run",
        "--ignore-installed",
        "--no-deps",
        "--quiet",
        "--index-url",
        index_url,
        "--report",
        report,
        archive,
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

fn base_env(settings: &BuildSettings, home: &str, tmp: &str) -> Vec<(String, String)> {
    let mut env = vec![
        ("HOME".to_string(), home.to_string()),
        ("TMPDIR".to_string(), tmp.to_string()),
        ("PIP_DISABLE_PIP_VERSION_CHECK".to_string(), "1".to_string()),
        ("PIP_NO_INPUT".to_string(), "1".to_string()),
        ("PIP_NO_CACHE_DIR".to_string(), "1".to_string()),
        ("PYTHONNOUSERSITE".to_string(), "1".to_string()),
        ("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()),
    ];
    env.extend(settings.proxy_env.iter().cloned());
    env
}

fn interpret(end: ProcessEnd, workspace: &Workspace, timeout: Duration) -> Result<DistMetadata, BuildError> {
    match end {
        ProcessEnd::Exited { status, .. } if status.success() => {
            let report = fs::read(workspace.report())
                .map_err(|err| BuildError::Failed(format!("build produced no report: {err}")))?;
            DistMetadata::from_pip_report(&report).map_err(|err| BuildError::Failed(err.to_string()))
        }
        ProcessEnd::Exited { status, log_tail } => Err(BuildError::Failed(format!(
            "build backend exited with {status}: {log_tail}"
        ))),
        ProcessEnd::TimedOut => Err(BuildError::TimedOut(timeout)),
        ProcessEnd::Cancelled => Err(BuildError::Cancelled),
    }
}

/// Runs pip as a local subprocess with a scrubbed environment. Weaker than a
/// container; only used when the operator selects `process` isolation.
pub struct ProcessSdistBuilder {
    python: PathBuf,
    settings: BuildSettings,
}

impl SdistBuilder for ProcessSdistBuilder {
    fn build(&self, archive: &Path, cancel: &CancelToken) -> Result<DistMetadata, BuildError> {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        let workspace = Workspace::prepare(archive)?;
        let root = workspace.root();
        let mut command = Command::new(&self.python);
        command.env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }
        let home = root.join("home").to_string_lossy().into_owned();
        let tmp = root.join("tmp").to_string_lossy().into_owned();
        command.envs(base_env(&self.settings, &home, &tmp));
        command.args(pip_report_args(
            &self.settings.index_url,
            &workspace.report().to_string_lossy(),
            &root.join("src").join(&workspace.archive_name).to_string_lossy(),
        ));
        command.current_dir(root);
        debug!(archive = %workspace.archive_name, python = %self.python.display(), "building sdist metadata in subprocess");
        let end = run_supervised(command, &workspace.log(), self.settings.timeout, cancel, || {})?;
        interpret(end, &workspace, self.settings.timeout)
    }
}

/// Runs pip inside a throwaway podman/docker container: no capabilities,
/// read-only root, unprivileged user, only the scratch directory mounted.
pub struct ContainerSdistBuilder {
    program: PathBuf,
    image: String,
    settings: BuildSettings,
}

impl ContainerSdistBuilder {
    fn container_args(&self, name: &str, workspace: &Path, archive_name: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--cap-drop".to_string(),
            "ALL".to_string(),
            "--security-opt".to_string(),
            "no-new-privileges".to_string(),
            "--read-only".to_string(),
            "--tmpfs".to_string(),
            "/tmp".to_string(),
            "--user".to_string(),
            NOBODY.to_string(),
            "--volume".to_string(),
            format!("{}:/work", workspace.display()),
            "--workdir".to_string(),
            "/work".to_string(),
        ];
        for (key, value) in base_env(&self.settings, "/work/home", "/work/tmp") {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(self.image.clone());
        args.push("python".to_string());
        args.extend(pip_report_args(
            &self.settings.index_url,
            "/work/report.json",
            &format!("/work/src/{archive_name}"),
        ));
        args
    }
}

impl SdistBuilder for ContainerSdistBuilder {
    fn build(&self, archive: &Path, cancel: &CancelToken) -> Result<DistMetadata, BuildError> {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        let workspace = Workspace::prepare(archive)?;
        workspace.open_to_unprivileged()?;
        let name = format!(
            "resbench-build-{}-{}",
            std::process::id(),
            BUILD_COUNTER.fetch_add(1, Ordering::SeqCst)
        );
        let mut command = Command::new(&self.program);
        command.args(self.container_args(&name, workspace.root(), &workspace.archive_name));
        debug!(archive = %workspace.archive_name, container = %name, "building sdist metadata in container");
        let program = self.program.clone();
        let kill_container = || {
            let status = Command::new(&program)
                .args([OsString::from("kill"), OsString::from(&name)])
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status();
            if let Err(err) = status {
                warn!(container = %name, %err, "failed to kill build container");
            }
        };
        let end = run_supervised(
            command,
            &workspace.log(),
            self.settings.timeout,
            cancel,
            kill_container,
        )?;
        interpret(end, &workspace, self.settings.timeout)
    }
}

struct UnavailableBuilder {
    reason: String,
}

impl SdistBuilder for UnavailableBuilder {
    fn build(&self, _archive: &Path, _cancel: &CancelToken) -> Result<DistMetadata, BuildError> {
        Err(BuildError::Unavailable(self.reason.clone()))
    }
}

fn detect_container_backend(configured: Option<&str>) -> Result<PathBuf, String> {
    if let Some(raw) = configured {
        return resolve_program(raw.trim())
            .ok_or_else(|| format!("container backend `{raw}` not found"));
    }
    ["podman", "docker"]
        .into_iter()
        .find_map(resolve_program)
        .ok_or_else(|| {
            "no container backend found; install podman or docker, set RESBENCH_SANDBOX_BACKEND, \
             or opt into RESBENCH_SDIST_ISOLATION=process"
                .to_string()
        })
}

fn resolve_program(name: &str) -> Option<PathBuf> {
    let candidate = if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
        PathBuf::from(name)
    } else {
        which::which(name).ok()?
    };
    candidate.exists().then_some(candidate)
}
