use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dirs_next::home_dir;
use serde::{Deserialize, Serialize};

pub const DEFAULT_INDEX_URL: &str = "https://pypi.org/simple/";
pub const DEFAULT_BUILD_IMAGE: &str = "docker.io/library/python:3.12-slim";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalOptions {
    pub quiet: bool,
    pub verbose: u8,
    pub trace: bool,
    pub json: bool,
}

#[derive(Debug, Clone)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }

    fn parse_u64(&self, key: &str) -> Result<Option<u64>> {
        self.var(key)
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("{key} must be a non-negative integer, got `{raw}`"))
            })
            .transpose()
    }
}

#[derive(Debug, Clone)]
pub struct CacheLocation {
    pub path: PathBuf,
    pub source: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdistIsolation {
    Container,
    Process,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) cache: CacheLocation,
    pub(crate) network: NetworkConfig,
    pub(crate) traversal: TraversalConfig,
    pub(crate) build: BuildConfig,
}

impl Config {
    /// Builds a configuration snapshot from the current process environment.
    ///
    /// # Errors
    /// Returns an error if a variable is malformed or the cache path cannot be resolved.
    pub fn from_env() -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let retries = snapshot.parse_u64("RESBENCH_HTTP_RETRIES")?.unwrap_or(3);
        if retries == 0 {
            bail!("RESBENCH_HTTP_RETRIES must be at least 1");
        }
        let jobs = snapshot.parse_u64("RESBENCH_JOBS")?.unwrap_or(8);
        if jobs == 0 {
            bail!("RESBENCH_JOBS must be at least 1");
        }
        let isolation = match snapshot.var("RESBENCH_SDIST_ISOLATION") {
            None | Some("container") => SdistIsolation::Container,
            Some("process") => SdistIsolation::Process,
            Some(other) => {
                bail!("RESBENCH_SDIST_ISOLATION must be `container` or `process`, got `{other}`")
            }
        };
        let keep_proxies = keep_proxies(snapshot);
        Ok(Self {
            cache: resolve_cache_location(snapshot)?,
            network: NetworkConfig {
                index_url: snapshot
                    .var("RESBENCH_INDEX_URL")
                    .unwrap_or(DEFAULT_INDEX_URL)
                    .to_string(),
                retries: u32::try_from(retries).unwrap_or(u32::MAX),
                timeout: Duration::from_secs(
                    snapshot.parse_u64("RESBENCH_HTTP_TIMEOUT")?.unwrap_or(60),
                ),
                keep_proxies,
                proxy_env: if keep_proxies {
                    proxy_vars(snapshot)
                } else {
                    Vec::new()
                },
                index_epoch: snapshot
                    .var("RESBENCH_INDEX_EPOCH")
                    .unwrap_or("0")
                    .to_string(),
            },
            traversal: TraversalConfig {
                jobs: usize::try_from(jobs).unwrap_or(usize::MAX),
                time_budget: snapshot
                    .parse_u64("RESBENCH_TIME_BUDGET")?
                    .map(Duration::from_secs),
            },
            build: BuildConfig {
                isolation,
                timeout: Duration::from_secs(
                    snapshot.parse_u64("RESBENCH_BUILD_TIMEOUT")?.unwrap_or(600),
                ),
                python: snapshot.var("RESBENCH_PYTHON").map(PathBuf::from),
                sandbox_backend: snapshot.var("RESBENCH_SANDBOX_BACKEND").map(str::to_string),
                image: snapshot
                    .var("RESBENCH_BUILD_IMAGE")
                    .unwrap_or(DEFAULT_BUILD_IMAGE)
                    .to_string(),
            },
        })
    }

    #[must_use]
    pub fn cache(&self) -> &CacheLocation {
        &self.cache
    }

    #[must_use]
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    #[must_use]
    pub fn traversal(&self) -> &TraversalConfig {
        &self.traversal
    }

    #[must_use]
    pub fn build(&self) -> &BuildConfig {
        &self.build
    }

    pub fn set_cache_path(&mut self, path: PathBuf) {
        self.cache = CacheLocation {
            path,
            source: "--cache-dir",
        };
    }

    pub fn set_jobs(&mut self, jobs: usize) {
        self.traversal.jobs = jobs.max(1);
    }

    pub fn set_time_budget(&mut self, budget: Option<Duration>) {
        self.traversal.time_budget = budget;
    }
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub index_url: String,
    pub retries: u32,
    pub timeout: Duration,
    pub keep_proxies: bool,
    /// Proxy variables forwarded to build subprocesses.
    pub proxy_env: Vec<(String, String)>,
    pub index_epoch: String,
}

#[derive(Debug, Clone, Copy)]
pub struct TraversalConfig {
    pub jobs: usize,
    pub time_budget: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub isolation: SdistIsolation,
    pub timeout: Duration,
    pub python: Option<PathBuf>,
    pub sandbox_backend: Option<String>,
    pub image: String,
}

fn resolve_cache_location(snapshot: &EnvSnapshot) -> Result<CacheLocation> {
    if let Some(override_path) = snapshot.var("RESBENCH_CACHE_DIR") {
        let path = absolutize(PathBuf::from(override_path))?;
        return Ok(CacheLocation {
            path,
            source: "RESBENCH_CACHE_DIR",
        });
    }
    if let Some(xdg) = snapshot.var("XDG_CACHE_HOME") {
        return Ok(CacheLocation {
            path: absolutize(PathBuf::from(xdg))?.join("resbench"),
            source: "XDG_CACHE_HOME",
        });
    }
    if let Some(home) = home_dir() {
        return Ok(CacheLocation {
            path: home.join(".cache").join("resbench"),
            source: "HOME/.cache",
        });
    }
    Ok(CacheLocation {
        path: PathBuf::from("/tmp/resbench-cache"),
        source: "default (/tmp/resbench-cache)",
    })
}

fn absolutize(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(env::current_dir()
            .context("failed to resolve relative cache path")?
            .join(path))
    }
}

const PROXY_KEYS: &[&str] = &[
    "HTTP_PROXY",
    "http_proxy",
    "HTTPS_PROXY",
    "https_proxy",
    "ALL_PROXY",
    "all_proxy",
    "NO_PROXY",
    "no_proxy",
];

/// Decide whether proxy environment variables are honored.
///
/// - `RESBENCH_KEEP_PROXIES=1/true/yes/on` forces proxies on.
/// - `RESBENCH_KEEP_PROXIES=0/false/no/off/""` forces proxies off.
/// - If unset, proxies are enabled only when at least one proxy variable is set.
fn keep_proxies(snapshot: &EnvSnapshot) -> bool {
    if snapshot.contains("RESBENCH_KEEP_PROXIES") {
        let value = snapshot
            .var("RESBENCH_KEEP_PROXIES")
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        return !matches!(value.as_str(), "" | "0" | "false" | "no" | "off");
    }
    PROXY_KEYS.iter().any(|key| snapshot.var(key).is_some())
}

fn proxy_vars(snapshot: &EnvSnapshot) -> Vec<(String, String)> {
    PROXY_KEYS
        .iter()
        .filter_map(|key| snapshot.var(key).map(|v| ((*key).to_string(), v.to_string())))
        .collect()
}
