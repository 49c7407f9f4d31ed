use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use url::Url;

use super::{
    parse_filename, DistributionFile, DistributionKind, IndexError, PackageIndex, ParsedFilename,
};
use crate::config::NetworkConfig;

const USER_AGENT: &str = concat!("resbench/", env!("CARGO_PKG_VERSION"));
const SIMPLE_JSON: &str = "application/vnd.pypi.simple.v1+json";
const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);

/// Blocking client for the JSON simple API (PEP 691), with downloads kept
/// under `<cache>/artifacts`.
#[derive(Debug, Clone)]
pub struct SimpleIndexClient {
    client: Client,
    base: Url,
    index_url: String,
    artifacts: PathBuf,
    attempts: u32,
    backoff: Duration,
}

impl SimpleIndexClient {
    pub fn new(cache_root: &Path, network: &NetworkConfig) -> Result<Self, IndexError> {
        let mut raw = network.index_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base = Url::parse(&raw)
            .map_err(|err| IndexError::Config(format!("`{}`: {err}", network.index_url)))?;
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(network.timeout);
        if !network.keep_proxies {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|err| IndexError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            index_url: base.to_string(),
            base,
            artifacts: cache_root.join("artifacts"),
            attempts: network.retries.max(1),
            backoff: DEFAULT_BACKOFF,
        })
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn with_retries<T>(
        &self,
        url: &str,
        mut op: impl FnMut() -> Result<T, IndexError>,
    ) -> Result<T, IndexError> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.attempts => {
                    let delay = self.backoff.saturating_mul(1u32 << (attempt - 1).min(16));
                    warn!(
                        %url,
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis(),
                        "retrying index request"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn get(&self, url: &Url, accept: Option<&str>) -> Result<Response, IndexError> {
        let mut request = self.client.get(url.clone());
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        request.send().map_err(|source| IndexError::Transport {
            url: url.to_string(),
            source,
        })
    }

    fn fetch_listing(&self, project: &str, url: &Url) -> Result<Vec<DistributionFile>, IndexError> {
        let response = self.get(url, Some(SIMPLE_JSON))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(%project, "project not found on index");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(IndexError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if content_type.starts_with("text/html") {
            return Err(IndexError::Decode {
                url: url.to_string(),
                reason: "index does not serve the JSON simple API".into(),
            });
        }
        let page: SimpleProject = response.json().map_err(|err| IndexError::Decode {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        Ok(collect_files(project, url, page))
    }

    fn artifact_path(&self, file: &DistributionFile) -> PathBuf {
        self.artifacts.join(&file.project).join(&file.filename)
    }

    fn download_once(&self, file: &DistributionFile, dest: &Path) -> Result<(), IndexError> {
        let url = Url::parse(&file.url).map_err(|err| IndexError::Decode {
            url: file.url.clone(),
            reason: err.to_string(),
        })?;
        let mut response = self.get(&url, None)?;
        let status = response.status();
        if !status.is_success() {
            return Err(IndexError::Status {
                url: file.url.clone(),
                status: status.as_u16(),
            });
        }
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        let io_err = |source| IndexError::Io {
            path: dest.to_path_buf(),
            source,
        };
        fs::create_dir_all(parent).map_err(io_err)?;
        let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let read = response.read(&mut buffer).map_err(io_err)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            tmp.write_all(&buffer[..read]).map_err(io_err)?;
        }
        let actual = hex::encode(hasher.finalize());
        if let Some(expected) = file.sha256() {
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(IndexError::HashMismatch {
                    filename: file.filename.clone(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        tmp.persist(dest).map_err(|err| io_err(err.error))?;
        Ok(())
    }
}

impl PackageIndex for SimpleIndexClient {
    fn index_url(&self) -> &str {
        &self.index_url
    }

    fn list_files(&self, project: &str) -> Result<Vec<DistributionFile>, IndexError> {
        let url = self
            .base
            .join(&format!("{project}/"))
            .map_err(|err| IndexError::Config(format!("project `{project}`: {err}")))?;
        debug!(%project, %url, "listing project files");
        self.with_retries(url.as_str(), || self.fetch_listing(project, &url))
    }

    fn download(&self, file: &DistributionFile) -> Result<PathBuf, IndexError> {
        let dest = self.artifact_path(file);
        if existing_is_valid(&dest, file.sha256()) {
            debug!(filename = %file.filename, "artifact cache hit");
            return Ok(dest);
        }
        debug!(filename = %file.filename, url = %file.url, "downloading artifact");
        self.with_retries(&file.url, || self.download_once(file, &dest))?;
        Ok(dest)
    }
}

#[derive(Debug, Deserialize)]
struct SimpleProject {
    #[serde(default)]
    files: Vec<SimpleFile>,
}

#[derive(Debug, Deserialize)]
struct SimpleFile {
    filename: String,
    url: String,
    #[serde(default)]
    hashes: BTreeMap<String, String>,
    #[serde(default, rename = "requires-python")]
    requires_python: Option<String>,
    #[serde(default)]
    yanked: Option<serde_json::Value>,
}

fn collect_files(project: &str, page_url: &Url, page: SimpleProject) -> Vec<DistributionFile> {
    let mut files = Vec::with_capacity(page.files.len());
    for entry in page.files {
        let Some(parsed) = parse_filename(project, &entry.filename) else {
            debug!(%project, filename = %entry.filename, "skipping unrecognized file");
            continue;
        };
        let url = match page_url.join(&entry.url) {
            Ok(url) => url.to_string(),
            Err(err) => {
                debug!(%project, filename = %entry.filename, %err, "skipping unresolvable url");
                continue;
            }
        };
        let yanked = match entry.yanked {
            Some(serde_json::Value::Bool(flag)) => flag,
            Some(serde_json::Value::String(_)) => true,
            _ => false,
        };
        let (version, kind) = match parsed {
            ParsedFilename::Wheel { version, tags } => (version, DistributionKind::Wheel { tags }),
            ParsedFilename::Sdist { version } => (version, DistributionKind::Sdist),
        };
        files.push(DistributionFile {
            project: project.to_string(),
            filename: entry.filename,
            url,
            hashes: entry.hashes,
            version,
            kind,
            requires_python: entry.requires_python.filter(|value| !value.trim().is_empty()),
            yanked,
        });
    }
    files
}

fn existing_is_valid(path: &Path, expected_sha: Option<&str>) -> bool {
    if !path.exists() {
        return false;
    }
    let Some(expected) = expected_sha else {
        return true;
    };
    match compute_sha256(path) {
        Ok(actual) if actual.eq_ignore_ascii_case(expected) => true,
        _ => {
            // Corrupt or stale artifact; fetch again.
            if let Err(err) = fs::remove_file(path) {
                debug!(path = %path.display(), %err, "failed to remove stale artifact");
            }
            false
        }
    }
}

fn compute_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 32 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
