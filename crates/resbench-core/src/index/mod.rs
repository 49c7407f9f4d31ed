use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

mod filename;
mod simple;

pub use filename::{parse_filename, ParsedFilename};
pub use simple::SimpleIndexClient;

/// Access to a package index. Implementations must be shareable across the
/// traversal worker pool.
pub trait PackageIndex: Send + Sync {
    /// Base URL identifying this index in cache keys.
    fn index_url(&self) -> &str;

    /// Files published for `project`. An unknown project is an empty listing.
    fn list_files(&self, project: &str) -> Result<Vec<DistributionFile>, IndexError>;

    /// Local path of `file`, fetching it on first use.
    fn download(&self, file: &DistributionFile) -> Result<PathBuf, IndexError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionFile {
    pub project: String,
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
    /// Canonical PEP 440 form, inferred from the filename.
    pub version: String,
    pub kind: DistributionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_python: Option<String>,
    #[serde(default)]
    pub yanked: bool,
}

impl DistributionFile {
    pub fn sha256(&self) -> Option<&str> {
        self.hashes.get("sha256").map(String::as_str)
    }

    /// Content identity: the declared sha256, else the URL.
    pub fn identity(&self) -> &str {
        self.sha256().unwrap_or(&self.url)
    }

    pub fn is_wheel(&self) -> bool {
        matches!(self.kind, DistributionKind::Wheel { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionKind {
    /// Expanded `python-abi-platform` tag triples.
    Wheel { tags: Vec<String> },
    Sdist,
}

impl DistributionKind {
    pub fn label(&self) -> &'static str {
        match self {
            DistributionKind::Wheel { .. } => "wheel",
            DistributionKind::Sdist => "sdist",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("[RB201] request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("[RB202] {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("[RB203] unreadable index response from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("[RB204] sha256 mismatch for {filename} (expected {expected}, got {actual})")]
    HashMismatch {
        filename: String,
        expected: String,
        actual: String,
    },
    #[error("[RB205] failed to store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("[RB206] invalid index configuration: {0}")]
    Config(String),
}

impl IndexError {
    pub fn code(&self) -> &'static str {
        match self {
            IndexError::Transport { .. } => "RB201",
            IndexError::Status { .. } => "RB202",
            IndexError::Decode { .. } => "RB203",
            IndexError::HashMismatch { .. } => "RB204",
            IndexError::Io { .. } => "RB205",
            IndexError::Config(_) => "RB206",
        }
    }

    /// Connection failures, timeouts, throttling, server errors and truncated
    /// transfers are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            IndexError::Transport { .. } | IndexError::HashMismatch { .. } => true,
            IndexError::Status { status, .. } => *status == 429 || *status >= 500,
            IndexError::Decode { .. } | IndexError::Io { .. } | IndexError::Config(_) => false,
        }
    }
}
