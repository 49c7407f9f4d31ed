//! Durable, append-only metadata store.
//!
//! Entries live at `metadata-v1/<shard>/<sha256(key)>.json` and are never
//! rewritten: a second `put` with an equal value is a no-op, a different value
//! is an integrity error.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs4::FileExt;
use resbench_domain::FetchOutcome;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

mod keys;

pub use keys::CacheKey;

use crate::extract::DistMetadata;
use crate::index::DistributionFile;

const ENTRIES_DIR: &str = "metadata-v1";
const LOCKS_DIR: &str = "locks";
const TMP_DIR: &str = "tmp";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CacheValue {
    Metadata(DistMetadata),
    Failure(RecordedFailure),
    Listing { files: Vec<DistributionFile> },
}

/// An outcome worth remembering: retrying the same input would fail the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedFailure {
    pub outcome: FetchOutcome,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    value: CacheValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    AlreadyPresent,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("[RB101] cache i/o failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("[RB102] corrupt cache entry {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("[RB103] cache entry {key} already holds a different value ({path}); refusing to overwrite")]
    Conflict { key: String, path: PathBuf },
    #[error("[RB104] failed to encode cache entry {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::Io { .. } => "RB101",
            CacheError::Corrupt { .. } => "RB102",
            CacheError::Conflict { .. } => "RB103",
            CacheError::Encode { .. } => "RB104",
        }
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Handle to one cache root. Cheap to clone; every traversal gets its own.
#[derive(Debug, Clone)]
pub struct MetadataCache {
    root: PathBuf,
}

impl MetadataCache {
    pub fn open(root: &Path) -> Result<Self, CacheError> {
        for dir in [ENTRIES_DIR, LOCKS_DIR, TMP_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|err| CacheError::io(&path, err))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, key: &CacheKey) -> Result<Option<CacheValue>, CacheError> {
        let path = self.entry_path(key);
        let Some(entry) = read_entry(&path)? else {
            debug!(%key, "cache miss");
            return Ok(None);
        };
        if entry.key != key.as_str() {
            warn!(%key, path = %path.display(), "cache entry belongs to another key; ignoring");
            return Ok(None);
        }
        debug!(%key, "cache hit");
        Ok(Some(entry.value))
    }

    pub fn put(&self, key: &CacheKey, value: &CacheValue) -> Result<PutOutcome, CacheError> {
        let path = self.entry_path(key);
        let _lock = self.acquire_lock(key)?;
        if let Some(existing) = read_entry(&path)? {
            if existing.key == key.as_str() && &existing.value == value {
                debug!(%key, "cache entry already present");
                return Ok(PutOutcome::AlreadyPresent);
            }
            return Err(CacheError::Conflict {
                key: key.to_string(),
                path,
            });
        }

        let entry = StoredEntry {
            key: key.as_str().to_string(),
            value: value.clone(),
        };
        let encoded = serde_json::to_vec_pretty(&entry).map_err(|source| CacheError::Encode {
            key: key.to_string(),
            source,
        })?;
        let tmp_dir = self.root.join(TMP_DIR);
        let mut tmp = NamedTempFile::new_in(&tmp_dir).map_err(|err| CacheError::io(&tmp_dir, err))?;
        tmp.write_all(&encoded)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|err| CacheError::io(tmp.path(), err))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| CacheError::io(parent, err))?;
        }
        tmp.persist(&path)
            .map_err(|err| CacheError::io(&path, err.error))?;
        debug!(%key, path = %path.display(), "cache entry stored");
        Ok(PutOutcome::Stored)
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        let digest = key.digest();
        let shard = digest.get(0..2).unwrap_or("xx");
        self.root
            .join(ENTRIES_DIR)
            .join(shard)
            .join(format!("{digest}.json"))
    }

    fn acquire_lock(&self, key: &CacheKey) -> Result<File, CacheError> {
        let path = self
            .root
            .join(LOCKS_DIR)
            .join(format!("{}.lock", key.digest()));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|err| CacheError::io(&path, err))?;
        file.lock_exclusive()
            .map_err(|err| CacheError::io(&path, err))?;
        Ok(file)
    }
}

fn read_entry(path: &Path) -> Result<Option<StoredEntry>, CacheError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(CacheError::io(path, err)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| CacheError::Corrupt {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
}
