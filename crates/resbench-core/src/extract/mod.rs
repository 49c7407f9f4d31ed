//! Turns distribution files into dependency metadata.
//!
//! Wheels are read in-process. Source distributions are handed to an
//! [`SdistBuilder`], and only when the project is on the allow-list; the gate
//! sits in front of the cache lookup so a skipped sdist never touches the
//! network or a build backend.

use std::collections::BTreeSet;
use std::path::Path;

use resbench_domain::{FetchOutcome, SourceKind};
use tracing::{debug, info, warn};

mod metadata;
pub(crate) mod process;
mod sdist;
mod wheel;

pub use metadata::{DistMetadata, MetadataError};
pub use sdist::{select_builder, BuildError, SdistBuilder};
pub use wheel::read_wheel_metadata;

use crate::cache::{CacheError, CacheKey, CacheValue, MetadataCache, RecordedFailure};
use crate::cancel::CancelToken;
use crate::index::{DistributionFile, IndexError, PackageIndex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Resolved {
        kind: SourceKind,
        metadata: DistMetadata,
    },
    Failed {
        outcome: FetchOutcome,
        reason: String,
        /// Whether the failure is a property of the file and may be cached.
        durable: bool,
    },
}

impl Extraction {
    fn failed(outcome: FetchOutcome, reason: impl Into<String>, durable: bool) -> Self {
        Extraction::Failed {
            outcome,
            reason: reason.into(),
            durable,
        }
    }

    fn cache_value(&self) -> Option<CacheValue> {
        match self {
            Extraction::Resolved { metadata, .. } => Some(CacheValue::Metadata(metadata.clone())),
            Extraction::Failed {
                outcome,
                reason,
                durable: true,
            } => Some(CacheValue::Failure(RecordedFailure {
                outcome: *outcome,
                reason: reason.clone(),
            })),
            Extraction::Failed { durable: false, .. } => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("[RB312] extraction cancelled")]
    Cancelled,
}

impl ExtractError {
    pub fn code(&self) -> &'static str {
        match self {
            ExtractError::Cache(err) => err.code(),
            ExtractError::Cancelled => "RB312",
        }
    }
}

/// Everything one traversal needs to obtain metadata. Borrowed, never global:
/// two traversals with different stores do not see each other.
pub struct MetadataExtractor<'a> {
    cache: &'a MetadataCache,
    index: &'a dyn PackageIndex,
    builder: &'a dyn SdistBuilder,
    allowed: &'a BTreeSet<String>,
    cancel: &'a CancelToken,
}

impl<'a> MetadataExtractor<'a> {
    pub fn new(
        cache: &'a MetadataCache,
        index: &'a dyn PackageIndex,
        builder: &'a dyn SdistBuilder,
        allowed: &'a BTreeSet<String>,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            cache,
            index,
            builder,
            allowed,
            cancel,
        }
    }

    pub fn sdist_allowed(&self, project: &str) -> bool {
        self.allowed.contains(project)
    }

    /// Metadata for `file`, from the cache when possible. Fresh results are
    /// written back before returning; transient failures are not.
    pub fn metadata_for(&self, file: &DistributionFile) -> Result<Extraction, ExtractError> {
        if !file.is_wheel() && !self.sdist_allowed(&file.project) {
            debug!(project = %file.project, filename = %file.filename, "sdist not allow-listed; skipping");
            return Ok(Extraction::failed(
                FetchOutcome::SkippedSdistNotAllowed,
                "sdist not allow-listed",
                false,
            ));
        }
        if self.cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        let key = CacheKey::distribution(file);
        if let Some(value) = self.cache.get(&key)? {
            return match value {
                CacheValue::Metadata(metadata) => Ok(Extraction::Resolved {
                    kind: source_kind(file),
                    metadata,
                }),
                CacheValue::Failure(failure) => Ok(Extraction::Failed {
                    outcome: failure.outcome,
                    reason: failure.reason,
                    durable: true,
                }),
                CacheValue::Listing { .. } => Err(CacheError::Corrupt {
                    path: self.cache.root().to_path_buf(),
                    reason: format!("entry {key} holds a listing, expected metadata"),
                }
                .into()),
            };
        }

        let local = match self.index.download(file) {
            Ok(path) => path,
            Err(err) => return Ok(download_failure(file, &err)),
        };
        let extraction = self.extract(file, &local)?;
        if let Some(value) = extraction.cache_value() {
            self.cache.put(&key, &value)?;
        }
        Ok(extraction)
    }

    /// Derives metadata from an already downloaded file, bypassing the cache.
    pub fn extract(
        &self,
        file: &DistributionFile,
        local_path: &Path,
    ) -> Result<Extraction, ExtractError> {
        if file.is_wheel() {
            return Ok(match read_wheel_metadata(local_path, &file.project) {
                Ok(metadata) => Extraction::Resolved {
                    kind: SourceKind::Wheel,
                    metadata,
                },
                Err(err) => {
                    warn!(filename = %file.filename, code = err.code(), %err, "wheel metadata unusable");
                    Extraction::failed(FetchOutcome::InvalidMetadata, err.to_string(), true)
                }
            });
        }

        if !self.sdist_allowed(&file.project) {
            return Ok(Extraction::failed(
                FetchOutcome::SkippedSdistNotAllowed,
                "sdist not allow-listed",
                false,
            ));
        }
        info!(project = %file.project, filename = %file.filename, "building sdist metadata");
        match self.builder.build(local_path, self.cancel) {
            Ok(metadata) => Ok(Extraction::Resolved {
                kind: SourceKind::Sdist,
                metadata,
            }),
            Err(BuildError::Cancelled) => Err(ExtractError::Cancelled),
            Err(err) => {
                warn!(filename = %file.filename, code = err.code(), %err, "sdist build failed");
                let durable = err.is_cacheable();
                Ok(Extraction::failed(FetchOutcome::BuildFailed, err.to_string(), durable))
            }
        }
    }
}

fn source_kind(file: &DistributionFile) -> SourceKind {
    if file.is_wheel() {
        SourceKind::Wheel
    } else {
        SourceKind::Sdist
    }
}

fn download_failure(file: &DistributionFile, err: &IndexError) -> Extraction {
    warn!(filename = %file.filename, code = err.code(), %err, "download failed");
    Extraction::failed(FetchOutcome::FetchFailed, err.to_string(), false)
}
