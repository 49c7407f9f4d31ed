use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use indexmap::IndexMap;
use pep440_rs::Version;
use pep508_rs::{MarkerEnvironment, StringVersion};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

mod io;
mod validate;

pub use io::{load_scenario, save_scenario, ScenarioError};
pub use validate::ScenarioIssues;

/// A replayable resolution scenario: every version of every package reachable
/// from `root_requirements`, with dependencies flattened for one platform.
///
/// Every object in the serialized form rejects unknown fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    root_requirements: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    generated_at: OffsetDateTime,
    platform_info: PlatformInfo,
    allowed_sdist_packages: BTreeSet<String>,
    packages: BTreeMap<String, PackageRecord>,
}

impl Scenario {
    pub fn new(
        root_requirements: Vec<String>,
        generated_at: OffsetDateTime,
        platform_info: PlatformInfo,
        allowed_sdist_packages: BTreeSet<String>,
    ) -> Self {
        Self {
            root_requirements,
            generated_at,
            platform_info,
            allowed_sdist_packages,
            packages: BTreeMap::new(),
        }
    }

    pub fn root_requirements(&self) -> &[String] {
        &self.root_requirements
    }

    pub fn generated_at(&self) -> OffsetDateTime {
        self.generated_at
    }

    pub fn platform_info(&self) -> &PlatformInfo {
        &self.platform_info
    }

    pub fn allowed_sdist_packages(&self) -> &BTreeSet<String> {
        &self.allowed_sdist_packages
    }

    pub fn packages(&self) -> &BTreeMap<String, PackageRecord> {
        &self.packages
    }

    pub fn package(&self, name: &str) -> Option<&PackageRecord> {
        self.packages.get(name)
    }

    /// Records the full version set for `name`, replacing any previous record.
    pub fn insert_package(&mut self, name: impl Into<String>, record: PackageRecord) {
        self.packages.insert(name.into(), record);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageRecord {
    pub versions: IndexMap<String, VersionRecord>,
}

impl PackageRecord {
    /// Builds a record with versions in ascending PEP 440 order. Keys that do
    /// not parse sort after every valid version, by string.
    pub fn from_versions(versions: impl IntoIterator<Item = (String, VersionRecord)>) -> Self {
        let mut entries = versions.into_iter().collect::<Vec<_>>();
        entries.sort_by(|(left, _), (right, _)| {
            match (Version::from_str(left), Version::from_str(right)) {
                (Ok(l), Ok(r)) => l.cmp(&r).then_with(|| left.cmp(right)),
                (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                (Err(_), Err(_)) => left.cmp(right),
            }
        });
        Self {
            versions: entries.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn has_available_version(&self) -> bool {
        self.versions
            .values()
            .any(|record| record.fetch_outcome == FetchOutcome::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionRecord {
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_python: Option<String>,
    pub source_kind: SourceKind,
    pub fetch_outcome: FetchOutcome,
}

impl VersionRecord {
    pub fn resolved(source_kind: SourceKind, dependencies: Vec<String>) -> Self {
        Self {
            dependencies,
            extras: BTreeMap::new(),
            requires_python: None,
            source_kind,
            fetch_outcome: FetchOutcome::Ok,
        }
    }

    pub fn unavailable(outcome: FetchOutcome) -> Self {
        Self {
            dependencies: Vec::new(),
            extras: BTreeMap::new(),
            requires_python: None,
            source_kind: SourceKind::Unavailable,
            fetch_outcome: outcome,
        }
    }

    #[must_use]
    pub fn with_extras(mut self, extras: BTreeMap<String, Vec<String>>) -> Self {
        self.extras = extras;
        self
    }

    #[must_use]
    pub fn with_requires_python(mut self, requires_python: Option<String>) -> Self {
        self.requires_python = requires_python;
        self
    }

    pub fn is_available(&self) -> bool {
        self.fetch_outcome == FetchOutcome::Ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Wheel,
    Sdist,
    Unavailable,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Wheel => "wheel",
            SourceKind::Sdist => "sdist",
            SourceKind::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchOutcome {
    Ok,
    NoCompatibleDistribution,
    BuildFailed,
    SkippedSdistNotAllowed,
    /// Retries were exhausted; never cached.
    FetchFailed,
    InvalidMetadata,
}

impl FetchOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchOutcome::Ok => "ok",
            FetchOutcome::NoCompatibleDistribution => "no-compatible-distribution",
            FetchOutcome::BuildFailed => "build-failed",
            FetchOutcome::SkippedSdistNotAllowed => "skipped-sdist-not-allowed",
            FetchOutcome::FetchFailed => "fetch-failed",
            FetchOutcome::InvalidMetadata => "invalid-metadata",
        }
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fingerprint of the interpreter that generated a scenario. Tags are in
/// priority order, most preferred first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformInfo {
    pub markers: MarkerValues,
    pub tags: Vec<String>,
}

impl PlatformInfo {
    /// Priority of `tag` (lower is better), if the platform supports it.
    pub fn tag_priority(&self, tag: &str) -> Option<usize> {
        self.tags.iter().position(|candidate| candidate == tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkerValues {
    pub implementation_name: String,
    pub implementation_version: String,
    pub os_name: String,
    pub platform_machine: String,
    pub platform_python_implementation: String,
    pub platform_release: String,
    pub platform_system: String,
    pub platform_version: String,
    pub python_full_version: String,
    pub python_version: String,
    pub sys_platform: String,
}

impl MarkerValues {
    pub fn to_marker_environment(&self) -> Result<MarkerEnvironment> {
        Ok(MarkerEnvironment {
            implementation_name: self.implementation_name.clone(),
            implementation_version: string_version(
                &self.implementation_version,
                "implementation_version",
            )?,
            os_name: self.os_name.clone(),
            platform_machine: self.platform_machine.clone(),
            platform_python_implementation: self.platform_python_implementation.clone(),
            platform_release: self.platform_release.clone(),
            platform_system: self.platform_system.clone(),
            platform_version: self.platform_version.clone(),
            python_full_version: string_version(&self.python_full_version, "python_full_version")?,
            python_version: string_version(&self.python_version, "python_version")?,
            sys_platform: self.sys_platform.clone(),
        })
    }
}

fn string_version(value: &str, field: &str) -> Result<StringVersion> {
    StringVersion::from_str(value)
        .map_err(|err| anyhow!("`{value}` is not a valid PEP 440 version for `{field}`: {err}"))
}
