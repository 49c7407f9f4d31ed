use std::collections::BTreeMap;
use std::str::FromStr;

use pep440_rs::Version;
use pep508_rs::Requirement as PepRequirement;

use super::{FetchOutcome, Scenario, ScenarioError, SourceKind, VersionRecord};
use crate::names::is_normalized_name;

impl Scenario {
    pub fn validate(&self) -> Result<(), ScenarioError> {
        for (idx, requirement) in self.root_requirements.iter().enumerate() {
            PepRequirement::from_str(requirement).map_err(|err| {
                ScenarioError::invalid(format!("root_requirements[{idx}]"), err.to_string())
            })?;
        }
        for name in &self.allowed_sdist_packages {
            if !is_normalized_name(name) {
                return Err(ScenarioError::invalid(
                    "allowed_sdist_packages",
                    format!("`{name}` is not a normalized package name"),
                ));
            }
        }
        if self.platform_info.tags.is_empty() {
            return Err(ScenarioError::invalid(
                "platform_info.tags",
                "at least one compatibility tag is required",
            ));
        }
        self.platform_info
            .markers
            .to_marker_environment()
            .map_err(|err| ScenarioError::invalid("platform_info.markers", err.to_string()))?;

        for (name, package) in &self.packages {
            if !is_normalized_name(name) {
                return Err(ScenarioError::invalid(
                    format!("packages.{name}"),
                    "package keys must be normalized names",
                ));
            }
            let mut seen: Vec<Version> = Vec::with_capacity(package.versions.len());
            for (version, record) in &package.versions {
                let location = format!("packages.{name}.versions.{version}");
                let parsed = Version::from_str(version).map_err(|err| {
                    ScenarioError::invalid(location.clone(), format!("invalid version: {err}"))
                })?;
                if seen.contains(&parsed) {
                    return Err(ScenarioError::invalid(
                        location,
                        "duplicate version after canonicalization",
                    ));
                }
                seen.push(parsed);
                validate_record(&location, record)?;
            }
        }
        Ok(())
    }

    /// Non-fatal findings worth surfacing after a traversal.
    pub fn issues(&self) -> ScenarioIssues {
        let mut issues = ScenarioIssues::default();
        for (name, package) in &self.packages {
            if package.is_empty() {
                issues.empty_packages.push(name.clone());
            }
            for record in package.versions.values() {
                if record.fetch_outcome != FetchOutcome::Ok {
                    *issues.outcome_counts.entry(record.fetch_outcome).or_default() += 1;
                }
            }
        }
        issues
    }
}

fn validate_record(location: &str, record: &VersionRecord) -> Result<(), ScenarioError> {
    let available = record.fetch_outcome == FetchOutcome::Ok;
    let has_source = record.source_kind != SourceKind::Unavailable;
    if available != has_source {
        return Err(ScenarioError::invalid(
            location,
            format!(
                "source_kind `{}` does not match fetch_outcome `{}`",
                record.source_kind, record.fetch_outcome
            ),
        ));
    }
    if !has_source && (!record.dependencies.is_empty() || !record.extras.is_empty()) {
        return Err(ScenarioError::invalid(
            location,
            "unavailable versions cannot carry dependencies",
        ));
    }
    let extras = record
        .extras
        .iter()
        .flat_map(|(extra, deps)| deps.iter().map(move |dep| (Some(extra), dep)));
    for (extra, dependency) in record.dependencies.iter().map(|d| (None, d)).chain(extras) {
        let requirement = PepRequirement::from_str(dependency).map_err(|err| {
            ScenarioError::invalid(location, format!("dependency `{dependency}`: {err}"))
        })?;
        if requirement.marker.is_some() {
            let scope = extra.map_or_else(String::new, |e| format!(" (extra `{e}`)"));
            return Err(ScenarioError::invalid(
                location,
                format!("dependency `{dependency}`{scope} still carries a marker"),
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioIssues {
    pub empty_packages: Vec<String>,
    pub outcome_counts: BTreeMap<FetchOutcome, usize>,
}

impl ScenarioIssues {
    pub fn is_empty(&self) -> bool {
        self.empty_packages.is_empty() && self.outcome_counts.is_empty()
    }

    pub fn messages(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if !self.empty_packages.is_empty() {
            messages.push(format!(
                "Found {} packages with no versions: {}",
                self.empty_packages.len(),
                self.empty_packages.join(", ")
            ));
        }
        for (outcome, count) in &self.outcome_counts {
            messages.push(format!("{count} versions recorded as {outcome}"));
        }
        messages
    }
}
