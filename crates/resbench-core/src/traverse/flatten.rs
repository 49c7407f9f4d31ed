//! Collapses `Requires-Dist` markers onto the generating platform.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use pep508_rs::{ExtraName, MarkerEnvironment, Requirement};
use resbench_domain::normalize_dist_name;

/// A package the frontier must visit, with the extras it was asked for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Reference {
    pub(crate) name: String,
    pub(crate) extras: BTreeSet<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Flattened {
    pub(crate) dependencies: Vec<String>,
    pub(crate) extras: BTreeMap<String, Vec<String>>,
    pub(crate) base_refs: Vec<Reference>,
    pub(crate) extra_refs: BTreeMap<String, Vec<Reference>>,
}

impl Flattened {
    /// References enabled by requesting `extra` ("" is the base set).
    pub(crate) fn references(&self, extra: &str) -> &[Reference] {
        if extra.is_empty() {
            return &self.base_refs;
        }
        self.extra_refs.get(extra).map_or(&[], Vec::as_slice)
    }
}

/// Splits raw requirement strings into markerless base and per-extra
/// dependency lists as they apply on `env`. A requirement that holds without
/// any extra is a base dependency and is not repeated under extras.
pub(crate) fn flatten(
    requires_dist: &[String],
    provides_extra: &[String],
    env: &MarkerEnvironment,
) -> Result<Flattened, String> {
    let parsed = requires_dist
        .iter()
        .map(|raw| parse_requirement(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let mut candidates = BTreeMap::new();
    for extra in provides_extra {
        candidates
            .entry(normalize_dist_name(extra))
            .or_insert_with(|| extra.trim().to_string());
    }
    for requirement in &parsed {
        if let Some(marker) = &requirement.marker {
            for extra in extras_in_marker(&marker.to_string()) {
                candidates.entry(normalize_dist_name(&extra)).or_insert(extra);
            }
        }
    }
    let extra_names = candidates
        .into_iter()
        .filter_map(|(normalized, raw)| {
            ExtraName::from_str(&raw)
                .ok()
                .map(|name| (normalized, name))
        })
        .collect::<Vec<_>>();

    let mut flat = Flattened::default();
    for (normalized, _) in &extra_names {
        flat.extras.insert(normalized.clone(), Vec::new());
        flat.extra_refs.insert(normalized.clone(), Vec::new());
    }
    for requirement in parsed {
        if requirement.evaluate_markers(env, &[]) {
            push(&mut flat.dependencies, &mut flat.base_refs, requirement);
            continue;
        }
        for (normalized, name) in &extra_names {
            if !requirement.evaluate_markers(env, std::slice::from_ref(name)) {
                continue;
            }
            if let (Some(deps), Some(refs)) = (
                flat.extras.get_mut(normalized),
                flat.extra_refs.get_mut(normalized),
            ) {
                push(deps, refs, requirement.clone());
            }
        }
    }
    Ok(flat)
}

/// Parses a requirement found in metadata or on the command line.
pub(crate) fn parse_requirement(raw: &str) -> Result<Requirement, String> {
    Requirement::from_str(raw.trim()).map_err(|err| format!("invalid requirement `{raw}`: {err}"))
}

pub(crate) fn reference_of(requirement: &Requirement) -> Reference {
    Reference {
        name: normalize_dist_name(&requirement.name.to_string()),
        extras: requirement
            .extras
            .iter()
            .map(|extra| normalize_dist_name(&extra.to_string()))
            .collect(),
    }
}

fn push(deps: &mut Vec<String>, refs: &mut Vec<Reference>, mut requirement: Requirement) {
    refs.push(reference_of(&requirement));
    requirement.marker = None;
    let rendered = requirement.to_string();
    if !deps.contains(&rendered) {
        deps.push(rendered);
    }
}

/// Extra names compared against in a marker expression, in order of appearance.
fn extras_in_marker(marker: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut rest = marker;
    while let Some(pos) = rest.find("extra") {
        let after = rest[pos + "extra".len()..].trim_start();
        rest = &rest[pos + "extra".len()..];
        let Some(after) = after
            .strip_prefix("==")
            .or_else(|| after.strip_prefix("!="))
        else {
            continue;
        };
        let after = after.trim_start();
        let Some(quote) = after.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            continue;
        };
        if let Some((value, _)) = after[1..].split_once(quote) {
            found.push(value.to_string());
        }
    }
    found
}
