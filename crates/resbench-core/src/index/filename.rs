use std::str::FromStr;

use pep440_rs::Version;
use resbench_domain::normalize_dist_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedFilename {
    Wheel { version: String, tags: Vec<String> },
    Sdist { version: String },
}

impl ParsedFilename {
    pub fn version(&self) -> &str {
        match self {
            ParsedFilename::Wheel { version, .. } | ParsedFilename::Sdist { version } => version,
        }
    }
}

const SDIST_SUFFIXES: &[&str] = &[".tar.gz", ".zip"];

/// Infers version and kind from a distribution filename published for
/// `project`. Files for other projects, unknown archive types and
/// non-PEP 440 versions yield `None`.
pub fn parse_filename(project: &str, filename: &str) -> Option<ParsedFilename> {
    if let Some(stem) = filename.strip_suffix(".whl") {
        return parse_wheel(project, stem);
    }
    let lowered = filename.to_ascii_lowercase();
    let stem_len = SDIST_SUFFIXES
        .iter()
        .find(|suffix| lowered.ends_with(*suffix))
        .map(|suffix| filename.len() - suffix.len())?;
    parse_sdist(project, &filename[..stem_len])
}

fn parse_wheel(project: &str, stem: &str) -> Option<ParsedFilename> {
    let parts = stem.split('-').collect::<Vec<_>>();
    if !(parts.len() == 5 || parts.len() == 6) {
        return None;
    }
    if normalize_dist_name(parts[0]) != project {
        return None;
    }
    let version = canonical_version(parts[1])?;
    let [python, abi, platform] = &parts[parts.len() - 3..] else {
        return None;
    };
    let mut tags = Vec::new();
    for py in python.split('.') {
        for abi in abi.split('.') {
            for plat in platform.split('.') {
                tags.push(format!("{py}-{abi}-{plat}"));
            }
        }
    }
    Some(ParsedFilename::Wheel { version, tags })
}

fn parse_sdist(project: &str, stem: &str) -> Option<ParsedFilename> {
    // Names may contain dashes, so try each split point until the prefix names the project.
    stem.match_indices('-').find_map(|(idx, _)| {
        let (name, rest) = stem.split_at(idx);
        if normalize_dist_name(name) != project {
            return None;
        }
        let version = canonical_version(&rest[1..])?;
        Some(ParsedFilename::Sdist { version })
    })
}

fn canonical_version(raw: &str) -> Option<String> {
    Version::from_str(raw).ok().map(|v| v.to_string())
}
