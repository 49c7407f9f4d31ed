use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::warn;

use crate::names::{is_valid_dist_name, normalize_dist_name};

/// Reads the sdist allow-list. No file, named or not, means no sdists are
/// allowed.
pub fn load_allow_list(path: Option<&Path>) -> Result<BTreeSet<String>> {
    let Some(path) = path else {
        return Ok(BTreeSet::new());
    };
    if !path.exists() {
        warn!(path = %path.display(), "sdist allow-list not found; no sdists will be built");
        return Ok(BTreeSet::new());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read sdist allow-list {}", path.display()))?;
    parse_allow_list(&contents).with_context(|| format!("in {}", path.display()))
}

/// One name per line; `#` starts a comment. Names are normalized on the way in.
pub fn parse_allow_list(contents: &str) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        if !is_valid_dist_name(line) {
            bail!("line {}: `{line}` is not a valid package name", idx + 1);
        }
        let normalized = normalize_dist_name(line);
        if normalized != line {
            warn!(
                line = idx + 1,
                written = line,
                normalized = %normalized,
                "allow-list entry is not in normalized form"
            );
        }
        names.insert(normalized);
    }
    Ok(names)
}
