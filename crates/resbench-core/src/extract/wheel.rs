use std::fs::File;
use std::io::Read;
use std::path::Path;

use resbench_domain::normalize_dist_name;
use zip::ZipArchive;

use super::metadata::{DistMetadata, MetadataError};

const METADATA_LIMIT: u64 = 16 * 1024 * 1024;

/// Reads dependency metadata straight out of a wheel; nothing in the archive runs.
pub fn read_wheel_metadata(path: &Path, project: &str) -> Result<DistMetadata, MetadataError> {
    let file = File::open(path).map_err(|err| MetadataError::Archive(err.to_string()))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| MetadataError::Archive(err.to_string()))?;
    let member = find_metadata_member(archive.file_names(), project)
        .ok_or_else(|| MetadataError::Missing(display_name(path)))?;
    let entry = archive
        .by_name(&member)
        .map_err(|err| MetadataError::Archive(err.to_string()))?;
    let mut contents = Vec::new();
    entry
        .take(METADATA_LIMIT)
        .read_to_end(&mut contents)
        .map_err(|err| MetadataError::Archive(err.to_string()))?;
    DistMetadata::from_core_metadata(&contents)
}

/// Picks `<name>-<version>.dist-info/METADATA` at the archive root, preferring
/// the directory whose name matches `project` when several exist.
fn find_metadata_member<'a>(
    names: impl Iterator<Item = &'a str>,
    project: &str,
) -> Option<String> {
    let candidates = names
        .filter_map(|name| {
            let (dir, file) = name.split_once('/')?;
            (file == "METADATA" && dir.ends_with(".dist-info")).then_some(dir)
        })
        .collect::<Vec<_>>();
    let chosen = match candidates.as_slice() {
        [] => return None,
        [only] => *only,
        many => many.iter().copied().find(|dir| {
            dir.trim_end_matches(".dist-info")
                .rsplit_once('-')
                .is_some_and(|(name, _)| normalize_dist_name(name) == project)
        })?,
    };
    Some(format!("{chosen}/METADATA"))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
}
