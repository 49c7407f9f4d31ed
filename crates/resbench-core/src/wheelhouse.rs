//! Materializes a scenario as a local PEP 503 index of synthetic wheels.
//!
//! Every `ok` version becomes a universal `py2.py3-none-any` wheel carrying
//! only metadata, so an installer replaying the scenario sees exactly the
//! recorded dependency graph on any machine.

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use resbench_domain::{FetchOutcome, Scenario, VersionRecord};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

const WHEEL_FILE: &str = "\
Wheel-Version: 1.0
Generator: resbench
Root-Is-Purelib: true
Tag: py2-none-any
Tag: py3-none-any
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelhouseSummary {
    pub root: PathBuf,
    pub projects: usize,
    pub wheels: usize,
}

/// Writes the wheelhouse for `scenario` to `output`, replacing whatever was
/// there. The new tree is assembled next to `output` and swapped in at the end.
pub fn materialize(scenario: &Scenario, output: &Path) -> Result<WheelhouseSummary> {
    let parent = output
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    let staging = tempfile::Builder::new()
        .prefix(".resbench-wheels-")
        .tempdir_in(parent)
        .with_context(|| format!("failed to stage wheelhouse in {}", parent.display()))?;

    let mut wheels = 0;
    for (name, record) in scenario.packages() {
        let project_dir = staging.path().join(name);
        fs::create_dir_all(&project_dir)
            .with_context(|| format!("failed to create {}", project_dir.display()))?;
        let mut links = Vec::new();
        for (version, version_record) in &record.versions {
            if version_record.fetch_outcome != FetchOutcome::Ok {
                continue;
            }
            let filename = write_wheel(&project_dir, name, version, version_record)?;
            links.push(filename);
            wheels += 1;
        }
        debug!(package = %name, wheels = links.len(), "project materialized");
        write_listing(&project_dir.join("index.html"), &format!("Links for {name}"), &links)?;
    }
    let projects = scenario
        .packages()
        .keys()
        .map(|name| format!("{name}/"))
        .collect::<Vec<_>>();
    write_listing(&staging.path().join("index.html"), "Simple index", &projects)?;

    if output.exists() {
        info!(path = %output.display(), "removing existing wheelhouse");
        fs::remove_dir_all(output)
            .with_context(|| format!("failed to remove {}", output.display()))?;
    }
    let staged = staging.into_path();
    fs::rename(&staged, output).with_context(|| {
        format!("failed to move {} to {}", staged.display(), output.display())
    })?;
    info!(path = %output.display(), projects = projects.len(), wheels, "wheelhouse written");
    Ok(WheelhouseSummary {
        root: output.to_path_buf(),
        projects: projects.len(),
        wheels,
    })
}

/// Core metadata for a synthetic wheel. Extra dependencies are re-attached
/// with an `extra` marker so the installer only pulls them on request.
pub fn render_metadata(name: &str, version: &str, record: &VersionRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Metadata-Version: 2.1");
    let _ = writeln!(out, "Name: {name}");
    let _ = writeln!(out, "Version: {version}");
    for dependency in &record.dependencies {
        let _ = writeln!(out, "Requires-Dist: {dependency}");
    }
    for (extra, dependencies) in &record.extras {
        let _ = writeln!(out, "Provides-Extra: {extra}");
        for dependency in dependencies {
            let _ = writeln!(out, "Requires-Dist: {dependency} ; extra == '{extra}'");
        }
    }
    if let Some(requires_python) = &record.requires_python {
        let _ = writeln!(out, "Requires-Python: {requires_python}");
    }
    out
}

fn write_wheel(dir: &Path, name: &str, version: &str, record: &VersionRecord) -> Result<String> {
    let stem = format!("{}-{}", name.replace('-', "_"), version.replace('-', "_"));
    let filename = format!("{stem}-py2.py3-none-any.whl");
    let dist_info = format!("{stem}.dist-info");
    let members = [
        (format!("{dist_info}/METADATA"), render_metadata(name, version, record)),
        (format!("{dist_info}/WHEEL"), WHEEL_FILE.to_string()),
        (format!("{dist_info}/top_level.txt"), format!("{}\n", name.replace('-', "_"))),
        (format!("{dist_info}/entry_points.txt"), String::new()),
    ];

    let path = dir.join(&filename);
    let file = File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);
    let mut record_lines = String::new();
    for (member, contents) in &members {
        writer
            .start_file(member.as_str(), options)
            .with_context(|| format!("failed to add {member} to {filename}"))?;
        writer.write_all(contents.as_bytes())?;
        let _ = writeln!(record_lines, "{member},{},{}", record_hash(contents.as_bytes()), contents.len());
    }
    let record_member = format!("{dist_info}/RECORD");
    let _ = writeln!(record_lines, "{record_member},,");
    writer
        .start_file(record_member.as_str(), options)
        .with_context(|| format!("failed to add RECORD to {filename}"))?;
    writer.write_all(record_lines.as_bytes())?;
    writer
        .finish()
        .with_context(|| format!("failed to finish {}", path.display()))?;
    Ok(filename)
}

fn record_hash(contents: &[u8]) -> String {
    format!("sha256={}", URL_SAFE_NO_PAD.encode(Sha256::digest(contents)))
}

fn write_listing(path: &Path, title: &str, links: &[String]) -> Result<()> {
    let mut html = format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{title}</title></head>\n<body>\n"
    );
    for link in links {
        let _ = writeln!(html, "<a href=\"{link}\">{link}</a><br/>");
    }
    html.push_str("</body>\n</html>\n");
    fs::write(path, html).with_context(|| format!("failed to write {}", path.display()))
}
