use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use resbench_domain::{MarkerValues, PlatformInfo};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use which::which;

const MARKER_SCRIPT: &str = r#"import json, os, platform, sys
data = {
    "implementation_name": getattr(sys.implementation, "name", "cpython"),
    "implementation_version": platform.python_version(),
    "os_name": os.name,
    "platform_machine": platform.machine(),
    "platform_python_implementation": platform.python_implementation(),
    "platform_release": platform.release(),
    "platform_system": platform.system(),
    "platform_version": platform.version(),
    "python_full_version": platform.python_version(),
    "python_version": f"{sys.version_info[0]}.{sys.version_info[1]}",
    "sys_platform": sys.platform,
}
print(json.dumps(data))
"#;

const TAGS_SCRIPT: &str = r#"import json, sys, sysconfig

def collect_tags():
    try:
        from pip._internal.utils.compatibility_tags import get_supported
        return list(get_supported())
    except Exception:
        try:
            from packaging import tags as packaging_tags
        except Exception:
            return []
        return list(packaging_tags.sys_tags())

major, minor = sys.version_info[0], sys.version_info[1]
plat = sysconfig.get_platform().lower().replace("-", "_").replace(".", "_")
tags = [f"{t.interpreter}-{t.abi}-{t.platform}".lower() for t in collect_tags()]
if not tags:
    cp = f"cp{major}{minor}"
    tags = [f"{cp}-{cp}-{plat}", f"{cp}-abi3-{plat}", f"{cp}-none-{plat}"]
    tags += [f"py{major}{minor}-none-{plat}", f"py{major}-none-{plat}"]
    tags += [f"{cp}-none-any", f"py{major}{minor}-none-any", f"py{major}-none-any"]
print(json.dumps({"tags": tags}))
"#;

/// Locates the interpreter that fingerprints the generating platform and runs
/// process-isolated builds.
pub fn detect_python(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        return Some(path.to_path_buf());
    }
    ["python3", "python"]
        .into_iter()
        .find_map(|candidate| which(candidate).ok())
}

/// Marker values and supported wheel tags of `python`, tags in priority order.
pub fn inspect_platform(python: &Path) -> Result<PlatformInfo> {
    let markers: MarkerValues = query_python(python, MARKER_SCRIPT, "marker environment")?;
    markers
        .to_marker_environment()
        .context("interpreter reported an unusable marker environment")?;
    let tags: TagsPayload = query_python(python, TAGS_SCRIPT, "interpreter tags")?;
    if tags.tags.is_empty() {
        bail!("{} reported no supported wheel tags", python.display());
    }
    Ok(PlatformInfo {
        markers,
        tags: tags.tags,
    })
}

#[derive(Deserialize)]
struct TagsPayload {
    tags: Vec<String>,
}

fn query_python<T>(python: &Path, script: &str, guide: &str) -> Result<T>
where
    T: DeserializeOwned,
{
    let output = Command::new(python)
        .arg("-c")
        .arg(script)
        .output()
        .with_context(|| format!("failed to query {guide} via {}", python.display()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("python {guide} query failed: {stderr}");
    }
    serde_json::from_slice(&output.stdout).with_context(|| format!("invalid {guide} payload"))
}
