//! In-memory collaborators shared by the extractor and traversal tests.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use zip::write::FileOptions;
use zip::ZipWriter;

use resbench_domain::{MarkerValues, PlatformInfo};

use crate::cancel::CancelToken;
use crate::extract::{BuildError, DistMetadata, SdistBuilder};
use crate::index::{DistributionFile, DistributionKind, IndexError, PackageIndex};

pub(crate) fn linux_platform() -> PlatformInfo {
    PlatformInfo {
        markers: MarkerValues {
            implementation_name: "cpython".into(),
            implementation_version: "3.12.1".into(),
            os_name: "posix".into(),
            platform_machine: "x86_64".into(),
            platform_python_implementation: "CPython".into(),
            platform_release: "6.1.0".into(),
            platform_system: "Linux".into(),
            platform_version: "#1 SMP".into(),
            python_full_version: "3.12.1".into(),
            python_version: "3.12".into(),
            sys_platform: "linux".into(),
        },
        tags: vec![
            "cp312-cp312-manylinux_2_17_x86_64".into(),
            "cp312-abi3-manylinux_2_17_x86_64".into(),
            "py312-none-any".into(),
            "py3-none-any".into(),
        ],
    }
}

pub(crate) struct MemoryIndex {
    root: PathBuf,
    projects: BTreeMap<String, Vec<(DistributionFile, PathBuf)>>,
    failing_listings: BTreeSet<String>,
    failing_downloads: BTreeSet<String>,
    pub(crate) listings: AtomicUsize,
    pub(crate) downloads: AtomicUsize,
}

impl MemoryIndex {
    pub(crate) fn new(dir: &Path) -> Result<Self> {
        let root = dir.join("index");
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            projects: BTreeMap::new(),
            failing_listings: BTreeSet::new(),
            failing_downloads: BTreeSet::new(),
            listings: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
        })
    }

    /// Publishes a universal wheel declaring `requires` as `Requires-Dist`.
    pub(crate) fn add_wheel(&mut self, project: &str, version: &str, requires: &[&str]) -> Result<()> {
        let mut metadata = format!("Metadata-Version: 2.1\nName: {project}\nVersion: {version}\n");
        for requirement in requires {
            metadata.push_str(&format!("Requires-Dist: {requirement}\n"));
        }
        for extra in requires.iter().filter_map(|req| extra_of(req)) {
            metadata.push_str(&format!("Provides-Extra: {extra}\n"));
        }
        self.add_wheel_with_metadata(project, version, &metadata)
    }

    pub(crate) fn add_wheel_with_metadata(
        &mut self,
        project: &str,
        version: &str,
        metadata: &str,
    ) -> Result<()> {
        let stem = project.replace('-', "_");
        let filename = format!("{stem}-{version}-py3-none-any.whl");
        let path = self.root.join(&filename);
        let mut writer = ZipWriter::new(File::create(&path)?);
        writer.start_file(format!("{stem}-{version}.dist-info/METADATA"), FileOptions::default())?;
        writer.write_all(metadata.as_bytes())?;
        writer.finish()?;
        self.publish(project, version, filename, path, wheel_kind(&["py3-none-any"]));
        Ok(())
    }

    /// Publishes a wheel whose bytes are exactly `contents`.
    pub(crate) fn add_raw_wheel(&mut self, project: &str, version: &str, contents: &[u8]) -> Result<()> {
        let filename = format!("{}-{version}-py3-none-any.whl", project.replace('-', "_"));
        let path = self.root.join(&filename);
        fs::write(&path, contents)?;
        self.publish(project, version, filename, path, wheel_kind(&["py3-none-any"]));
        Ok(())
    }

    /// Publishes a wheel that only installs on `tag`.
    pub(crate) fn add_platform_wheel(&mut self, project: &str, version: &str, tag: &str) -> Result<()> {
        let filename = format!("{}-{version}-{tag}.whl", project.replace('-', "_"));
        let path = self.root.join(&filename);
        fs::write(&path, b"")?;
        self.publish(project, version, filename, path, wheel_kind(&[tag]));
        Ok(())
    }

    pub(crate) fn add_sdist(&mut self, project: &str, version: &str) -> Result<()> {
        let filename = format!("{}-{version}.tar.gz", project.replace('-', "_"));
        let path = self.root.join(&filename);
        fs::write(&path, b"sdist placeholder")?;
        self.publish(project, version, filename, path, DistributionKind::Sdist);
        Ok(())
    }

    pub(crate) fn fail_listing(&mut self, project: &str) {
        self.failing_listings.insert(project.to_string());
    }

    pub(crate) fn fail_downloads(&mut self, project: &str) {
        self.failing_downloads.insert(project.to_string());
    }

    fn publish(
        &mut self,
        project: &str,
        version: &str,
        filename: String,
        path: PathBuf,
        kind: DistributionKind,
    ) {
        let file = DistributionFile {
            project: project.to_string(),
            url: format!("memory://{project}/{filename}"),
            filename,
            hashes: BTreeMap::new(),
            version: version.to_string(),
            kind,
            requires_python: None,
            yanked: false,
        };
        self.projects
            .entry(project.to_string())
            .or_default()
            .push((file, path));
    }
}

fn wheel_kind(tags: &[&str]) -> DistributionKind {
    DistributionKind::Wheel {
        tags: tags.iter().map(ToString::to_string).collect(),
    }
}

fn extra_of(requirement: &str) -> Option<&str> {
    let (_, marker) = requirement.split_once("extra == \"")?;
    marker.split_once('"').map(|(extra, _)| extra)
}

impl PackageIndex for MemoryIndex {
    fn index_url(&self) -> &str {
        "memory://index/"
    }

    fn list_files(&self, project: &str) -> Result<Vec<DistributionFile>, IndexError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if self.failing_listings.contains(project) {
            return Err(IndexError::Status {
                url: format!("memory://index/{project}/"),
                status: 503,
            });
        }
        Ok(self
            .projects
            .get(project)
            .map(|files| files.iter().map(|(file, _)| file.clone()).collect())
            .unwrap_or_default())
    }

    fn download(&self, file: &DistributionFile) -> Result<PathBuf, IndexError> {
        if self.failing_downloads.contains(&file.project) {
            return Err(IndexError::Status {
                url: file.url.clone(),
                status: 503,
            });
        }
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.projects
            .get(&file.project)
            .and_then(|files| files.iter().find(|(known, _)| known == file))
            .map(|(_, path)| path.clone())
            .ok_or_else(|| IndexError::Status {
                url: file.url.clone(),
                status: 404,
            })
    }
}

enum Behavior {
    Succeed(DistMetadata),
    Fail(String),
    TimeOut,
}

/// Stands in for the build sandbox and counts how often it was asked to run.
pub(crate) struct SpyBuilder {
    behavior: Behavior,
    pub(crate) calls: AtomicUsize,
    pub(crate) archives: Mutex<Vec<String>>,
}

impl SpyBuilder {
    fn with(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            archives: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn succeeding(requires: &[&str]) -> Self {
        Self::with(Behavior::Succeed(DistMetadata {
            requires_dist: requires.iter().map(ToString::to_string).collect(),
            provides_extra: Vec::new(),
            requires_python: None,
        }))
    }

    pub(crate) fn failing(reason: &str) -> Self {
        Self::with(Behavior::Fail(reason.to_string()))
    }

    pub(crate) fn timing_out() -> Self {
        Self::with(Behavior::TimeOut)
    }
}

impl SdistBuilder for SpyBuilder {
    fn build(&self, archive: &Path, _cancel: &CancelToken) -> Result<DistMetadata, BuildError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(name) = archive.file_name() {
            self.archives
                .lock()
                .expect("spy lock")
                .push(name.to_string_lossy().into_owned());
        }
        match &self.behavior {
            Behavior::Succeed(metadata) => Ok(metadata.clone()),
            Behavior::Fail(reason) => Err(BuildError::Failed(reason.clone())),
            Behavior::TimeOut => Err(BuildError::TimedOut(Duration::from_secs(1))),
        }
    }
}
