//! Expands "every version of every reachable package" into a [`Scenario`].
//!
//! The frontier is an explicit worklist keyed by normalized name, each entry
//! carrying the extras still to explore. Work proceeds in waves: all projects
//! new in a wave are listed and their versions extracted on the worker pool,
//! then the coordinating thread folds the results into the next frontier. No
//! project is listed twice and no (name, extra) pair is expanded twice.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use pep440_rs::Version;
use pep508_rs::MarkerEnvironment;
use rayon::prelude::*;
use resbench_domain::{FetchOutcome, PackageRecord, PlatformInfo, Scenario, VersionRecord};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

mod flatten;

use flatten::{flatten, parse_requirement, reference_of, Flattened, Reference};

use crate::cache::{CacheError, CacheKey, CacheValue, MetadataCache};
use crate::cancel::CancelToken;
use crate::extract::{ExtractError, Extraction, MetadataExtractor, SdistBuilder};
use crate::index::{DistributionFile, DistributionKind, PackageIndex};

#[derive(Debug, Clone)]
pub struct TraverseOptions {
    pub roots: Vec<String>,
    pub allowed_sdists: BTreeSet<String>,
    pub platform: PlatformInfo,
    pub generated_at: OffsetDateTime,
    pub jobs: usize,
}

#[derive(Debug)]
pub struct Traversal {
    pub scenario: Scenario,
    /// Projects whose listing failed after retries; recorded without versions.
    pub unlisted: BTreeSet<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TraverseError {
    #[error("[RB501] {0}")]
    InvalidRequirement(String),
    #[error("[RB502] platform markers are unusable: {0}")]
    Platform(String),
    #[error("[RB503] failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("[RB504] traversal cancelled")]
    Cancelled,
}

impl TraverseError {
    pub fn code(&self) -> &'static str {
        match self {
            TraverseError::InvalidRequirement(_) => "RB501",
            TraverseError::Platform(_) => "RB502",
            TraverseError::Pool(_) => "RB503",
            TraverseError::Cache(err) => err.code(),
            TraverseError::Cancelled => "RB504",
        }
    }
}

impl From<ExtractError> for TraverseError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Cache(err) => TraverseError::Cache(err),
            ExtractError::Cancelled => TraverseError::Cancelled,
        }
    }
}

struct Expanded {
    record: VersionRecord,
    flat: Flattened,
}

impl Expanded {
    fn unavailable(outcome: FetchOutcome) -> Self {
        Self {
            record: VersionRecord::unavailable(outcome),
            flat: Flattened::default(),
        }
    }
}

struct ProjectState {
    versions: Vec<(String, Expanded)>,
    listed: bool,
}

impl ProjectState {
    fn provides(&self, extra: &str) -> bool {
        self.versions
            .iter()
            .any(|(_, expanded)| expanded.flat.extras.contains_key(extra))
    }
}

pub struct Traverser<'a> {
    cache: &'a MetadataCache,
    index: &'a dyn PackageIndex,
    builder: &'a dyn SdistBuilder,
    cancel: &'a CancelToken,
    epoch: String,
}

impl<'a> Traverser<'a> {
    pub fn new(
        cache: &'a MetadataCache,
        index: &'a dyn PackageIndex,
        builder: &'a dyn SdistBuilder,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            cache,
            index,
            builder,
            cancel,
            epoch: "0".to_string(),
        }
    }

    /// Label mixed into listing cache keys; bump it to see new uploads.
    #[must_use]
    pub fn with_index_epoch(mut self, epoch: impl Into<String>) -> Self {
        self.epoch = epoch.into();
        self
    }

    pub fn traverse(&self, options: &TraverseOptions) -> Result<Traversal, TraverseError> {
        let env = options
            .platform
            .markers
            .to_marker_environment()
            .map_err(|err| TraverseError::Platform(format!("{err:#}")))?;

        let mut frontier = BTreeMap::new();
        for raw in &options.roots {
            let requirement = parse_requirement(raw).map_err(TraverseError::InvalidRequirement)?;
            if !requirement.evaluate_markers(&env, &[]) {
                warn!(requirement = %raw, "root requirement does not apply to this platform; skipping");
                continue;
            }
            enqueue(&mut frontier, &reference_of(&requirement));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.jobs.max(1))
            .thread_name(|idx| format!("resbench-worker-{idx}"))
            .build()?;
        let extractor = MetadataExtractor::new(
            self.cache,
            self.index,
            self.builder,
            &options.allowed_sdists,
            self.cancel,
        );

        let mut projects: BTreeMap<String, ProjectState> = BTreeMap::new();
        let mut explored: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut wave = 0usize;
        while !frontier.is_empty() {
            self.check_cancelled()?;
            wave += 1;
            let fresh = frontier
                .keys()
                .filter(|name| !projects.contains_key(*name))
                .cloned()
                .collect::<Vec<_>>();
            info!(wave, frontier = frontier.len(), new_projects = fresh.len(), "expanding frontier");
            let fetched = pool.install(|| {
                fresh
                    .par_iter()
                    .map(|name| {
                        self.fetch_project(name, &extractor, &options.platform, &env)
                            .map(|state| (name.clone(), state))
                    })
                    .collect::<Result<Vec<_>, TraverseError>>()
            })?;
            projects.extend(fetched);

            let mut next = BTreeMap::new();
            for (name, extras) in std::mem::take(&mut frontier) {
                let Some(state) = projects.get(&name) else {
                    continue;
                };
                let seen = explored.entry(name.clone()).or_default();
                for extra in extras {
                    if !seen.insert(extra.clone()) {
                        continue;
                    }
                    if !extra.is_empty() && !state.provides(&extra) {
                        debug!(package = %name, %extra, "no version provides the requested extra");
                    }
                    for (_, expanded) in &state.versions {
                        for reference in expanded.flat.references(&extra) {
                            enqueue(&mut next, reference);
                        }
                    }
                }
            }
            next.retain(|name, extras| {
                if let Some(seen) = explored.get(name) {
                    extras.retain(|extra| !seen.contains(extra));
                }
                !extras.is_empty()
            });
            frontier = next;
        }

        let mut scenario = Scenario::new(
            options.roots.clone(),
            options.generated_at,
            options.platform.clone(),
            options.allowed_sdists.clone(),
        );
        let mut unlisted = BTreeSet::new();
        for (name, state) in projects {
            if !state.listed {
                unlisted.insert(name.clone());
            }
            let versions = state
                .versions
                .into_iter()
                .map(|(version, expanded)| (version, expanded.record));
            scenario.insert_package(name, PackageRecord::from_versions(versions));
        }
        for message in scenario.issues().messages() {
            info!("{message}");
        }
        info!(
            waves = wave,
            packages = scenario.packages().len(),
            unlisted = unlisted.len(),
            "traversal finished"
        );
        Ok(Traversal { scenario, unlisted })
    }

    fn check_cancelled(&self) -> Result<(), TraverseError> {
        if self.cancel.is_cancelled() {
            return Err(TraverseError::Cancelled);
        }
        Ok(())
    }

    fn fetch_project(
        &self,
        name: &str,
        extractor: &MetadataExtractor<'_>,
        platform: &PlatformInfo,
        env: &MarkerEnvironment,
    ) -> Result<ProjectState, TraverseError> {
        self.check_cancelled()?;
        let Some(files) = self.listing(name)? else {
            return Ok(ProjectState {
                versions: Vec::new(),
                listed: false,
            });
        };
        let by_version = group_by_version(name, files);
        debug!(package = %name, versions = by_version.len(), "listing grouped");
        let versions = by_version
            .into_values()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(version, files)| {
                self.resolve_version(name, &version, &files, extractor, platform, env)
                    .map(|expanded| (version, expanded))
            })
            .collect::<Result<Vec<_>, TraverseError>>()?;
        if versions.is_empty() {
            info!(package = %name, "no versions published");
        }
        Ok(ProjectState {
            versions,
            listed: true,
        })
    }

    fn listing(&self, project: &str) -> Result<Option<Vec<DistributionFile>>, TraverseError> {
        let key = CacheKey::listing(self.index.index_url(), project, &self.epoch);
        match self.cache.get(&key)? {
            Some(CacheValue::Listing { files }) => {
                debug!(package = %project, files = files.len(), "listing replayed from cache");
                return Ok(Some(files));
            }
            Some(_) => {
                return Err(CacheError::Corrupt {
                    path: self.cache.root().to_path_buf(),
                    reason: format!("entry {key} does not hold a listing"),
                }
                .into())
            }
            None => {}
        }
        match self.index.list_files(project) {
            Ok(files) => {
                self.cache.put(
                    &key,
                    &CacheValue::Listing {
                        files: files.clone(),
                    },
                )?;
                Ok(Some(files))
            }
            Err(err) => {
                warn!(package = %project, code = err.code(), %err, "listing failed; recording no versions");
                Ok(None)
            }
        }
    }

    fn resolve_version(
        &self,
        name: &str,
        version: &str,
        files: &[DistributionFile],
        extractor: &MetadataExtractor<'_>,
        platform: &PlatformInfo,
        env: &MarkerEnvironment,
    ) -> Result<Expanded, TraverseError> {
        self.check_cancelled()?;
        let Some(best) = pick_distribution(files, platform) else {
            debug!(package = %name, %version, "no compatible distribution");
            return Ok(Expanded::unavailable(FetchOutcome::NoCompatibleDistribution));
        };
        let (kind, metadata) = match extractor.metadata_for(best)? {
            Extraction::Resolved { kind, metadata } => (kind, metadata),
            Extraction::Failed {
                outcome, reason, ..
            } => {
                debug!(package = %name, %version, %outcome, %reason, "version unavailable");
                return Ok(Expanded::unavailable(outcome));
            }
        };
        match flatten(&metadata.requires_dist, &metadata.provides_extra, env) {
            Ok(flat) => {
                let requires_python = metadata
                    .requires_python
                    .or_else(|| best.requires_python.clone());
                let record = VersionRecord::resolved(kind, flat.dependencies.clone())
                    .with_extras(flat.extras.clone())
                    .with_requires_python(requires_python);
                Ok(Expanded { record, flat })
            }
            Err(reason) => {
                warn!(package = %name, %version, %reason, "unusable Requires-Dist");
                Ok(Expanded::unavailable(FetchOutcome::InvalidMetadata))
            }
        }
    }
}

/// Buckets files by PEP 440 version, so `1.0` and `1.0.0` share one record.
/// Each bucket is labelled with the lexicographically smallest spelling seen.
fn group_by_version(
    name: &str,
    files: Vec<DistributionFile>,
) -> BTreeMap<Version, (String, Vec<DistributionFile>)> {
    let mut by_version: BTreeMap<Version, (String, Vec<DistributionFile>)> = BTreeMap::new();
    for file in files {
        let Ok(parsed) = Version::from_str(&file.version) else {
            debug!(
                package = %name,
                filename = %file.filename,
                "skipping file with unparseable version"
            );
            continue;
        };
        let (label, bucket) = by_version
            .entry(parsed)
            .or_insert_with(|| (file.version.clone(), Vec::new()));
        if file.version < *label {
            label.clone_from(&file.version);
        }
        bucket.push(file);
    }
    by_version
}

fn enqueue(frontier: &mut BTreeMap<String, BTreeSet<String>>, reference: &Reference) {
    let extras = frontier.entry(reference.name.clone()).or_default();
    extras.insert(String::new());
    extras.extend(reference.extras.iter().cloned());
}

/// The compatible wheel whose best tag ranks highest on `platform`, else the
/// first sdist by name. Ties between wheels fall back to filename order.
fn pick_distribution<'f>(
    files: &'f [DistributionFile],
    platform: &PlatformInfo,
) -> Option<&'f DistributionFile> {
    let wheel = files
        .iter()
        .filter_map(|file| match &file.kind {
            DistributionKind::Wheel { tags } => tags
                .iter()
                .filter_map(|tag| platform.tag_priority(tag))
                .min()
                .map(|priority| (priority, file)),
            DistributionKind::Sdist => None,
        })
        .min_by(|(left, a), (right, b)| left.cmp(right).then_with(|| a.filename.cmp(&b.filename)))
        .map(|(_, file)| file);
    wheel.or_else(|| {
        files
            .iter()
            .filter(|file| !file.is_wheel())
            .min_by(|a, b| a.filename.cmp(&b.filename))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use anyhow::Result;
    use resbench_domain::SourceKind;
    use time::macros::datetime;

    use super::*;
    use crate::testing::{linux_platform, MemoryIndex, SpyBuilder};

    fn options(roots: &[&str], allowed: &[&str]) -> TraverseOptions {
        TraverseOptions {
            roots: roots.iter().map(ToString::to_string).collect(),
            allowed_sdists: allowed.iter().map(ToString::to_string).collect(),
            platform: linux_platform(),
            generated_at: datetime!(2024-03-01 12:30:00 UTC),
            jobs: 4,
        }
    }

    fn pkg_index(dir: &std::path::Path) -> Result<MemoryIndex> {
        let mut index = MemoryIndex::new(dir)?;
        index.add_wheel("pkg-a", "1.0", &["pkg-b>=2.0"])?;
        index.add_wheel("pkg-b", "2.0", &[])?;
        index.add_sdist("pkg-b", "2.1")?;
        Ok(index)
    }

    #[test]
    fn records_every_version_including_skipped_sdists() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = MetadataCache::open(&dir.path().join("cache"))?;
        let index = pkg_index(dir.path())?;
        let builder = SpyBuilder::succeeding(&[]);
        let cancel = CancelToken::new();
        let traversal = Traverser::new(&cache, &index, &builder, &cancel)
            .traverse(&options(&["pkg-a==1.0"], &[]))?;
        let scenario = traversal.scenario;

        let pkg_a = scenario.package("pkg-a").expect("pkg-a recorded");
        let a1 = &pkg_a.versions["1.0"];
        assert_eq!(a1.fetch_outcome, FetchOutcome::Ok);
        assert_eq!(a1.source_kind, SourceKind::Wheel);
        assert_eq!(a1.dependencies, vec!["pkg-b>=2.0"]);

        let pkg_b = scenario.package("pkg-b").expect("pkg-b recorded");
        assert_eq!(pkg_b.versions.keys().collect::<Vec<_>>(), ["2.0", "2.1"]);
        let b20 = &pkg_b.versions["2.0"];
        assert_eq!(b20.fetch_outcome, FetchOutcome::Ok);
        assert_eq!(b20.source_kind, SourceKind::Wheel);
        assert!(b20.dependencies.is_empty());
        let b21 = &pkg_b.versions["2.1"];
        assert_eq!(b21.fetch_outcome, FetchOutcome::SkippedSdistNotAllowed);
        assert_eq!(b21.source_kind, SourceKind::Unavailable);
        assert!(b21.dependencies.is_empty());

        assert_eq!(builder.calls.load(Ordering::SeqCst), 0, "no build was started");
        assert!(traversal.unlisted.is_empty());
        scenario.validate()?;
        Ok(())
    }

    #[test]
    fn warm_cache_reproduces_identical_documents() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = MetadataCache::open(&dir.path().join("cache"))?;
        let index = pkg_index(dir.path())?;
        let builder = SpyBuilder::succeeding(&[]);
        let cancel = CancelToken::new();
        let traverser = Traverser::new(&cache, &index, &builder, &cancel);

        let first = traverser.traverse(&options(&["pkg-a==1.0"], &[]))?.scenario.to_json()?;
        let listings = index.listings.load(Ordering::SeqCst);
        let downloads = index.downloads.load(Ordering::SeqCst);
        let second = traverser.traverse(&options(&["pkg-a==1.0"], &[]))?.scenario.to_json()?;

        assert_eq!(first, second);
        assert_eq!(index.listings.load(Ordering::SeqCst), listings, "listings replayed");
        assert_eq!(index.downloads.load(Ordering::SeqCst), downloads, "metadata replayed");
        Ok(())
    }

    #[test]
    fn every_referenced_package_is_recorded() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = MetadataCache::open(&dir.path().join("cache"))?;
        let mut index = MemoryIndex::new(dir.path())?;
        index.add_wheel("app", "1.0", &["lib>=1", "ghost"])?;
        index.add_wheel("app", "2.0", &["lib>=2", "extra-lib"])?;
        index.add_wheel("lib", "1.0", &["leaf"])?;
        index.add_wheel("lib", "2.0", &[])?;
        index.add_wheel("leaf", "0.1", &[])?;
        index.add_wheel("extra-lib", "3.0", &[])?;
        let builder = SpyBuilder::succeeding(&[]);
        let cancel = CancelToken::new();
        let scenario = Traverser::new(&cache, &index, &builder, &cancel)
            .traverse(&options(&["app"], &[]))?
            .scenario;

        let names = scenario.packages().keys().cloned().collect::<Vec<_>>();
        assert_eq!(names, ["app", "extra-lib", "ghost", "leaf", "lib"]);
        for record in scenario.packages().values() {
            for version in record.versions.values() {
                for dependency in &version.dependencies {
                    let name = parse_requirement(dependency).map_err(anyhow::Error::msg)?;
                    let name = reference_of(&name).name;
                    assert!(scenario.package(&name).is_some(), "{name} missing");
                }
            }
        }
        let issues = scenario.issues();
        assert_eq!(issues.empty_packages, vec!["ghost"]);
        Ok(())
    }

    #[test]
    fn broken_build_does_not_stop_siblings() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = MetadataCache::open(&dir.path().join("cache"))?;
        let mut index = MemoryIndex::new(dir.path())?;
        index.add_wheel("root", "1.0", &["healthy", "broken"])?;
        index.add_wheel("healthy", "1.0", &["leaf"])?;
        index.add_wheel("leaf", "1.0", &[])?;
        index.add_sdist("broken", "0.1")?;
        let builder = SpyBuilder::failing("setup.py raised");
        let cancel = CancelToken::new();
        let scenario = Traverser::new(&cache, &index, &builder, &cancel)
            .traverse(&options(&["root"], &["broken"]))?
            .scenario;

        let broken = &scenario.package("broken").expect("broken").versions["0.1"];
        assert_eq!(broken.fetch_outcome, FetchOutcome::BuildFailed);
        assert_eq!(broken.source_kind, SourceKind::Unavailable);
        let healthy = &scenario.package("healthy").expect("healthy").versions["1.0"];
        assert_eq!(healthy.fetch_outcome, FetchOutcome::Ok);
        assert!(scenario.package("leaf").is_some_and(PackageRecord::has_available_version));
        assert_eq!(builder.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn allowed_sdists_are_built_and_expanded() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = MetadataCache::open(&dir.path().join("cache"))?;
        let mut index = pkg_index(dir.path())?;
        index.add_wheel("six", "1.16.0", &[])?;
        let builder = SpyBuilder::succeeding(&["six>=1.0"]);
        let cancel = CancelToken::new();
        let scenario = Traverser::new(&cache, &index, &builder, &cancel)
            .traverse(&options(&["pkg-a==1.0"], &["pkg-b"]))?
            .scenario;

        let b21 = &scenario.package("pkg-b").expect("pkg-b").versions["2.1"];
        assert_eq!(b21.fetch_outcome, FetchOutcome::Ok);
        assert_eq!(b21.source_kind, SourceKind::Sdist);
        assert_eq!(b21.dependencies, vec!["six>=1.0"]);
        assert!(scenario.package("six").is_some());
        assert_eq!(
            *builder.archives.lock().expect("spy lock"),
            vec!["pkg_b-2.1.tar.gz".to_string()]
        );
        Ok(())
    }

    #[test]
    fn extras_are_explored_only_when_requested() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = MetadataCache::open(&dir.path().join("cache"))?;
        let mut index = MemoryIndex::new(dir.path())?;
        index.add_wheel("tool", "1.0", &["core", "click; extra == \"cli\""])?;
        index.add_wheel("core", "1.0", &[])?;
        index.add_wheel("click", "8.1.7", &[])?;
        index.add_wheel("uses-cli", "1.0", &["tool[cli]"])?;
        let builder = SpyBuilder::succeeding(&[]);
        let cancel = CancelToken::new();
        let traverser = Traverser::new(&cache, &index, &builder, &cancel);

        let plain = traverser.traverse(&options(&["tool"], &[]))?.scenario;
        assert!(plain.package("click").is_none());
        let tool = &plain.package("tool").expect("tool").versions["1.0"];
        assert_eq!(tool.dependencies, vec!["core"]);
        assert_eq!(tool.extras["cli"], vec!["click"]);

        let with_extra = traverser.traverse(&options(&["uses-cli"], &[]))?.scenario;
        assert!(with_extra.package("click").is_some());
        assert!(with_extra.package("core").is_some());
        Ok(())
    }

    #[test]
    fn incompatible_wheels_and_failed_listings_are_recorded() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = MetadataCache::open(&dir.path().join("cache"))?;
        let mut index = MemoryIndex::new(dir.path())?;
        index.add_wheel("root", "1.0", &["winonly", "flaky"])?;
        index.add_platform_wheel("winonly", "1.0", "cp312-cp312-win_amd64")?;
        index.add_wheel("flaky", "1.0", &[])?;
        index.fail_listing("flaky");
        let builder = SpyBuilder::succeeding(&[]);
        let cancel = CancelToken::new();
        let traversal = Traverser::new(&cache, &index, &builder, &cancel)
            .traverse(&options(&["root"], &[]))?;

        let winonly = &traversal.scenario.package("winonly").expect("winonly").versions["1.0"];
        assert_eq!(winonly.fetch_outcome, FetchOutcome::NoCompatibleDistribution);
        assert!(traversal.scenario.package("flaky").is_some_and(PackageRecord::is_empty));
        assert_eq!(
            traversal.unlisted.into_iter().collect::<Vec<_>>(),
            vec!["flaky".to_string()]
        );
        let key = CacheKey::listing(index.index_url(), "flaky", "0");
        assert_eq!(cache.get(&key)?, None, "failed listings are not cached");
        Ok(())
    }

    #[test]
    fn cancelled_traversal_stops() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = MetadataCache::open(&dir.path().join("cache"))?;
        let index = pkg_index(dir.path())?;
        let builder = SpyBuilder::succeeding(&[]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = Traverser::new(&cache, &index, &builder, &cancel)
            .traverse(&options(&["pkg-a"], &[]))
            .expect_err("cancelled");
        assert_eq!(err.code(), "RB504");
        assert_eq!(index.listings.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn invalid_roots_and_platform_specific_roots() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = MetadataCache::open(&dir.path().join("cache"))?;
        let index = pkg_index(dir.path())?;
        let builder = SpyBuilder::succeeding(&[]);
        let cancel = CancelToken::new();
        let traverser = Traverser::new(&cache, &index, &builder, &cancel);

        let err = traverser
            .traverse(&options(&["pkg-a >>= 1"], &[]))
            .expect_err("invalid root");
        assert_eq!(err.code(), "RB501");

        let scenario = traverser
            .traverse(&options(&["pkg-a; sys_platform == 'win32'"], &[]))?
            .scenario;
        assert!(scenario.packages().is_empty());
        Ok(())
    }

    #[test]
    fn equal_versions_spelled_differently_share_a_record() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = MetadataCache::open(&dir.path().join("cache"))?;
        let mut index = MemoryIndex::new(dir.path())?;
        index.add_wheel("root", "1.0", &["pkg"])?;
        index.add_wheel("pkg", "1.0", &[])?;
        index.add_wheel("pkg", "1.0.0", &[])?;
        index.add_wheel("pkg", "2.0.post1", &[])?;
        index.add_wheel("pkg", "2.0-1", &[])?;
        let builder = SpyBuilder::succeeding(&[]);
        let cancel = CancelToken::new();
        let scenario = Traverser::new(&cache, &index, &builder, &cancel)
            .traverse(&options(&["root"], &[]))?
            .scenario;

        let pkg = scenario.package("pkg").expect("pkg recorded");
        assert_eq!(pkg.versions.keys().collect::<Vec<_>>(), ["1.0", "2.0-1"]);
        assert!(pkg.versions.values().all(VersionRecord::is_available));
        assert_eq!(index.downloads.load(Ordering::SeqCst), 3, "one download per version");
        scenario.validate()?;
        Ok(())
    }

    #[test]
    fn traversed_scenarios_survive_a_json_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = MetadataCache::open(&dir.path().join("cache"))?;
        let mut index = pkg_index(dir.path())?;
        index.add_wheel("pkg-a", "1.1", &["pkg-b", "click; extra == \"cli\""])?;
        index.add_wheel("pkg-b", "2.0.0", &[])?;
        index.add_wheel("click", "8.1.7", &[])?;
        let builder = SpyBuilder::succeeding(&[]);
        let cancel = CancelToken::new();
        let scenario = Traverser::new(&cache, &index, &builder, &cancel)
            .traverse(&options(&["pkg-a[cli]"], &[]))?
            .scenario;

        let rendered = scenario.to_json()?;
        let reloaded = Scenario::from_json(&rendered)?;
        assert_eq!(reloaded, scenario);
        assert_eq!(reloaded.to_json()?, rendered);
        assert!(reloaded.package("click").is_some());
        Ok(())
    }

    #[test]
    fn prefers_the_highest_priority_wheel() {
        let platform = linux_platform();
        let file = |filename: &str, kind: DistributionKind| DistributionFile {
            project: "numpy".into(),
            filename: filename.into(),
            url: format!("memory://numpy/{filename}"),
            hashes: BTreeMap::new(),
            version: "2.0.0".into(),
            kind,
            requires_python: None,
            yanked: false,
        };
        let wheel = |filename: &str, tag: &str| {
            file(
                filename,
                DistributionKind::Wheel {
                    tags: vec![tag.to_string()],
                },
            )
        };
        let files = vec![
            file("numpy-2.0.0.tar.gz", DistributionKind::Sdist),
            wheel("numpy-2.0.0-py3-none-any.whl", "py3-none-any"),
            wheel(
                "numpy-2.0.0-cp312-cp312-manylinux_2_17_x86_64.whl",
                "cp312-cp312-manylinux_2_17_x86_64",
            ),
            wheel("numpy-2.0.0-cp312-cp312-win_amd64.whl", "cp312-cp312-win_amd64"),
        ];
        assert_eq!(
            pick_distribution(&files, &platform).map(|f| f.filename.as_str()),
            Some("numpy-2.0.0-cp312-cp312-manylinux_2_17_x86_64.whl")
        );
        assert_eq!(
            pick_distribution(&files[..1], &platform).map(|f| f.filename.as_str()),
            Some("numpy-2.0.0.tar.gz")
        );
        assert!(pick_distribution(&files[3..], &platform).is_none());
    }
}
