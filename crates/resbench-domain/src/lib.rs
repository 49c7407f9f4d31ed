#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod allowlist;
pub mod names;
pub mod scenario;

pub use allowlist::{load_allow_list, parse_allow_list};
pub use names::{is_normalized_name, is_valid_dist_name, normalize_dist_name};
pub use scenario::{
    load_scenario, save_scenario, FetchOutcome, MarkerValues, PackageRecord, PlatformInfo,
    Scenario, ScenarioError, ScenarioIssues, SourceKind, VersionRecord,
};
