#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions
)]

pub mod bench;
pub mod cache;
pub mod cancel;
pub mod commands;
pub mod config;
pub mod extract;
pub mod index;
pub mod outcome;
pub mod platform;
pub mod traverse;
pub mod wheelhouse;

#[cfg(test)]
mod testing;

pub use bench::{run_benchmark, BenchOptions, BenchReport, Timings};
pub use cache::{CacheError, CacheKey, CacheValue, MetadataCache, PutOutcome, RecordedFailure};
pub use cancel::CancelToken;
pub use commands::{
    bench, check, fetch, wheels, BenchRequest, CheckRequest, CommandContext, FetchRequest,
    WheelsRequest,
};
pub use config::{Config, EnvSnapshot, GlobalOptions, NetworkConfig, SdistIsolation};
pub use extract::{
    select_builder, BuildError, DistMetadata, ExtractError, Extraction, MetadataExtractor,
    SdistBuilder,
};
pub use index::{DistributionFile, DistributionKind, IndexError, PackageIndex, SimpleIndexClient};
pub use outcome::{format_status_message, to_json_response, CommandStatus, ExecutionOutcome};
pub use platform::{detect_python, inspect_platform};
pub use traverse::{Traversal, TraverseError, TraverseOptions, Traverser};
pub use wheelhouse::{materialize, WheelhouseSummary};
