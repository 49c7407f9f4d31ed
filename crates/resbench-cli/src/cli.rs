use std::path::PathBuf;

use clap::{value_parser, ArgAction, Args, Parser, Subcommand};

pub const RESBENCH_HELP_TEMPLATE: &str =
    "{before-help}\nUsage:\n    {usage}\n\nGlobal options:\n{options}\n";

pub const RESBENCH_BEFORE_HELP: &str = concat!(
    "resbench ",
    env!("CARGO_PKG_VERSION"),
    " – Resolver benchmark scenarios\n\n",
    "\x1b[1;36mPipeline\x1b[0m\n",
    "  fetch            Explore every version of every reachable package into a scenario.\n",
    "  wheels           Materialize a scenario as a local index of metadata-only wheels.\n",
    "  bench            Time the installer resolving a scenario against its wheelhouse.\n\n",
    "\x1b[1;36mInspection\x1b[0m\n",
    "  check            Validate a scenario file and print its diagnostics.\n",
);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    propagate_version = false,
    disable_help_subcommand = true,
    before_help = RESBENCH_BEFORE_HELP,
    help_template = RESBENCH_HELP_TEMPLATE
)]
pub struct ResbenchCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    pub quiet: bool,
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Increase logging (-vv reaches trace)",
        global = true
    )]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[command(subcommand)]
    pub command: CommandCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandCli {
    #[command(
        about = "Explore the roots against the index and write a scenario file.",
        override_usage = "resbench fetch <REQ>... [--sdists-file FILE] [--output PATH]"
    )]
    Fetch(FetchArgs),
    #[command(
        about = "Write a local wheel index replaying a scenario's dependency graph.",
        override_usage = "resbench wheels <SCENARIO> [--output-dir DIR]"
    )]
    Wheels(WheelsArgs),
    #[command(
        about = "Time the installer resolving a scenario against its wheelhouse.",
        override_usage = "resbench bench <SCENARIO> [--wheelhouse DIR] [--warmups N] [--runs N]"
    )]
    Bench(BenchArgs),
    #[command(
        about = "Validate a scenario and print its diagnostics (read-only).",
        override_usage = "resbench check <SCENARIO>"
    )]
    Check(CheckArgs),
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    #[arg(
        value_name = "REQ",
        required = true,
        num_args = 1..,
        help = "Root requirements (PEP 508), e.g. `requests[socks]>=2`"
    )]
    pub roots: Vec<String>,
    #[arg(
        long = "sdists-file",
        value_name = "FILE",
        help = "Packages whose sdists may be built, one per line"
    )]
    pub sdists_file: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Scenario path (default: scenarios/<roots>-<n>.json)"
    )]
    pub output: Option<PathBuf>,
    #[arg(
        long,
        value_name = "N",
        value_parser = value_parser!(u64).range(1..),
        help = "Worker pool size (overrides RESBENCH_JOBS)"
    )]
    pub jobs: Option<u64>,
    #[arg(
        long = "time-budget",
        value_name = "SECONDS",
        value_parser = value_parser!(u64).range(1..),
        help = "Cancel the traversal after this many seconds"
    )]
    pub time_budget: Option<u64>,
    #[arg(
        long = "cache-dir",
        value_name = "DIR",
        help = "Metadata cache root (overrides RESBENCH_CACHE_DIR)"
    )]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct WheelsArgs {
    #[arg(value_name = "SCENARIO", help = "Scenario file written by `resbench fetch`")]
    pub scenario: PathBuf,
    #[arg(
        long = "output-dir",
        value_name = "DIR",
        help = "Wheelhouse directory (default: wheelhouse/<scenario>)"
    )]
    pub output_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct BenchArgs {
    #[arg(value_name = "SCENARIO", help = "Scenario file written by `resbench fetch`")]
    pub scenario: PathBuf,
    #[arg(
        long,
        value_name = "DIR",
        help = "Wheelhouse to resolve against (default: wheelhouse/<scenario>)"
    )]
    pub wheelhouse: Option<PathBuf>,
    #[arg(long, value_name = "N", default_value_t = 2, help = "Untimed warmup runs")]
    pub warmups: usize,
    #[arg(long, value_name = "N", default_value_t = 5, help = "Timed runs")]
    pub runs: usize,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[arg(value_name = "SCENARIO", help = "Scenario file to validate")]
    pub scenario: PathBuf,
}

impl CommandCli {
    pub fn name(&self) -> &'static str {
        match self {
            CommandCli::Fetch(_) => "fetch",
            CommandCli::Wheels(_) => "wheels",
            CommandCli::Bench(_) => "bench",
            CommandCli::Check(_) => "check",
        }
    }
}
