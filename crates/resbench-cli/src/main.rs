use std::time::Duration;

use atty::Stream;
use clap::Parser;
use color_eyre::Result;
use resbench_core::{
    BenchRequest, CancelToken, CheckRequest, CommandContext, CommandStatus, Config,
    ExecutionOutcome, FetchRequest, GlobalOptions, WheelsRequest,
};
use serde_json::{json, Value};
use tracing::warn;

mod cli;
mod style;

use cli::{CommandCli, ResbenchCli};
use style::Style;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = ResbenchCli::parse();
    let global = GlobalOptions {
        quiet: cli.quiet,
        verbose: cli.verbose,
        trace: cli.trace,
        json: cli.json,
    };
    init_tracing(&global);

    let outcome = match run(&cli.command) {
        Ok(outcome) => outcome,
        Err(err) => ExecutionOutcome::failure(
            "unexpected error",
            json!({ "reason": format!("{err:#}") }),
        ),
    };
    let code = emit_output(&cli, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(global: &GlobalOptions) {
    let level = if global.trace {
        "trace"
    } else if global.quiet {
        "error"
    } else {
        match global.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("resbench={level},resbench_core={level},resbench_domain={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn run(command: &CommandCli) -> anyhow::Result<ExecutionOutcome> {
    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            return Ok(ExecutionOutcome::user_error(
                "invalid configuration",
                json!({ "reason": format!("{err:#}") }),
            ))
        }
    };
    match command {
        CommandCli::Fetch(args) => {
            if let Some(dir) = &args.cache_dir {
                config.set_cache_path(dir.clone());
            }
            if let Some(jobs) = args.jobs {
                config.set_jobs(usize::try_from(jobs).unwrap_or(usize::MAX));
            }
            if let Some(seconds) = args.time_budget {
                config.set_time_budget(Some(Duration::from_secs(seconds)));
            }
            let ctx = context(config);
            resbench_core::fetch(
                &ctx,
                &FetchRequest {
                    roots: args.roots.clone(),
                    sdists_file: args.sdists_file.clone(),
                    output: args.output.clone(),
                },
            )
        }
        CommandCli::Wheels(args) => resbench_core::wheels(&WheelsRequest {
            scenario: args.scenario.clone(),
            output_dir: args.output_dir.clone(),
        }),
        CommandCli::Bench(args) => {
            // The time budget bounds traversal only.
            config.set_time_budget(None);
            let ctx = context(config);
            resbench_core::bench(
                &ctx,
                &BenchRequest {
                    scenario: args.scenario.clone(),
                    wheelhouse: args.wheelhouse.clone(),
                    warmups: args.warmups,
                    runs: args.runs,
                },
            )
        }
        CommandCli::Check(args) => resbench_core::check(&CheckRequest {
            scenario: args.scenario.clone(),
        }),
    }
}

/// Builds the command context and routes Ctrl-C to its cancel token.
fn context(config: Config) -> CommandContext {
    let cancel = CancelToken::new().with_budget(config.traversal().time_budget);
    let handle = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || handle.cancel()) {
        warn!(%err, "failed to install Ctrl-C handler");
    }
    CommandContext::new(config, cancel)
}

fn emit_output(cli: &ResbenchCli, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = outcome.status.exit_code();
    let name = cli.command.name();

    if cli.json {
        let payload = resbench_core::to_json_response(name, outcome);
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(code);
    }

    let style = Style::new(cli.no_color, atty::is(Stream::Stdout));
    let message = resbench_core::format_status_message(name, &outcome.message);
    if outcome.status == CommandStatus::Ok {
        if !cli.quiet {
            println!("{}", style.status(&outcome.status, &message));
            for line in diagnostics_from_details(&outcome.details) {
                println!("{}", style.note(line));
            }
            if let Some(hint) = outcome.hint() {
                println!("{}", style.info(&format!("Hint: {hint}")));
            }
        }
    } else {
        let style = Style::new(cli.no_color, atty::is(Stream::Stderr));
        eprintln!("{}", style.status(&outcome.status, &message));
        if let Some(reason) = outcome.details.get("reason").and_then(Value::as_str) {
            eprintln!("  {reason}");
        }
        if let Some(hint) = outcome.hint() {
            eprintln!("{}", style.info(&format!("Hint: {hint}")));
        }
    }

    Ok(code)
}

fn diagnostics_from_details(details: &Value) -> Vec<&str> {
    details
        .get("diagnostics")
        .and_then(Value::as_array)
        .map(|lines| lines.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}
